//! HTML 解析
//!
//! 先用 html5ever 解析成 `RcDom`，再导入竞技场。

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData as RcNodeData, RcDom};

use super::node::{Document, Layout, NodeData, NodeId};

/// 根据名称获取 rcdom 子节点
fn get_child_node_by_name(parent: &Handle, node_name: &str) -> Option<Handle> {
    let children = parent.children.borrow();
    children
        .iter()
        .find(|child| match child.data {
            RcNodeData::Element { ref name, .. } => &*name.local == node_name,
            _ => false,
        })
        .cloned()
}

fn parse_rcdom(html: &str) -> RcDom {
    parse_document(RcDom::default(), Default::default()).one(html)
}

impl Document {
    /// 解析完整的 HTML 文档
    pub fn parse(html: &str) -> Document {
        let dom = parse_rcdom(html);
        let mut doc = Document::new();
        let root = doc.root();

        for child in dom.document.children.borrow().iter() {
            doc.import_handle(child, root);
        }

        doc
    }

    /// 把片段当作完整文档解析，并把其 `<body>` 作为游离子树导入本文档
    ///
    /// 返回的 body 元素不挂在树上，导入过程不产生变更记录。
    pub fn parse_detached_body(&mut self, html: &str) -> NodeId {
        let dom = parse_rcdom(html);
        let body = self.create_element("body");

        let source = get_child_node_by_name(&dom.document, "html")
            .and_then(|html| get_child_node_by_name(&html, "body"));

        if let Some(source) = source {
            for child in source.children.borrow().iter() {
                self.import_handle(child, body);
            }
        }

        body
    }

    /// 导入 rcdom 子树并挂到 `parent` 下（不经过变更通知）
    fn import_handle(&mut self, handle: &Handle, parent: NodeId) {
        let mut stack = vec![(handle.clone(), parent)];

        while let Some((current, parent)) = stack.pop() {
            let data = match &current.data {
                RcNodeData::Document | RcNodeData::ProcessingInstruction { .. } => continue,
                RcNodeData::Doctype { name, .. } => NodeData::Doctype {
                    name: name.to_string(),
                },
                RcNodeData::Text { contents } => NodeData::Text {
                    contents: contents.borrow().to_string(),
                },
                RcNodeData::Comment { contents } => NodeData::Comment {
                    contents: contents.to_string(),
                },
                RcNodeData::Element { name, attrs, .. } => NodeData::Element {
                    name: name.clone(),
                    attrs: attrs.borrow().clone(),
                    layout: Layout::default(),
                },
            };

            let node = self.alloc(data);
            self.slots[node.index()].parent = Some(parent);
            self.slots[parent.index()].children.push(node);

            for child in current.children.borrow().iter().rev() {
                stack.push((child.clone(), node));
            }
        }
    }
}
