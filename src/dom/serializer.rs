//! 节点序列化
//!
//! 为竞技场节点实现 html5ever 的 `Serialize`，复用其转义与空元素规则。

use std::io;

use html5ever::serialize::{serialize, Serialize, SerializeOpts, Serializer, TraversalScope};
use html5ever::QualName;

use super::node::{Document, NodeData, NodeId};

/// 可序列化的节点引用
pub struct SerializableNode<'a> {
    doc: &'a Document,
    node: NodeId,
}

impl<'a> SerializableNode<'a> {
    pub fn new(doc: &'a Document, node: NodeId) -> Self {
        Self { doc, node }
    }
}

enum SerializeOp {
    Open(NodeId),
    Close(QualName),
}

impl Serialize for SerializableNode<'_> {
    fn serialize<S>(&self, serializer: &mut S, traversal_scope: TraversalScope) -> io::Result<()>
    where
        S: Serializer,
    {
        let doc = self.doc;
        let mut ops = match traversal_scope {
            TraversalScope::IncludeNode => vec![SerializeOp::Open(self.node)],
            TraversalScope::ChildrenOnly(_) => doc
                .children(self.node)
                .iter()
                .rev()
                .map(|&child| SerializeOp::Open(child))
                .collect(),
        };

        while let Some(op) = ops.pop() {
            match op {
                SerializeOp::Open(node) => match doc.data(node) {
                    NodeData::Element { name, attrs, .. } => {
                        serializer.start_elem(
                            name.clone(),
                            attrs.iter().map(|at| (&at.name, &at.value[..])),
                        )?;

                        ops.push(SerializeOp::Close(name.clone()));
                        for &child in doc.children(node).iter().rev() {
                            ops.push(SerializeOp::Open(child));
                        }
                    }
                    NodeData::Doctype { name } => serializer.write_doctype(name)?,
                    NodeData::Text { contents } => serializer.write_text(contents)?,
                    NodeData::Comment { contents } => serializer.write_comment(contents)?,
                    NodeData::Document => {
                        for &child in doc.children(node).iter().rev() {
                            ops.push(SerializeOp::Open(child));
                        }
                    }
                },
                SerializeOp::Close(name) => serializer.end_elem(name)?,
            }
        }

        Ok(())
    }
}

fn serialize_node(doc: &Document, node: NodeId, traversal_scope: TraversalScope) -> String {
    let mut buf: Vec<u8> = Vec::new();
    let opts = SerializeOpts {
        traversal_scope,
        ..Default::default()
    };

    if let Err(e) = serialize(&mut buf, &SerializableNode::new(doc, node), opts) {
        tracing::error!("节点序列化失败: {}", e);
    }

    String::from_utf8_lossy(&buf).into_owned()
}

impl Document {
    /// 子节点的 HTML
    pub fn inner_html(&self, node: NodeId) -> String {
        match self.data(node) {
            NodeData::Text { contents } => contents.clone(),
            _ => serialize_node(self, node, TraversalScope::ChildrenOnly(None)),
        }
    }

    /// 包含节点自身的 HTML
    pub fn outer_html(&self, node: NodeId) -> String {
        match self.data(node) {
            NodeData::Document => self.inner_html(node),
            _ => serialize_node(self, node, TraversalScope::IncludeNode),
        }
    }
}
