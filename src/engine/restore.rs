//! 原文快照与回滚

use super::InPageTranslation;
use crate::config::constants::{DEBUG_STATE_ATTR, DEBUG_VERDICT_ATTR};
use crate::dom::{Document, NodeData, NodeId};

/// 节点第一次排队前的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginalContent {
    /// 元素的原始子节点（按顺序）
    Children(Vec<NodeId>),
    /// 文本节点的原始字符数据
    Text(String),
}

impl InPageTranslation {
    /// 递归记录子树快照，已有快照的节点保持不变
    pub(crate) fn record_element(&mut self, doc: &Document, node: NodeId) {
        let mut stack = vec![node];

        while let Some(current) = stack.pop() {
            if self.original.contains_key(&current) {
                continue;
            }

            match doc.data(current) {
                NodeData::Text { contents } => {
                    self.original.insert(current, OriginalContent::Text(contents.clone()));
                }
                NodeData::Element { .. } => {
                    let children = doc.children(current).to_vec();
                    stack.extend(children.iter().rev().copied());
                    self.original.insert(current, OriginalContent::Children(children));
                }
                _ => {}
            }
        }
    }

    /// 自底向上恢复子树，并把节点从引擎的全部状态中移除
    pub(crate) fn restore_element(&mut self, doc: &mut Document, node: NodeId) {
        self.clear_marks(doc, node);

        let Some(original) = self.original.remove(&node) else {
            for child in doc.children(node).to_vec() {
                self.restore_element(doc, child);
            }
            return;
        };

        self.cancel(node);

        match original {
            OriginalContent::Children(children) => {
                // 合并中移走的子节点也要恢复，所以先恢复原始子节点再挂回
                for &child in &children {
                    self.restore_element(doc, child);
                }

                doc.remove_all_children(node);
                for child in children {
                    doc.append_child(node, child);
                }
            }
            OriginalContent::Text(text) => {
                if doc.text(node) != Some(text.as_str()) {
                    doc.set_text(node, &text);
                }
            }
        }
    }

    /// 移除提交时注入的位置标识和调试标记
    fn clear_marks(&self, doc: &mut Document, node: NodeId) {
        if doc.is_element(node) {
            doc.remove_attr(node, &self.config.positional_id_attr);
            doc.remove_attr(node, DEBUG_VERDICT_ATTR);
            doc.remove_attr(node, DEBUG_STATE_ATTR);
        }
    }

    /// 停止并把全部目标恢复为原文；之后的 `start` 从头开始
    pub fn restore(&mut self, doc: &mut Document) {
        self.stop(doc);

        for target in self.targets.clone() {
            self.restore_element(doc, target);
        }

        // 恢复产生的修改不需要再处理
        doc.take_records();

        self.original.clear();
        self.processed.clear();
        self.queued.clear();
        self.queued_nodes.clear();
        self.pending.clear();
        self.submitted.clear();
        self.translated.clear();

        tracing::info!("页面已恢复为原文");
    }
}
