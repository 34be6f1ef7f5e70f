//! 变更观察
//!
//! 与浏览器的 MutationObserver 相似：对已注册子树内的 childList 与
//! characterData 变更追加记录，由调用方在合适的时机取走。属性变更不记录。

use super::node::{Document, NodeId};

/// 变更类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
        previous_sibling: Option<NodeId>,
        next_sibling: Option<NodeId>,
    },
    CharacterData,
}

/// 单条变更记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
}

#[derive(Debug, Default)]
pub(crate) struct MutationObserver {
    roots: Vec<NodeId>,
    records: Vec<MutationRecord>,
}

impl Document {
    /// 观察以 `root` 为根的子树
    pub fn observe(&mut self, root: NodeId) {
        if !self.observer.roots.contains(&root) {
            self.observer.roots.push(root);
        }
    }

    /// 取消全部观察；尚未取走的记录保留
    pub fn disconnect(&mut self) {
        self.observer.roots.clear();
    }

    pub fn is_observing(&self) -> bool {
        !self.observer.roots.is_empty()
    }

    pub fn has_pending_records(&self) -> bool {
        !self.observer.records.is_empty()
    }

    /// 取走全部待处理记录
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.observer.records)
    }

    pub(super) fn notify(&mut self, record: MutationRecord) {
        if self.observer.roots.is_empty() {
            return;
        }

        let observed = std::iter::once(record.target)
            .chain(self.ancestors(record.target))
            .any(|node| self.observer.roots.contains(&node));

        if observed {
            self.observer.records.push(record);
        }
    }
}
