//! 变更响应
//!
//! 页面脚本对已观察子树的修改会让进行中的请求失效。这里负责：
//! 1. 让原文快照跟上页面的修改
//! 2. 取消受影响的请求并记录需要重新遍历的根
//! 3. 在短暂的去抖之后对这些根重新运行分类遍历

use std::time::Instant;

use super::classifier::{walk_tree, WalkContext};
use super::restore::OriginalContent;
use super::InPageTranslation;
use crate::dom::{Document, MutationKind, NodeId};

/// 从变更记录中提取的待处理节点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MutatedEntry {
    Added(NodeId),
    Changed(NodeId),
    Removed(NodeId),
}

impl InPageTranslation {
    /// 取走全部变更记录并增量更新快照
    pub(crate) fn absorb_records(&mut self, doc: &mut Document) -> Vec<MutatedEntry> {
        let records = doc.take_records();
        let mut entries = Vec::new();

        for record in records {
            match record.kind {
                MutationKind::ChildList {
                    added,
                    removed,
                    previous_sibling,
                    next_sibling,
                } => {
                    for &node in &removed {
                        self.splice_out(record.target, node);
                        self.restore_element(doc, node);
                    }

                    for &node in &added {
                        self.splice_in(record.target, node, previous_sibling, next_sibling);
                        entries.push(MutatedEntry::Added(node));
                    }

                    if !removed.is_empty() {
                        entries.push(MutatedEntry::Removed(record.target));
                    }
                }
                MutationKind::CharacterData => {
                    if let Some(OriginalContent::Text(snapshot)) = self.original.get_mut(&record.target) {
                        snapshot.clear();
                        snapshot.push_str(doc.text(record.target).unwrap_or_default());
                    }
                    entries.push(MutatedEntry::Changed(record.target));
                }
            }
        }

        entries
    }

    fn splice_out(&mut self, parent: NodeId, node: NodeId) {
        if let Some(OriginalContent::Children(children)) = self.original.get_mut(&parent) {
            children.retain(|&child| child != node);
        }
    }

    fn splice_in(
        &mut self,
        parent: NodeId,
        node: NodeId,
        previous_sibling: Option<NodeId>,
        next_sibling: Option<NodeId>,
    ) {
        let Some(OriginalContent::Children(children)) = self.original.get_mut(&parent) else {
            return;
        };

        if children.contains(&node) {
            return;
        }

        let after = previous_sibling.and_then(|sibling| children.iter().position(|&c| c == sibling));
        let before = next_sibling.and_then(|sibling| children.iter().position(|&c| c == sibling));

        match (after, before, previous_sibling) {
            (Some(index), _, _) => children.insert(index + 1, node),
            (None, Some(index), _) => children.insert(index, node),
            (None, None, None) => children.insert(0, node),
            (None, None, Some(_)) => children.push(node),
        }
    }

    /// 处理积压的变更；未启动时只更新快照
    pub(crate) fn process_mutations(&mut self, doc: &mut Document, now: Instant) {
        let entries = self.absorb_records(doc);

        if !self.started {
            return;
        }

        for entry in entries {
            match entry {
                MutatedEntry::Added(node) | MutatedEntry::Changed(node) => {
                    self.enqueue_mutated_node(doc, node, now);
                }
                MutatedEntry::Removed(target) => {
                    if self.is_in_flight(target) || self.is_parent_queued(doc, target) {
                        self.enqueue_mutated_node(doc, target, now);
                    }
                }
            }
        }
    }

    /// 取消包含该节点的进行中请求，并安排重新遍历
    pub(crate) fn enqueue_mutated_node(&mut self, doc: &Document, node: NodeId, now: Instant) {
        if doc.text(node).is_some_and(|text| text.trim().is_empty()) {
            return;
        }

        let root = std::iter::once(node)
            .chain(doc.ancestors(node))
            .find(|&candidate| self.is_in_flight(candidate))
            .unwrap_or(node);

        if self.is_in_flight(root) {
            self.cancel(root);
        }
        self.processed.remove(&node);

        if self.mutated.iter().any(|&scheduled| doc.contains(scheduled, root)) {
            return;
        }

        self.mutated.retain(|&scheduled| !doc.contains(root, scheduled));
        self.mutated.push(root);

        self.restart_timer.arm(now, self.config.restart_interval());
    }

    /// 去抖计时器到期：对收集到的根重新遍历
    pub(crate) fn restart_tree_walker(&mut self, doc: &mut Document) {
        let roots = std::mem::take(&mut self.mutated);
        tracing::debug!("重新遍历 {} 个变更根", roots.len());

        for root in roots {
            self.walk_root(doc, root);
        }

        self.dispatch_translations(doc);
    }

    /// 遍历单个根并立即提交
    pub(crate) fn start_tree_walker(&mut self, doc: &mut Document, root: NodeId) {
        self.walk_root(doc, root);
        self.dispatch_translations(doc);
    }

    fn walk_root(&mut self, doc: &mut Document, root: NodeId) {
        if !doc.is_connected(root) || !(doc.is_element(root) || doc.is_text(root)) {
            return;
        }

        let Some(context) = self.ancestor_context(doc, root) else {
            return;
        };

        if doc.is_text(root) {
            if !context.is_excluded_tree && self.is_text_translatable(doc, root) {
                self.enqueue_translation(doc, root);
            }
            return;
        }

        let mut marks: Vec<(NodeId, &'static str)> = Vec::new();
        let accepted = walk_tree(doc, root, context, |doc, node, context| {
            let (verdict, reason) = self.validate_node_for_queue(doc, node, context);
            marks.push((node, reason));
            verdict
        });

        for (node, reason) in marks {
            self.mark(doc, node, reason);
        }

        for node in accepted {
            self.enqueue_translation(doc, node);
        }
    }

    /// 新插入的子树从页面祖先继承的遍历上下文；祖先被排除时返回 `None`
    fn ancestor_context(&self, doc: &Document, root: NodeId) -> Option<WalkContext> {
        let mut context = WalkContext::default();

        if self.targets.contains(&root) {
            return Some(context);
        }

        let classifier = self.classifier.as_ref()?;
        let document_element = doc.document_element();
        let mut decided = false;

        for ancestor in doc.ancestors(root) {
            if ancestor == doc.root() || Some(ancestor) == document_element {
                break;
            }

            if classifier.is_excluded_node(doc, ancestor) {
                return None;
            }

            if decided {
                continue;
            }

            if classifier.is_included_tree(doc, ancestor) {
                decided = true;
            } else if classifier.is_excluded_tree(doc, ancestor) {
                context.is_excluded_tree = true;
                decided = true;
            }
        }

        Some(context)
    }

    fn is_text_translatable(&self, doc: &Document, node: NodeId) -> bool {
        let Some(classifier) = self.classifier.as_ref() else {
            return false;
        };

        !self.processed.contains(&node)
            && !self.is_in_flight(node)
            && !self.is_parent_queued(doc, node)
            && classifier.has_content(doc, node)
    }
}
