//! 译文合并
//!
//! 把译文片段解析成游离子树，再按位置标识把它的结构套到活动节点上。
//! 活动节点只被移动而不被替换，页面持有的节点引用、焦点和监听器因此保持有效。

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use super::InPageTranslation;
use crate::config::EngineConfig;
use crate::dom::{Document, NodeData, NodeId};

/// 一次合并的诊断结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// 合并后没有父节点的原有元素
    pub lost: Vec<NodeId>,
    /// 因重复出现而被复制的位置标识
    pub cloned: Vec<String>,
    /// 没有被译文复用的原有文本节点
    pub unused_text: Vec<NodeId>,
    /// 在原文中找不到对应元素的译文元素
    pub unmatched: Vec<String>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.lost.is_empty() && self.cloned.is_empty() && self.unused_text.is_empty() && self.unmatched.is_empty()
    }

    fn absorb(&mut self, other: MergeReport) {
        self.lost.extend(other.lost);
        self.cloned.extend(other.cloned);
        self.unused_text.extend(other.unused_text);
        self.unmatched.extend(other.unmatched);
    }
}

/// 被摘下、等待重新挂回的活动子节点
#[derive(Debug, Default)]
struct LivePool {
    elements: HashMap<String, VecDeque<NodeId>>,
    wrappers: HashMap<String, VecDeque<NodeId>>,
    text: VecDeque<NodeId>,
    whitespace: VecDeque<NodeId>,
    comments: VecDeque<NodeId>,
    members: Vec<NodeId>,
    used: HashMap<String, NodeId>,
}

impl LivePool {
    fn take_element(&mut self, id: &str) -> Option<NodeId> {
        self.elements.get_mut(id)?.pop_front()
    }

    fn take_wrapper(&mut self, tag: &str) -> Option<NodeId> {
        self.wrappers.get_mut(tag)?.pop_front()
    }

    fn take_text(&mut self, whitespace: bool) -> Option<NodeId> {
        if whitespace {
            self.whitespace.pop_front()
        } else {
            self.text.pop_front()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    positional_id_attr: String,
    wrapper_tags: HashSet<String>,
}

impl Reconciler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            positional_id_attr: config.positional_id_attr.clone(),
            wrapper_tags: config
                .wrapper_tags
                .iter()
                .map(|tag| tag.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn positional_id_attr(&self) -> &str {
        &self.positional_id_attr
    }

    /// 把译文合并进 `node`；`html` 为假时译文按纯文本处理
    pub fn merge_translation(&self, doc: &mut Document, node: NodeId, translated: &str, html: bool) -> MergeReport {
        let scratch = if html {
            doc.parse_detached_body(translated)
        } else {
            let body = doc.create_element("body");
            let text = doc.create_text(translated);
            doc.append_child(body, text);
            body
        };

        let mut report = MergeReport::default();
        self.merge(doc, node, scratch, &mut report);

        // 被采用的节点已经移走，剩下的只属于这次合并
        doc.release(scratch);
        report
    }

    fn positional_id(&self, doc: &Document, node: NodeId) -> Option<String> {
        doc.get_attr(node, &self.positional_id_attr).map(str::to_string)
    }

    fn is_wrapper(&self, doc: &Document, node: NodeId) -> bool {
        doc.tag_name(node)
            .is_some_and(|tag| self.wrapper_tags.contains(tag))
    }

    /// 把 `src` 的子节点结构套到 `dst` 上
    fn merge(&self, doc: &mut Document, dst: NodeId, src: NodeId, report: &mut MergeReport) {
        let removed = doc.remove_all_children(dst);
        let mut pool = LivePool::default();
        self.fill_pool(doc, removed, &mut pool);

        let mut level = MergeReport::default();
        self.merge_children(doc, dst, src, &mut pool, &mut level);

        // 译文里没有对应位置的注释放回末尾
        for comment in pool.comments.drain(..) {
            doc.append_child(dst, comment);
        }

        for node in pool.text.iter().copied() {
            tracing::warn!("译文中没有对应的文本节点 {}: {:?}", node, doc.text(node).unwrap_or_default());
            level.unused_text.push(node);
        }

        for &member in &pool.members {
            if doc.parent(member).is_none() {
                tracing::warn!(
                    "合并后元素 {} <{}> 丢失",
                    member,
                    doc.tag_name(member).unwrap_or_default()
                );
                level.lost.push(member);
            }
        }

        report.absorb(level);
    }

    fn fill_pool(&self, doc: &mut Document, nodes: Vec<NodeId>, pool: &mut LivePool) {
        for node in nodes {
            if let Some(contents) = doc.text(node) {
                if contents.trim().is_empty() {
                    pool.whitespace.push_back(node);
                } else {
                    pool.text.push_back(node);
                }
                continue;
            }

            if matches!(doc.data(node), NodeData::Comment { .. }) {
                pool.comments.push_back(node);
                continue;
            }

            if !doc.is_element(node) {
                continue;
            }

            match self.positional_id(doc, node) {
                Some(id) => {
                    pool.elements.entry(id).or_default().push_back(node);
                    pool.members.push(node);
                }
                None if self.is_wrapper(doc, node) => {
                    let tag = doc.tag_name(node).unwrap_or_default().to_string();
                    pool.wrappers.entry(tag).or_default().push_back(node);
                    let inner = doc.remove_all_children(node);
                    self.fill_pool(doc, inner, pool);
                }
                None => pool.members.push(node),
            }
        }
    }

    fn merge_children(
        &self,
        doc: &mut Document,
        dst: NodeId,
        src: NodeId,
        pool: &mut LivePool,
        report: &mut MergeReport,
    ) {
        let children = doc.children(src).to_vec();

        let mut id_counts: HashMap<String, usize> = HashMap::new();
        for &child in &children {
            if let Some(id) = self.positional_id(doc, child) {
                *id_counts.entry(id).or_default() += 1;
            }
        }

        for child in children {
            match doc.data(child).clone() {
                NodeData::Element { .. } => {
                    if let Some(id) = self.positional_id(doc, child) {
                        let duplicated = id_counts.get(&id).copied().unwrap_or_default() > 1;
                        self.merge_element(doc, dst, child, &id, duplicated, pool, report);
                    } else if self.is_wrapper(doc, child) {
                        let tag = doc.tag_name(child).unwrap_or_default().to_string();
                        let wrapper = match pool.take_wrapper(&tag) {
                            Some(live) => live,
                            None => doc.clone_node(child, false),
                        };
                        doc.append_child(dst, wrapper);
                        self.merge_children(doc, wrapper, child, pool, report);
                    } else {
                        let tag = doc.tag_name(child).unwrap_or_default().to_string();
                        tracing::warn!("译文元素 <{}> 没有位置标识，已忽略", tag);
                        report.unmatched.push(tag);
                    }
                }
                NodeData::Text { contents } => {
                    match pool.take_text(contents.trim().is_empty()) {
                        Some(live) => {
                            if doc.text(live) != Some(contents.as_str()) {
                                doc.set_text(live, &contents);
                            }
                            doc.append_child(dst, live);
                        }
                        None => doc.append_child(dst, child),
                    }
                }
                NodeData::Comment { .. } => {
                    let comment = pool.comments.pop_front().unwrap_or(child);
                    doc.append_child(dst, comment);
                }
                NodeData::Document | NodeData::Doctype { .. } => {}
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_element(
        &self,
        doc: &mut Document,
        dst: NodeId,
        translated: NodeId,
        id: &str,
        duplicated: bool,
        pool: &mut LivePool,
        report: &mut MergeReport,
    ) {
        let (live, cloned) = match pool.take_element(id) {
            Some(live) => {
                pool.used.entry(id.to_string()).or_insert(live);
                (live, false)
            }
            None => match pool.used.get(id).copied() {
                Some(used) => {
                    tracing::debug!("位置标识 {} 重复出现，复制原有元素", id);
                    report.cloned.push(id.to_string());
                    (doc.clone_node(used, true), true)
                }
                None => {
                    tracing::warn!("位置标识 {} 在原文中没有对应元素", id);
                    report.unmatched.push(id.to_string());
                    return;
                }
            },
        };

        doc.append_child(dst, live);

        if !doc.text_content(translated).trim().is_empty() {
            self.merge(doc, live, translated, report);
        } else if !doc.text_content(live).trim().is_empty() {
            tracing::warn!("译文元素 {} 没有文本，原有元素有文本", id);
            if cloned && duplicated {
                remove_text_nodes(doc, live);
            }
        }
    }
}

/// 移除子树中的全部文本节点
fn remove_text_nodes(doc: &mut Document, node: NodeId) {
    for descendant in doc.descendants(node) {
        if doc.is_text(descendant) {
            if let Some(parent) = doc.parent(descendant) {
                doc.remove_child(parent, descendant);
                doc.release(descendant);
            }
        }
    }
}

impl InPageTranslation {
    /// 合并全部已收到的译文；合并期间暂停观察
    pub(crate) fn update_elements(&mut self, doc: &mut Document, now: Instant) -> Vec<MergeReport> {
        // 合并前的页面修改必须先处理，否则会被当成合并产生的修改
        self.process_mutations(doc, now);
        doc.disconnect();

        let entries = std::mem::take(&mut self.translated);
        let mut reports = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.translated.trim().is_empty() {
                tracing::warn!("请求 {} 的译文为空，保留原文", entry.id);
                continue;
            }

            if doc.is_text(entry.node) {
                doc.set_text(entry.node, &entry.translated);
            } else {
                let report = self
                    .reconciler
                    .merge_translation(doc, entry.node, &entry.translated, entry.html);
                if !report.is_clean() {
                    tracing::debug!("请求 {} 合并完成，存在差异: {:?}", entry.id, report);
                }
                reports.push(report);
            }

            self.mark_state(doc, entry.node, "translated");
        }

        self.update_timer.cancel();

        if self.started {
            self.observe_targets(doc);
        }

        reports
    }
}
