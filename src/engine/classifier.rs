//! 节点分类
//!
//! 对每个节点给出接受、拒绝或跳过的判定。分类本身没有状态，
//! 只依赖当前文档树、标签规则和页面语言。

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::EngineConfig;
use crate::dom::{Document, NodeData, NodeId};

/// 遍历上下文，随 Skip 沿树向下传递
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkContext {
    pub is_excluded_tree: bool,
}

/// 分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// 整个子树作为一个翻译单元提交
    Accept,
    /// 节点及其全部后代都不翻译
    Reject,
    /// 节点本身不提交，但要继续检查其子元素
    Skip(WalkContext),
}

static LANGUAGE_TAG: OnceLock<Regex> = OnceLock::new();

fn language_tag_regex() -> &'static Regex {
    LANGUAGE_TAG.get_or_init(|| {
        Regex::new(
            r"^([a-zA-Z]{2,3}|[a-zA-Z]{5,8})(-[a-zA-Z]{4})?(-([a-zA-Z]{2}|[0-9]{3}))?(-([a-zA-Z0-9]{5,8}|[0-9][a-zA-Z0-9]{3}))*$",
        )
        .unwrap_or_else(|_| Regex::new(r"^$").unwrap())
    })
}

/// 规范化语言标签：语言小写、书写系统首字母大写、地区大写
///
/// 不符合标签格式时返回 `None`。
pub fn canonicalize_language(tag: &str) -> Option<String> {
    let tag = tag.trim();
    if !language_tag_regex().is_match(tag) {
        return None;
    }

    let canonical = tag
        .split('-')
        .enumerate()
        .map(|(i, part)| match (i, part.len()) {
            (0, _) => part.to_ascii_lowercase(),
            (_, 4) if part.chars().all(|c| c.is_ascii_alphabetic()) => {
                let mut chars = part.chars();
                chars
                    .next()
                    .map(|first| first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase())
                    .unwrap_or_default()
            }
            (_, 2) => part.to_ascii_uppercase(),
            _ => part.to_ascii_lowercase(),
        })
        .collect::<Vec<_>>()
        .join("-");

    Some(canonical)
}

/// `en-US` 与 `en` 相同，反之则不然：宽泛的语言代码不会被当成具体的地区变体
pub fn is_same_language(lang: &str, other: &str) -> bool {
    if lang == other {
        return true;
    }

    if lang.contains('-') && !other.contains('-') {
        return lang.split('-').next() == Some(other);
    }

    false
}

fn tag_set(tags: &[String]) -> HashSet<String> {
    tags.iter().map(|tag| tag.to_ascii_lowercase()).collect()
}

/// 节点分类器
#[derive(Debug, Clone)]
pub struct Classifier {
    language: String,
    excluded_tags: HashSet<String>,
    inline_tags: HashSet<String>,
    generic_tags: HashSet<String>,
    opt_out_class: String,
    opt_in_class: String,
}

impl Classifier {
    pub fn new(config: &EngineConfig, language: &str) -> Self {
        Self {
            language: canonicalize_language(language).unwrap_or_else(|| language.to_ascii_lowercase()),
            excluded_tags: tag_set(&config.excluded_tags),
            inline_tags: tag_set(&config.inline_tags),
            generic_tags: tag_set(&config.generic_tags),
            opt_out_class: config.opt_out_class.clone(),
            opt_in_class: config.opt_in_class.clone(),
        }
    }

    /// 页面语言（已规范化）
    pub fn language(&self) -> &str {
        &self.language
    }

    /// 节点自身的 `lang` 是否与页面语言一致；无效或缺失时为 `None`
    fn lang_matches(&self, doc: &Document, node: NodeId) -> Option<bool> {
        let lang = doc.get_attr(node, "lang").filter(|lang| !lang.is_empty())?;
        let canonical = canonicalize_language(lang)?;
        Some(is_same_language(&canonical, &self.language))
    }

    /// 排除标签或可编辑内容；文本节点永不排除
    pub fn is_excluded_node(&self, doc: &Document, node: NodeId) -> bool {
        let Some(tag) = doc.tag_name(node) else {
            return false;
        };

        self.excluded_tags.contains(tag) || doc.is_content_editable(node)
    }

    /// 子树被显式排除，但其中可能还有重新纳入的分支
    pub fn is_excluded_tree(&self, doc: &Document, node: NodeId) -> bool {
        if !doc.is_element(node) {
            return false;
        }

        self.lang_matches(doc, node) == Some(false)
            || doc.get_attr(node, "translate") == Some("no")
            || doc.has_class(node, &self.opt_out_class)
    }

    /// 子树被显式纳入
    pub fn is_included_tree(&self, doc: &Document, node: NodeId) -> bool {
        if !doc.is_element(node) {
            return false;
        }

        self.lang_matches(doc, node) == Some(true)
            || doc.get_attr(node, "translate") == Some("yes")
            || doc.has_class(node, &self.opt_in_class)
    }

    pub fn has_content(&self, doc: &Document, node: NodeId) -> bool {
        !doc.text_content(node).trim().is_empty()
    }

    /// 以子节点多数决判断节点是文本容器还是块容器，平局算行内
    pub fn has_inline_content(&self, doc: &Document, node: NodeId) -> bool {
        if doc.is_text(node) {
            return true;
        }

        let children = doc.children(node);
        let threshold = children.len() as f64 / 2.0;
        let mut inline_elements = 0usize;
        let mut block_elements = 0usize;

        for &child in children {
            match doc.data(child) {
                NodeData::Text { contents } => {
                    if !contents.trim().is_empty() {
                        inline_elements += 1;
                    }
                }
                NodeData::Element { name, .. } => {
                    let tag: &str = &name.local;
                    if self.inline_tags.contains(tag)
                        || (self.generic_tags.contains(tag) && self.has_inline_content(doc, child))
                    {
                        inline_elements += 1;
                    } else {
                        block_elements += 1;
                    }
                }
                _ => {}
            }

            if inline_elements as f64 > threshold || block_elements as f64 > threshold {
                break;
            }
        }

        inline_elements >= block_elements
    }

    /// 是否有非空白的直接文本子节点
    pub fn has_text_nodes(&self, doc: &Document, node: NodeId) -> bool {
        doc.is_element(node)
            && doc
                .children(node)
                .iter()
                .any(|&child| doc.text(child).map(|t| !t.trim().is_empty()).unwrap_or(false))
    }

    /// 后代中是否有不应整体提交的元素
    pub fn contains_excluded_node(&self, doc: &Document, node: NodeId) -> bool {
        if !doc.is_element(node) {
            return false;
        }

        doc.descendants(node).into_iter().any(|descendant| {
            let Some(tag) = doc.tag_name(descendant) else {
                return false;
            };

            let lang_mismatch = doc.get_attr(descendant, "lang").map(|lang| {
                let lang = lang.to_ascii_lowercase();
                !(lang == self.language.to_ascii_lowercase()
                    || lang.starts_with(&format!("{}-", self.language.to_ascii_lowercase())))
            });

            lang_mismatch == Some(true)
                || doc.get_attr(descendant, "translate") == Some("no")
                || doc.has_class(descendant, &self.opt_out_class)
                || doc.has_attr(descendant, "contenteditable")
                || self.excluded_tags.contains(tag)
        })
    }

    pub fn validate(&self, doc: &Document, node: NodeId, context: WalkContext) -> Verdict {
        self.validate_with_reason(doc, node, context).0
    }

    /// 判定并给出原因（调试标记用）
    pub fn validate_with_reason(
        &self,
        doc: &Document,
        node: NodeId,
        context: WalkContext,
    ) -> (Verdict, &'static str) {
        if self.is_excluded_node(doc, node) {
            return (Verdict::Reject, "rejected is-excluded-node");
        }

        let mut context = context;

        if !context.is_excluded_tree && self.is_excluded_tree(doc, node) {
            return (
                Verdict::Skip(WalkContext {
                    is_excluded_tree: true,
                }),
                "skipped is-excluded-tree",
            );
        }

        if context.is_excluded_tree {
            if !self.is_included_tree(doc, node) {
                return (Verdict::Skip(context), "skipped ~is-included-tree");
            }
            context.is_excluded_tree = false;
        }

        if !self.has_content(doc, node) {
            return (Verdict::Reject, "rejected empty-text-content");
        }

        if !self.has_inline_content(doc, node) {
            return (Verdict::Skip(context), "skipped does-not-have-text-of-its-own");
        }

        if self.contains_excluded_node(doc, node) && !self.has_text_nodes(doc, node) {
            return (Verdict::Skip(context), "skipped contains-excluded-node");
        }

        if context.is_excluded_tree {
            return (Verdict::Skip(context), "skipped is-excluded-tree");
        }

        (Verdict::Accept, "accepted")
    }
}

/// 从 `root` 开始按文档顺序遍历元素，返回被接受的节点
///
/// 遍历在 `root` 的下一个兄弟元素处停止。Skip 把当前帧压栈并以新上下文进入子元素，
/// Accept 与 Reject 都移到下一个兄弟元素。
pub fn walk_tree<F>(doc: &Document, root: NodeId, context: WalkContext, mut filter: F) -> Vec<NodeId>
where
    F: FnMut(&Document, NodeId, WalkContext) -> Verdict,
{
    let stop = doc.next_element_sibling(root);
    let mut accepted = Vec::new();
    let mut stack: Vec<(NodeId, WalkContext)> = Vec::new();
    let mut current = Some(root);
    let mut context = context;

    loop {
        let Some(node) = current else {
            match stack.pop() {
                Some((parent, parent_context)) => {
                    current = doc.next_element_sibling(parent);
                    context = parent_context;
                    continue;
                }
                None => break,
            }
        };

        if Some(node) == stop {
            break;
        }

        match filter(doc, node, context) {
            Verdict::Skip(child_context) => {
                stack.push((node, context));
                context = child_context;
                current = doc.first_element_child(node);
            }
            Verdict::Accept => {
                accepted.push(node);
                current = doc.next_element_sibling(node);
            }
            Verdict::Reject => {
                current = doc.next_element_sibling(node);
            }
        }
    }

    accepted
}
