//! 排队、提交与响应关联

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::classifier::{Verdict, WalkContext};
use super::{InPageTranslation, PendingEntry, QueuedEntry, TranslatedEntry};
use crate::dom::{Document, NodeId};

/// 请求优先级，数值越小越优先
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    InViewport = 1,
    OutOfViewport = 2,
    Hidden = 3,
}

impl Priority {
    /// 根据可见性与视口计算优先级
    pub fn of(doc: &Document, node: NodeId) -> Self {
        if !doc.is_visible(node) {
            Priority::Hidden
        } else if doc.is_in_viewport(node) {
            Priority::InViewport
        } else {
            Priority::OutOfViewport
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::InViewport),
            2 => Ok(Priority::OutOfViewport),
            3 => Ok(Priority::Hidden),
            other => Err(format!("无效的优先级: {}", other)),
        }
    }
}

/// 发往翻译后端的片段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRequest {
    pub id: u64,
    pub text: String,
    pub html: bool,
    pub priority: Priority,
}

/// 后端对片段的响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentResponse {
    pub id: u64,
    pub result: Result<String, String>,
}

impl FragmentResponse {
    pub fn ok(id: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            result: Ok(text.into()),
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Err(message.into()),
        }
    }
}

/// 响应处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// 没有对应的等待节点（已被变更取消或引擎已停止）
    Discarded,
    /// 后端返回错误，由调度器决定如何呈现
    Failed(String),
    /// 译文已排队等待合并
    Accepted,
}

impl InPageTranslation {
    /// 队列层面的判定：已处理、已在进行中或祖先已在进行中的节点直接拒绝
    pub(crate) fn validate_node_for_queue(
        &self,
        doc: &Document,
        node: NodeId,
        context: WalkContext,
    ) -> (Verdict, &'static str) {
        if self.processed.contains(&node) {
            return (Verdict::Reject, "rejected is-processed");
        }

        if self.is_in_flight(node) || self.is_parent_queued(doc, node) {
            return (Verdict::Reject, "rejected is-parent-translating");
        }

        match &self.classifier {
            Some(classifier) => classifier.validate_with_reason(doc, node, context),
            None => (Verdict::Reject, "rejected not-started"),
        }
    }

    pub(crate) fn is_parent_queued(&self, doc: &Document, node: NodeId) -> bool {
        doc.ancestors(node).any(|parent| self.is_in_flight(parent))
    }

    /// 分配编号、计算优先级、记录原文并排队
    pub(crate) fn enqueue_translation(&mut self, doc: &mut Document, node: NodeId) {
        // 祖先优先：已在进行中的后代让位
        for descendant in doc.descendants(node) {
            if self.is_in_flight(descendant) {
                self.cancel(descendant);
            }
        }

        self.translations_counter += 1;
        let id = self.translations_counter;
        let priority = Priority::of(doc, node);

        self.record_element(doc, node);
        self.mark_state(doc, node, &format!("queued {}", id));

        self.queued.push(QueuedEntry { node, id, priority });
        self.queued_nodes.insert(node);
    }

    /// 提交全部排队节点，同一轮内按优先级分组
    pub(crate) fn dispatch_translations(&mut self, doc: &mut Document) {
        let mut queued = std::mem::take(&mut self.queued);
        self.queued_nodes.clear();

        queued.sort_by_key(|entry| entry.priority);

        for entry in queued {
            self.submit_translation(doc, entry);
        }
    }

    fn submit_translation(&mut self, doc: &mut Document, entry: QueuedEntry) {
        let QueuedEntry { node, id, priority } = entry;

        let elements: Vec<NodeId> = doc
            .descendants(node)
            .into_iter()
            .filter(|&descendant| doc.is_element(descendant))
            .collect();

        // 为后代元素注入位置标识，译文据此与页面元素重新对应
        for (index, &element) in elements.iter().enumerate() {
            doc.set_attr(element, &self.config.positional_id_attr, &index.to_string());
        }

        let html = doc.is_element(node) && !elements.is_empty();
        let text = if html {
            doc.inner_html(node)
        } else {
            doc.text_content(node)
        };

        if text.trim().is_empty() {
            return;
        }

        let request = FragmentRequest {
            id,
            text,
            html,
            priority,
        };

        if self.requests.send(request).is_err() {
            tracing::warn!("翻译请求通道已关闭，片段 {} 未发送", id);
            return;
        }

        self.pending.insert(id, PendingEntry { node, html });
        self.submitted.insert(node, id);

        // 内容不变时不再提交
        self.processed.insert(node);
    }

    /// 关联响应；成功的译文等待下一次批量合并
    pub fn enqueue_translation_response(
        &mut self,
        response: FragmentResponse,
        now: Instant,
    ) -> FragmentOutcome {
        let Some(entry) = self.pending.remove(&response.id) else {
            tracing::debug!("消息 {} 没有对应的等待节点", response.id);
            return FragmentOutcome::Discarded;
        };

        self.submitted.remove(&entry.node);

        let translated = match response.result {
            Ok(translated) => translated,
            Err(error) => {
                tracing::debug!("翻译请求 {} 返回错误: {}", response.id, error);
                return FragmentOutcome::Failed(error);
            }
        };

        self.translated.push(TranslatedEntry {
            node: entry.node,
            id: response.id,
            translated,
            html: entry.html,
        });

        // 最后一个响应到达时立即合并
        if self.submitted.is_empty() {
            self.update_timer.rearm(now, Duration::ZERO);
        } else {
            self.update_timer.arm(now, self.config.ui_update_interval());
        }

        FragmentOutcome::Accepted
    }
}
