//! 页面内翻译引擎
//!
//! 引擎决定文档中哪些片段需要翻译，把它们作为带优先级、可取消的请求发出，
//! 按节点身份跟踪进行中的请求，把异步返回的译文合并回活动文档而不破坏节点身份，
//! 并且可以完整地回滚到原文。
//!
//! 引擎不拥有文档，所有操作都以 `&mut Document` 为参数；时间通过 `now` 显式传入，
//! 由宿主在 `next_deadline()` 到达时调用 `tick()`。
//!
//! 子模块：
//! - `classifier`：节点分类
//! - `queue`：排队、提交与响应关联
//! - `reactor`：变更响应与重新遍历
//! - `reconciler`：译文合并
//! - `restore`：原文快照与回滚

pub mod classifier;
pub mod queue;
pub mod reactor;
pub mod reconciler;
pub mod restore;

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::constants::{DEBUG_STATE_ATTR, DEBUG_VERDICT_ATTR};
use crate::config::EngineConfig;
use crate::dom::{Document, NodeId};
use crate::timer::SingleShotTimer;

pub use classifier::{canonicalize_language, is_same_language, walk_tree, Classifier, Verdict, WalkContext};
pub use queue::{FragmentOutcome, FragmentRequest, FragmentResponse, Priority};
pub use reconciler::{MergeReport, Reconciler};
pub use restore::OriginalContent;

/// 已接受、尚未提交的节点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueuedEntry {
    pub(crate) node: NodeId,
    pub(crate) id: u64,
    pub(crate) priority: Priority,
}

/// 已提交、等待响应的节点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingEntry {
    pub(crate) node: NodeId,
    pub(crate) html: bool,
}

/// 已收到译文、等待合并的节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TranslatedEntry {
    pub(crate) node: NodeId,
    pub(crate) id: u64,
    pub(crate) translated: String,
    pub(crate) html: bool,
}

/// 单个页面的翻译引擎
pub struct InPageTranslation {
    config: EngineConfig,
    classifier: Option<Classifier>,
    reconciler: Reconciler,
    requests: UnboundedSender<FragmentRequest>,

    translations_counter: u64,
    started: bool,

    queued: Vec<QueuedEntry>,
    queued_nodes: HashSet<NodeId>,
    pending: HashMap<u64, PendingEntry>,
    submitted: HashMap<NodeId, u64>,
    translated: Vec<TranslatedEntry>,
    processed: HashSet<NodeId>,
    targets: Vec<NodeId>,
    original: HashMap<NodeId, OriginalContent>,
    mutated: Vec<NodeId>,

    update_timer: SingleShotTimer,
    restart_timer: SingleShotTimer,
}

impl InPageTranslation {
    /// 创建引擎；翻译请求从 `requests` 发出
    pub fn new(config: EngineConfig, requests: UnboundedSender<FragmentRequest>) -> Self {
        Self {
            reconciler: Reconciler::new(&config),
            config,
            classifier: None,
            requests,
            translations_counter: 0,
            started: false,
            queued: Vec::new(),
            queued_nodes: HashSet::new(),
            pending: HashMap::new(),
            submitted: HashMap::new(),
            translated: Vec::new(),
            processed: HashSet::new(),
            targets: Vec::new(),
            original: HashMap::new(),
            mutated: Vec::new(),
            update_timer: SingleShotTimer::new(),
            restart_timer: SingleShotTimer::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// 最近一次 `start` 使用的页面语言
    pub fn language(&self) -> Option<&str> {
        self.classifier.as_ref().map(Classifier::language)
    }

    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    /// 注册需要保持翻译的根元素；已启动时立即遍历并开始观察
    pub fn add_element(&mut self, doc: &mut Document, node: NodeId) {
        if !doc.is_element(node) || self.targets.contains(&node) {
            return;
        }

        self.targets.push(node);

        if self.started {
            self.start_tree_walker(doc, node);
            doc.observe(node);
        }
    }

    /// 启动（或恢复）翻译
    pub fn start(&mut self, doc: &mut Document, language: &str) {
        if self.started {
            return;
        }

        self.started = true;
        self.classifier = Some(Classifier::new(&self.config, language));
        tracing::info!("页面内翻译启动，页面语言: {}", language);

        for target in self.targets.clone() {
            self.start_tree_walker(doc, target);
        }

        // stop() 之后重新排队的节点
        self.dispatch_translations(doc);

        self.observe_targets(doc);
    }

    /// 停止翻译：停止观察，进行中的请求视为丢失并重新排队，以便之后恢复
    pub fn stop(&mut self, doc: &mut Document) {
        if !self.started {
            return;
        }

        self.started = false;

        // 先让快照跟上页面已经做出的修改
        self.absorb_records(doc);
        doc.disconnect();

        self.submitted.clear();

        let mut pending: Vec<(u64, PendingEntry)> = self.pending.drain().collect();
        pending.sort_by_key(|(id, _)| *id);
        for (_, entry) in pending {
            self.processed.remove(&entry.node);
            self.enqueue_translation(doc, entry.node);
        }

        self.translated.clear();
        self.update_timer.cancel();

        self.mutated.clear();
        self.restart_timer.cancel();

        tracing::info!("页面内翻译停止，{} 个片段重新排队", self.queued.len());
    }

    /// 因错误中断：先合并已经收到的译文再停止，已翻译的内容保留在页面上
    pub fn halt(&mut self, doc: &mut Document, now: Instant) -> Vec<MergeReport> {
        if !self.started {
            return Vec::new();
        }

        let reports = if self.translated.is_empty() {
            Vec::new()
        } else {
            self.update_elements(doc, now)
        };
        self.stop(doc);

        reports
    }

    /// 处理变更记录并触发到期的计时器，返回本次合并的报告
    pub fn tick(&mut self, doc: &mut Document, now: Instant) -> Vec<MergeReport> {
        if !self.started {
            return Vec::new();
        }

        self.process_mutations(doc, now);

        if self.restart_timer.fire(now) {
            self.restart_tree_walker(doc);
        }

        if self.update_timer.fire(now) {
            return self.update_elements(doc, now);
        }

        Vec::new()
    }

    /// 最近的计时器截止时间
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.update_timer.deadline(), self.restart_timer.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn translated_count(&self) -> usize {
        self.translated.len()
    }

    pub fn is_queued(&self, node: NodeId) -> bool {
        self.queued_nodes.contains(&node)
    }

    pub fn is_pending(&self, node: NodeId) -> bool {
        self.submitted.contains_key(&node)
    }

    pub fn is_processed(&self, node: NodeId) -> bool {
        self.processed.contains(&node)
    }

    pub fn has_snapshot(&self, node: NodeId) -> bool {
        self.original.contains_key(&node)
    }

    /// 等待响应的请求编号与节点
    pub fn pending_requests(&self) -> Vec<(u64, NodeId)> {
        let mut requests: Vec<(u64, NodeId)> = self
            .pending
            .iter()
            .map(|(&id, entry)| (id, entry.node))
            .collect();
        requests.sort_by_key(|(id, _)| *id);
        requests
    }

    /// 节点是否处于排队、等待响应或等待合并之一
    pub(crate) fn is_in_flight(&self, node: NodeId) -> bool {
        self.queued_nodes.contains(&node)
            || self.submitted.contains_key(&node)
            || self.translated.iter().any(|entry| entry.node == node)
    }

    /// 取消节点的全部进行中状态并清除已处理标记
    pub(crate) fn cancel(&mut self, node: NodeId) {
        if self.queued_nodes.remove(&node) {
            self.queued.retain(|entry| entry.node != node);
        }

        if let Some(id) = self.submitted.remove(&node) {
            self.pending.remove(&id);
            tracing::debug!("取消进行中的翻译请求 {}", id);
        }

        self.translated.retain(|entry| entry.node != node);
        self.processed.remove(&node);
    }

    fn observe_targets(&self, doc: &mut Document) {
        for &target in &self.targets {
            doc.observe(target);
        }
    }

    /// 调试标记：遍历判定
    fn mark(&self, doc: &mut Document, node: NodeId, value: &str) {
        if self.config.debug_marks && doc.is_element(node) {
            doc.set_attr(node, DEBUG_VERDICT_ATTR, value);
        }
    }

    /// 调试标记：排队与合并状态
    fn mark_state(&self, doc: &mut Document, node: NodeId, value: &str) {
        if self.config.debug_marks && doc.is_element(node) {
            doc.set_attr(node, DEBUG_STATE_ATTR, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn engine() -> (InPageTranslation, mpsc::UnboundedReceiver<FragmentRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (InPageTranslation::new(EngineConfig::default(), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<FragmentRequest>) -> Vec<FragmentRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = rx.try_recv() {
            requests.push(request);
        }
        requests
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut doc = Document::parse("<body><p>Hello</p></body>");
        let body = doc.body().unwrap();
        let (mut engine, mut rx) = engine();

        engine.add_element(&mut doc, body);
        engine.start(&mut doc, "en");
        engine.start(&mut doc, "en");

        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(engine.language(), Some("en"));
    }

    #[test]
    fn test_add_element_after_start_walks_immediately() {
        let mut doc = Document::parse("<head><title>T</title></head><body><p>Hello</p></body>");
        let (mut engine, mut rx) = engine();
        engine.start(&mut doc, "en");
        assert!(drain(&mut rx).is_empty());

        let title = doc.title().unwrap();
        engine.add_element(&mut doc, title);

        let requests = drain(&mut rx);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].text, "T");
        assert!(doc.is_observing());
    }

    #[test]
    fn test_stop_requeues_pending_and_start_resumes() {
        let mut doc = Document::parse("<body><p>Hello</p></body>");
        let body = doc.body().unwrap();
        let p = doc.find_first("p").unwrap();
        let (mut engine, mut rx) = engine();

        engine.add_element(&mut doc, body);
        engine.start(&mut doc, "en");
        let first = drain(&mut rx);
        assert_eq!(first.len(), 1);

        engine.stop(&mut doc);
        assert_eq!(engine.pending_count(), 0);
        assert!(engine.is_queued(p));
        assert!(!doc.is_observing());

        // 旧请求的响应被丢弃
        let outcome = engine.enqueue_translation_response(
            FragmentResponse::ok(first[0].id, "Bonjour"),
            Instant::now(),
        );
        assert_eq!(outcome, FragmentOutcome::Discarded);

        engine.start(&mut doc, "en");
        let resumed = drain(&mut rx);
        assert_eq!(resumed.len(), 1);
        assert!(resumed[0].id > first[0].id);
        assert!(engine.is_pending(p));
    }

    #[test]
    fn test_halt_keeps_received_translations() {
        let mut doc = Document::parse("<body><p>Hallo</p><p>Welt</p></body>");
        let body = doc.body().unwrap();
        let (mut engine, mut rx) = engine();
        engine.add_element(&mut doc, body);
        engine.start(&mut doc, "de");
        let requests = drain(&mut rx);

        let now = Instant::now();
        engine.enqueue_translation_response(FragmentResponse::ok(requests[0].id, "Hello"), now);
        engine.halt(&mut doc, now);

        assert!(!engine.is_started());
        assert_eq!(doc.text_content(body), "HelloWelt");
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.queued_count(), 1);

        // 之后仍然可以完整回滚
        engine.restore(&mut doc);
        assert_eq!(doc.text_content(body), "HalloWelt");
    }

    #[test]
    fn test_next_deadline_tracks_both_timers() {
        let mut doc = Document::parse("<body><p>Hello</p><p>World</p></body>");
        let body = doc.body().unwrap();
        let (mut engine, mut rx) = engine();
        engine.add_element(&mut doc, body);
        engine.start(&mut doc, "en");
        assert_eq!(engine.next_deadline(), None);

        let requests = drain(&mut rx);
        let now = Instant::now();
        engine.enqueue_translation_response(FragmentResponse::ok(requests[0].id, "Hallo"), now);
        assert_eq!(engine.next_deadline(), Some(now + Duration::from_millis(500)));

        let p = doc.create_element("p");
        let text = doc.create_text("New");
        doc.append_child(p, text);
        doc.append_child(body, p);
        engine.tick(&mut doc, now);
        assert_eq!(engine.next_deadline(), Some(now + Duration::from_millis(20)));
    }
}
