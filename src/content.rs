//! 页面会话
//!
//! 内容侧的粘合层：持有页面文档、翻译引擎和页面状态的镜像，
//! 把调度器推送的状态变化转换为引擎的启动、停止与回滚，
//! 并按请求来源分发翻译响应。

use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::constants::{DEBUG_PAGE_ATTR, SELECTION_PRIORITY};
use crate::config::{ContentConfig, TranslateConfig};
use crate::dom::{Document, NodeId};
use crate::engine::{FragmentOutcome, FragmentRequest, FragmentResponse, InPageTranslation, MergeReport};
use crate::error::{TranslateError, TranslateResult};
use crate::scheduler::messages::{
    BackgroundMessage, ContentMessage, DetectLanguageData, RequestSource, RequestUser, TranslateRequestData,
    TranslateResponseData,
};
use crate::scheduler::{PageState, PageStatus, StateDiff};

/// 不参与语言检测样本的元素
const SAMPLE_SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template", "textarea"];

/// 选区翻译面板，只保留最新一次请求的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionPanel {
    request_id: Option<u64>,
    text: Option<String>,
    open: bool,
}

impl SelectionPanel {
    /// 为新请求打开面板，之前的结果作废
    pub fn show(&mut self, request_id: u64) {
        self.request_id = Some(request_id);
        self.text = None;
        self.open = true;
    }

    /// 接收响应；过期的响应返回 `false`
    pub fn accept(&mut self, request_id: u64, result: Result<String, String>) -> bool {
        if self.request_id != Some(request_id) {
            return false;
        }

        match result {
            Ok(text) => self.text = Some(text),
            Err(error) => {
                tracing::warn!("选区翻译失败: {}", error);
                self.close();
            }
        }

        true
    }

    pub fn close(&mut self) {
        self.request_id = None;
        self.text = None;
        self.open = false;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

/// 单个页面的内容侧会话
pub struct ContentScript {
    doc: Document,
    engine: InPageTranslation,
    fragments: UnboundedReceiver<FragmentRequest>,
    /// 语言对确定之前发出的片段
    deferred: Vec<FragmentRequest>,
    outbound: UnboundedSender<ContentMessage>,
    config: ContentConfig,

    state: PageState,

    selection: SelectionPanel,
    selection_text: Option<String>,
    selection_counter: u64,

    last_clicked: Option<NodeId>,
    outbound_target: Option<NodeId>,
}

impl ContentScript {
    /// 创建会话；发往后台的消息写入 `outbound`
    pub fn new(doc: Document, config: &TranslateConfig, outbound: UnboundedSender<ContentMessage>) -> Self {
        let (requests, fragments) = mpsc::unbounded_channel();

        Self {
            doc,
            engine: InPageTranslation::new(config.engine.clone(), requests),
            fragments,
            deferred: Vec::new(),
            outbound,
            config: config.content.clone(),
            state: PageState::default(),
            selection: SelectionPanel::default(),
            selection_text: None,
            selection_counter: 0,
            last_clicked: None,
            outbound_target: None,
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// 页面自身的脚本通过这里修改文档
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn engine(&self) -> &InPageTranslation {
        &self.engine
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    pub fn selection(&self) -> &SelectionPanel {
        &self.selection
    }

    pub fn outbound_target(&self) -> Option<NodeId> {
        self.outbound_target
    }

    /// 用户选中的文本
    pub fn set_selection(&mut self, text: Option<String>) {
        self.selection_text = text;
    }

    /// 用户最近点击的元素
    pub fn click(&mut self, node: NodeId) {
        self.last_clicked = Some(node);
    }

    /// 处理一条后台消息
    pub fn handle_message(&mut self, message: BackgroundMessage, now: Instant) -> TranslateResult<()> {
        match message {
            BackgroundMessage::Update(diff) => self.on_update(diff, now)?,
            BackgroundMessage::TranslateResponse(response) => self.on_translate_response(response, now),
            BackgroundMessage::TranslateSelection => self.translate_selection()?,
            BackgroundMessage::ShowOutboundTranslation => self.show_outbound_translation(),
        }

        self.forward_requests()
    }

    /// 驱动引擎的计时器
    pub fn tick(&mut self, now: Instant) -> TranslateResult<Vec<MergeReport>> {
        let reports = self.engine.tick(&mut self.doc, now);
        self.forward_requests()?;
        Ok(reports)
    }

    /// 下一次需要调用 `tick` 的时间；有未处理的变更记录时立即需要
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.engine.is_started() && self.doc.has_pending_records() {
            return Some(Instant::now());
        }

        self.engine.next_deadline()
    }

    /// 与后台的连接断开
    pub fn disconnect(&mut self) {
        tracing::info!("与后台的连接断开，停止页面内翻译");
        self.engine.stop(&mut self.doc);
    }

    fn send(&self, message: ContentMessage) -> TranslateResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| TranslateError::ChannelClosed("内容侧发往后台的通道已关闭".to_string()))
    }

    fn on_update(&mut self, diff: StateDiff, now: Instant) -> TranslateResult<()> {
        self.state.apply(&diff);

        if let Some(debug) = diff.debug {
            if let Some(html) = self.doc.document_element() {
                if debug {
                    self.doc.set_attr(html, DEBUG_PAGE_ATTR, "");
                } else {
                    self.doc.remove_attr(html, DEBUG_PAGE_ATTR);
                }
            }
        }

        match diff.state {
            Some(status) => self.on_status(status, now),
            None => Ok(()),
        }
    }

    fn on_status(&mut self, status: PageStatus, now: Instant) -> TranslateResult<()> {
        match status {
            PageStatus::PageLoading => self.send(ContentMessage::UpdateRequest(StateDiff::status(
                PageStatus::PageLoaded,
            ))),
            PageStatus::PageLoaded => self.send(ContentMessage::DetectLanguage(DetectLanguageData {
                url: self.state.url.clone().unwrap_or_default(),
                sample: self.language_sample(),
                suggested: self.suggested_languages(),
            })),
            PageStatus::TranslationInProgress => {
                let Some(from) = self.state.from.clone() else {
                    tracing::warn!("未知页面语言，无法开始翻译");
                    return Ok(());
                };

                if let Some(title) = self.doc.title() {
                    self.engine.add_element(&mut self.doc, title);
                }
                if let Some(body) = self.doc.body() {
                    self.engine.add_element(&mut self.doc, body);
                }
                self.engine.start(&mut self.doc, &from);
                Ok(())
            }
            PageStatus::TranslationFinished | PageStatus::DownloadingModels => Ok(()),
            PageStatus::TranslationError => {
                // 已合并的译文保留，未完成的片段留到下次开始
                self.engine.halt(&mut self.doc, now);
                self.discard_fragments();
                Ok(())
            }
            _ => {
                self.engine.restore(&mut self.doc);
                self.discard_fragments();
                Ok(())
            }
        }
    }

    fn on_translate_response(&mut self, response: TranslateResponseData, now: Instant) {
        let id = response.request.user.id;
        let result = response.result();

        match response.request.user.source {
            RequestSource::InPage => {
                let outcome = self
                    .engine
                    .enqueue_translation_response(FragmentResponse { id, result }, now);
                if let FragmentOutcome::Failed(error) = outcome {
                    tracing::debug!("片段 {} 翻译失败: {}", id, error);
                }
            }
            RequestSource::Selection => {
                if !self.selection.accept(id, result) {
                    tracing::debug!("丢弃过期的选区翻译 {}", id);
                }
            }
            RequestSource::Outbound => {
                tracing::debug!("收到出站翻译 {}", id);
            }
        }
    }

    fn translate_selection(&mut self) -> TranslateResult<()> {
        let Some(text) = self.selection_text.clone().filter(|text| !text.trim().is_empty()) else {
            tracing::debug!("没有选中的文本");
            return Ok(());
        };

        let (Some(from), Some(to)) = (self.state.from.clone(), self.state.to.clone()) else {
            tracing::warn!("语言对未知，忽略选区翻译");
            return Ok(());
        };

        self.selection_counter += 1;
        let id = self.selection_counter;
        self.selection.show(id);

        self.send(ContentMessage::TranslateRequest(TranslateRequestData {
            from,
            to,
            text,
            html: false,
            priority: SELECTION_PRIORITY,
            user: RequestUser {
                id,
                source: RequestSource::Selection,
            },
        }))
    }

    fn show_outbound_translation(&mut self) {
        match self.last_clicked {
            Some(node) if self.doc.is_connected(node) && !self.doc.is_content_editable(node) => {
                self.outbound_target = Some(node);
            }
            Some(_) => tracing::debug!("可编辑区域内不显示出站翻译"),
            None => tracing::debug!("没有可用的出站翻译目标"),
        }
    }

    /// 引擎停止后，尚未发出的片段不再有对应的等待项
    fn discard_fragments(&mut self) {
        while self.fragments.try_recv().is_ok() {}
        self.deferred.clear();
    }

    /// 把引擎发出的片段转换为翻译请求；语言对未知时暂存，确定后再发出
    fn forward_requests(&mut self) -> TranslateResult<()> {
        while let Ok(fragment) = self.fragments.try_recv() {
            self.deferred.push(fragment);
        }

        let (Some(from), Some(to)) = (self.state.from.clone(), self.state.to.clone()) else {
            if !self.deferred.is_empty() {
                tracing::debug!("语言对未知，暂存 {} 个片段", self.deferred.len());
            }
            return Ok(());
        };

        for fragment in std::mem::take(&mut self.deferred) {
            self.send(ContentMessage::TranslateRequest(TranslateRequestData {
                from: from.clone(),
                to: to.clone(),
                text: fragment.text,
                html: fragment.html,
                priority: fragment.priority.into(),
                user: RequestUser {
                    id: fragment.id,
                    source: RequestSource::InPage,
                },
            }))?;
        }

        Ok(())
    }

    /// 语言检测用的文本样本
    fn language_sample(&self) -> String {
        let Some(body) = self.doc.body() else {
            return String::new();
        };

        let mut sample = String::new();
        for node in self.doc.descendants(body) {
            let Some(text) = self.doc.text(node) else {
                continue;
            };

            let skipped = self
                .doc
                .parent(node)
                .and_then(|parent| self.doc.tag_name(parent))
                .is_some_and(|tag| SAMPLE_SKIP_TAGS.contains(&tag));
            if skipped || text.trim().is_empty() {
                continue;
            }

            if !sample.is_empty() {
                sample.push(' ');
            }
            sample.push_str(text.trim());

            if sample.chars().count() >= self.config.sample_size {
                break;
            }
        }

        sample.chars().take(self.config.sample_size).collect()
    }

    /// 页面声明的语言：`<html lang>` 与 `content-language` 元信息
    fn suggested_languages(&self) -> BTreeMap<String, f64> {
        let mut suggested = BTreeMap::new();

        if let Some(lang) = self
            .doc
            .document_element()
            .and_then(|html| self.doc.get_attr(html, "lang"))
        {
            if !lang.trim().is_empty() {
                suggested.insert(lang.trim().to_string(), 1.0);
            }
        }

        for meta in self.doc.find_all("meta") {
            let is_content_language = self
                .doc
                .get_attr(meta, "http-equiv")
                .is_some_and(|value| value.eq_ignore_ascii_case("content-language"));
            if !is_content_language {
                continue;
            }

            for lang in self.doc.get_attr(meta, "content").unwrap_or_default().split(',') {
                if !lang.trim().is_empty() {
                    suggested.insert(lang.trim().to_string(), 1.0);
                }
            }
        }

        suggested
    }
}
