//! 页面调度器
//!
//! 每个标签页一个实例。把导航、用户开始/中止、语言检测结果和通道断开
//! 转换为页面状态的变化，并管理请求的中止信号代次：同一代的所有请求
//! 共享一个信号，中止后到达的响应在应用前被丢弃。
//!
//! 子模块：
//! - `state`：页面状态、差异与合并广播
//! - `detect`：语言对选择
//! - `messages`：消息协议

pub mod detect;
pub mod messages;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::SchedulerConfig;
use crate::error::{TranslateError, TranslateResult};

pub use detect::{detect_language, select_language_pair, LanguagePair, LanguageSummary};
pub use messages::{BackgroundMessage, ContentMessage, PopupMessage, RequestSource, WireMessage};
pub use state::{PageState, PageStatus, StateBroadcaster, StateDiff};

/// 中止信号，同一代的请求共享同一个实例
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 两个句柄是否属于同一代
    pub fn same_generation(&self, other: &AbortSignal) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// 同源：协议、主机与端口都相同；不透明源（如 `file:`）从不同源
fn is_same_origin(a: &str, b: &str) -> bool {
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(a), Ok(b)) => a.origin().is_tuple() && a.origin() == b.origin(),
        _ => false,
    }
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url).ok()?.host_str().map(str::to_string)
}

/// 单个页面的状态机
#[derive(Debug)]
pub struct PageScheduler {
    tab_id: u64,
    config: SchedulerConfig,
    state: PageState,
    broadcaster: StateBroadcaster,
    signal: AbortSignal,
}

impl PageScheduler {
    pub fn new(tab_id: u64, config: SchedulerConfig) -> Self {
        let state = PageState {
            debug: config.debug,
            ..Default::default()
        };

        Self {
            tab_id,
            config,
            state,
            broadcaster: StateBroadcaster::new(),
            signal: AbortSignal::new(),
        }
    }

    pub fn tab_id(&self) -> u64 {
        self.tab_id
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    pub fn status(&self) -> PageStatus {
        self.state.state
    }

    /// 当前代的中止信号
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// 立即应用差异，广播推迟到 `flush`
    pub fn update(&mut self, diff: StateDiff) {
        if diff.is_empty() {
            return;
        }

        if let Some(status) = diff.state {
            if status != self.state.state {
                tracing::debug!("标签页 {} 状态: {} -> {}", self.tab_id, self.state.state, status);
            }
        }

        self.state.apply(&diff);
        self.broadcaster.schedule(diff);
    }

    /// 注册观察者并立即发送完整状态
    pub fn subscribe(&mut self, observer: UnboundedSender<StateDiff>) {
        self.broadcaster.subscribe(observer, &self.state);
    }

    /// 一轮结束：把累积的差异合并成一次广播
    pub fn flush(&mut self) -> Option<StateDiff> {
        self.broadcaster.flush()
    }

    /// 开始翻译
    pub fn translate(&mut self) {
        tracing::info!("标签页 {} 开始翻译", self.tab_id);
        self.update(StateDiff::status(PageStatus::TranslationInProgress));
    }

    /// 中止当前代的全部请求；进行中的翻译回到可翻译状态
    pub fn abort(&mut self) {
        self.abort_generation();

        if self.state.state.is_active() || self.state.state == PageStatus::TranslationError {
            tracing::info!("标签页 {} 中止翻译", self.tab_id);
            self.update(StateDiff::status(PageStatus::TranslationAvailable));
        }
    }

    /// 只切换中止信号代次，不改变页面状态
    pub fn abort_generation(&mut self) {
        self.signal.abort();
        self.signal = AbortSignal::new();
    }

    /// 导航到新地址
    pub fn reset(&mut self, url: &str) {
        let same_origin = self
            .state
            .url
            .as_deref()
            .is_some_and(|current| is_same_origin(current, url));

        if same_origin && self.state.state.is_active() {
            self.update(StateDiff {
                url: Some(Some(url.to_string())),
                pending_translation_requests: Some(0),
                total_translation_requests: Some(0),
                ..Default::default()
            });
        } else {
            // 旧页面的请求全部作废
            self.abort_generation();

            // 新页面可能是另一种语言，只清除 from，保留用户选择的 to
            self.update(StateDiff {
                url: Some(Some(url.to_string())),
                from: Some(None),
                pending_translation_requests: Some(0),
                total_translation_requests: Some(0),
                state: Some(PageStatus::PageLoading),
                error: Some(None),
                ..Default::default()
            });
        }
    }

    /// 应用语言检测结果
    pub fn on_language_detected(&mut self, result: TranslateResult<LanguageSummary>) {
        match result {
            Ok(summary) => {
                let status = if summary.models.is_empty() {
                    PageStatus::TranslationNotAvailable
                } else {
                    PageStatus::TranslationAvailable
                };

                // 翻译已开始后到达的检测结果只更新模型列表
                let state = (!self.state.state.is_active()).then_some(status);

                self.update(StateDiff {
                    from: Some(self.state.from.clone().or(summary.from)),
                    to: Some(self.state.to.clone().or(summary.to)),
                    models: Some(summary.models),
                    state,
                    ..Default::default()
                });

                self.maybe_auto_translate();
            }
            Err(error) => {
                tracing::warn!("标签页 {} 语言检测失败: {}", self.tab_id, error);
                self.update(StateDiff {
                    state: Some(PageStatus::PageError),
                    error: Some(Some(error.to_string())),
                    ..Default::default()
                });
            }
        }
    }

    /// 可翻译且主机在自动翻译列表中时直接开始
    pub fn maybe_auto_translate(&mut self) -> bool {
        if self.state.state != PageStatus::TranslationAvailable
            || self.state.from.is_none()
            || self.state.to.is_none()
        {
            return false;
        }

        let listed = self
            .state
            .url
            .as_deref()
            .and_then(host_of)
            .is_some_and(|host| self.config.always_translate(&host));

        if listed {
            self.translate();
        }

        listed
    }

    /// 登记一个新请求并交出当前代的信号
    pub fn begin_request(&mut self) -> AbortSignal {
        self.update(StateDiff {
            pending_translation_requests: Some(self.state.pending_translation_requests + 1),
            total_translation_requests: Some(self.state.total_translation_requests + 1),
            ..Default::default()
        });

        self.signal()
    }

    /// 请求完成
    ///
    /// 已中止代次的结果返回 `None`；后端错误把页面置为 translation-error
    /// 并返回错误消息，供调用方转发给请求者。
    pub fn complete_request(
        &mut self,
        signal: &AbortSignal,
        result: TranslateResult<String>,
    ) -> Option<Result<String, String>> {
        let pending = self.state.pending_translation_requests.saturating_sub(1);
        self.update(StateDiff {
            pending_translation_requests: Some(pending),
            ..Default::default()
        });

        let outcome = if signal.is_aborted() {
            tracing::debug!("标签页 {} 丢弃已中止的响应", self.tab_id);
            None
        } else {
            match result {
                Ok(text) => Some(Ok(text)),
                Err(TranslateError::Aborted) => None,
                Err(error) => {
                    tracing::error!("标签页 {} 翻译失败: {}", self.tab_id, error);
                    let message = error.message();
                    self.update(StateDiff {
                        state: Some(PageStatus::TranslationError),
                        error: Some(Some(message.clone())),
                        ..Default::default()
                    });
                    Some(Err(message))
                }
            }
        };

        // 最后一个请求即使属于旧代次也结束本轮翻译
        if pending == 0 && self.state.state == PageStatus::TranslationInProgress {
            self.update(StateDiff::status(PageStatus::TranslationFinished));
        }

        outcome
    }

    /// 开始下载模型
    pub fn begin_download(&mut self) {
        self.update(StateDiff {
            state: Some(PageStatus::DownloadingModels),
            model_download_read: Some(0.0),
            model_download_size: Some(0.0),
            ..Default::default()
        });
    }

    /// 全部下载的累计进度
    pub fn download_progress(&mut self, read: f64, size: f64) {
        self.update(StateDiff {
            model_download_read: Some(read),
            model_download_size: Some(size),
            ..Default::default()
        });
    }

    /// 单个模型下载完成：本地状态变了，重新推送模型列表
    pub fn model_downloaded(&mut self, from: &str, to: &str) {
        let mut models = self.state.models.clone();
        for pair in &mut models {
            for model in &mut pair.models {
                if model.from == from && model.to == to {
                    model.local = true;
                }
            }
        }

        self.update(StateDiff {
            models: Some(models),
            ..Default::default()
        });
    }

    /// 全部下载结束：成功则开始翻译
    pub fn finish_download(&mut self, result: TranslateResult<()>) {
        match result {
            Ok(()) => self.translate(),
            Err(error) => self.update(StateDiff {
                state: Some(PageStatus::TranslationError),
                error: Some(Some(error.to_string())),
                ..Default::default()
            }),
        }
    }

    pub fn set_active(&mut self, active: bool) {
        if self.state.active != active {
            self.update(StateDiff {
                active: Some(active),
                ..Default::default()
            });
        }
    }

    /// 从打开它的标签页继承翻译状态
    pub fn inherit(&mut self, opener: &PageState, active: bool) {
        self.update(StateDiff {
            state: Some(opener.state),
            url: Some(opener.url.clone()),
            from: Some(opener.from.clone()),
            to: Some(opener.to.clone()),
            models: Some(opener.models.clone()),
            active: Some(active),
            ..Default::default()
        });
    }

    /// 右键菜单命令需要确定且不同的语言对
    pub fn can_route_command(&self) -> bool {
        match (&self.state.from, &self.state.to) {
            (Some(from), Some(to)) => from != to,
            _ => false,
        }
    }
}
