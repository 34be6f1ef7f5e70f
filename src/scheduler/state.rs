//! 页面状态、差异与合并广播

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use super::detect::LanguagePair;

/// 页面生命周期状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageStatus {
    #[default]
    PageLoading,
    PageLoaded,
    PageError,
    TranslationNotAvailable,
    TranslationAvailable,
    DownloadingModels,
    TranslationInProgress,
    TranslationFinished,
    TranslationError,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::PageLoading => "page-loading",
            PageStatus::PageLoaded => "page-loaded",
            PageStatus::PageError => "page-error",
            PageStatus::TranslationNotAvailable => "translation-not-available",
            PageStatus::TranslationAvailable => "translation-available",
            PageStatus::DownloadingModels => "downloading-models",
            PageStatus::TranslationInProgress => "translation-in-progress",
            PageStatus::TranslationFinished => "translation-finished",
            PageStatus::TranslationError => "translation-error",
        }
    }

    /// 用户已开启翻译的状态；同站导航时保持
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PageStatus::DownloadingModels | PageStatus::TranslationInProgress | PageStatus::TranslationFinished
        )
    }
}

impl std::fmt::Display for PageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 区分“字段缺失”和“显式置空”
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// 单个页面的完整状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub state: PageStatus,
    pub active: bool,
    pub from: Option<String>,
    pub to: Option<String>,
    pub models: Vec<LanguagePair>,
    pub debug: bool,
    pub error: Option<String>,
    pub url: Option<String>,
    pub pending_translation_requests: usize,
    pub total_translation_requests: usize,
    pub model_download_read: Option<f64>,
    pub model_download_size: Option<f64>,
}

/// 部分状态；观察者以浅合并的方式应用
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateDiff {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<PageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub from: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub to: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<LanguagePair>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub error: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "double_option")]
    pub url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_translation_requests: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_translation_requests: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_download_read: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_download_size: Option<f64>,
}

macro_rules! merge_fields {
    ($target:expr, $source:expr, $($field:ident),+) => {
        $(
            if let Some(value) = $source.$field {
                $target.$field = Some(value);
            }
        )+
    };
}

impl StateDiff {
    /// 只修改状态的差异
    pub fn status(state: PageStatus) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == StateDiff::default()
    }

    /// 合并另一份差异，后者覆盖前者
    pub fn merge(&mut self, other: StateDiff) {
        merge_fields!(
            self,
            other,
            state,
            active,
            from,
            to,
            models,
            debug,
            error,
            url,
            pending_translation_requests,
            total_translation_requests,
            model_download_read,
            model_download_size
        );
    }
}

impl From<&PageState> for StateDiff {
    fn from(state: &PageState) -> Self {
        Self {
            state: Some(state.state),
            active: Some(state.active),
            from: Some(state.from.clone()),
            to: Some(state.to.clone()),
            models: Some(state.models.clone()),
            debug: Some(state.debug),
            error: Some(state.error.clone()),
            url: Some(state.url.clone()),
            pending_translation_requests: Some(state.pending_translation_requests),
            total_translation_requests: Some(state.total_translation_requests),
            model_download_read: state.model_download_read,
            model_download_size: state.model_download_size,
        }
    }
}

impl PageState {
    /// 浅合并差异
    pub fn apply(&mut self, diff: &StateDiff) {
        macro_rules! apply_fields {
            ($($field:ident),+) => {
                $(
                    if let Some(value) = &diff.$field {
                        self.$field = value.clone();
                    }
                )+
            };
        }

        apply_fields!(
            state,
            active,
            from,
            to,
            models,
            debug,
            error,
            url,
            pending_translation_requests,
            total_translation_requests
        );

        if diff.model_download_read.is_some() {
            self.model_download_read = diff.model_download_read;
        }
        if diff.model_download_size.is_some() {
            self.model_download_size = diff.model_download_size;
        }
    }
}

/// 同一轮内的状态修改合并成一次广播
#[derive(Debug, Default)]
pub struct StateBroadcaster {
    scheduled: Option<StateDiff>,
    observers: Vec<UnboundedSender<StateDiff>>,
}

impl StateBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一份差异，等待下一次 `flush`
    pub fn schedule(&mut self, diff: StateDiff) {
        match &mut self.scheduled {
            Some(scheduled) => scheduled.merge(diff),
            None => self.scheduled = Some(diff),
        }
    }

    pub fn has_scheduled(&self) -> bool {
        self.scheduled.is_some()
    }

    /// 注册观察者，并立即发送完整状态
    pub fn subscribe(&mut self, observer: UnboundedSender<StateDiff>, state: &PageState) {
        if observer.send(StateDiff::from(state)).is_ok() {
            self.observers.push(observer);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// 把累积的差异发送给所有观察者，已关闭的观察者被移除
    pub fn flush(&mut self) -> Option<StateDiff> {
        let diff = self.scheduled.take()?;

        self.observers
            .retain(|observer| observer.send(diff.clone()).is_ok());

        Some(diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&PageStatus::TranslationNotAvailable).unwrap(),
            "\"translation-not-available\""
        );
        assert_eq!(PageStatus::DownloadingModels.to_string(), "downloading-models");
    }

    #[test]
    fn test_diff_distinguishes_null_from_missing() {
        let diff: StateDiff = serde_json::from_str(r#"{"from":null,"state":"page-loaded"}"#).unwrap();
        assert_eq!(diff.from, Some(None));
        assert_eq!(diff.to, None);
        assert_eq!(diff.state, Some(PageStatus::PageLoaded));

        let mut state = PageState {
            from: Some("de".into()),
            to: Some("en".into()),
            ..Default::default()
        };
        state.apply(&diff);
        assert_eq!(state.from, None);
        assert_eq!(state.to.as_deref(), Some("en"));
    }

    #[test]
    fn test_diff_serializes_only_present_fields() {
        let diff = StateDiff {
            pending_translation_requests: Some(2),
            ..StateDiff::status(PageStatus::TranslationInProgress)
        };
        assert_eq!(
            serde_json::to_string(&diff).unwrap(),
            r#"{"state":"translation-in-progress","pendingTranslationRequests":2}"#
        );
    }

    #[test]
    fn test_flush_coalesces_and_drops_closed_observers() {
        let mut broadcaster = StateBroadcaster::new();
        let state = PageState::default();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        broadcaster.subscribe(tx1, &state);
        broadcaster.subscribe(tx2, &state);
        drop(rx2);

        // 初始完整状态
        assert_eq!(rx1.try_recv().unwrap().state, Some(PageStatus::PageLoading));

        broadcaster.schedule(StateDiff::status(PageStatus::PageLoaded));
        broadcaster.schedule(StateDiff {
            url: Some(Some("https://example.com/".into())),
            ..StateDiff::status(PageStatus::TranslationAvailable)
        });

        let flushed = broadcaster.flush().unwrap();
        assert_eq!(flushed.state, Some(PageStatus::TranslationAvailable));

        let received = rx1.try_recv().unwrap();
        assert_eq!(received, flushed);
        assert!(rx1.try_recv().is_err());
        assert_eq!(broadcaster.observer_count(), 1);
        assert!(broadcaster.flush().is_none());
    }
}
