//! 消息协议
//!
//! 所有消息都是 `{"command": ..., "data": ...}` 形式的 JSON 信封。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::state::StateDiff;
use crate::backend::TranslationModel;
use crate::error::TranslateResult;

/// 请求来源，决定响应交给谁处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestSource {
    InPage,
    Selection,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestUser {
    pub id: u64,
    pub source: RequestSource,
}

/// 单个片段的翻译请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateRequestData {
    pub from: String,
    pub to: String,
    pub text: String,
    pub html: bool,
    pub priority: u8,
    pub user: RequestUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationTarget {
    pub text: String,
}

/// 翻译响应：`target` 与 `error` 二选一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateResponseData {
    pub request: TranslateRequestData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TranslationTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranslateResponseData {
    pub fn ok(request: TranslateRequestData, text: String) -> Self {
        Self {
            request,
            target: Some(TranslationTarget { text }),
            error: None,
        }
    }

    pub fn error(request: TranslateRequestData, error: String) -> Self {
        Self {
            request,
            target: None,
            error: Some(error),
        }
    }

    /// 转换为结果；两者都缺失时视为错误
    pub fn result(&self) -> Result<String, String> {
        match (&self.target, &self.error) {
            (_, Some(error)) => Err(error.clone()),
            (Some(target), None) => Ok(target.text.clone()),
            (None, None) => Err("响应中没有译文".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectLanguageData {
    pub url: String,
    pub sample: String,
    #[serde(default)]
    pub suggested: BTreeMap<String, f64>,
}

/// 内容侧发往后台
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data")]
pub enum ContentMessage {
    DetectLanguage(DetectLanguageData),
    TranslateRequest(TranslateRequestData),
    TranslateAbort,
    UpdateRequest(StateDiff),
}

/// 后台发往内容侧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data")]
pub enum BackgroundMessage {
    Update(StateDiff),
    TranslateResponse(TranslateResponseData),
    TranslateSelection,
    ShowOutboundTranslation,
}

/// 弹出界面发往后台
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data")]
pub enum PopupMessage {
    TranslateStart,
    TranslateAbort,
    DownloadModels { models: Vec<TranslationModel> },
    UpdateRequest(StateDiff),
}

/// JSON 编解码
pub trait WireMessage: Serialize + for<'de> Deserialize<'de> {
    fn to_json(&self) -> TranslateResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn from_json(json: &str) -> TranslateResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl WireMessage for ContentMessage {}
impl WireMessage for BackgroundMessage {}
impl WireMessage for PopupMessage {}
