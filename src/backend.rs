//! 外部协作者接口
//!
//! 翻译计算、模型注册表和语言检测都在本 crate 之外，这里只定义它们的接口。
//! `PseudoBackend` 是一个不做真正翻译的实现，供命令行演示和测试使用。

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{TranslateError, TranslateResult};
use crate::scheduler::messages::TranslateRequestData;

/// 翻译模型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranslationModel {
    pub from: String,
    pub to: String,
    /// 是否已下载到本地
    pub local: bool,
}

impl TranslationModel {
    pub fn new(from: &str, to: &str, local: bool) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            local,
        }
    }
}

/// 模型下载进度（字节）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub read: f64,
    pub size: f64,
}

/// 语言检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLanguage {
    pub language: String,
    /// 0 到 100
    pub percentage: f64,
}

/// 翻译后端
pub trait TranslationBackend: Send + Sync {
    /// 可用模型列表
    fn registry(&self) -> BoxFuture<'_, TranslateResult<Vec<TranslationModel>>>;

    /// 翻译单个片段
    fn translate(&self, request: TranslateRequestData) -> BoxFuture<'_, TranslateResult<String>>;

    /// 下载模型，进度通过 `progress` 报告
    fn download_model(
        &self,
        model: TranslationModel,
        progress: UnboundedSender<DownloadProgress>,
    ) -> BoxFuture<'_, TranslateResult<()>>;
}

/// 语言检测器
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, sample: String) -> BoxFuture<'_, TranslateResult<Vec<DetectedLanguage>>>;

    /// 用户接受的语言，按偏好排序
    fn accept_languages(&self) -> Vec<String>;
}

/// 伪翻译：把标签和字符实体之外的文本转成大写
pub fn pseudo_translate(text: &str) -> String {
    let mut translated = String::with_capacity(text.len());
    let mut in_tag = false;
    let mut in_entity = false;

    for c in text.chars() {
        match c {
            '<' if !in_entity => in_tag = true,
            '>' if in_tag => in_tag = false,
            '&' if !in_tag => in_entity = true,
            ';' | ' ' if in_entity => in_entity = false,
            _ => {}
        }

        if in_tag || in_entity || c == '>' {
            translated.push(c);
        } else {
            translated.extend(c.to_uppercase());
        }
    }

    translated
}

/// 不依赖任何模型的演示后端
#[derive(Debug, Clone)]
pub struct PseudoBackend {
    models: Vec<TranslationModel>,
}

impl PseudoBackend {
    pub fn new(models: Vec<TranslationModel>) -> Self {
        Self { models }
    }

    /// 单个本地模型 `from -> to`
    pub fn with_pair(from: &str, to: &str) -> Self {
        Self::new(vec![TranslationModel::new(from, to, true)])
    }
}

impl TranslationBackend for PseudoBackend {
    fn registry(&self) -> BoxFuture<'_, TranslateResult<Vec<TranslationModel>>> {
        Box::pin(async move { Ok(self.models.clone()) })
    }

    fn translate(&self, request: TranslateRequestData) -> BoxFuture<'_, TranslateResult<String>> {
        Box::pin(async move {
            let supported = self
                .models
                .iter()
                .any(|model| model.from == request.from && model.to == request.to);

            if !supported {
                return Err(TranslateError::BackendError(format!(
                    "没有 {} -> {} 的模型",
                    request.from, request.to
                )));
            }

            Ok(pseudo_translate(&request.text))
        })
    }

    fn download_model(
        &self,
        model: TranslationModel,
        progress: UnboundedSender<DownloadProgress>,
    ) -> BoxFuture<'_, TranslateResult<()>> {
        Box::pin(async move {
            tracing::debug!("下载模型 {} -> {}", model.from, model.to);
            let _ = progress.send(DownloadProgress { read: 1.0, size: 1.0 });
            Ok(())
        })
    }
}

/// 固定结果的语言检测器
#[derive(Debug, Clone, Default)]
pub struct StaticDetector {
    pub languages: Vec<DetectedLanguage>,
    pub accept: Vec<String>,
}

impl StaticDetector {
    pub fn new(language: &str, accept: &[&str]) -> Self {
        Self {
            languages: vec![DetectedLanguage {
                language: language.to_string(),
                percentage: 100.0,
            }],
            accept: accept.iter().map(|lang| lang.to_string()).collect(),
        }
    }
}

impl LanguageDetector for StaticDetector {
    fn detect(&self, _sample: String) -> BoxFuture<'_, TranslateResult<Vec<DetectedLanguage>>> {
        Box::pin(async move { Ok(self.languages.clone()) })
    }

    fn accept_languages(&self) -> Vec<String> {
        self.accept.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::messages::{RequestSource, RequestUser};

    fn request(text: &str, from: &str, to: &str) -> TranslateRequestData {
        TranslateRequestData {
            from: from.to_string(),
            to: to.to_string(),
            text: text.to_string(),
            html: true,
            priority: 1,
            user: RequestUser {
                id: 1,
                source: RequestSource::InPage,
            },
        }
    }

    #[test]
    fn test_pseudo_translate_keeps_markup() {
        assert_eq!(
            pseudo_translate("Hello <b data-x-id=\"0\">world</b> &amp; more"),
            "HELLO <b data-x-id=\"0\">WORLD</b> &amp; MORE"
        );
    }

    #[tokio::test]
    async fn test_pseudo_backend_requires_model() {
        let backend = PseudoBackend::with_pair("de", "en");
        assert_eq!(
            backend.translate(request("hallo", "de", "en")).await.unwrap(),
            "HALLO"
        );
        assert!(matches!(
            backend.translate(request("hallo", "fr", "en")).await,
            Err(TranslateError::BackendError(_))
        ));
    }
}
