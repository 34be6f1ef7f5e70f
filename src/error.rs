//! 统一错误处理
//!
//! 提供结构化错误类型。注意：节点误判、调度竞争、合并不匹配以及中止
//! 都不是错误，它们只会以日志的形式出现。

use std::collections::HashMap;

use thiserror::Error;

/// 翻译错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslateError {
    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 翻译后端错误
    #[error("翻译后端错误: {0}")]
    BackendError(String),

    /// 语言检测错误
    #[error("语言检测错误: {0}")]
    DetectionError(String),

    /// 消息协议错误
    #[error("消息协议错误: {0}")]
    ProtocolError(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 通道已关闭
    #[error("通道已关闭: {0}")]
    ChannelClosed(String),

    /// 输入验证错误
    #[error("输入无效: {0}")]
    InvalidInput(String),

    /// 请求已被中止
    #[error("请求已中止")]
    Aborted,

    /// 内部错误
    #[error("内部错误: {0}")]
    InternalError(String),
}

impl TranslateError {
    /// 检查错误是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslateError::BackendError(_) => true,
            TranslateError::DetectionError(_) => true,
            TranslateError::ChannelClosed(_) => false,
            TranslateError::ConfigError(_) => false,
            TranslateError::ProtocolError(_) => false,
            TranslateError::SerializationError(_) => false,
            TranslateError::InvalidInput(_) => false,
            TranslateError::Aborted => false,
            TranslateError::InternalError(_) => false,
        }
    }

    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TranslateError::ConfigError(_) => ErrorSeverity::Critical,
            TranslateError::BackendError(_) => ErrorSeverity::Error,
            TranslateError::DetectionError(_) => ErrorSeverity::Warning,
            TranslateError::ProtocolError(_) => ErrorSeverity::Error,
            TranslateError::SerializationError(_) => ErrorSeverity::Error,
            TranslateError::ChannelClosed(_) => ErrorSeverity::Warning,
            TranslateError::InvalidInput(_) => ErrorSeverity::Info,
            TranslateError::Aborted => ErrorSeverity::Info,
            TranslateError::InternalError(_) => ErrorSeverity::Critical,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            TranslateError::ConfigError(_) => ErrorCategory::Configuration,
            TranslateError::BackendError(_) => ErrorCategory::Backend,
            TranslateError::DetectionError(_) => ErrorCategory::Detection,
            TranslateError::ProtocolError(_) => ErrorCategory::Protocol,
            TranslateError::SerializationError(_) => ErrorCategory::Serialization,
            TranslateError::ChannelClosed(_) => ErrorCategory::Channel,
            TranslateError::InvalidInput(_) => ErrorCategory::Input,
            TranslateError::Aborted => ErrorCategory::Cancellation,
            TranslateError::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// 不带类别前缀的消息正文
    pub fn message(&self) -> String {
        match self {
            TranslateError::ConfigError(msg)
            | TranslateError::BackendError(msg)
            | TranslateError::DetectionError(msg)
            | TranslateError::ProtocolError(msg)
            | TranslateError::SerializationError(msg)
            | TranslateError::ChannelClosed(msg)
            | TranslateError::InvalidInput(msg)
            | TranslateError::InternalError(msg) => msg.clone(),
            TranslateError::Aborted => self.to_string(),
        }
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Backend,
    Detection,
    Protocol,
    Serialization,
    Channel,
    Input,
    Cancellation,
    Internal,
}

impl From<std::io::Error> for TranslateError {
    fn from(error: std::io::Error) -> Self {
        TranslateError::ConfigError(format!("IO错误: {}", error))
    }
}

impl From<serde_json::Error> for TranslateError {
    fn from(error: serde_json::Error) -> Self {
        TranslateError::SerializationError(format!("JSON序列化错误: {}", error))
    }
}

impl From<toml::de::Error> for TranslateError {
    fn from(error: toml::de::Error) -> Self {
        TranslateError::ConfigError(format!("TOML解析错误: {}", error))
    }
}

impl From<toml::ser::Error> for TranslateError {
    fn from(error: toml::ser::Error) -> Self {
        TranslateError::SerializationError(format!("TOML序列化错误: {}", error))
    }
}

impl From<url::ParseError> for TranslateError {
    fn from(error: url::ParseError) -> Self {
        TranslateError::InvalidInput(format!("URL解析错误: {}", error))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TranslateError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TranslateError::ChannelClosed("接收端已关闭".to_string())
    }
}

impl From<crate::env::EnvError> for TranslateError {
    fn from(error: crate::env::EnvError) -> Self {
        TranslateError::ConfigError(error.to_string())
    }
}

/// 错误结果类型别名
pub type TranslateResult<T> = Result<T, TranslateError>;

/// 后台服务的错误统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorStats {
    /// 已完成的后端操作（翻译、语言检测与模型下载）
    pub total_operations: usize,
    pub total_errors: usize,
    pub by_category: HashMap<ErrorCategory, usize>,
    pub by_severity: HashMap<ErrorSeverity, usize>,
    pub retryable_errors: usize,
    pub critical_errors: usize,
}

impl ErrorStats {
    /// 记录一次操作的结果；中止的操作不计入
    pub fn record<T>(&mut self, result: &TranslateResult<T>) {
        match result {
            Err(TranslateError::Aborted) => {}
            Ok(_) => self.total_operations += 1,
            Err(error) => {
                self.total_operations += 1;
                self.record_error(error);
            }
        }
    }

    /// 记录错误
    pub fn record_error(&mut self, error: &TranslateError) {
        self.total_errors += 1;

        *self.by_category.entry(error.category()).or_insert(0) += 1;

        let severity = error.severity();
        *self.by_severity.entry(severity).or_insert(0) += 1;

        if error.is_retryable() {
            self.retryable_errors += 1;
        }

        if severity == ErrorSeverity::Critical {
            self.critical_errors += 1;
        }
    }

    /// 获取错误率
    pub fn error_rate(&self) -> f64 {
        if self.total_operations == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_operations as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let error = TranslateError::BackendError("model crashed".into());
        assert!(error.is_retryable());
        assert_eq!(error.category(), ErrorCategory::Backend);
        assert_eq!(error.severity(), ErrorSeverity::Error);

        assert!(!TranslateError::Aborted.is_retryable());
        assert_eq!(TranslateError::Aborted.category(), ErrorCategory::Cancellation);
    }

    #[test]
    fn test_message_drops_prefix() {
        let error = TranslateError::ConfigError("bad interval".into());
        assert_eq!(error.message(), "bad interval");
        assert_eq!(error.to_string(), "配置错误: bad interval");
    }

    #[test]
    fn test_error_stats() {
        let mut stats = ErrorStats::default();
        assert_eq!(stats.error_rate(), 0.0);

        stats.record(&Ok::<(), TranslateError>(()));
        stats.record::<()>(&Err(TranslateError::BackendError("a".into())));
        stats.record::<()>(&Err(TranslateError::InternalError("b".into())));
        stats.record::<()>(&Err(TranslateError::Aborted));

        assert_eq!(stats.total_operations, 3);
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.retryable_errors, 1);
        assert_eq!(stats.critical_errors, 1);
        assert_eq!(stats.by_category.get(&ErrorCategory::Backend), Some(&1));
        assert_eq!(stats.by_category.get(&ErrorCategory::Cancellation), None);
        assert!((stats.error_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_json_error_conversion() {
        let err: TranslateError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.category(), ErrorCategory::Serialization);
    }
}
