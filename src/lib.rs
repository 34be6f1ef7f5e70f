//! # dom-translate
//!
//! 增量式页面内翻译引擎：在持续变化的 HTML 文档中找出需要翻译的片段，
//! 以带优先级、可取消的请求发给翻译后端，把异步返回的译文合并回文档而不破坏节点身份，
//! 并能随时回滚到原文。
//!
//! ## 模块组织
//!
//! - `dom` - 文档树、变更记录、解析与序列化
//! - `timer` - 单次可重置计时器
//! - `engine` - 页面内翻译引擎（分类、排队、变更响应、合并、回滚）
//! - `scheduler` - 页面状态机、语言对选择与消息协议
//! - `backend` - 翻译后端与语言检测器接口
//! - `content` - 内容侧页面会话
//! - `runtime` - 后台服务
//! - `config` / `env` - 配置与环境变量
//! - `error` - 错误类型
//! - `logging` - 日志初始化

pub mod backend;
pub mod config;
pub mod content;
pub mod dom;
pub mod engine;
pub mod env;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod scheduler;
pub mod timer;

// Re-export commonly used items for convenience
pub use content::ContentScript;
pub use dom::{Document, NodeId};
pub use engine::InPageTranslation;
pub use error::{TranslateError, TranslateResult};
pub use runtime::{BackgroundService, Envelope, ServiceHandle};
pub use scheduler::{PageScheduler, PageState, PageStatus, StateDiff};
