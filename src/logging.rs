//! 日志初始化

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::env::{core, EnvVar};

/// 安装全局 tracing 订阅者
///
/// 级别取自 `DOM_TRANSLATE_LOG_LEVEL`（默认 `info`），设置了 `NO_COLOR` 时关闭颜色。
/// 重复调用是安全的：已有全局订阅者时什么也不做。
pub fn init_logging() {
    let level = core::LogLevel::get().unwrap_or_else(|e| {
        eprintln!("{}", e);
        "info".to_string()
    });
    let no_color = core::NoColor::get_or_default(false);

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new(format!("dom_translate={},warn", level)))
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(!no_color)
                .with_writer(std::io::stderr),
        )
        .try_init();
}
