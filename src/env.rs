//! 统一的环境变量管理系统
//!
//! 提供类型安全、可验证的环境变量访问，配置管理器用它覆盖文件中的设置

use std::env;
use std::fmt;
use std::time::Duration;

/// 环境变量解析错误
#[derive(Debug, Clone)]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for EnvError {}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    fn get() -> EnvResult<T> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value),
            Err(_) => {
                if let Some(default) = Self::DEFAULT {
                    Ok(default)
                } else {
                    Err(EnvError {
                        variable: Self::NAME.to_string(),
                        message: "Required environment variable not set".to_string(),
                    })
                }
            }
        }
    }

    /// 仅当变量存在时返回解析结果
    fn get_if_set() -> Option<EnvResult<T>> {
        env::var(Self::NAME).ok().map(|value| Self::parse(&value))
    }

    fn get_or_default(default: T) -> T {
        Self::get().unwrap_or(default)
    }
}

/// 核心环境变量定义
pub mod core {
    use super::*;

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "DOM_TRANSLATE_LOG_LEVEL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("info".to_string()),
            }
        }

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!(
                        "Invalid log level '{}'. Use: trace, debug, info, warn, error",
                        value
                    ),
                }),
            }
        }
    }

    /// 禁用颜色输出
    pub struct NoColor;
    impl EnvVar<bool> for NoColor {
        const NAME: &'static str = "NO_COLOR";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Disable colored output when set to any value";

        fn parse(value: &str) -> EnvResult<bool> {
            // NO_COLOR 约定：任何非空值都表示禁用颜色
            Ok(!value.is_empty())
        }
    }
}

/// 页面内翻译引擎相关环境变量
pub mod engine {
    use super::*;

    /// 界面合并间隔
    pub struct UiUpdateInterval;
    impl EnvVar<Duration> for UiUpdateInterval {
        const NAME: &'static str = "DOM_TRANSLATE_UI_UPDATE_INTERVAL_MS";
        const DEFAULT: Option<Duration> = Some(Duration::from_millis(500));
        const DESCRIPTION: &'static str =
            "Delay in milliseconds before translated fragments are merged into the page";

        fn parse(value: &str) -> EnvResult<Duration> {
            let ms = parse_positive_usize(value, Self::NAME, 0, 60_000)?;
            Ok(Duration::from_millis(ms as u64))
        }
    }

    /// 变更后重新扫描的间隔
    pub struct RestartInterval;
    impl EnvVar<Duration> for RestartInterval {
        const NAME: &'static str = "DOM_TRANSLATE_RESTART_INTERVAL_MS";
        const DEFAULT: Option<Duration> = Some(Duration::from_millis(20));
        const DESCRIPTION: &'static str =
            "Delay in milliseconds before mutated subtrees are walked again";

        fn parse(value: &str) -> EnvResult<Duration> {
            let ms = parse_positive_usize(value, Self::NAME, 0, 60_000)?;
            Ok(Duration::from_millis(ms as u64))
        }
    }

    /// 位置标识属性名
    pub struct PositionalIdAttr;
    impl EnvVar<String> for PositionalIdAttr {
        const NAME: &'static str = "DOM_TRANSLATE_POSITIONAL_ID_ATTR";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str =
            "Attribute used to tag elements inside outgoing fragments (default data-x-id)";

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("data-x-id".to_string()),
            }
        }

        fn parse(value: &str) -> EnvResult<String> {
            let name = value.trim().to_ascii_lowercase();
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if valid {
                Ok(name)
            } else {
                Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!("'{}' is not a valid attribute name", value),
                })
            }
        }
    }

    /// 调试标记
    pub struct DebugMarks;
    impl EnvVar<bool> for DebugMarks {
        const NAME: &'static str = "DOM_TRANSLATE_DEBUG_MARKS";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Write classifier verdicts to x-translate-verdict attributes";

        fn parse(value: &str) -> EnvResult<bool> {
            parse_bool(value, Self::NAME)
        }
    }
}

/// 调度器相关环境变量
pub mod scheduler {
    use super::*;

    /// 自动翻译的域名
    pub struct AlwaysTranslate;
    impl EnvVar<Vec<String>> for AlwaysTranslate {
        const NAME: &'static str = "DOM_TRANSLATE_ALWAYS_TRANSLATE";
        const DEFAULT: Option<Vec<String>> = Some(Vec::new());
        const DESCRIPTION: &'static str =
            "Comma separated host names that are translated as soon as a model is available";

        fn parse(value: &str) -> EnvResult<Vec<String>> {
            Ok(value
                .split(',')
                .map(|host| host.trim().to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect())
        }
    }
}

fn parse_bool(value: &str, var_name: &str) -> EnvResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Ok(true),
        "false" | "0" | "no" | "off" | "disabled" => Ok(false),
        _ => Err(EnvError {
            variable: var_name.to_string(),
            message: format!(
                "Invalid boolean value '{}'. Use: true/false, 1/0, yes/no, on/off, enabled/disabled",
                value
            ),
        }),
    }
}

fn parse_positive_usize(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<usize> {
    let num: usize = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid positive number".to_string(),
    })?;

    if num < min {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} is below minimum {}", num, min),
        });
    }

    if num > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} exceeds maximum {}", num, max),
        });
    }

    Ok(num)
}

/// 环境变量文档生成器
pub fn generate_env_docs() -> String {
    let mut docs = String::new();
    docs.push_str("# Environment Variables Documentation\n\n");

    docs.push_str("## Core Configuration\n\n");
    docs.push_str(&format!(
        "- `{}`: {}\n",
        core::LogLevel::NAME,
        core::LogLevel::DESCRIPTION
    ));
    docs.push_str(&format!(
        "- `{}`: {}\n",
        core::NoColor::NAME,
        core::NoColor::DESCRIPTION
    ));

    docs.push_str("\n## Engine Configuration\n\n");
    docs.push_str(&format!(
        "- `{}`: {} (default: {:?})\n",
        engine::UiUpdateInterval::NAME,
        engine::UiUpdateInterval::DESCRIPTION,
        engine::UiUpdateInterval::DEFAULT
    ));
    docs.push_str(&format!(
        "- `{}`: {} (default: {:?})\n",
        engine::RestartInterval::NAME,
        engine::RestartInterval::DESCRIPTION,
        engine::RestartInterval::DEFAULT
    ));
    docs.push_str(&format!(
        "- `{}`: {}\n",
        engine::PositionalIdAttr::NAME,
        engine::PositionalIdAttr::DESCRIPTION
    ));
    docs.push_str(&format!(
        "- `{}`: {} (default: {:?})\n",
        engine::DebugMarks::NAME,
        engine::DebugMarks::DESCRIPTION,
        engine::DebugMarks::DEFAULT
    ));

    docs.push_str("\n## Scheduler Configuration\n\n");
    docs.push_str(&format!(
        "- `{}`: {}\n",
        scheduler::AlwaysTranslate::NAME,
        scheduler::AlwaysTranslate::DESCRIPTION
    ));

    docs
}
