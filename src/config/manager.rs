//! 配置管理器
//!
//! 提供统一的配置接口，支持文件配置、环境变量和默认值

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::constants;
use crate::error::{TranslateError, TranslateResult};

fn tag_list(tags: &[&str]) -> Vec<String> {
    tags.iter().map(|tag| tag.to_string()).collect()
}

/// 页面内翻译引擎配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    // 计时
    pub ui_update_interval_ms: u64,
    pub restart_interval_ms: u64,

    // 片段标记
    pub positional_id_attr: String,
    pub wrapper_tags: Vec<String>,

    // 节点分类
    pub excluded_tags: Vec<String>,
    pub inline_tags: Vec<String>,
    pub generic_tags: Vec<String>,
    pub opt_out_class: String,
    pub opt_in_class: String,

    /// 把分类结果写入 `x-translate-verdict` 属性
    pub debug_marks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ui_update_interval_ms: constants::DEFAULT_UI_UPDATE_INTERVAL.as_millis() as u64,
            restart_interval_ms: constants::DEFAULT_RESTART_INTERVAL.as_millis() as u64,
            positional_id_attr: constants::DEFAULT_POSITIONAL_ID_ATTR.to_string(),
            wrapper_tags: tag_list(constants::WRAPPER_TAGS),
            excluded_tags: tag_list(constants::EXCLUDED_TAGS),
            inline_tags: tag_list(constants::INLINE_TAGS),
            generic_tags: tag_list(constants::GENERIC_TAGS),
            opt_out_class: constants::OPT_OUT_CLASS.to_string(),
            opt_in_class: constants::OPT_IN_CLASS.to_string(),
            debug_marks: false,
        }
    }
}

impl EngineConfig {
    pub fn ui_update_interval(&self) -> Duration {
        Duration::from_millis(self.ui_update_interval_ms)
    }

    pub fn restart_interval(&self) -> Duration {
        Duration::from_millis(self.restart_interval_ms)
    }

    /// 验证配置
    pub fn validate(&self) -> TranslateResult<()> {
        if self.positional_id_attr.trim().is_empty() {
            return Err(TranslateError::ConfigError("位置标识属性名不能为空".to_string()));
        }

        if self.opt_out_class == self.opt_in_class {
            return Err(TranslateError::ConfigError(
                "排除类名与纳入类名不能相同".to_string(),
            ));
        }

        if self.ui_update_interval_ms > 60_000 || self.restart_interval_ms > 60_000 {
            return Err(TranslateError::ConfigError("计时间隔不能超过60秒".to_string()));
        }

        Ok(())
    }
}

/// 页面调度器配置
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 一旦有可用模型就自动翻译的域名
    pub always_translate_domains: Vec<String>,

    /// 用户偏好的目标语言
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_target: Option<String>,

    /// 在页面状态中携带调试标志
    pub debug: bool,
}

impl SchedulerConfig {
    /// 主机名是否在自动翻译列表中
    pub fn always_translate(&self, host: &str) -> bool {
        self.always_translate_domains
            .iter()
            .any(|domain| domain.eq_ignore_ascii_case(host))
    }
}

/// 内容侧配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentConfig {
    /// 语言检测样本的最大字符数
    pub sample_size: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            sample_size: constants::DEFAULT_SAMPLE_SIZE,
        }
    }
}

/// 完整配置
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TranslateConfig {
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub content: ContentConfig,
}

impl TranslateConfig {
    /// 验证配置
    pub fn validate(&self) -> TranslateResult<()> {
        self.engine.validate()?;

        if self.content.sample_size == 0 {
            return Err(TranslateError::ConfigError("检测样本大小不能为0".to_string()));
        }

        Ok(())
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) -> TranslateResult<()> {
        use crate::env::{engine, scheduler, EnvVar};

        if let Some(interval) = engine::UiUpdateInterval::get_if_set() {
            self.engine.ui_update_interval_ms = interval?.as_millis() as u64;
        }

        if let Some(interval) = engine::RestartInterval::get_if_set() {
            self.engine.restart_interval_ms = interval?.as_millis() as u64;
        }

        if let Some(attr) = engine::PositionalIdAttr::get_if_set() {
            self.engine.positional_id_attr = attr?;
            tracing::info!("环境变量覆盖位置标识属性: {}", self.engine.positional_id_attr);
        }

        if let Some(debug_marks) = engine::DebugMarks::get_if_set() {
            self.engine.debug_marks = debug_marks?;
        }

        if let Some(domains) = scheduler::AlwaysTranslate::get_if_set() {
            for domain in domains? {
                if !self.scheduler.always_translate(&domain) {
                    self.scheduler.always_translate_domains.push(domain);
                }
            }
        }

        Ok(())
    }
}

/// 配置管理器
pub struct ConfigManager {
    config: TranslateConfig,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new() -> TranslateResult<Self> {
        let mut config = Self::load_config()?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(Self { config })
    }

    /// 从指定文件创建（仍然应用环境变量覆盖）
    pub fn from_file(path: &str) -> TranslateResult<Self> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(Self { config })
    }

    /// 获取配置
    pub fn get_config(&self) -> &TranslateConfig {
        &self.config
    }

    pub fn into_config(self) -> TranslateConfig {
        self.config
    }

    /// 按搜索路径加载配置
    fn load_config() -> TranslateResult<TranslateConfig> {
        Self::load_dotenv();

        for path in constants::CONFIG_PATHS {
            let expanded_path = shellexpand::tilde(path);
            if Path::new(expanded_path.as_ref()).exists() {
                tracing::info!("加载配置文件: {}", expanded_path);
                return Self::load_from_file(&expanded_path);
            }
        }

        tracing::info!("未找到配置文件，使用默认配置");
        Ok(TranslateConfig::default())
    }

    /// 从指定文件加载配置
    fn load_from_file(path: &str) -> TranslateResult<TranslateConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TranslateError::ConfigError(format!("读取配置文件失败: {}", e)))?;

        Self::parse_config(path, &content)
    }

    /// 按扩展名解析：`.toml` 用 TOML，其余按 JSON
    pub fn parse_config(path: &str, content: &str) -> TranslateResult<TranslateConfig> {
        if path.ends_with(".toml") {
            toml::from_str(content)
                .map_err(|e| TranslateError::ConfigError(format!("解析TOML配置失败: {}", e)))
        } else {
            serde_json::from_str(content)
                .map_err(|e| TranslateError::ConfigError(format!("解析JSON配置失败: {}", e)))
        }
    }

    /// 加载 .env 文件
    fn load_dotenv() {
        let env_files = [".env.local", ".env"];

        for env_file in &env_files {
            if Path::new(env_file).exists() && dotenv::from_filename(env_file).is_ok() {
                tracing::info!("已加载环境变量文件: {}", env_file);
                break;
            }
        }
    }

    /// 生成示例配置文件
    pub fn generate_example_config(path: &str) -> TranslateResult<()> {
        let content = toml::to_string_pretty(&TranslateConfig::default())
            .map_err(|e| TranslateError::ConfigError(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| TranslateError::ConfigError(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }
}
