//! 配置管理模块
//!
//! 支持配置文件、环境变量和默认值三层来源

pub mod manager;

pub use manager::{ConfigManager, ContentConfig, EngineConfig, SchedulerConfig, TranslateConfig};

/// 配置常量
pub mod constants {
    use std::time::Duration;

    // 计时
    pub const DEFAULT_UI_UPDATE_INTERVAL: Duration = Duration::from_millis(500);
    pub const DEFAULT_RESTART_INTERVAL: Duration = Duration::from_millis(20);

    // 片段标记
    pub const DEFAULT_POSITIONAL_ID_ATTR: &str = "data-x-id";
    pub const DEBUG_VERDICT_ATTR: &str = "x-translate-verdict";
    pub const DEBUG_STATE_ATTR: &str = "x-translate-debug";
    pub const DEBUG_PAGE_ATTR: &str = "data-x-translate-debug";

    // 翻译后端可能插入的包装元素
    pub const WRAPPER_TAGS: &[&str] = &["font"];

    // 不翻译的元素
    pub const EXCLUDED_TAGS: &[&str] = &[
        // 代码相关
        "code", "kbd", "samp", "var", "dir",
        // 过时元素
        "acronym",
        // 嵌入内容
        "svg", "math", "embed", "object", "applet", "iframe",
        // 脚本与样式
        "noscript", "noembed", "noframes", "head", "style", "script",
        // 表单与模板
        "textarea", "template",
    ];

    // 行内元素
    pub const INLINE_TAGS: &[&str] = &[
        "abbr", "b", "em", "i", "kbd", "code", "mark", "math", "output", "q", "ruby", "small",
        "strong", "sub", "sup", "time", "u", "var", "wbr", "ins", "del",
        // 表格单元格与列表项的内容总是作为一个整体翻译
        "th", "td", "li", "br",
    ];

    // 由自身内容决定是否行内的元素
    pub const GENERIC_TAGS: &[&str] = &["a", "span"];

    // 显式排除/纳入的类名
    pub const OPT_OUT_CLASS: &str = "notranslate";
    pub const OPT_IN_CLASS: &str = "translate";

    // 语言检测
    pub const DEFAULT_SAMPLE_SIZE: usize = 5000;
    pub const PIVOT_LANGUAGE: &str = "en";
    pub const SIMILAR_LANGUAGES: &[&[&str]] = &[&["es", "ca", "gl", "pt"], &["no", "nb", "nn", "da"]];

    // 选区翻译
    pub const SELECTION_PRIORITY: u8 = 3;

    // 配置文件搜索路径
    pub const CONFIG_PATHS: &[&str] = &[
        "dom-translate.toml",
        ".dom-translate.toml",
        "~/.config/dom-translate/config.toml",
    ];
}

/// 是否存在任一配置文件
pub fn config_file_exists() -> bool {
    constants::CONFIG_PATHS
        .iter()
        .any(|path| std::path::Path::new(shellexpand::tilde(path).as_ref()).exists())
}

/// 加载配置，失败时回退到默认配置
pub fn load_translate_config() -> TranslateConfig {
    match ConfigManager::new() {
        Ok(manager) => manager.get_config().clone(),
        Err(e) => {
            tracing::warn!("配置加载失败，使用默认配置: {}", e);
            TranslateConfig::default()
        }
    }
}
