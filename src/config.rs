//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `INVOICE__*` 覆盖（双下划线表示嵌套，如 `INVOICE__CACHE__BACKEND=sqlite`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub collection: CollectionSection,
    pub cache: CacheSection,
    pub export: ExportSection,
    pub browser: BrowserSection,
}

/// [collection] 段：重试预算与各类固定延迟
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 页面加载完成后的稳定等待
    #[serde(default = "default_short_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_short_delay_ms")]
    pub retry_delay_ms: u64,
    /// 翻页点击前的间隔，0 表示不等待
    #[serde(default)]
    pub advance_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_short_delay_ms() -> u64 {
    100
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            settle_delay_ms: default_short_delay_ms(),
            retry_delay_ms: default_short_delay_ms(),
            advance_delay_ms: 0,
        }
    }
}

/// 缓存后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// 仅内存，进程退出即丢失
    Memory,
    /// 目录下每个 key 一个 JSON 文件
    #[default]
    File,
    Sqlite,
}

/// [cache] 段
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default)]
    pub backend: CacheBackend,
    /// file 后端为目录，sqlite 后端为数据库文件
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    #[serde(default = "default_cache_key")]
    pub key: String,
    #[serde(default = "default_expiration_hours")]
    pub expiration_hours: u64,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(".invoice-cache")
}

fn default_cache_key() -> String {
    crate::cache::DEFAULT_CACHE_KEY.to_string()
}

fn default_expiration_hours() -> u64 {
    24
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            path: default_cache_path(),
            key: default_cache_key(),
            expiration_hours: default_expiration_hours(),
        }
    }
}

/// [export] 段：发票下载与导出
#[derive(Debug, Clone, Deserialize)]
pub struct ExportSection {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// 订单列表页；详情页为 `<orders_url>/<订单号>`
    #[serde(default = "default_orders_url")]
    pub orders_url: String,
    #[serde(default = "default_download_settle_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_inter_order_delay_ms")]
    pub inter_order_delay_ms: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_orders_url() -> String {
    "https://www.walmart.com/orders".to_string()
}

fn default_download_settle_ms() -> u64 {
    1000
}

fn default_inter_order_delay_ms() -> u64 {
    500
}

fn default_download_timeout_secs() -> u64 {
    30
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            orders_url: default_orders_url(),
            settle_delay_ms: default_download_settle_ms(),
            inter_order_delay_ms: default_inter_order_delay_ms(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

/// [browser] 段：headless Chrome 与页面内等待
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSection {
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// 等待订单卡片等元素出现的上限
    #[serde(default = "default_element_timeout_ms")]
    pub element_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_headless() -> bool {
    true
}

fn default_element_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    200
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            element_timeout_ms: default_element_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 INVOICE__* 可覆盖
///
/// 查找顺序：config/default.toml → ../config/default.toml → default.toml，然后是显式指定的文件。
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {:?} not found, ignoring", path);
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("INVOICE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 加载失败时记录警告并使用默认配置
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    })
}
