//! Controller 配置模块

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Controller 配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Web 管理接口端口
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// 数据库路径
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// 管理接口共享密钥 (可选，环境变量 XUI_API_SECRET 优先)
    #[serde(default)]
    pub api_secret: Option<String>,

    /// 日志目录（设置后按天轮转写入文件）
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default)]
    pub panel: PanelSection,

    #[serde(default)]
    pub sync: SyncSection,

    #[serde(default)]
    pub cache: CacheSection,
}

/// 面板访问配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PanelSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_panel_timeout")]
    pub timeout_secs: u64,
}

/// 同步任务配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncSection {
    /// 定时同步间隔（秒），0 表示关闭定时同步
    #[serde(default = "default_sync_interval")]
    pub interval_secs: u64,

    /// 同时同步的服务器数量上限，单个服务器内部始终串行
    #[serde(default = "default_max_parallel_servers")]
    pub max_parallel_servers: usize,
}

/// 缓存配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheSection {
    /// 客户端实时流量缓存时间（秒）
    #[serde(default = "default_cache_ttl")]
    pub traffic_ttl_secs: u64,

    /// 客户端 IP 列表缓存时间（秒）
    #[serde(default = "default_cache_ttl")]
    pub ips_ttl_secs: u64,
}

fn default_web_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "./data/xui-controller.db".to_string()
}

fn default_panel_timeout() -> u64 {
    15
}

fn default_sync_interval() -> u64 {
    300
}

fn default_max_parallel_servers() -> usize {
    1
}

fn default_cache_ttl() -> u64 {
    30
}

impl Default for PanelSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_panel_timeout(),
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval(),
            max_parallel_servers: default_max_parallel_servers(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            traffic_ttl_secs: default_cache_ttl(),
            ips_ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web_port: default_web_port(),
            db_path: default_db_path(),
            api_secret: None,
            log_dir: None,
            panel: PanelSection::default(),
            sync: SyncSection::default(),
            cache: CacheSection::default(),
        }
    }
}

impl Config {
    /// 获取管理接口密钥（优先环境变量，其次配置文件，未配置时为空）
    pub fn get_api_secret(&self) -> String {
        if let Ok(secret) = std::env::var("XUI_API_SECRET") {
            if !secret.is_empty() {
                return secret;
            }
        }
        self.api_secret.clone().unwrap_or_default()
    }

    pub fn panel_timeout(&self) -> Duration {
        Duration::from_secs(self.panel.timeout_secs.max(1))
    }

    pub fn traffic_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.traffic_ttl_secs)
    }

    pub fn ips_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ips_ttl_secs)
    }
}

/// 读取配置文件，文件不存在时使用默认配置
///
/// 返回配置以及是否从文件加载（日志系统初始化前无法直接打印）。
pub fn load_config(path: &Path) -> anyhow::Result<(Config, bool)> {
    if !path.exists() {
        return Ok((Config::default(), false));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("解析配置文件失败: {}", path.display()))?;

    Ok((config, true))
}
