//! 面板调用 trait 和相关类型
//!
//! 定义了 Controller 访问 3X-UI 面板的接口。所有方法都返回显式的
//! `PanelResult`，调用方按 `Ok`/`Err` 分支处理"尽力而为"的远程操作。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 面板调用错误
#[derive(Debug, Error)]
pub enum PanelError {
    /// 面板不可达、超时或返回非 2xx 状态
    #[error("面板请求失败: {0}")]
    Transport(String),

    /// 登录被拒绝或会话无法恢复
    #[error("面板认证失败: {0}")]
    Unauthorized(String),

    /// 面板返回 success=false
    #[error("面板返回错误: {0}")]
    Api(String),

    /// 响应体无法解析
    #[error("面板响应格式错误: {0}")]
    Malformed(String),
}

impl PanelError {
    /// 是否为传输层错误（可在下一轮重试）
    pub fn is_transport(&self) -> bool {
        matches!(self, PanelError::Transport(_))
    }
}

/// 面板调用结果
pub type PanelResult<T> = Result<T, PanelError>;

fn default_true() -> bool {
    true
}

/// 客户端流量记录（面板 `client_traffics` 表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTraffic {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub inbound_id: i64,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
    #[serde(default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub reset: i32,
}

/// 面板上的入站配置
///
/// `settings` / `stream_settings` 在不同面板版本中可能是 JSON 字符串，
/// 也可能已经是解码后的对象，这里原样保留。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInbound {
    pub id: i64,
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub remark: String,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub expiry_time: i64,
    pub port: i32,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub stream_settings: Value,
    #[serde(default)]
    pub client_stats: Option<Vec<ClientTraffic>>,
}

/// 入站 settings 中的单个客户端
///
/// `up`/`down` 不在 settings 中，由 `clientStats` 按 email 合并得到。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteClient {
    /// vless/vmess 的 UUID
    #[serde(default)]
    pub id: Option<String>,
    /// trojan/shadowsocks 的密码
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "subId", default)]
    pub sub_id: Option<String>,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(rename = "expiryTime", default)]
    pub expiry_time: i64,
    /// 流量上限（字节），0 表示不限
    #[serde(rename = "totalGB", default)]
    pub total_gb: i64,
    #[serde(rename = "limitIp", default)]
    pub limit_ip: i32,
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
}

impl RemoteClient {
    /// 客户端在面板上的身份标识（UUID 或密码）
    pub fn identity(&self) -> Option<&str> {
        non_empty(self.id.as_deref()).or_else(|| non_empty(self.password.as_deref()))
    }

    /// 非空的订阅 ID
    pub fn sub_id(&self) -> Option<&str> {
        non_empty(self.sub_id.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// 面板访问接口
///
/// 由 HTTP 客户端实现（生产环境），或在测试中由脚本化的假面板实现。
#[async_trait]
pub trait PanelApi: Send + Sync {
    /// 登录面板，返回是否成功
    async fn login(&self) -> PanelResult<bool>;

    /// 获取全部入站
    async fn list_inbounds(&self) -> PanelResult<Vec<RemoteInbound>>;

    /// 按 UUID 查询客户端流量
    async fn get_client_by_uuid(&self, uuid: &str) -> PanelResult<Option<ClientTraffic>>;

    /// 按 email 查询客户端流量
    async fn get_client_by_email(&self, email: &str) -> PanelResult<Option<ClientTraffic>>;

    /// 获取客户端最近使用的 IP 列表
    async fn get_client_ips(&self, identifier: &str) -> PanelResult<Option<Vec<String>>>;

    /// 重置指定入站下某个客户端的流量
    async fn reset_client_traffic(&self, remote_inbound_id: i64, email: &str) -> PanelResult<bool>;

    /// 清除客户端的 IP 记录
    async fn clear_client_ips(&self, email: &str) -> PanelResult<bool>;
}
