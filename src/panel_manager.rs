//! 面板会话管理器
//!
//! 每台服务器维护一个已登录的 `XuiClient`，同步和流量查询复用同一会话。
//! 服务器的地址或账号变更后会自动重建会话。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::protocol::panel::PanelApi;

use crate::entity::server;
use crate::xui_client::XuiClient;

/// 为服务器提供面板接口
///
/// 调度器只通过这个 trait 获取面板，不直接构造 HTTP 客户端。
#[async_trait]
pub trait PanelFactory: Send + Sync {
    async fn panel_for(&self, server: &server::Model) -> Result<Arc<dyn PanelApi>>;

    /// 丢弃服务器的会话，下次使用时重新登录
    async fn invalidate(&self, _server_id: i64) {}
}

/// 单台服务器的会话
struct PanelSession {
    /// 创建会话时的地址和账号，用于检测变更
    fingerprint: (String, String, String),
    client: Arc<XuiClient>,
}

pub struct PanelManager {
    /// server_id -> 会话
    sessions: RwLock<HashMap<i64, PanelSession>>,
    timeout: Duration,
}

fn fingerprint(server: &server::Model) -> (String, String, String) {
    (
        server.panel_url.clone(),
        server.username.clone(),
        server.password.clone(),
    )
}

impl PanelManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    async fn cached(&self, server: &server::Model) -> Option<Arc<XuiClient>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&server.id)
            .filter(|s| s.fingerprint == fingerprint(server))
            .map(|s| s.client.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl PanelFactory for PanelManager {
    async fn panel_for(&self, server: &server::Model) -> Result<Arc<dyn PanelApi>> {
        if let Some(client) = self.cached(server).await {
            return Ok(client as Arc<dyn PanelApi>);
        }

        debug!("创建面板会话: {}", server.label());
        let client = Arc::new(XuiClient::new(
            &server.panel_url,
            &server.username,
            &server.password,
            self.timeout,
        )?);

        if !client.login().await? {
            return Err(anyhow!("{} 登录面板被拒绝", server.label()));
        }
        info!("🔑 已登录面板: {}", server.label());

        self.sessions.write().await.insert(
            server.id,
            PanelSession {
                fingerprint: fingerprint(server),
                client: client.clone(),
            },
        );
        Ok(client as Arc<dyn PanelApi>)
    }

    async fn invalidate(&self, server_id: i64) {
        if self.sessions.write().await.remove(&server_id).is_some() {
            debug!("已移除服务器 #{} 的面板会话", server_id);
        }
    }
}
