//! 测试用的内存数据库和假面板

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, NotSet, Set};
use sea_orm_migration::MigratorTrait;
use serde_json::{json, Value};

use common::protocol::panel::{
    ClientTraffic, PanelApi, PanelError, PanelResult, RemoteInbound,
};

use crate::entity::{server, server_client, server_inbound};
use crate::migration::Migrator;
use crate::panel_manager::PanelFactory;

pub async fn memory_db() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

pub async fn insert_server(db: &DatabaseConnection, name: &str) -> server::Model {
    let now = Utc::now().naive_utc();
    server::ActiveModel {
        id: NotSet,
        name: Set(name.to_string()),
        panel_url: Set(format!("http://{}.panel.test:2053", name)),
        username: Set("admin".to_string()),
        password: Set("admin".to_string()),
        is_active: Set(true),
        last_sync_at: Set(None),
        last_sync_error: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_inbound(
    db: &DatabaseConnection,
    server_id: i64,
    port: i32,
    remote_id: Option<i64>,
) -> server_inbound::Model {
    let now = Utc::now().naive_utc();
    server_inbound::ActiveModel {
        id: NotSet,
        server_id: Set(server_id),
        remote_id: Set(remote_id),
        tag: Set(format!("inbound-{}", port)),
        port: Set(port),
        protocol: Set("vless".to_string()),
        remark: Set(String::new()),
        enable: Set(true),
        settings: Set("{}".to_string()),
        stream_settings: Set(None),
        up: Set(0),
        down: Set(0),
        total: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_client(
    db: &DatabaseConnection,
    inbound_id: i64,
    email: &str,
    sub_id: Option<&str>,
    uuid: Option<&str>,
) -> server_client::Model {
    let now = Utc::now().naive_utc();
    server_client::ActiveModel {
        id: NotSet,
        server_inbound_id: Set(inbound_id),
        uuid: Set(uuid.map(str::to_string)),
        email: Set(email.to_string()),
        sub_id: Set(sub_id.map(str::to_string)),
        enable: Set(true),
        up: Set(500),
        down: Set(700),
        total: Set(0),
        expiry_time: Set(None),
        limit_ip: Set(0),
        reset_count: Set(0),
        traffic_synced_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap()
}

/// 构造面板入站，clients 以字符串形式放在 settings 中
pub fn remote_inbound(id: i64, port: i32, clients: Value) -> RemoteInbound {
    remote_inbound_with_settings(id, port, Value::String(json!({ "clients": clients }).to_string()))
}

pub fn remote_inbound_with_settings(id: i64, port: i32, settings: Value) -> RemoteInbound {
    RemoteInbound {
        id,
        up: 0,
        down: 0,
        total: 0,
        remark: format!("remote-{}", port),
        enable: true,
        expiry_time: 0,
        port,
        protocol: "vless".to_string(),
        tag: format!("inbound-{}", port),
        settings,
        stream_settings: Value::Null,
        client_stats: None,
    }
}

pub fn traffic(email: &str, up: i64, down: i64, total: i64) -> ClientTraffic {
    ClientTraffic {
        id: 1,
        inbound_id: 1,
        enable: true,
        email: email.to_string(),
        up,
        down,
        expiry_time: 0,
        total,
        reset: 0,
    }
}

/// 重置接口的模拟行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Confirm,
    Refuse,
    Fail,
}

/// 脚本化的假面板
pub struct FakePanel {
    pub inbounds: Mutex<Vec<RemoteInbound>>,
    pub fail_list: AtomicBool,
    pub by_uuid: Mutex<HashMap<String, ClientTraffic>>,
    pub by_email: Mutex<HashMap<String, ClientTraffic>>,
    pub fail_lookup: AtomicBool,
    pub ips: Mutex<HashMap<String, Vec<String>>>,
    pub reset_mode: Mutex<ResetMode>,
    pub resets: Mutex<Vec<(i64, String)>>,
    pub calls: AtomicUsize,
}

impl FakePanel {
    pub fn new(inbounds: Vec<RemoteInbound>) -> Arc<Self> {
        Arc::new(Self {
            inbounds: Mutex::new(inbounds),
            fail_list: AtomicBool::new(false),
            by_uuid: Mutex::new(HashMap::new()),
            by_email: Mutex::new(HashMap::new()),
            fail_lookup: AtomicBool::new(false),
            ips: Mutex::new(HashMap::new()),
            reset_mode: Mutex::new(ResetMode::Confirm),
            resets: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        let panel = Self::new(vec![]);
        panel.fail_list.store(true, Ordering::SeqCst);
        panel
    }

    pub fn set_inbounds(&self, inbounds: Vec<RemoteInbound>) {
        *self.inbounds.lock().unwrap() = inbounds;
    }

    pub fn set_reset_mode(&self, mode: ResetMode) {
        *self.reset_mode.lock().unwrap() = mode;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PanelApi for FakePanel {
    async fn login(&self) -> PanelResult<bool> {
        Ok(true)
    }

    async fn list_inbounds(&self) -> PanelResult<Vec<RemoteInbound>> {
        self.hit();
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(PanelError::Transport("connection refused".to_string()));
        }
        Ok(self.inbounds.lock().unwrap().clone())
    }

    async fn get_client_by_uuid(&self, uuid: &str) -> PanelResult<Option<ClientTraffic>> {
        self.hit();
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(PanelError::Transport("timeout".to_string()));
        }
        Ok(self.by_uuid.lock().unwrap().get(uuid).cloned())
    }

    async fn get_client_by_email(&self, email: &str) -> PanelResult<Option<ClientTraffic>> {
        self.hit();
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(PanelError::Transport("timeout".to_string()));
        }
        Ok(self.by_email.lock().unwrap().get(email).cloned())
    }

    async fn get_client_ips(&self, identifier: &str) -> PanelResult<Option<Vec<String>>> {
        self.hit();
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(PanelError::Transport("timeout".to_string()));
        }
        Ok(self.ips.lock().unwrap().get(identifier).cloned())
    }

    async fn reset_client_traffic(&self, remote_inbound_id: i64, email: &str) -> PanelResult<bool> {
        self.hit();
        let mode = *self.reset_mode.lock().unwrap();
        match mode {
            ResetMode::Confirm => {
                self.resets
                    .lock()
                    .unwrap()
                    .push((remote_inbound_id, email.to_string()));
                Ok(true)
            }
            ResetMode::Refuse => Ok(false),
            ResetMode::Fail => Err(PanelError::Transport("connection reset".to_string())),
        }
    }

    async fn clear_client_ips(&self, email: &str) -> PanelResult<bool> {
        self.hit();
        Ok(self.ips.lock().unwrap().remove(email).is_some())
    }
}

/// 按服务器 ID 返回假面板，未注册的服务器视为无法连接
#[derive(Default)]
pub struct FakeFactory {
    panels: Mutex<HashMap<i64, Arc<FakePanel>>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, server_id: i64, panel: Arc<FakePanel>) {
        self.panels.lock().unwrap().insert(server_id, panel);
    }
}

#[async_trait]
impl PanelFactory for FakeFactory {
    async fn panel_for(&self, server: &server::Model) -> anyhow::Result<Arc<dyn PanelApi>> {
        let panel = self.panels.lock().unwrap().get(&server.id).cloned();
        match panel {
            Some(panel) => Ok(panel as Arc<dyn PanelApi>),
            None => Err(anyhow::anyhow!("{} 登录面板失败: connection refused", server.label())),
        }
    }
}
