//! 面板到本地的同步调度
//!
//! 一次同步以服务器为隔离单位：拉取面板入站列表，逐个入站更新本地入站和
//! 客户端，最后删除面板上已不存在的本地客户端（孤立客户端）。
//!
//! 失败处理：
//! - 服务器级失败（登录、拉取列表）记录一条失败后跳到下一台服务器
//! - 入站级失败（数据库错误）记录一条失败，跳过该入站的孤立清理，继续下一个入站
//! - 已完成的入站不回滚

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use common::protocol::panel::{PanelError, RemoteInbound};
use common::protocol::settings::decode_clients;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::TtlCache;
use crate::config::Config;
use crate::entity::{server, server_client, server_inbound, Server, ServerClient, ServerInbound};
use crate::panel_manager::PanelFactory;

use super::mapping::{inbound_from_remote, upsert_from_remote};
use super::report::{SyncReport, SyncTally};
use super::traffic::TrafficSnapshot;

/// 调度参数
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub traffic_ttl: Duration,
    pub ips_ttl: Duration,
    /// 同时同步的服务器数量，1 表示逐台串行
    pub max_parallel_servers: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            traffic_ttl: Duration::from_secs(30),
            ips_ttl: Duration::from_secs(30),
            max_parallel_servers: 1,
        }
    }
}

impl ReconcileOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            traffic_ttl: config.traffic_ttl(),
            ips_ttl: config.ips_ttl(),
            max_parallel_servers: config.sync.max_parallel_servers.max(1),
        }
    }
}

/// 同步范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// 入站和客户端
    Full,
    /// 只同步入站
    InboundsOnly,
}

#[derive(Clone)]
pub struct Reconciler {
    pub(super) db: DatabaseConnection,
    pub(super) panels: Arc<dyn PanelFactory>,
    pub(super) traffic_cache: TtlCache<TrafficSnapshot>,
    pub(super) ips_cache: TtlCache<Vec<String>>,
    pub(super) options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(db: DatabaseConnection, panels: Arc<dyn PanelFactory>, options: ReconcileOptions) -> Self {
        Self {
            db,
            panels,
            traffic_cache: TtlCache::new(),
            ips_cache: TtlCache::new(),
            options,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// 同步一台服务器的入站和客户端
    pub async fn reconcile_clients(&self, server: &server::Model) -> SyncReport {
        let mut tally = SyncTally::new();
        self.sync_server(server, Scope::Full, &mut tally).await;
        tally.finish()
    }

    /// 只同步一台服务器的入站
    pub async fn reconcile_inbounds(&self, server: &server::Model) -> SyncReport {
        let mut tally = SyncTally::new();
        self.sync_server(server, Scope::InboundsOnly, &mut tally).await;
        tally.finish()
    }

    /// 同步多台服务器，单台失败不影响其他服务器
    pub async fn reconcile_servers(&self, servers: Vec<server::Model>) -> SyncReport {
        let parallel = self.options.max_parallel_servers;
        if parallel <= 1 || servers.len() <= 1 {
            let mut tally = SyncTally::new();
            for server in &servers {
                self.sync_server(server, Scope::Full, &mut tally).await;
            }
            return tally.finish();
        }

        let semaphore = Arc::new(Semaphore::new(parallel));
        let mut tasks = JoinSet::new();
        for server in servers {
            let this = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let mut tally = SyncTally::new();
                match semaphore.acquire_owned().await {
                    Ok(_permit) => this.sync_server(&server, Scope::Full, &mut tally).await,
                    Err(e) => tally.fail(server.label(), e),
                }
                tally
            });
        }

        let mut total = SyncTally::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(tally) => total.merge(tally),
                Err(e) => {
                    error!("服务器同步任务异常退出: {}", e);
                    total.fail("sync task", e);
                }
            }
        }
        total.finish()
    }

    /// 同步全部启用的服务器
    pub async fn reconcile_all(&self) -> anyhow::Result<SyncReport> {
        let servers = Server::find()
            .filter(server::Column::IsActive.eq(true))
            .order_by_asc(server::Column::Id)
            .all(&self.db)
            .await?;

        if servers.is_empty() {
            debug!("没有启用的服务器，跳过同步");
        }
        Ok(self.reconcile_servers(servers).await)
    }

    /// 同步单个本地入站
    pub async fn reconcile_inbound(&self, inbound_id: i64) -> anyhow::Result<SyncReport> {
        let local = ServerInbound::find_by_id(inbound_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow!("入站 #{} 不存在", inbound_id))?;
        let server = Server::find_by_id(local.server_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow!("入站 #{} 所属服务器不存在", inbound_id))?;

        let mut tally = SyncTally::new();
        let context = format!("{}/inbound:{}", server.label(), local.port);
        let Some(remote_list) = self.fetch_inbounds(&server, &mut tally).await else {
            return Ok(tally.finish());
        };

        let Some(remote) = find_counterpart(&local, &remote_list) else {
            warn!("{} 在面板上找不到对应入站", context);
            tally.fail(context, "面板上找不到对应入站");
            return Ok(tally.finish());
        };

        if let Err(e) = self.sync_inbound(server.id, remote, Scope::Full, &mut tally).await {
            warn!("{} 同步失败: {}", context, e);
            tally.fail(context, e);
        }
        Ok(tally.finish())
    }

    /// 登录并拉取入站列表，失败时记录到服务器名下
    async fn fetch_inbounds(&self, server: &server::Model, tally: &mut SyncTally) -> Option<Vec<RemoteInbound>> {
        let panel = match self.panels.panel_for(server).await {
            Ok(panel) => panel,
            Err(e) => {
                warn!("{} 获取面板会话失败: {}", server.label(), e);
                tally.fail(server.label(), &e);
                return None;
            }
        };

        match panel.list_inbounds().await {
            Ok(list) => Some(list),
            Err(e) => {
                if matches!(e, PanelError::Unauthorized(_)) {
                    self.panels.invalidate(server.id).await;
                }
                warn!("{} 拉取入站列表失败: {}", server.label(), e);
                tally.fail(server.label(), &e);
                None
            }
        }
    }

    async fn sync_server(&self, server: &server::Model, scope: Scope, tally: &mut SyncTally) {
        let failed_before = tally.failed();

        let Some(remote_list) = self.fetch_inbounds(server, tally).await else {
            let message = tally.failed_since(failed_before);
            self.record_server_status(server, false, message).await;
            return;
        };

        debug!("{} 面板返回 {} 个入站", server.label(), remote_list.len());
        for remote in &remote_list {
            if let Err(e) = self.sync_inbound(server.id, remote, scope, tally).await {
                let context = format!("{}/inbound:{}", server.label(), remote.port);
                warn!("{} 同步失败: {}", context, e);
                tally.fail(context, e);
            }
        }

        let message = tally.failed_since(failed_before);
        if message.is_none() {
            info!("✅ {} 同步完成", server.label());
        }
        self.record_server_status(server, true, message).await;
    }

    /// 写入服务器的最近同步时间和错误，`completed` 表示成功拉取了入站列表
    async fn record_server_status(&self, server: &server::Model, completed: bool, error: Option<String>) {
        let now = Utc::now().naive_utc();
        let mut active: server::ActiveModel = server.clone().into();
        if completed {
            active.last_sync_at = Set(Some(now));
        }
        active.last_sync_error = Set(error);
        active.updated_at = Set(now);
        if let Err(e) = active.update(&self.db).await {
            warn!("{} 写入同步状态失败: {}", server.label(), e);
        }
    }

    async fn sync_inbound(
        &self,
        server_id: i64,
        remote: &RemoteInbound,
        scope: Scope,
        tally: &mut SyncTally,
    ) -> Result<(), DbErr> {
        let local = self.upsert_inbound(server_id, remote, tally).await?;
        if scope == Scope::InboundsOnly {
            return Ok(());
        }
        self.sync_inbound_clients(&local, remote, tally).await
    }

    /// 按 remote_id、tag、(server_id, port) 的顺序匹配本地入站
    async fn find_local_inbound(
        &self,
        server_id: i64,
        remote: &RemoteInbound,
    ) -> Result<Option<server_inbound::Model>, DbErr> {
        let by_remote_id = ServerInbound::find()
            .filter(server_inbound::Column::ServerId.eq(server_id))
            .filter(server_inbound::Column::RemoteId.eq(remote.id))
            .one(&self.db)
            .await?;
        if by_remote_id.is_some() {
            return Ok(by_remote_id);
        }

        if !remote.tag.trim().is_empty() {
            let by_tag = ServerInbound::find()
                .filter(server_inbound::Column::ServerId.eq(server_id))
                .filter(server_inbound::Column::Tag.eq(remote.tag.as_str()))
                .order_by_asc(server_inbound::Column::Id)
                .one(&self.db)
                .await?;
            if by_tag.is_some() {
                return Ok(by_tag);
            }
        }

        ServerInbound::find()
            .filter(server_inbound::Column::ServerId.eq(server_id))
            .filter(server_inbound::Column::Port.eq(remote.port))
            .one(&self.db)
            .await
    }

    async fn upsert_inbound(
        &self,
        server_id: i64,
        remote: &RemoteInbound,
        tally: &mut SyncTally,
    ) -> Result<server_inbound::Model, DbErr> {
        let existing = self.find_local_inbound(server_id, remote).await?;
        let now = Utc::now().naive_utc();

        match (inbound_from_remote(existing.as_ref(), remote, server_id, now), existing) {
            (None, Some(current)) => Ok(current),
            (Some(active), Some(_)) => {
                let model = active.update(&self.db).await?;
                tally.inbound_updated();
                Ok(model)
            }
            (Some(active), None) => {
                let model = active.insert(&self.db).await?;
                info!("新增入站: server #{} 端口 {} ({})", server_id, model.port, model.protocol);
                tally.inbound_created();
                Ok(model)
            }
            (None, None) => Err(DbErr::Custom(format!("入站 {} 映射结果为空", remote.port))),
        }
    }

    /// 同步一个入站下的客户端并清理孤立客户端
    async fn sync_inbound_clients(
        &self,
        local: &server_inbound::Model,
        remote: &RemoteInbound,
        tally: &mut SyncTally,
    ) -> Result<(), DbErr> {
        let decoded = decode_clients(&remote.settings, remote.client_stats.as_deref());
        if decoded.malformed {
            warn!(
                "入站 {} (server #{}) 的 settings 无法解析，按无客户端处理并跳过孤立清理",
                local.port, local.server_id
            );
            return Ok(());
        }
        // 有无法解析的条目时无法确认哪些客户端已在面板上删除，本次不清理孤立客户端
        let prune_orphans = decoded.skipped == 0;
        if !prune_orphans {
            warn!(
                "入站 {} (server #{}) 跳过 {} 个无效客户端条目，本次不清理孤立客户端",
                local.port, local.server_id, decoded.skipped
            );
        }

        let locals = ServerClient::find()
            .filter(server_client::Column::ServerInboundId.eq(local.id))
            .order_by_asc(server_client::Column::Id)
            .all(&self.db)
            .await?;

        // 有订阅 ID 的按订阅 ID 索引，没有的按 email 索引；重复时保留 ID 最小的
        let mut by_sub: HashMap<String, server_client::Model> = HashMap::new();
        let mut unkeyed: HashMap<String, server_client::Model> = HashMap::new();
        for client in &locals {
            match client.sub_key() {
                Some(sub) => {
                    by_sub.entry(sub.to_string()).or_insert_with(|| client.clone());
                }
                None => {
                    unkeyed.entry(client.email.clone()).or_insert_with(|| client.clone());
                }
            }
        }

        let now = Utc::now().naive_utc();
        let mut seen: HashSet<String> = HashSet::new();
        let mut kept: HashSet<i64> = HashSet::new();

        for remote_client in &decoded.clients {
            let email = remote_client.email.trim();
            let existing = match remote_client.sub_id() {
                // 有订阅 ID 时，也可以接管同 email 的未关联客户端
                Some(sub) => by_sub.get(sub).cloned().or_else(|| unkeyed.remove(email)),
                None => unkeyed.get(email).cloned(),
            };

            let model = match upsert_from_remote(existing.as_ref(), remote_client, local.id, now) {
                None => match existing {
                    Some(current) => current,
                    None => continue,
                },
                Some(active) => {
                    if existing.is_some() {
                        let model = active.update(&self.db).await?;
                        tally.client_updated();
                        model
                    } else {
                        let model = active.insert(&self.db).await?;
                        debug!("新增客户端: {} (入站 {})", model.email, local.port);
                        tally.client_created();
                        model
                    }
                }
            };

            kept.insert(model.id);
            match model.sub_key() {
                Some(sub) => {
                    seen.insert(sub.to_string());
                    by_sub.insert(sub.to_string(), model);
                }
                None => {
                    unkeyed.insert(model.email.clone(), model);
                }
            }
        }

        if !prune_orphans {
            return Ok(());
        }

        // 只清理有订阅 ID 的客户端，未关联的记录永不删除
        let orphan_ids: Vec<i64> = locals
            .iter()
            .filter_map(|client| {
                let sub = client.sub_key()?;
                let orphan = !seen.contains(sub) || !kept.contains(&client.id);
                orphan.then_some(client.id)
            })
            .collect();

        if !orphan_ids.is_empty() {
            let result = ServerClient::delete_many()
                .filter(server_client::Column::Id.is_in(orphan_ids))
                .exec(&self.db)
                .await?;
            info!(
                "🧹 入站 {} (server #{}) 删除 {} 个孤立客户端",
                local.port, local.server_id, result.rows_affected
            );
            tally.orphans_deleted(result.rows_affected);
        }

        Ok(())
    }
}

/// 为本地入站找到面板上的对应入站
fn find_counterpart<'a>(local: &server_inbound::Model, remote_list: &'a [RemoteInbound]) -> Option<&'a RemoteInbound> {
    if let Some(remote_id) = local.remote_id {
        if let Some(found) = remote_list.iter().find(|r| r.id == remote_id) {
            return Some(found);
        }
    }
    if !local.tag.trim().is_empty() {
        if let Some(found) = remote_list.iter().find(|r| r.tag == local.tag) {
            return Some(found);
        }
    }
    remote_list.iter().find(|r| r.port == local.port)
}
