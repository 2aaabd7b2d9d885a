//! 客户端实时流量、流量重置和 IP 记录
//!
//! 流量重置采用"面板尽力而为、本地必定执行"的策略：面板调用失败只记录日志，
//! 本地计数总是清零。

use anyhow::anyhow;
use chrono::{NaiveDateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DbErr, EntityTrait, QueryFilter};
use serde::Serialize;
use tracing::{debug, info, warn};

use common::protocol::panel::ClientTraffic;
use common::utils::format_bytes;

use crate::entity::{server, server_client, server_inbound, Server, ServerClient, ServerInbound};

use super::reconciler::Reconciler;
use super::report::ResetReport;

/// 面板返回的实时流量
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficSnapshot {
    pub up: i64,
    pub down: i64,
    pub total: i64,
    #[serde(rename = "fetchedAt")]
    pub fetched_at: NaiveDateTime,
}

/// 流量重置结果
#[derive(Debug, Clone, Serialize)]
pub struct ResetOutcome {
    /// 重置后的本地记录
    pub client: server_client::Model,
    /// 面板是否确认重置
    #[serde(rename = "remoteReset")]
    pub remote_reset: bool,
}

pub fn traffic_cache_key(server_id: i64, client: &server_client::Model) -> String {
    let key = client.uuid_key().unwrap_or(client.email.as_str());
    format!("xui_client_traffic_{}_{}", server_id, key)
}

pub fn ips_cache_key(server_id: i64, client: &server_client::Model) -> String {
    let email = client.email.trim();
    if email.is_empty() {
        format!("xui_client_ips_{}_{}", server_id, client.id)
    } else {
        format!("xui_client_ips_{}_{}", server_id, email)
    }
}

impl Reconciler {
    /// 查找客户端所属的入站和服务器
    async fn client_context(
        &self,
        client: &server_client::Model,
    ) -> Result<Option<(server_inbound::Model, server::Model)>, DbErr> {
        let Some(inbound) = ServerInbound::find_by_id(client.server_inbound_id).one(&self.db).await? else {
            return Ok(None);
        };
        let server = Server::find_by_id(inbound.server_id).one(&self.db).await?;
        Ok(server.map(|s| (inbound, s)))
    }

    async fn client_server(&self, client: &server_client::Model) -> Option<(server_inbound::Model, server::Model)> {
        match self.client_context(client).await {
            Ok(Some(found)) => Some(found),
            Ok(None) => {
                warn!("客户端 #{} 找不到所属入站或服务器", client.id);
                None
            }
            Err(e) => {
                warn!("查询客户端 #{} 所属服务器失败: {}", client.id, e);
                None
            }
        }
    }

    /// 从面板获取客户端实时流量，先按 UUID 查询，查不到再按 email
    async fn fetch_traffic(&self, server: &server::Model, client: &server_client::Model) -> Option<ClientTraffic> {
        let panel = match self.panels.panel_for(server).await {
            Ok(panel) => panel,
            Err(e) => {
                warn!("{} 获取面板会话失败: {}", server.label(), e);
                return None;
            }
        };

        if let Some(uuid) = client.uuid_key() {
            match panel.get_client_by_uuid(uuid).await {
                Ok(Some(traffic)) => return Some(traffic),
                Ok(None) => debug!("按 UUID 未查到客户端 {}，改用 email", uuid),
                Err(e) => warn!("按 UUID 查询客户端 {} 失败: {}", uuid, e),
            }
        }

        match panel.get_client_by_email(&client.email).await {
            Ok(traffic) => traffic,
            Err(e) => {
                warn!("按 email 查询客户端 {} 失败: {}", client.email, e);
                None
            }
        }
    }

    /// 获取客户端实时流量（带缓存），同时写入本地快照
    ///
    /// 面板查询失败时返回 None，本地记录保持不变。
    pub async fn reconcile_single_client_traffic(
        &self,
        client: &server_client::Model,
    ) -> Option<TrafficSnapshot> {
        let (_, server) = self.client_server(client).await?;
        let key = traffic_cache_key(server.id, client);

        self.traffic_cache
            .get_or_fetch(&key, self.options.traffic_ttl, || async {
                let traffic = self.fetch_traffic(&server, client).await?;
                let snapshot = TrafficSnapshot {
                    up: traffic.up,
                    down: traffic.down,
                    total: traffic.total,
                    fetched_at: Utc::now().naive_utc(),
                };
                debug!(
                    "📊 客户端 {} 实时流量: ↑{} ↓{}",
                    client.email,
                    format_bytes(snapshot.up),
                    format_bytes(snapshot.down)
                );
                self.store_snapshot(client.id, &snapshot).await;
                Some(snapshot)
            })
            .await
    }

    async fn store_snapshot(&self, client_id: i64, snapshot: &TrafficSnapshot) {
        let result = ServerClient::update_many()
            .col_expr(server_client::Column::Up, Expr::value(snapshot.up))
            .col_expr(server_client::Column::Down, Expr::value(snapshot.down))
            .col_expr(server_client::Column::Total, Expr::value(snapshot.total))
            .col_expr(
                server_client::Column::TrafficSyncedAt,
                Expr::value(Some(snapshot.fetched_at)),
            )
            .filter(server_client::Column::Id.eq(client_id))
            .exec(&self.db)
            .await;
        if let Err(e) = result {
            warn!("写入客户端 #{} 流量快照失败: {}", client_id, e);
        }
    }

    /// 面板端重置，任何失败都只记录日志
    async fn reset_remote(&self, client: &server_client::Model) -> bool {
        let Some((inbound, server)) = self.client_server(client).await else {
            return false;
        };
        let Some(remote_id) = inbound.remote_id else {
            warn!("入站 {} 尚未同步面板 ID，跳过面板重置: {}", inbound.port, client.email);
            return false;
        };

        let panel = match self.panels.panel_for(&server).await {
            Ok(panel) => panel,
            Err(e) => {
                warn!("{} 获取面板会话失败，跳过面板重置: {}", server.label(), e);
                return false;
            }
        };

        match panel.reset_client_traffic(remote_id, &client.email).await {
            Ok(true) => true,
            Ok(false) => {
                warn!("{} 未确认重置客户端 {} 的流量", server.label(), client.email);
                false
            }
            Err(e) => {
                warn!("{} 重置客户端 {} 流量失败: {}", server.label(), client.email, e);
                false
            }
        }
    }

    /// 重置客户端流量，本地计数总是清零并把重置次数加一
    pub async fn reset_traffic(&self, client: &server_client::Model) -> anyhow::Result<ResetOutcome> {
        let remote_reset = self.reset_remote(client).await;

        let now = Utc::now().naive_utc();
        let result = ServerClient::update_many()
            .col_expr(server_client::Column::Up, Expr::value(0i64))
            .col_expr(server_client::Column::Down, Expr::value(0i64))
            .col_expr(
                server_client::Column::ResetCount,
                Expr::col(server_client::Column::ResetCount).add(1),
            )
            .col_expr(server_client::Column::UpdatedAt, Expr::value(now))
            .filter(server_client::Column::Id.eq(client.id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(anyhow!("客户端 #{} 不存在", client.id));
        }

        let updated = ServerClient::find_by_id(client.id)
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow!("客户端 #{} 不存在", client.id))?;

        if let Ok(Some((inbound, _))) = self.client_context(&updated).await {
            self.traffic_cache
                .invalidate(&traffic_cache_key(inbound.server_id, &updated))
                .await;
        }

        info!(
            "✅ 客户端 {} 流量已重置（第 {} 次，面板{}）",
            updated.email,
            updated.reset_count,
            if remote_reset { "已确认" } else { "未确认" }
        );
        Ok(ResetOutcome {
            client: updated,
            remote_reset,
        })
    }

    /// 批量重置，逐个执行，单个失败不影响其他客户端
    pub async fn reset_traffic_many(&self, client_ids: &[i64]) -> ResetReport {
        let mut report = ResetReport::default();
        for &id in client_ids {
            let context = format!("client #{}", id);
            let client = match ServerClient::find_by_id(id).one(&self.db).await {
                Ok(Some(client)) => client,
                Ok(None) => {
                    report.fail(context, "客户端不存在");
                    continue;
                }
                Err(e) => {
                    warn!("查询客户端 #{} 失败: {}", id, e);
                    report.fail(context, e);
                    continue;
                }
            };

            match self.reset_traffic(&client).await {
                Ok(outcome) => {
                    report.reset += 1;
                    if outcome.remote_reset {
                        report.remote_confirmed += 1;
                    }
                }
                Err(e) => {
                    warn!("重置客户端 {} 流量失败: {}", client.email, e);
                    report.fail(format!("{} ({})", context, client.email), e);
                }
            }
        }
        report
    }

    /// 获取客户端最近使用的 IP（带缓存），面板失败时返回 None
    pub async fn client_ips(&self, client: &server_client::Model) -> Option<Vec<String>> {
        let (_, server) = self.client_server(client).await?;
        let key = ips_cache_key(server.id, client);

        self.ips_cache
            .get_or_fetch(&key, self.options.ips_ttl, || async {
                let panel = match self.panels.panel_for(&server).await {
                    Ok(panel) => panel,
                    Err(e) => {
                        warn!("{} 获取面板会话失败: {}", server.label(), e);
                        return None;
                    }
                };
                match panel.get_client_ips(&client.email).await {
                    Ok(ips) => ips,
                    Err(e) => {
                        warn!("获取客户端 {} 的 IP 记录失败: {}", client.email, e);
                        None
                    }
                }
            })
            .await
    }

    /// 清理过期的流量和 IP 缓存
    pub async fn purge_expired_cache(&self) -> usize {
        self.traffic_cache.purge_expired().await + self.ips_cache.purge_expired().await
    }

    /// 清除面板上的客户端 IP 记录
    pub async fn clear_client_ips(&self, client: &server_client::Model) -> bool {
        let Some((_, server)) = self.client_server(client).await else {
            return false;
        };
        let panel = match self.panels.panel_for(&server).await {
            Ok(panel) => panel,
            Err(e) => {
                warn!("{} 获取面板会话失败: {}", server.label(), e);
                return false;
            }
        };

        match panel.clear_client_ips(&client.email).await {
            Ok(true) => {
                self.ips_cache.invalidate(&ips_cache_key(server.id, client)).await;
                info!("🧹 已清除客户端 {} 的 IP 记录", client.email);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("清除客户端 {} 的 IP 记录失败: {}", client.email, e);
                false
            }
        }
    }
}
