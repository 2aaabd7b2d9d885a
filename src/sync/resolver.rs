//! 客户端标识解析
//!
//! 把任意客户端标识（通常是 email，也可能是订阅 ID、UUID 或本地 ID）解析为
//! 本地客户端记录。按顺序尝试各个策略，第一个命中即返回。

use async_trait::async_trait;
use sea_orm::sea_query::LikeExpr;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Select,
};
use tracing::{debug, warn};

use crate::entity::{server_client, ServerClient};

/// 单个解析策略
#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 尝试解析，未命中返回 Ok(None)
    async fn try_resolve(
        &self,
        db: &DatabaseConnection,
        input: &str,
        inbound_id: Option<i64>,
    ) -> Result<Option<server_client::Model>, DbErr>;
}

fn scoped(inbound_id: Option<i64>) -> Select<ServerClient> {
    let query = ServerClient::find();
    match inbound_id {
        Some(id) => query.filter(server_client::Column::ServerInboundId.eq(id)),
        None => query,
    }
}

/// email 完全匹配
pub struct ExactEmail;

#[async_trait]
impl ResolveStrategy for ExactEmail {
    fn name(&self) -> &'static str {
        "exact_email"
    }

    async fn try_resolve(
        &self,
        db: &DatabaseConnection,
        input: &str,
        inbound_id: Option<i64>,
    ) -> Result<Option<server_client::Model>, DbErr> {
        scoped(inbound_id)
            .filter(server_client::Column::Email.eq(input))
            .order_by_asc(server_client::Column::Id)
            .one(db)
            .await
    }
}

/// 订阅 ID 完全匹配
pub struct ExactSubId;

#[async_trait]
impl ResolveStrategy for ExactSubId {
    fn name(&self) -> &'static str {
        "exact_sub_id"
    }

    async fn try_resolve(
        &self,
        db: &DatabaseConnection,
        input: &str,
        inbound_id: Option<i64>,
    ) -> Result<Option<server_client::Model>, DbErr> {
        scoped(inbound_id)
            .filter(server_client::Column::SubId.eq(input))
            .order_by_asc(server_client::Column::Id)
            .one(db)
            .await
    }
}

/// 面板 UUID 或本地 ID 匹配
pub struct ExactIdOrUuid;

#[async_trait]
impl ResolveStrategy for ExactIdOrUuid {
    fn name(&self) -> &'static str {
        "exact_id_or_uuid"
    }

    async fn try_resolve(
        &self,
        db: &DatabaseConnection,
        input: &str,
        inbound_id: Option<i64>,
    ) -> Result<Option<server_client::Model>, DbErr> {
        let mut condition = Condition::any().add(server_client::Column::Uuid.eq(input));
        if let Ok(id) = input.parse::<i64>() {
            condition = condition.add(server_client::Column::Id.eq(id));
        }

        scoped(inbound_id)
            .filter(condition)
            .order_by_asc(server_client::Column::Id)
            .one(db)
            .await
    }
}

/// 按 email 的 @ 前缀模糊匹配
///
/// 多个候选时取最近更新的一条，更新时间相同则取 ID 最小的。
pub struct FuzzyLocalPart;

/// 取 @ 之前的部分，没有 @ 时取整个输入
fn local_part(input: &str) -> Option<&str> {
    let local = input.split('@').next().unwrap_or_default().trim();
    (!local.is_empty()).then_some(local)
}

const LIKE_ESCAPE: char = '!';

/// 构造子串匹配的 LIKE 模式，输入中的 `%`、`_` 按字面匹配
fn contains_pattern(text: &str) -> LikeExpr {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(ch);
    }
    escaped.push('%');
    LikeExpr::new(escaped).escape(LIKE_ESCAPE)
}

#[async_trait]
impl ResolveStrategy for FuzzyLocalPart {
    fn name(&self) -> &'static str {
        "fuzzy_local_part"
    }

    async fn try_resolve(
        &self,
        db: &DatabaseConnection,
        input: &str,
        inbound_id: Option<i64>,
    ) -> Result<Option<server_client::Model>, DbErr> {
        let Some(local) = local_part(input) else {
            return Ok(None);
        };

        scoped(inbound_id)
            .filter(server_client::Column::Email.like(contains_pattern(local)))
            .order_by_desc(server_client::Column::UpdatedAt)
            .order_by_asc(server_client::Column::Id)
            .one(db)
            .await
    }
}

/// 按顺序执行解析策略
pub struct KeyResolver {
    strategies: Vec<Box<dyn ResolveStrategy>>,
}

impl Default for KeyResolver {
    fn default() -> Self {
        Self::with_strategies(vec![
            Box::new(ExactEmail),
            Box::new(ExactSubId),
            Box::new(ExactIdOrUuid),
            Box::new(FuzzyLocalPart),
        ])
    }
}

impl KeyResolver {
    pub fn with_strategies(strategies: Vec<Box<dyn ResolveStrategy>>) -> Self {
        Self { strategies }
    }

    /// 在全部客户端中解析
    pub async fn resolve(&self, db: &DatabaseConnection, input: &str) -> Option<server_client::Model> {
        self.run(db, input, None).await
    }

    /// 只在指定入站下解析
    pub async fn resolve_in_inbound(
        &self,
        db: &DatabaseConnection,
        input: &str,
        inbound_id: i64,
    ) -> Option<server_client::Model> {
        self.run(db, input, Some(inbound_id)).await
    }

    async fn run(
        &self,
        db: &DatabaseConnection,
        input: &str,
        inbound_id: Option<i64>,
    ) -> Option<server_client::Model> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        for strategy in &self.strategies {
            match strategy.try_resolve(db, input, inbound_id).await {
                Ok(Some(client)) => {
                    debug!("标识 {} 通过 {} 解析为客户端 #{}", input, strategy.name(), client.id);
                    return Some(client);
                }
                Ok(None) => {}
                Err(e) => warn!("解析策略 {} 查询失败 ({}): {}", strategy.name(), input, e),
            }
        }
        None
    }
}
