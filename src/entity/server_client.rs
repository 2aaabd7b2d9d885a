use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "server_client")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[serde(rename = "serverInboundId")]
    pub server_inbound_id: i64,
    /// 面板上的客户端 ID（vless/vmess 为 UUID，trojan/shadowsocks 为密码）
    pub uuid: Option<String>,
    pub email: String,
    #[serde(rename = "subId")]
    pub sub_id: Option<String>,
    pub enable: bool,
    pub up: i64,
    pub down: i64,
    pub total: i64,
    /// 过期时间（毫秒时间戳），None 表示永不过期
    #[serde(rename = "expiryTime")]
    pub expiry_time: Option<i64>,
    #[serde(rename = "limitIp")]
    pub limit_ip: i32,
    #[serde(rename = "resetCount")]
    pub reset_count: i32,
    #[serde(rename = "trafficSyncedAt")]
    pub traffic_synced_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::server_inbound::Entity",
        from = "Column::ServerInboundId",
        to = "super::server_inbound::Column::Id"
    )]
    ServerInbound,
}

impl Related<super::server_inbound::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ServerInbound.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// 非空的订阅 ID
    pub fn sub_key(&self) -> Option<&str> {
        self.sub_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// 非空的面板客户端 ID
    pub fn uuid_key(&self) -> Option<&str> {
        self.uuid.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}
