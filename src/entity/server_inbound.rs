use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "server_inbound")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[serde(rename = "serverId")]
    pub server_id: i64,
    /// 面板分配的入站 ID，首次同步前为空
    #[serde(rename = "remoteId")]
    pub remote_id: Option<i64>,
    pub tag: String,
    pub port: i32,
    pub protocol: String,
    pub remark: String,
    pub enable: bool,
    /// 面板返回的原始 settings JSON
    #[sea_orm(column_type = "Text")]
    pub settings: String,
    #[serde(rename = "streamSettings")]
    #[sea_orm(column_type = "Text", nullable)]
    pub stream_settings: Option<String>,
    pub up: i64,
    pub down: i64,
    pub total: i64,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::server::Entity",
        from = "Column::ServerId",
        to = "super::server::Column::Id"
    )]
    Server,
    #[sea_orm(has_many = "super::server_client::Entity")]
    ServerClient,
}

impl Related<super::server::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Server.def()
    }
}

impl Related<super::server_client::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ServerClient.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
