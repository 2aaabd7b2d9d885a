use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "server")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    /// 面板地址（含 web base path）
    #[serde(rename = "panelUrl")]
    pub panel_url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "lastSyncAt")]
    pub last_sync_at: Option<DateTime>,
    #[serde(rename = "lastSyncError")]
    pub last_sync_error: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::server_inbound::Entity")]
    ServerInbound,
}

impl Related<super::server_inbound::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ServerInbound.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// 日志和同步报告中使用的服务器标识
    pub fn label(&self) -> String {
        format!("server #{} ({})", self.id, self.name)
    }
}
