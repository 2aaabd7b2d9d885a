use anyhow::Context;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::prelude::*;
use std::fs::{self, create_dir_all};
use std::path::Path;
use tokio::sync::OnceCell;

mod m20260301_000001_init;
mod m20260305_000001_add_client_traffic_snapshot;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_init::Migration),
            Box::new(m20260305_000001_add_client_traffic_snapshot::Migration),
        ]
    }
}

static DATABASE_CONNECTION: OnceCell<DatabaseConnection> = OnceCell::const_new();

/// 初始化进程级数据库连接（只在第一次调用时真正连接）
pub async fn init_connection(db_path: &str) -> anyhow::Result<&'static DatabaseConnection> {
    DATABASE_CONNECTION
        .get_or_try_init(|| init_sqlite(db_path))
        .await
}

pub async fn init_sqlite(db_path: &str) -> anyhow::Result<DatabaseConnection> {
    let path = Path::new(db_path);
    if !path.exists() {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)
                    .with_context(|| format!("无法创建数据目录: {}", parent.display()))?;
            }
        }
        fs::write(path, "").with_context(|| format!("无法创建数据库文件: {}", db_path))?;
    }

    let mut opts = ConnectOptions::new(format!("sqlite://{}?mode=rwc", db_path));
    opts.sqlx_logging(false);
    let db = Database::connect(opts)
        .await
        .with_context(|| format!("连接数据库失败: {}", db_path))?;

    Ok(db)
}
