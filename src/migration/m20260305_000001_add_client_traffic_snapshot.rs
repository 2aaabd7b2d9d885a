use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 实时流量快照的写入时间
        manager
            .alter_table(
                Table::alter()
                    .table(ServerClient::Table)
                    .add_column(timestamp_null(ServerClient::TrafficSyncedAt))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(ServerClient::Table)
                    .drop_column(ServerClient::TrafficSyncedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum ServerClient {
    Table,
    TrafficSyncedAt,
}
