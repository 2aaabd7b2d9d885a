use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 创建 server 表
        manager
            .create_table(
                Table::create()
                    .table(Server::Table)
                    .if_not_exists()
                    .col(big_integer(Server::Id).auto_increment().primary_key())
                    .col(string(Server::Name))
                    .col(string(Server::PanelUrl))
                    .col(string(Server::Username))
                    .col(string(Server::Password))
                    .col(boolean(Server::IsActive).default(true))
                    .col(timestamp_null(Server::LastSyncAt))
                    .col(text_null(Server::LastSyncError))
                    .col(timestamp(Server::CreatedAt))
                    .col(timestamp(Server::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // 创建 server_inbound 表
        manager
            .create_table(
                Table::create()
                    .table(ServerInbound::Table)
                    .if_not_exists()
                    .col(big_integer(ServerInbound::Id).auto_increment().primary_key())
                    .col(big_integer(ServerInbound::ServerId))
                    .col(big_integer_null(ServerInbound::RemoteId))
                    .col(string(ServerInbound::Tag).default(""))
                    .col(integer(ServerInbound::Port))
                    .col(string(ServerInbound::Protocol).default(""))
                    .col(string(ServerInbound::Remark).default(""))
                    .col(boolean(ServerInbound::Enable).default(true))
                    .col(text(ServerInbound::Settings))
                    .col(text_null(ServerInbound::StreamSettings))
                    .col(big_integer(ServerInbound::Up).default(0))
                    .col(big_integer(ServerInbound::Down).default(0))
                    .col(big_integer(ServerInbound::Total).default(0))
                    .col(timestamp(ServerInbound::CreatedAt))
                    .col(timestamp(ServerInbound::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_server_inbound_server")
                            .from(ServerInbound::Table, ServerInbound::ServerId)
                            .to(Server::Table, Server::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 同一服务器上端口唯一
        manager
            .create_index(
                Index::create()
                    .name("idx_server_inbound_server_port")
                    .table(ServerInbound::Table)
                    .col(ServerInbound::ServerId)
                    .col(ServerInbound::Port)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 创建 server_client 表
        manager
            .create_table(
                Table::create()
                    .table(ServerClient::Table)
                    .if_not_exists()
                    .col(big_integer(ServerClient::Id).auto_increment().primary_key())
                    .col(big_integer(ServerClient::ServerInboundId))
                    .col(string_null(ServerClient::Uuid))
                    .col(string(ServerClient::Email))
                    .col(string_null(ServerClient::SubId))
                    .col(boolean(ServerClient::Enable).default(true))
                    .col(big_integer(ServerClient::Up).default(0))
                    .col(big_integer(ServerClient::Down).default(0))
                    .col(big_integer(ServerClient::Total).default(0))
                    .col(big_integer_null(ServerClient::ExpiryTime))
                    .col(integer(ServerClient::LimitIp).default(0))
                    .col(integer(ServerClient::ResetCount).default(0))
                    .col(timestamp(ServerClient::CreatedAt))
                    .col(timestamp(ServerClient::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_server_client_inbound")
                            .from(ServerClient::Table, ServerClient::ServerInboundId)
                            .to(ServerInbound::Table, ServerInbound::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_server_client_inbound_sub_id")
                    .table(ServerClient::Table)
                    .col(ServerClient::ServerInboundId)
                    .col(ServerClient::SubId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_server_client_email")
                    .table(ServerClient::Table)
                    .col(ServerClient::Email)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ServerClient::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(ServerInbound::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Server::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Server {
    Table,
    Id,
    Name,
    PanelUrl,
    Username,
    Password,
    IsActive,
    LastSyncAt,
    LastSyncError,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ServerInbound {
    Table,
    Id,
    ServerId,
    RemoteId,
    Tag,
    Port,
    Protocol,
    Remark,
    Enable,
    Settings,
    StreamSettings,
    Up,
    Down,
    Total,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ServerClient {
    Table,
    Id,
    ServerInboundId,
    Uuid,
    Email,
    SubId,
    Enable,
    Up,
    Down,
    Total,
    ExpiryTime,
    LimitIp,
    ResetCount,
    CreatedAt,
    UpdatedAt,
}
