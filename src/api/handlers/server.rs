use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};
use sea_orm::{EntityTrait, QueryOrder};
use tracing::info;

use crate::entity::{server, Server, ServerInbound};
use crate::sync::SyncReport;
use crate::AppState;

use super::ApiResponse;

pub async fn list_servers(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match Server::find()
        .order_by_asc(server::Column::Id)
        .all(&state.db)
        .await
    {
        Ok(servers) => (StatusCode::OK, ApiResponse::success(servers)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiResponse::<Vec<server::Model>>::error(format!("获取服务器列表失败: {}", e)),
        ),
    }
}

/// 同步全部启用的服务器
pub async fn sync_all_servers(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match state.reconciler.reconcile_all().await {
        Ok(report) => {
            info!("{}", report);
            let message = report.to_string();
            (StatusCode::OK, ApiResponse::success_with(report, message))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiResponse::<SyncReport>::error(format!("同步失败: {}", e)),
        ),
    }
}

async fn find_server(state: &AppState, id: i64) -> Result<server::Model, (StatusCode, String)> {
    match Server::find_by_id(id).one(&state.db).await {
        Ok(Some(server)) => Ok(server),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("服务器 #{} 不存在", id))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("查询服务器失败: {}", e),
        )),
    }
}

/// 同步一台服务器的入站和客户端
pub async fn sync_server(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let server = match find_server(&state, id).await {
        Ok(server) => server,
        Err((status, message)) => return (status, ApiResponse::<SyncReport>::error(message)),
    };

    let report = state.reconciler.reconcile_clients(&server).await;
    let message = report.to_string();
    (StatusCode::OK, ApiResponse::success_with(report, message))
}

/// 只同步一台服务器的入站
pub async fn sync_server_inbounds(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let server = match find_server(&state, id).await {
        Ok(server) => server,
        Err((status, message)) => return (status, ApiResponse::<SyncReport>::error(message)),
    };

    let report = state.reconciler.reconcile_inbounds(&server).await;
    let message = report.to_string();
    (StatusCode::OK, ApiResponse::success_with(report, message))
}

/// 同步单个入站
pub async fn sync_inbound(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match ServerInbound::find_by_id(id).one(&state.db).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                ApiResponse::<SyncReport>::error(format!("入站 #{} 不存在", id)),
            )
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::<SyncReport>::error(format!("查询入站失败: {}", e)),
            )
        }
    }

    match state.reconciler.reconcile_inbound(id).await {
        Ok(report) => {
            let message = report.to_string();
            (StatusCode::OK, ApiResponse::success_with(report, message))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiResponse::<SyncReport>::error(format!("同步失败: {}", e)),
        ),
    }
}
