use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use sea_orm::EntityTrait;
use serde::Deserialize;

use crate::entity::{server_client, ServerClient};
use crate::sync::{KeyResolver, ResetOutcome, ResetReport, TrafficSnapshot};
use crate::AppState;

use super::ApiResponse;

#[derive(Deserialize)]
pub struct ResolveQuery {
    pub q: String,
}

#[derive(Deserialize)]
pub struct ResetTrafficRequest {
    pub ids: Vec<i64>,
}

async fn find_client(state: &AppState, id: i64) -> Result<server_client::Model, (StatusCode, String)> {
    match ServerClient::find_by_id(id).one(&state.db).await {
        Ok(Some(client)) => Ok(client),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("客户端 #{} 不存在", id))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("查询客户端失败: {}", e),
        )),
    }
}

/// 按 email / 订阅 ID / UUID 查找客户端
pub async fn resolve_client(
    Extension(state): Extension<AppState>,
    Query(query): Query<ResolveQuery>,
) -> impl IntoResponse {
    match KeyResolver::default().resolve(&state.db, &query.q).await {
        Some(client) => (StatusCode::OK, ApiResponse::success(client)),
        None => (
            StatusCode::NOT_FOUND,
            ApiResponse::<server_client::Model>::error("未找到匹配的客户端".to_string()),
        ),
    }
}

/// 客户端实时流量，面板不可用时 data 为空
pub async fn get_client_traffic(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let client = match find_client(&state, id).await {
        Ok(client) => client,
        Err((status, message)) => {
            return (status, ApiResponse::<Option<TrafficSnapshot>>::error(message))
        }
    };

    match state.reconciler.reconcile_single_client_traffic(&client).await {
        Some(snapshot) => (StatusCode::OK, ApiResponse::success(Some(snapshot))),
        None => (
            StatusCode::OK,
            ApiResponse::success_with(None, "暂无实时流量数据".to_string()),
        ),
    }
}

pub async fn reset_client_traffic(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let client = match find_client(&state, id).await {
        Ok(client) => client,
        Err((status, message)) => return (status, ApiResponse::<ResetOutcome>::error(message)),
    };

    match state.reconciler.reset_traffic(&client).await {
        Ok(outcome) => {
            let message = if outcome.remote_reset {
                "流量已重置（面板已同步）".to_string()
            } else {
                "本地流量已重置，面板重置未确认".to_string()
            };
            (StatusCode::OK, ApiResponse::success_with(outcome, message))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiResponse::<ResetOutcome>::error(format!("重置流量失败: {}", e)),
        ),
    }
}

/// 批量重置流量
pub async fn reset_clients_traffic(
    Extension(state): Extension<AppState>,
    Json(req): Json<ResetTrafficRequest>,
) -> impl IntoResponse {
    let report: ResetReport = state.reconciler.reset_traffic_many(&req.ids).await;
    let message = report.to_string();
    (StatusCode::OK, ApiResponse::success_with(report, message))
}

pub async fn get_client_ips(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let client = match find_client(&state, id).await {
        Ok(client) => client,
        Err((status, message)) => return (status, ApiResponse::<Vec<String>>::error(message)),
    };

    match state.reconciler.client_ips(&client).await {
        Some(ips) => (StatusCode::OK, ApiResponse::success(ips)),
        None => (
            StatusCode::BAD_GATEWAY,
            ApiResponse::<Vec<String>>::error("无法从面板获取 IP 记录".to_string()),
        ),
    }
}

pub async fn clear_client_ips(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let client = match find_client(&state, id).await {
        Ok(client) => client,
        Err((status, message)) => return (status, ApiResponse::<bool>::error(message)),
    };

    if state.reconciler.clear_client_ips(&client).await {
        (StatusCode::OK, ApiResponse::success(true))
    } else {
        (
            StatusCode::BAD_GATEWAY,
            ApiResponse::<bool>::error("面板清除 IP 记录失败".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sync::testing::{
        insert_client, insert_inbound, insert_server, memory_db, FakeFactory, FakePanel, ResetMode,
    };
    use crate::sync::{ReconcileOptions, Reconciler};
    use axum::response::Response;
    use serde_json::Value;
    use std::sync::Arc;

    async fn state_with_panel(panel: Arc<FakePanel>) -> (AppState, server_client::Model) {
        let db = memory_db().await;
        let server = insert_server(&db, "hk").await;
        let inbound = insert_inbound(&db, server.id, 443, Some(1)).await;
        let client = insert_client(&db, inbound.id, "u1@x", Some("s1"), None).await;

        let factory = FakeFactory::new();
        factory.register(server.id, panel);
        let reconciler = Reconciler::new(db.clone(), factory, ReconcileOptions::default());
        let state = AppState {
            db,
            reconciler,
            config: Arc::new(Config::default()),
        };
        (state, client)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_handler() {
        let (state, client) = state_with_panel(FakePanel::new(vec![])).await;

        let response = resolve_client(
            Extension(state.clone()),
            Query(ResolveQuery { q: "s1".to_string() }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["id"], client.id);

        let response = resolve_client(Extension(state), Query(ResolveQuery { q: "zzz".to_string() }))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reset_handler_reports_remote_leg() {
        let panel = FakePanel::new(vec![]);
        panel.set_reset_mode(ResetMode::Fail);
        let (state, client) = state_with_panel(panel).await;

        let response = reset_client_traffic(Extension(state.clone()), Path(client.id))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["remoteReset"], false);
        assert_eq!(body["data"]["client"]["resetCount"], 1);
        assert_eq!(body["data"]["client"]["up"], 0);

        let response = reset_client_traffic(Extension(state), Path(9999))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bulk_reset_handler() {
        let (state, client) = state_with_panel(FakePanel::new(vec![])).await;
        let response = reset_clients_traffic(
            Extension(state),
            Json(ResetTrafficRequest {
                ids: vec![client.id, 404],
            }),
        )
        .await
        .into_response();
        let body = body_json(response).await;
        assert_eq!(body["data"]["reset"], 1);
        assert_eq!(body["data"]["remoteConfirmed"], 1);
        assert_eq!(body["data"]["failed"], 1);
    }

    #[tokio::test]
    async fn test_traffic_handler_without_live_data() {
        let (state, client) = state_with_panel(FakePanel::new(vec![])).await;
        let response = get_client_traffic(Extension(state), Path(client.id))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["data"].is_null());
        assert_eq!(body["message"], "暂无实时流量数据");
    }
}
