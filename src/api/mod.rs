use axum::extract::{Extension, Request};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::AppState;

pub mod handlers;

use handlers::ApiResponse;

/// 校验管理接口共享密钥，未配置密钥时跳过
fn verify_api_secret(headers: &HeaderMap, expected_secret: &str) -> bool {
    if expected_secret.is_empty() {
        return true;
    }
    headers
        .get("X-Api-Secret")
        .and_then(|v| v.to_str().ok())
        .map(|s| s == expected_secret)
        .unwrap_or(false)
}

async fn api_secret_middleware(
    Extension(state): Extension<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if !verify_api_secret(req.headers(), &state.config.get_api_secret()) {
        warn!("拒绝未授权的管理请求: {} {}", req.method(), req.uri().path());
        return (
            StatusCode::UNAUTHORIZED,
            ApiResponse::<()>::error("invalid api secret".to_string()),
        )
            .into_response();
    }
    next.run(req).await
}

pub fn build_router(app_state: AppState) -> Router {
    let api_routes = Router::new()
        // 服务器同步
        .route("/servers", get(handlers::list_servers))
        .route("/servers/sync", post(handlers::sync_all_servers))
        .route("/servers/{id}/sync", post(handlers::sync_server))
        .route("/servers/{id}/sync-inbounds", post(handlers::sync_server_inbounds))
        .route("/inbounds/{id}/sync", post(handlers::sync_inbound))
        // 客户端操作
        .route("/clients/resolve", get(handlers::resolve_client))
        .route("/clients/reset-traffic", post(handlers::reset_clients_traffic))
        .route("/clients/{id}/traffic", get(handlers::get_client_traffic))
        .route("/clients/{id}/reset-traffic", post(handlers::reset_client_traffic))
        .route("/clients/{id}/ips", get(handlers::get_client_ips))
        .route("/clients/{id}/clear-ips", post(handlers::clear_client_ips))
        .layer(from_fn(api_secret_middleware))
        .layer(Extension(app_state));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// 启动 Web API 服务
pub fn start_web_server(app_state: AppState) -> tokio::task::JoinHandle<()> {
    let web_port = app_state.config.web_port;
    let app = build_router(app_state);

    tokio::spawn(async move {
        let web_addr = format!("0.0.0.0:{}", web_port);
        match tokio::net::TcpListener::bind(web_addr.clone()).await {
            Ok(listener) => {
                info!("🌐 管理接口: http://{}/api", web_addr);
                if let Err(err) = axum::serve(listener, app).await {
                    tracing::error!("Web服务错误：{}", err);
                }
            }
            Err(err) => {
                tracing::error!("Web服务启动失败：{}", err);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_verify_api_secret() {
        let mut headers = HeaderMap::new();
        assert!(verify_api_secret(&headers, ""));
        assert!(!verify_api_secret(&headers, "s3cret"));

        headers.insert("X-Api-Secret", HeaderValue::from_static("wrong"));
        assert!(!verify_api_secret(&headers, "s3cret"));

        headers.insert("X-Api-Secret", HeaderValue::from_static("s3cret"));
        assert!(verify_api_secret(&headers, "s3cret"));
    }
}
