use serde::Serialize;

mod client;
mod server;

pub use client::*;
pub use server::*;

/// 统一响应格式
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> axum::response::Json<Self> {
        axum::response::Json(Self {
            success: true,
            data: Some(data),
            message: "Success".to_string(),
        })
    }

    /// 带操作摘要的成功响应
    pub fn success_with(data: T, message: String) -> axum::response::Json<Self> {
        axum::response::Json(Self {
            success: true,
            data: Some(data),
            message,
        })
    }

    pub fn error(message: String) -> axum::response::Json<Self> {
        axum::response::Json(Self {
            success: false,
            data: None,
            message,
        })
    }
}
