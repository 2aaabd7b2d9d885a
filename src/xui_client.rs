//! 3X-UI 面板 HTTP 客户端
//!
//! 通过面板的 REST API 实现 `PanelApi`。会话保存在 reqwest 的 cookie store 中，
//! 数据接口返回未登录（401/403/404 或登录页 HTML）时自动重新登录并重试一次。

use async_trait::async_trait;
use common::protocol::panel::{ClientTraffic, PanelApi, PanelError, PanelResult, RemoteInbound};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// 面板统一响应格式
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    obj: Value,
}

/// 单次请求的结果，区分会话失效以便重试
enum Attempt {
    Done(Envelope),
    SessionExpired,
}

pub struct XuiClient {
    base_url: Url,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl XuiClient {
    pub fn new(panel_url: &str, username: &str, password: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(panel_url.trim())
            .map_err(|e| anyhow::anyhow!("面板地址无效 {}: {}", panel_url, e))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow::anyhow!("面板地址无效: {}", panel_url));
        }

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            client,
        })
    }

    /// 拼接接口地址，每个路径段单独转义
    fn endpoint(&self, segments: &[&str]) -> PanelResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PanelError::Transport(format!("面板地址无效: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn api(&self, segments: &[&str]) -> PanelResult<Url> {
        let mut full = vec!["panel", "api", "inbounds"];
        full.extend_from_slice(segments);
        self.endpoint(&full)
    }

    async fn attempt(&self, method: Method, url: Url) -> PanelResult<Attempt> {
        let resp = self
            .client
            .request(method, url.clone())
            .send()
            .await
            .map_err(|e| PanelError::Transport(e.to_string()))?;

        let status = resp.status();
        if is_session_status(status) {
            return Ok(Attempt::SessionExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PanelError::Transport(format!("{} {} - {}", url.path(), status, body)));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| PanelError::Transport(e.to_string()))?;
        if looks_like_login_page(&body) {
            return Ok(Attempt::SessionExpired);
        }

        let envelope = serde_json::from_str::<Envelope>(&body)
            .map_err(|e| PanelError::Malformed(format!("{}: {}", url.path(), e)))?;
        Ok(Attempt::Done(envelope))
    }

    /// 调用数据接口，会话失效时重新登录并重试一次
    async fn call(&self, method: Method, url: Url) -> PanelResult<Envelope> {
        debug!("调用面板接口: {} {}", method, url.path());
        if let Attempt::Done(envelope) = self.attempt(method.clone(), url.clone()).await? {
            return Ok(envelope);
        }

        debug!("面板会话失效，重新登录: {}", self.base_url);
        if !self.login().await? {
            return Err(PanelError::Unauthorized(format!("{} 登录被拒绝", self.base_url)));
        }

        match self.attempt(method, url.clone()).await? {
            Attempt::Done(envelope) => Ok(envelope),
            Attempt::SessionExpired => Err(PanelError::Unauthorized(format!(
                "{} 重新登录后仍无权限",
                url.path()
            ))),
        }
    }
}

fn is_session_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
    )
}

/// 未登录时面板会返回登录页而不是 JSON
fn looks_like_login_page(body: &str) -> bool {
    let head = body.trim_start();
    head.starts_with('<')
}

/// 流量查询的 obj 可能是单个对象、数组或 null
fn parse_traffic(obj: Value) -> PanelResult<Option<ClientTraffic>> {
    let item = match obj {
        Value::Null => return Ok(None),
        Value::Array(items) => match items.into_iter().find(|v| !v.is_null()) {
            Some(item) => item,
            None => return Ok(None),
        },
        other => other,
    };

    serde_json::from_value::<ClientTraffic>(item)
        .map(Some)
        .map_err(|e| PanelError::Malformed(format!("客户端流量: {}", e)))
}

/// IP 列表的 obj 可能是数组、换行/逗号分隔的字符串或 "No IP Record"
fn parse_ips(obj: Value) -> Option<Vec<String>> {
    match obj {
        Value::Null => Some(vec![]),
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect(),
        ),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "No IP Record" {
                return Some(vec![]);
            }
            // 新版面板返回 JSON 数组字符串
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(s) {
                return parse_ips(Value::Array(items));
            }
            Some(
                s.split(['\n', ','])
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        }
        _ => None,
    }
}

#[async_trait]
impl PanelApi for XuiClient {
    async fn login(&self) -> PanelResult<bool> {
        let url = self.endpoint(&["login"])?;
        debug!("登录面板: {}", self.base_url);

        let resp = self
            .client
            .post(url)
            .form(&[("username", self.username.as_str()), ("password", self.password.as_str())])
            .send()
            .await
            .map_err(|e| PanelError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PanelError::Transport(format!("登录请求失败: {}", status)));
        }

        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| PanelError::Malformed(format!("登录响应: {}", e)))?;
        if !envelope.success {
            warn!("面板 {} 登录失败: {}", self.base_url, envelope.msg);
        }
        Ok(envelope.success)
    }

    async fn list_inbounds(&self) -> PanelResult<Vec<RemoteInbound>> {
        let url = self.api(&["list"])?;
        let envelope = self.call(Method::GET, url).await?;
        if !envelope.success {
            return Err(PanelError::Api(envelope.msg));
        }
        if envelope.obj.is_null() {
            return Ok(vec![]);
        }

        serde_json::from_value(envelope.obj)
            .map_err(|e| PanelError::Malformed(format!("入站列表: {}", e)))
    }

    async fn get_client_by_uuid(&self, uuid: &str) -> PanelResult<Option<ClientTraffic>> {
        let url = self.api(&["getClientTrafficsById", uuid])?;
        let envelope = self.call(Method::GET, url).await?;
        if !envelope.success {
            debug!("按 UUID 查询客户端失败: {} - {}", uuid, envelope.msg);
            return Ok(None);
        }
        parse_traffic(envelope.obj)
    }

    async fn get_client_by_email(&self, email: &str) -> PanelResult<Option<ClientTraffic>> {
        let url = self.api(&["getClientTraffics", email])?;
        let envelope = self.call(Method::GET, url).await?;
        if !envelope.success {
            debug!("按 email 查询客户端失败: {} - {}", email, envelope.msg);
            return Ok(None);
        }
        parse_traffic(envelope.obj)
    }

    async fn get_client_ips(&self, identifier: &str) -> PanelResult<Option<Vec<String>>> {
        let url = self.api(&["clientIps", identifier])?;
        let envelope = self.call(Method::POST, url).await?;
        if !envelope.success {
            return Ok(None);
        }
        Ok(parse_ips(envelope.obj))
    }

    async fn reset_client_traffic(&self, remote_inbound_id: i64, email: &str) -> PanelResult<bool> {
        let id = remote_inbound_id.to_string();
        let url = self.api(&[id.as_str(), "resetClientTraffic", email])?;
        let envelope = self.call(Method::POST, url).await?;
        if !envelope.success {
            warn!("面板重置流量失败: inbound={}, email={} - {}", remote_inbound_id, email, envelope.msg);
        }
        Ok(envelope.success)
    }

    async fn clear_client_ips(&self, email: &str) -> PanelResult<bool> {
        let url = self.api(&["clearClientIps", email])?;
        let envelope = self.call(Method::POST, url).await?;
        Ok(envelope.success)
    }
}
