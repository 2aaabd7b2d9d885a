//! 入站 settings 解析
//!
//! 面板把客户端列表嵌在入站的 settings JSON 中。settings 可能是字符串，
//! 也可能是已解码的对象；无法解析时按"没有客户端"处理，不返回错误。

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use super::panel::{ClientTraffic, RemoteClient};

/// settings 解析结果
#[derive(Debug, Clone, Default)]
pub struct DecodedClients {
    pub clients: Vec<RemoteClient>,
    /// settings 存在但无法解析，或 clients 不是数组
    pub malformed: bool,
    /// 被跳过的无效客户端条目数
    pub skipped: usize,
}

/// 把 JSON 值规范化为文本（字符串原样返回，null/空串返回 None）
pub fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// 解析 settings，返回 (对象, 是否格式错误)
fn settings_object(settings: &Value) -> (Option<Value>, bool) {
    match settings {
        Value::Null => (None, false),
        Value::String(s) if s.trim().is_empty() => (None, false),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v) if v.is_object() => (Some(v), false),
            _ => (None, true),
        },
        Value::Object(_) => (Some(settings.clone()), false),
        _ => (None, true),
    }
}

/// 从入站 settings 中提取客户端列表，并按 email 合并 clientStats 中的流量
pub fn decode_clients(settings: &Value, client_stats: Option<&[ClientTraffic]>) -> DecodedClients {
    let (object, malformed) = settings_object(settings);
    let Some(object) = object else {
        return DecodedClients {
            malformed,
            ..Default::default()
        };
    };

    let entries = match object.get("clients") {
        None | Some(Value::Null) => return DecodedClients::default(),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return DecodedClients {
                malformed: true,
                ..Default::default()
            }
        }
    };

    let stats: HashMap<&str, &ClientTraffic> = client_stats
        .unwrap_or_default()
        .iter()
        .map(|s| (s.email.as_str(), s))
        .collect();

    let mut decoded = DecodedClients::default();
    for entry in entries {
        let mut client = match serde_json::from_value::<RemoteClient>(entry.clone()) {
            Ok(c) if !c.email.trim().is_empty() => c,
            Ok(_) => {
                debug!("跳过缺少 email 的客户端条目");
                decoded.skipped += 1;
                continue;
            }
            Err(e) => {
                debug!("跳过无法解析的客户端条目: {}", e);
                decoded.skipped += 1;
                continue;
            }
        };

        if let Some(traffic) = stats.get(client.email.as_str()) {
            client.up = traffic.up;
            client.down = traffic.down;
        }
        decoded.clients.push(client);
    }

    decoded
}
