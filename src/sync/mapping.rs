//! 面板记录到本地记录的映射
//!
//! 纯函数：给定已有的本地记录（可能不存在）和面板记录，计算需要写入的
//! ActiveModel。没有字段变化时返回 None，调用方据此跳过写库，保证重复同步
//! 不产生多余的更新。

use chrono::NaiveDateTime;
use sea_orm::{ActiveValue, NotSet, Set, Value};

use common::protocol::panel::{RemoteClient, RemoteInbound};
use common::protocol::settings::json_text;

use crate::entity::{server_client, server_inbound};

/// 值不同时才写入，并记录发生了变化
fn assign<T>(field: &mut ActiveValue<T>, current: &T, desired: T, changed: &mut bool)
where
    T: PartialEq + Into<Value>,
{
    if *current != desired {
        *field = Set(desired);
        *changed = true;
    }
}

/// 面板用 0 表示永不过期
fn normalize_expiry(expiry_time: i64) -> Option<i64> {
    (expiry_time != 0).then_some(expiry_time)
}

/// 根据面板客户端生成本地客户端的写入内容（面板数据优先）
pub fn upsert_from_remote(
    existing: Option<&server_client::Model>,
    remote: &RemoteClient,
    inbound_id: i64,
    now: NaiveDateTime,
) -> Option<server_client::ActiveModel> {
    let uuid = remote.identity().map(str::to_string);
    let email = remote.email.trim().to_string();
    let sub_id = remote.sub_id().map(str::to_string);
    let expiry_time = normalize_expiry(remote.expiry_time);

    let Some(current) = existing else {
        return Some(server_client::ActiveModel {
            id: NotSet,
            server_inbound_id: Set(inbound_id),
            uuid: Set(uuid),
            email: Set(email),
            sub_id: Set(sub_id),
            enable: Set(remote.enable),
            up: Set(remote.up),
            down: Set(remote.down),
            total: Set(remote.total_gb),
            expiry_time: Set(expiry_time),
            limit_ip: Set(remote.limit_ip),
            reset_count: Set(0),
            traffic_synced_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        });
    };

    let mut active: server_client::ActiveModel = current.clone().into();
    let mut changed = false;
    assign(&mut active.server_inbound_id, &current.server_inbound_id, inbound_id, &mut changed);
    assign(&mut active.uuid, &current.uuid, uuid, &mut changed);
    assign(&mut active.email, &current.email, email, &mut changed);
    assign(&mut active.sub_id, &current.sub_id, sub_id, &mut changed);
    assign(&mut active.enable, &current.enable, remote.enable, &mut changed);
    assign(&mut active.up, &current.up, remote.up, &mut changed);
    assign(&mut active.down, &current.down, remote.down, &mut changed);
    assign(&mut active.total, &current.total, remote.total_gb, &mut changed);
    assign(&mut active.expiry_time, &current.expiry_time, expiry_time, &mut changed);
    assign(&mut active.limit_ip, &current.limit_ip, remote.limit_ip, &mut changed);

    if !changed {
        return None;
    }
    active.updated_at = Set(now);
    Some(active)
}

/// 根据面板入站生成本地入站的写入内容
pub fn inbound_from_remote(
    existing: Option<&server_inbound::Model>,
    remote: &RemoteInbound,
    server_id: i64,
    now: NaiveDateTime,
) -> Option<server_inbound::ActiveModel> {
    let settings = json_text(&remote.settings).unwrap_or_else(|| "{}".to_string());
    let stream_settings = json_text(&remote.stream_settings);

    let Some(current) = existing else {
        return Some(server_inbound::ActiveModel {
            id: NotSet,
            server_id: Set(server_id),
            remote_id: Set(Some(remote.id)),
            tag: Set(remote.tag.clone()),
            port: Set(remote.port),
            protocol: Set(remote.protocol.clone()),
            remark: Set(remote.remark.clone()),
            enable: Set(remote.enable),
            settings: Set(settings),
            stream_settings: Set(stream_settings),
            up: Set(remote.up),
            down: Set(remote.down),
            total: Set(remote.total),
            created_at: Set(now),
            updated_at: Set(now),
        });
    };

    let mut active: server_inbound::ActiveModel = current.clone().into();
    let mut changed = false;
    assign(&mut active.remote_id, &current.remote_id, Some(remote.id), &mut changed);
    assign(&mut active.tag, &current.tag, remote.tag.clone(), &mut changed);
    assign(&mut active.port, &current.port, remote.port, &mut changed);
    assign(&mut active.protocol, &current.protocol, remote.protocol.clone(), &mut changed);
    assign(&mut active.remark, &current.remark, remote.remark.clone(), &mut changed);
    assign(&mut active.enable, &current.enable, remote.enable, &mut changed);
    assign(&mut active.settings, &current.settings, settings, &mut changed);
    assign(&mut active.stream_settings, &current.stream_settings, stream_settings, &mut changed);
    assign(&mut active.up, &current.up, remote.up, &mut changed);
    assign(&mut active.down, &current.down, remote.down, &mut changed);
    assign(&mut active.total, &current.total, remote.total, &mut changed);

    if !changed {
        return None;
    }
    active.updated_at = Set(now);
    Some(active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn remote_client() -> RemoteClient {
        serde_json::from_value(json!({
            "id": "uuid-1",
            "email": "u1@x",
            "subId": "s1",
            "enable": true,
            "expiryTime": 0,
            "totalGB": 1024,
            "limitIp": 2,
            "up": 10,
            "down": 20
        }))
        .unwrap()
    }

    fn local_client(now: NaiveDateTime) -> server_client::Model {
        server_client::Model {
            id: 7,
            server_inbound_id: 1,
            uuid: Some("uuid-1".to_string()),
            email: "u1@x".to_string(),
            sub_id: Some("s1".to_string()),
            enable: true,
            up: 10,
            down: 20,
            total: 1024,
            expiry_time: None,
            limit_ip: 2,
            reset_count: 3,
            traffic_synced_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_new_client() {
        let now = Utc::now().naive_utc();
        let active = upsert_from_remote(None, &remote_client(), 5, now).unwrap();
        assert!(active.id.is_not_set());
        assert_eq!(active.server_inbound_id, Set(5));
        assert_eq!(active.sub_id, Set(Some("s1".to_string())));
        assert_eq!(active.expiry_time, Set(None));
        assert_eq!(active.total, Set(1024));
        assert_eq!(active.reset_count, Set(0));
    }

    #[test]
    fn test_unchanged_client_is_noop() {
        let now = Utc::now().naive_utc();
        let local = local_client(now);
        assert!(upsert_from_remote(Some(&local), &remote_client(), 1, now).is_none());
    }

    #[test]
    fn test_changed_fields_only() {
        let now = Utc::now().naive_utc();
        let local = local_client(now);
        let mut remote = remote_client();
        remote.down = 99;
        remote.enable = false;
        remote.expiry_time = 1_700_000_000_000;

        let active = upsert_from_remote(Some(&local), &remote, 1, now).unwrap();
        assert_eq!(active.down, Set(99));
        assert_eq!(active.enable, Set(false));
        assert_eq!(active.expiry_time, Set(Some(1_700_000_000_000)));
        assert!(!active.email.is_set());
        assert!(!active.reset_count.is_set());
        assert!(active.updated_at.is_set());
    }

    #[test]
    fn test_inbound_mapping() {
        let now = Utc::now().naive_utc();
        let remote: RemoteInbound = serde_json::from_value(json!({
            "id": 3,
            "port": 443,
            "protocol": "vless",
            "tag": "inbound-443",
            "remark": "hk",
            "settings": "{\"clients\":[]}",
            "streamSettings": {"network": "ws"},
            "up": 1,
            "down": 2
        }))
        .unwrap();

        let created = inbound_from_remote(None, &remote, 9, now).unwrap();
        assert_eq!(created.remote_id, Set(Some(3)));
        assert_eq!(created.settings, Set("{\"clients\":[]}".to_string()));
        assert_eq!(created.stream_settings, Set(Some(r#"{"network":"ws"}"#.to_string())));

        let local = server_inbound::Model {
            id: 1,
            server_id: 9,
            remote_id: Some(3),
            tag: "inbound-443".to_string(),
            port: 443,
            protocol: "vless".to_string(),
            remark: "hk".to_string(),
            enable: true,
            settings: "{\"clients\":[]}".to_string(),
            stream_settings: Some(r#"{"network":"ws"}"#.to_string()),
            up: 1,
            down: 2,
            total: 0,
            created_at: now,
            updated_at: now,
        };
        assert!(inbound_from_remote(Some(&local), &remote, 9, now).is_none());

        let mut renamed = remote.clone();
        renamed.remark = "hk-2".to_string();
        let updated = inbound_from_remote(Some(&local), &renamed, 9, now).unwrap();
        assert_eq!(updated.remark, Set("hk-2".to_string()));
        assert!(!updated.port.is_set());
    }
}
