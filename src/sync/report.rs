//! 同步结果汇总
//!
//! 同步过程中使用可变的 `SyncTally` 累加计数，结束时通过 `finish()` 转成
//! 只读的 `SyncReport` 交给调用方展示。

use serde::Serialize;
use std::fmt;

/// 单条失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    /// 失败发生的位置，例如 `server #1 (hk)/inbound:443`
    pub context: String,
    pub error: String,
}

/// 同步过程中的计数器
#[derive(Debug, Default)]
pub struct SyncTally {
    created: u64,
    updated: u64,
    deleted_orphans: u64,
    inbounds_created: u64,
    inbounds_updated: u64,
    failures: Vec<SyncFailure>,
}

impl SyncTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_created(&mut self) {
        self.created += 1;
    }

    pub fn client_updated(&mut self) {
        self.updated += 1;
    }

    pub fn orphans_deleted(&mut self, count: u64) {
        self.deleted_orphans += count;
    }

    pub fn inbound_created(&mut self) {
        self.inbounds_created += 1;
    }

    pub fn inbound_updated(&mut self) {
        self.inbounds_updated += 1;
    }

    pub fn fail(&mut self, context: impl Into<String>, error: impl fmt::Display) {
        self.failures.push(SyncFailure {
            context: context.into(),
            error: error.to_string(),
        });
    }

    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    /// 从 `mark` 之后新增的失败，合并成一条错误信息
    pub fn failed_since(&self, mark: u64) -> Option<String> {
        let start = (mark as usize).min(self.failures.len());
        let recent = &self.failures[start..];
        if recent.is_empty() {
            return None;
        }
        Some(
            recent
                .iter()
                .map(|f| format!("{}: {}", f.context, f.error))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// 合并另一台服务器的计数
    pub fn merge(&mut self, other: SyncTally) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted_orphans += other.deleted_orphans;
        self.inbounds_created += other.inbounds_created;
        self.inbounds_updated += other.inbounds_updated;
        self.failures.extend(other.failures);
    }

    pub fn finish(self) -> SyncReport {
        SyncReport {
            failed: self.failures.len() as u64,
            created: self.created,
            updated: self.updated,
            deleted_orphans: self.deleted_orphans,
            inbounds_created: self.inbounds_created,
            inbounds_updated: self.inbounds_updated,
            failures: self.failures,
        }
    }
}

/// 一次同步的最终结果，创建后不可修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    created: u64,
    updated: u64,
    #[serde(rename = "deletedOrphans")]
    deleted_orphans: u64,
    failed: u64,
    #[serde(rename = "inboundsCreated")]
    inbounds_created: u64,
    #[serde(rename = "inboundsUpdated")]
    inbounds_updated: u64,
    failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn updated(&self) -> u64 {
        self.updated
    }

    pub fn deleted_orphans(&self) -> u64 {
        self.deleted_orphans
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn inbounds_created(&self) -> u64 {
        self.inbounds_created
    }

    pub fn inbounds_updated(&self) -> u64 {
        self.inbounds_updated
    }

    pub fn failures(&self) -> &[SyncFailure] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "同步完成: 新增 {} 个客户端, 更新 {} 个, 删除 {} 个孤立客户端, 入站新增 {} 个/更新 {} 个, 失败 {} 项",
            self.created,
            self.updated,
            self.deleted_orphans,
            self.inbounds_created,
            self.inbounds_updated,
            self.failed
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.context, failure.error)?;
        }
        Ok(())
    }
}

/// 批量重置流量的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    /// 本地已重置的客户端数量
    pub reset: u64,
    /// 其中面板也确认重置的数量
    #[serde(rename = "remoteConfirmed")]
    pub remote_confirmed: u64,
    pub failed: u64,
    pub failures: Vec<SyncFailure>,
}

impl ResetReport {
    pub fn fail(&mut self, context: impl Into<String>, error: impl fmt::Display) {
        self.failed += 1;
        self.failures.push(SyncFailure {
            context: context.into(),
            error: error.to_string(),
        });
    }
}

impl fmt::Display for ResetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "已重置 {} 个客户端的流量（面板确认 {} 个），失败 {} 个",
            self.reset, self.remote_confirmed, self.failed
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.context, failure.error)?;
        }
        Ok(())
    }
}
