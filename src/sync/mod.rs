//! 面板同步核心：标识解析、同步调度、流量操作和结果汇总

pub mod mapping;
pub mod reconciler;
pub mod report;
pub mod resolver;
pub mod traffic;

#[cfg(test)]
pub(crate) mod testing;

pub use reconciler::{ReconcileOptions, Reconciler};
pub use report::{ResetReport, SyncReport, SyncTally};
pub use resolver::KeyResolver;
pub use traffic::{ResetOutcome, TrafficSnapshot};
