//! 同步模块 - 离线优先的读写路由与事务回放
//!
//! - coordinator: 三态状态机，按连通性路由读写，恢复在线后驱动回放
//! - replay: 按 FIFO 回放事务日志并完成临时 id 对账
//! - failure: 回放失败分类（可重试 / 永久不可应用）

pub mod coordinator;
pub mod failure;
pub mod replay;

pub use coordinator::SyncCoordinator;
pub use failure::ReplayFailureReason;
pub use replay::{IdMap, IdResolution, ReplayReport, Replayer};
