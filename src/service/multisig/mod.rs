//! 多签协调：提案状态机、跨网络待签查询、网络归属同步

pub mod coordinator;
pub mod network_sync;
pub mod pending;

pub use coordinator::MultisigCoordinator;
pub use pending::{NetworkPending, PendingSummary};
