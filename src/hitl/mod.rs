//! 人工审批（HITL）：快照队列、TTL 清理、审批反思日志

pub mod lock;
pub mod queue;
pub mod reflection;

pub use queue::{Decided, HitlQueue, PendingItem, DEFAULT_TTL};
pub use reflection::{Decision, ReflectionLog, ReflectionRecord};
