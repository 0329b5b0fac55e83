//! 事件总线：节点生命周期事件的实时分发与持久化
//!
//! - 每个监听者持有独立的无界通道，`emit` 只做非阻塞投递，慢消费者不会拖住生产者
//! - 每条事件同时追加到 JSON Lines 日志，超过阈值时按时间戳轮转

pub mod broker;
pub mod rotating_log;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use broker::{EventBroker, Subscription};
pub use rotating_log::{RotatingLog, DEFAULT_ROTATE_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    End,
    /// 非节点边界的提示（如 HITL 入队、迭代上限）
    Notice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub component: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Event {
    pub fn new(component: impl Into<String>, kind: EventKind) -> Self {
        Self {
            component: component.into(),
            kind,
            timestamp: Utc::now(),
            payload: None,
        }
    }

    pub fn start(component: impl Into<String>) -> Self {
        Self::new(component, EventKind::Start)
    }

    pub fn end(component: impl Into<String>) -> Self {
        Self::new(component, EventKind::End)
    }

    pub fn notice(component: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(component, EventKind::Notice).with_payload(payload)
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
