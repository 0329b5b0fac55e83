//! 任务模型：Task / TaskStatus / Priority / ToolCall
//!
//! 状态沿状态机单调推进；CANCELLED 是外部覆盖，可从任一非终态进入。

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::Budgeted;

/// 任务优先级；数值即比较顺序 low(1) < med(2) < high(3) < critical(4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    Med = 2,
    High = 3,
    Critical = 4,
}

impl Priority {
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Med => "med",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Low
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "med" | "medium" => Ok(Priority::Med),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(AgentError::Config(format!("unknown priority '{other}'"))),
        }
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Ready,
    InProgress,
    WaitingHitl,
    Done,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Ready => "READY",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::WaitingHitl => "WAITING_HITL",
            TaskStatus::Done => "DONE",
            TaskStatus::Error => "ERROR",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }

    /// 状态机允许的迁移
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Cancelled) => true,
            (Ready | InProgress, _) => true,
            (WaitingHitl, Ready | InProgress | Error) => true,
            (Error, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 工具调用：{"tool": "send_email", "args": {...}}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

impl Budgeted for ToolCall {
    fn budget_text(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{} {}", self.tool, self.args))
    }
}

/// 子任务：一轮 Execute 执行的一组工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub objective: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// 工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub objective: String,
    /// 来源地址或域名，仅用于规则匹配
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    pub status: TaskStatus,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// 本轮 Execute 要执行的工具调用
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// 人工审批通过后为 true，风险工具不再拦截
    #[serde(default)]
    pub approved: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Task {
    pub fn new(objective: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            objective: objective.into(),
            sender: None,
            priority: Priority::default(),
            status: TaskStatus::Ready,
            subtasks: Vec::new(),
            tool_calls: Vec::new(),
            tool_output: None,
            error: None,
            approved: false,
            created_at: now,
            last_updated: now,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_subtasks(mut self, subtasks: Vec<Subtask>) -> Self {
        self.subtasks = subtasks;
        self
    }

    /// 按状态机规则迁移状态，并刷新 last_updated
    pub fn set_status(&mut self, next: TaskStatus) -> Result<(), AgentError> {
        if self.status != next && !self.status.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_and_parse() {
        assert!(Priority::Low < Priority::Med);
        assert!(Priority::High < Priority::Critical);
        assert_eq!(Priority::Critical.rank(), 4);
        assert_eq!("MED".parse::<Priority>().unwrap(), Priority::Med);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&TaskStatus::WaitingHitl).unwrap();
        assert_eq!(json, "\"WAITING_HITL\"");
        let p = serde_json::to_string(&Priority::Med).unwrap();
        assert_eq!(p, "\"med\"");
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut task = Task::new("x");
        task.set_status(TaskStatus::Done).unwrap();
        assert!(task.set_status(TaskStatus::Cancelled).is_err());
        assert!(task.set_status(TaskStatus::Ready).is_err());
    }

    #[test]
    fn test_cancel_from_any_non_terminal() {
        for start in [
            TaskStatus::Ready,
            TaskStatus::InProgress,
            TaskStatus::WaitingHitl,
            TaskStatus::Error,
        ] {
            assert!(start.can_transition_to(TaskStatus::Cancelled), "{start}");
        }
    }

    #[test]
    fn test_waiting_hitl_cannot_jump_to_done() {
        assert!(!TaskStatus::WaitingHitl.can_transition_to(TaskStatus::Done));
        assert!(TaskStatus::WaitingHitl.can_transition_to(TaskStatus::InProgress));
    }

    #[test]
    fn test_task_deserializes_with_defaults() {
        let json = r#"{
            "task_id": "t1",
            "objective": "pay invoice",
            "status": "READY",
            "created_at": "2024-01-01T00:00:00Z",
            "last_updated": "2024-01-01T00:00:00Z"
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.priority, Priority::Low);
        assert!(task.subtasks.is_empty());
        assert!(!task.approved);
    }
}
