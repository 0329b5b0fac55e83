//! Agent 错误类型
//!
//! 三类错误：节点内可恢复（Execute 中的工具/模型错误，转为 `status = ERROR`）、
//! 降级但成功（检索回退、无法解析的紧急度，只记日志不返回错误）、
//! 致命/外部（存储、模型、图库、向量库不可达，原样返回给调用方）。

use thiserror::Error;

use crate::core::TaskStatus;
use crate::llm::LlmError;

/// 编排与各组件共用的错误类型
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Graph query failed: {0}")]
    Graph(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("HITL queue error: {0}")]
    Hitl(String),

    #[error("Invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    /// 子任务循环未收敛（迭代上限或子任务未单调减少）
    #[error("Iteration guard tripped: {0}")]
    IterationGuard(String),
}
