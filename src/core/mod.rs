//! 核心编排层：错误、任务模型、状态投影、节点、状态机与装配

pub mod builder;
pub mod error;
pub mod nodes;
pub mod orchestrator;
pub mod state;
pub mod task;

pub use builder::{create_llm_from_config, AgentBuilder, AgentComponents};
pub use error::AgentError;
pub use nodes::Nodes;
pub use orchestrator::{Node, Orchestrator, RunOutcome, RunReport, DEFAULT_MAX_ITERATIONS};
pub use state::{
    AgentState, ExecuteResult, NodeOutput, PlanResult, PrioritiseResult, RespondResult,
    RetrieveResult,
};
pub use task::{Priority, Subtask, Task, TaskStatus, ToolCall};
