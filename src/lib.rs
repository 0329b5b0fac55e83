//! Taskhive - Rust 个人任务自动化智能体
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 任务模型、状态、节点、编排状态机与装配
//! - **events**: 事件总线与轮转日志
//! - **hitl**: 人工审批队列与反思日志
//! - **llm**: LLM 能力抽象与实现（OpenAI 兼容 / DeepSeek / Ollama / Mock）
//! - **memory**: 对话消息、token 预算、分词、指导文本
//! - **meta**: 从反思记录生成指导文本
//! - **priority**: 规则 + 模型紧急度的优先级解析
//! - **retrieval**: 知识图谱 + 向量检索协调
//! - **store**: SQLite 任务存储
//! - **tools**: 工具注册与执行

pub mod config;
pub mod core;
pub mod events;
pub mod hitl;
pub mod llm;
pub mod memory;
pub mod meta;
pub mod observability;
pub mod priority;
pub mod retrieval;
pub mod store;
pub mod tools;

pub use crate::core::{AgentBuilder, AgentError, Orchestrator, RunOutcome, RunReport};
