//! 编排状态：AgentState 与各节点的结果类型
//!
//! 节点不直接改 AgentState，而是返回各自的结果结构，由编排器通过 `apply` 合并，
//! 保留「部分更新」语义。AgentState 只属于一次运行，不在并发运行之间共享。

use serde::{Deserialize, Serialize};

use crate::core::Task;
use crate::memory::Message;
use crate::retrieval::{Document, EntityRecord, RetrievalMeta};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub messages: Vec<Message>,
    /// Plan 产出、尚未分配优先级的任务目标
    #[serde(default)]
    pub planned: Vec<String>,
    /// 已分配优先级、等待执行的任务
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub current_task: Option<Task>,
    #[serde(default)]
    pub context_docs: Vec<String>,
    #[serde(default)]
    pub graph_metadata: Vec<EntityRecord>,
    #[serde(default)]
    pub retrieval_meta: RetrievalMeta,
}

impl AgentState {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            ..Self::default()
        }
    }

    /// 把节点结果合并进状态
    pub fn apply(&mut self, output: NodeOutput) {
        match output {
            NodeOutput::Plan(PlanResult { objectives }) => {
                self.planned = objectives;
            }
            NodeOutput::Prioritise(PrioritiseResult::Bulk { tasks }) => {
                self.planned.clear();
                self.tasks.extend(tasks);
                self.current_task = self.take_next_task();
            }
            NodeOutput::Prioritise(PrioritiseResult::Single { task }) => {
                self.current_task = Some(task);
            }
            NodeOutput::Retrieve(RetrieveResult {
                documents,
                records,
                meta,
            }) => {
                self.context_docs = documents.into_iter().map(|d| d.text).collect();
                self.graph_metadata = records;
                self.retrieval_meta = meta;
            }
            NodeOutput::Execute(ExecuteResult { task }) => {
                self.current_task = task;
            }
            NodeOutput::Respond(RespondResult { message }) => {
                self.messages.push(message);
                self.current_task = None;
            }
        }
    }

    /// 取出优先级最高的任务；同优先级按计划顺序
    fn take_next_task(&mut self) -> Option<Task> {
        let (idx, _) = self
            .tasks
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|(_, t)| t.priority)?;
        Some(self.tasks.remove(idx))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanResult {
    pub objectives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrioritiseResult {
    /// 新计划的任务逐个分配优先级
    Bulk { tasks: Vec<Task> },
    /// 部分执行后重新评估当前任务
    Single { task: Task },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrieveResult {
    pub documents: Vec<Document>,
    pub records: Vec<EntityRecord>,
    pub meta: RetrievalMeta,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteResult {
    pub task: Option<Task>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RespondResult {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    Plan(PlanResult),
    Prioritise(PrioritiseResult),
    Retrieve(RetrieveResult),
    Execute(ExecuteResult),
    Respond(RespondResult),
}
