//! 编排节点：Plan / Prioritise / Retrieve / Execute / Respond
//!
//! 节点只读 AgentState，返回各自的结果结构；依赖全部通过构造注入。

use std::sync::Arc;

use serde_json::{json, Value};

use crate::core::state::{ExecuteResult, PlanResult, PrioritiseResult, RespondResult, RetrieveResult};
use crate::core::{AgentError, AgentState, Task, TaskStatus};
use crate::llm::LlmClient;
use crate::memory::{latest_user_message, Guidelines, Message, TokenBudgeter};
use crate::priority::PriorityResolver;
use crate::retrieval::{EntityRecord, RetrievalCoordinator};
use crate::store::TaskStore;
use crate::tools::{ToolExecutor, ToolOutput};

pub fn plan_prompt(records: &[EntityRecord], request: &str) -> String {
    let context = records
        .iter()
        .map(EntityRecord::describe)
        .collect::<Vec<_>>()
        .join(", ");
    format!("Known entities: {context}\nUser request: {request}\nPlan as bullet list.")
}

/// 解析项目符号列表：去掉 `-` `*` `•` 与序号前缀，丢弃空行
pub fn parse_plan(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(|line| {
            let line = line.trim().trim_start_matches(['-', '*', '•']).trim_start();
            let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
            let rest = &line[digits..];
            let line = if digits > 0 && (rest.starts_with('.') || rest.starts_with(')')) {
                &rest[1..]
            } else {
                line
            };
            line.trim().to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// tool_output 的文本形式（Respond 提示词用）
fn render_output(output: Option<&Value>) -> String {
    match output {
        None => String::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match (item.get("tool"), item.get("output")) {
                (Some(Value::String(tool)), Some(Value::String(out))) => format!("{tool}: {out}"),
                _ => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

fn outputs_to_value(outputs: &[ToolOutput]) -> Value {
    Value::Array(
        outputs
            .iter()
            .map(|o| json!({ "tool": o.tool, "output": o.output }))
            .collect(),
    )
}

/// 直接记为 ERROR：Ready / InProgress / WaitingHitl / Error 进入 ERROR 都是合法迁移
fn mark_error(task: &mut Task, message: String) {
    tracing::warn!(task_id = %task.task_id, error = %message, "task failed");
    task.status = TaskStatus::Error;
    task.error = Some(message);
    task.touch();
}

fn advance(task: &mut Task, next: TaskStatus) {
    if let Err(e) = task.set_status(next) {
        mark_error(task, e.to_string());
    }
}

pub struct Nodes {
    llm: Arc<dyn LlmClient>,
    budgeter: TokenBudgeter,
    retrieval: Arc<RetrievalCoordinator>,
    store: Arc<TaskStore>,
    executor: Arc<ToolExecutor>,
    guidelines: Option<Guidelines>,
}

impl Nodes {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        budgeter: TokenBudgeter,
        retrieval: Arc<RetrievalCoordinator>,
        store: Arc<TaskStore>,
        executor: Arc<ToolExecutor>,
    ) -> Self {
        Self {
            llm,
            budgeter,
            retrieval,
            store,
            executor,
            guidelines: None,
        }
    }

    pub fn with_guidelines(mut self, guidelines: Guidelines) -> Self {
        self.guidelines = Some(guidelines);
        self
    }

    /// 指导文本非空时作为首条 system 消息
    fn guidance(&self) -> Vec<Message> {
        self.guidelines
            .as_ref()
            .and_then(Guidelines::load)
            .map(Message::system)
            .into_iter()
            .collect()
    }

    async fn chat_within_budget(&self, messages: Vec<Message>, node: &str) -> Result<Message, AgentError> {
        let fitted = self.budgeter.fit(&messages);
        if fitted.was_trimmed() {
            tracing::debug!(node, trimmed = true, token_delta = fitted.token_delta, "prompt trimmed");
        }
        Ok(self.llm.chat(&fitted.items).await?)
    }

    pub async fn plan(&self, state: &AgentState) -> Result<PlanResult, AgentError> {
        let Some(request) = latest_user_message(&state.messages) else {
            return Ok(PlanResult::default());
        };
        let records = self.retrieval.lookup(request).await?;
        let mut messages = self.guidance();
        messages.push(Message::user(plan_prompt(&records, request)));
        let reply = self.chat_within_budget(messages, "plan").await?;
        let objectives = parse_plan(&reply.content);
        tracing::info!(tasks = objectives.len(), "plan produced");
        Ok(PlanResult { objectives })
    }

    /// current_task 存在时为单任务模式，否则为新计划任务的批量模式
    pub async fn prioritise(
        &self,
        state: &AgentState,
        resolver: &PriorityResolver,
    ) -> Result<PrioritiseResult, AgentError> {
        if let Some(current) = &state.current_task {
            let mut task = current.clone();
            let resolution = resolver.resolve(&task.objective, task.sender.as_deref()).await?;
            task.priority = resolution.priority;
            task.set_status(TaskStatus::Ready)?;
            self.store.update(&task).await?;
            return Ok(PrioritiseResult::Single { task });
        }

        let mut tasks = Vec::with_capacity(state.planned.len());
        for objective in &state.planned {
            let mut task = Task::new(objective.clone());
            task.priority = resolver.resolve(objective, None).await?.priority;
            self.store.add(&task).await?;
            tasks.push(task);
        }
        Ok(PrioritiseResult::Bulk { tasks })
    }

    pub async fn retrieve(&self, state: &AgentState) -> Result<RetrieveResult, AgentError> {
        let Some(query) = latest_user_message(&state.messages) else {
            return Ok(RetrieveResult::default());
        };
        let retrieval = self.retrieval.retrieve(query).await?;
        Ok(RetrieveResult {
            documents: retrieval.documents,
            records: retrieval.records,
            meta: retrieval.meta,
        })
    }

    /// 执行当前任务的工具调用；失败只记录到任务上，从不返回错误
    pub async fn execute(&self, state: &AgentState) -> ExecuteResult {
        let Some(mut task) = state.current_task.clone() else {
            return ExecuteResult { task: None };
        };

        match task.status {
            TaskStatus::Done | TaskStatus::Cancelled => return ExecuteResult { task: Some(task) },
            TaskStatus::Ready | TaskStatus::InProgress => {}
            other => {
                mark_error(&mut task, format!("cannot execute task in status {other}"));
                return ExecuteResult { task: Some(task) };
            }
        }

        if !task.approved && task.tool_calls.iter().any(|c| self.executor.requires_approval(c)) {
            tracing::info!(task_id = %task.task_id, "risky tool call, waiting for approval");
            advance(&mut task, TaskStatus::WaitingHitl);
            return ExecuteResult { task: Some(task) };
        }

        let fitted = self.budgeter.fit(&task.tool_calls);
        if fitted.was_trimmed() {
            tracing::debug!(node = "execute", trimmed = true, token_delta = fitted.token_delta, "tool calls trimmed");
        }

        match self.executor.execute_all(&fitted.items).await {
            Ok(outputs) => {
                task.tool_output = (!outputs.is_empty()).then(|| outputs_to_value(&outputs));
                task.error = None;
                // 审批只覆盖本轮调用
                task.approved = false;
                if task.subtasks.is_empty() {
                    advance(&mut task, TaskStatus::Done);
                } else {
                    let next = task.subtasks.remove(0);
                    task.tool_calls = next.tool_calls;
                    advance(&mut task, TaskStatus::InProgress);
                }
            }
            Err(e) => mark_error(&mut task, e.to_string()),
        }
        ExecuteResult { task: Some(task) }
    }

    pub async fn respond(&self, state: &AgentState) -> Result<RespondResult, AgentError> {
        let prompt = match &state.current_task {
            Some(task) => format!(
                "Task {}: {}",
                task.objective,
                render_output(task.tool_output.as_ref())
            ),
            None => latest_user_message(&state.messages).unwrap_or_default().to_string(),
        };

        let mut messages = self.guidance();
        if !state.context_docs.is_empty() {
            let context = state
                .context_docs
                .iter()
                .map(|d| format!("- {d}"))
                .collect::<Vec<_>>()
                .join("\n");
            messages.push(Message::system(format!("Context:\n{context}")));
        }
        messages.push(Message::user(prompt));
        let reply = self.chat_within_budget(messages, "respond").await?;
        Ok(RespondResult {
            message: Message::assistant(reply.content),
        })
    }
}
