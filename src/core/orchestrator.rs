//! 编排状态机
//!
//! Plan → Prioritise → Retrieve → Execute，之后按 `current_task.status` 分支：
//! WAITING_HITL → Hitl，IN_PROGRESS → 回到 Prioritise，DONE → Respond，ERROR → ErrorPause。
//! 每个节点调用都包一层 start / end 事件；回环受迭代上限与「子任务严格减少」两道保护。

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde_json::json;

use crate::core::builder::AgentComponents;
use crate::core::nodes::Nodes;
use crate::core::{AgentError, AgentState, NodeOutput, TaskStatus};
use crate::events::{Event, EventBroker};
use crate::hitl::{Decided, Decision, HitlQueue};
use crate::llm::LlmClient;
use crate::memory::TokenBudgeter;
use crate::priority::{PriorityResolver, PriorityRules};
use crate::store::TaskStore;

pub const DEFAULT_MAX_ITERATIONS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Plan,
    Prioritise,
    Retrieve,
    Execute,
    Hitl,
    ErrorPause,
    Respond,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Plan => "plan",
            Node::Prioritise => "prioritise",
            Node::Retrieve => "retrieve",
            Node::Execute => "execute",
            Node::Hitl => "hitl",
            Node::ErrorPause => "error_pause",
            Node::Respond => "respond",
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次运行停在哪个终态
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Responded { reply: String },
    AwaitingApproval { task_id: String },
    Paused { task_id: String, error: String },
    Cancelled { task_id: String },
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: AgentState,
    pub outcome: RunOutcome,
    /// 按顺序经过的节点
    pub path: Vec<Node>,
}

/// 回环保护的计数状态
#[derive(Debug, Default)]
struct LoopGuard {
    passes: usize,
    remaining: Option<usize>,
}

impl LoopGuard {
    fn check(&mut self, remaining: usize, max_iterations: usize) -> Result<(), String> {
        self.passes += 1;
        if self.passes >= max_iterations {
            return Err(format!("exceeded {max_iterations} iterations"));
        }
        if let Some(prev) = self.remaining {
            if remaining >= prev {
                return Err(format!("subtasks did not shrink ({prev} -> {remaining})"));
            }
        }
        self.remaining = Some(remaining);
        Ok(())
    }
}

pub struct Orchestrator {
    nodes: Nodes,
    llm: Arc<dyn LlmClient>,
    budgeter: TokenBudgeter,
    store: Arc<TaskStore>,
    hitl: Arc<HitlQueue>,
    broker: Arc<EventBroker>,
    rules: RwLock<Arc<PriorityRules>>,
    rules_path: Option<PathBuf>,
    max_iterations: usize,
}

impl Orchestrator {
    pub fn new(components: AgentComponents, rules: PriorityRules) -> Self {
        let mut nodes = Nodes::new(
            components.llm.clone(),
            components.budgeter.clone(),
            components.retrieval,
            components.store.clone(),
            components.executor,
        );
        if let Some(guidelines) = components.guidelines {
            nodes = nodes.with_guidelines(guidelines);
        }
        Self {
            nodes,
            llm: components.llm,
            budgeter: components.budgeter,
            store: components.store,
            hitl: components.hitl,
            broker: components.broker,
            rules: RwLock::new(Arc::new(rules)),
            rules_path: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// 规则文件路径，供 `reload_rules` 使用
    pub fn with_rules_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rules_path = Some(path.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn hitl(&self) -> &Arc<HitlQueue> {
        &self.hitl
    }

    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    pub fn rules(&self) -> Result<Arc<PriorityRules>, AgentError> {
        self.rules
            .read()
            .map(|r| Arc::clone(&r))
            .map_err(|_| AgentError::LockPoisoned("priority rules"))
    }

    /// 两次运行之间重新加载规则文件；运行中的 run 继续使用旧快照
    pub fn reload_rules(&self) -> Result<(), AgentError> {
        let Some(path) = &self.rules_path else {
            return Ok(());
        };
        let fresh = Arc::new(PriorityRules::load(path)?);
        let mut slot = self
            .rules
            .write()
            .map_err(|_| AgentError::LockPoisoned("priority rules"))?;
        *slot = fresh;
        tracing::info!(path = %path.display(), "priority rules reloaded");
        Ok(())
    }

    pub async fn run(&self, prompt: &str) -> Result<RunReport, AgentError> {
        tracing::info!(prompt, "run started");
        self.run_from(Node::Plan, AgentState::from_prompt(prompt)).await
    }

    /// 恢复一个已审批的 HITL 快照：标记 approved，状态回到 IN_PROGRESS，从 Execute 继续
    pub async fn resume(&self, mut state: AgentState) -> Result<RunReport, AgentError> {
        let Some(task) = state.current_task.as_mut() else {
            return Err(AgentError::Hitl("snapshot has no current task".into()));
        };
        task.approved = true;
        task.set_status(TaskStatus::InProgress)?;
        self.store.update(task).await?;
        tracing::info!(task_id = %task.task_id, "resuming approved task");
        self.run_from(Node::Execute, state).await
    }

    /// 处理一条人工决定：通过则恢复运行，拒绝则把任务标记为 CANCELLED
    pub async fn conclude(&self, decided: Decided) -> Result<Option<RunReport>, AgentError> {
        match decided.record.result {
            Decision::Approved => self.resume(decided.state).await.map(Some),
            Decision::Rejected => {
                if let Some(mut task) = decided.state.current_task {
                    task.set_status(TaskStatus::Cancelled)?;
                    self.store.update(&task).await?;
                    tracing::info!(task_id = %task.task_id, "task rejected by reviewer");
                }
                Ok(None)
            }
        }
    }

    /// TTL 清理：删除过期快照，并把仍在 WAITING_HITL 的任务标记为 CANCELLED
    pub async fn sweep(&self) -> Result<usize, AgentError> {
        let expired = self.hitl.sweep()?;
        for task_id in &expired {
            if let Some(mut task) = self.store.get(task_id)? {
                if task.status == TaskStatus::WaitingHitl {
                    task.set_status(TaskStatus::Cancelled)?;
                    task.error = Some("approval expired".to_string());
                    self.store.update(&task).await?;
                }
            }
            self.broker
                .emit(Event::notice("hitl", json!({ "task_id": task_id, "action": "expired" })));
        }
        Ok(expired.len())
    }

    async fn traced<T, F>(&self, node: Node, fut: F) -> Result<T, AgentError>
    where
        F: Future<Output = Result<T, AgentError>>,
    {
        self.broker.emit(Event::start(node.as_str()));
        let result = fut.await;
        let mut end = Event::end(node.as_str());
        if let Err(e) = &result {
            end = end.with_payload(json!({ "error": e.to_string() }));
        }
        self.broker.emit(end);
        result
    }

    pub async fn run_from(&self, start: Node, mut state: AgentState) -> Result<RunReport, AgentError> {
        let resolver = PriorityResolver::new(self.llm.clone(), self.rules()?, self.budgeter.clone());
        let mut guard = LoopGuard::default();
        let mut path = Vec::new();
        let mut node = start;

        loop {
            path.push(node);
            node = match node {
                Node::Plan => {
                    let out = self.traced(node, self.nodes.plan(&state)).await?;
                    state.apply(NodeOutput::Plan(out));
                    Node::Prioritise
                }
                Node::Prioritise => {
                    let out = self.traced(node, self.nodes.prioritise(&state, &resolver)).await?;
                    state.apply(NodeOutput::Prioritise(out));
                    Node::Retrieve
                }
                Node::Retrieve => {
                    let out = self.traced(node, self.nodes.retrieve(&state)).await?;
                    state.apply(NodeOutput::Retrieve(out));
                    Node::Execute
                }
                Node::Execute => {
                    let out = self
                        .traced(node, async { Ok(self.nodes.execute(&state).await) })
                        .await?;
                    state.apply(NodeOutput::Execute(out));
                    self.settle_current_task(&mut state).await?;
                    match self.route_after_execute(&mut state, &mut guard).await? {
                        Some(next) => next,
                        None => {
                            let task_id = state
                                .current_task
                                .as_ref()
                                .map(|t| t.task_id.clone())
                                .unwrap_or_default();
                            tracing::info!(task_id = %task_id, "run ended: task cancelled");
                            return Ok(RunReport {
                                state,
                                outcome: RunOutcome::Cancelled { task_id },
                                path,
                            });
                        }
                    }
                }
                Node::Hitl => {
                    self.traced(node, async { Ok(()) }).await?;
                    let task_id = current_task_id(&state);
                    tracing::info!(task_id = %task_id, "run paused for approval");
                    return Ok(RunReport {
                        state,
                        outcome: RunOutcome::AwaitingApproval { task_id },
                        path,
                    });
                }
                Node::ErrorPause => {
                    self.traced(node, async { Ok(()) }).await?;
                    let task_id = current_task_id(&state);
                    let error = state
                        .current_task
                        .as_ref()
                        .and_then(|t| t.error.clone())
                        .unwrap_or_default();
                    tracing::warn!(task_id = %task_id, error = %error, "run paused on error");
                    return Ok(RunReport {
                        state,
                        outcome: RunOutcome::Paused { task_id, error },
                        path,
                    });
                }
                Node::Respond => {
                    let out = self.traced(node, self.nodes.respond(&state)).await?;
                    let reply = out.message.content.clone();
                    state.apply(NodeOutput::Respond(out));
                    tracing::info!("run responded");
                    return Ok(RunReport {
                        state,
                        outcome: RunOutcome::Responded { reply },
                        path,
                    });
                }
            };
        }
    }

    /// 检查外部取消，再把 Execute 的结果写回存储；
    /// WAITING_HITL 先落快照再写存储
    async fn settle_current_task(&self, state: &mut AgentState) -> Result<(), AgentError> {
        let Some(task) = state.current_task.as_mut() else {
            return Ok(());
        };
        let cancelled = self
            .store
            .get(&task.task_id)?
            .is_some_and(|stored| stored.status == TaskStatus::Cancelled);
        if cancelled && !task.status.is_terminal() {
            task.set_status(TaskStatus::Cancelled)?;
        }
        if task.status == TaskStatus::WaitingHitl {
            self.hitl.enqueue(state)?;
        }
        match &state.current_task {
            Some(task) => self.store.update(task).await,
            None => Ok(()),
        }
    }

    /// 返回下一个节点；None 表示任务已被取消，运行结束
    async fn route_after_execute(
        &self,
        state: &mut AgentState,
        guard: &mut LoopGuard,
    ) -> Result<Option<Node>, AgentError> {
        let Some(task) = state.current_task.as_mut() else {
            return Ok(Some(Node::Respond));
        };
        let next = match task.status {
            TaskStatus::Done => Node::Respond,
            TaskStatus::Error => Node::ErrorPause,
            TaskStatus::Cancelled => {
                self.hitl.discard(&task.task_id)?;
                return Ok(None);
            }
            TaskStatus::WaitingHitl => {
                self.broker
                    .emit(Event::notice("hitl", json!({ "task_id": task.task_id, "action": "enqueued" })));
                Node::Hitl
            }
            TaskStatus::InProgress | TaskStatus::Ready => {
                match guard.check(task.subtasks.len(), self.max_iterations) {
                    Ok(()) => Node::Prioritise,
                    Err(reason) => {
                        let err = AgentError::IterationGuard(reason);
                        tracing::warn!(task_id = %task.task_id, error = %err, "loop guard tripped");
                        task.set_status(TaskStatus::Error)?;
                        task.error = Some(err.to_string());
                        self.store.update(task).await?;
                        self.broker.emit(Event::notice(
                            "orchestrator",
                            json!({ "task_id": task.task_id, "error": err.to_string() }),
                        ));
                        Node::ErrorPause
                    }
                }
            }
        };
        Ok(Some(next))
    }
}

fn current_task_id(state: &AgentState) -> String {
    state
        .current_task
        .as_ref()
        .map(|t| t.task_id.clone())
        .unwrap_or_default()
}
