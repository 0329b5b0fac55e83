//! Agent 构建器：按配置组装所有组件
//!
//! 所有入口（CLI、HITL 工具、HTTP 接口）共用同一套装配逻辑；测试可逐项注入内存实现。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{AgentError, Orchestrator};
use crate::events::{EventBroker, RotatingLog};
use crate::hitl::{HitlQueue, ReflectionLog};
use crate::llm::{create_deepseek_client, create_ollama_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{Guidelines, TokenBudgeter, TokenCounter};
use crate::priority::PriorityRules;
use crate::retrieval::{
    GraphStore, InMemoryGraph, InMemoryVectorIndex, Neo4jGraph, QdrantIndex, RetrievalCoordinator,
    VectorIndex,
};
use crate::store::TaskStore;
use crate::tools::{EchoTool, ToolExecutor, ToolRegistry};

/// 根据配置选择 LLM 后端；`LLM_BACKEND` 环境变量优先
pub fn create_llm_from_config(
    cfg: &AppConfig,
    counter: TokenCounter,
) -> Result<Arc<dyn LlmClient>, AgentError> {
    let provider = std::env::var("LLM_BACKEND")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| cfg.llm.provider.clone())
        .to_lowercase();
    let model = cfg.llm.model.as_deref();

    let client = match provider.as_str() {
        "openai" => OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            model.unwrap_or("gpt-4o-mini"),
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ),
        "deepseek" => create_deepseek_client(model),
        "ollama" => create_ollama_client(cfg.llm.base_url.as_deref(), model),
        "mock" => {
            tracing::warn!("Using Mock LLM");
            return Ok(Arc::new(MockLlmClient::new()));
        }
        other => {
            return Err(AgentError::Config(format!("unknown llm provider: {other}")));
        }
    };
    let client = match &cfg.llm.embedding_model {
        Some(m) => client.with_embedding_model(m.clone()),
        None => client,
    };
    tracing::info!(provider = %provider, "LLM backend selected");
    Ok(Arc::new(client.with_token_counter(counter)))
}

/// 装配完成的组件集合；各入口按需取用
pub struct AgentComponents {
    pub llm: Arc<dyn LlmClient>,
    pub budgeter: TokenBudgeter,
    pub retrieval: Arc<RetrievalCoordinator>,
    pub index: Arc<dyn VectorIndex>,
    pub store: Arc<TaskStore>,
    pub executor: Arc<ToolExecutor>,
    pub hitl: Arc<HitlQueue>,
    pub broker: Arc<EventBroker>,
    pub guidelines: Option<Guidelines>,
}

pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    graph: Option<Arc<dyn GraphStore>>,
    index: Option<Arc<dyn VectorIndex>>,
    registry: Option<ToolRegistry>,
    rules: Option<PriorityRules>,
    in_memory_store: bool,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            graph: None,
            index: None,
            registry: None,
            rules: None,
            in_memory_store: false,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// 替换默认工具集（默认只有 echo）
    pub fn with_tools(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_rules(mut self, rules: PriorityRules) -> Self {
        self.rules = Some(rules);
        self
    }

    /// 任务表放在内存 SQLite 中
    pub fn in_memory_store(mut self) -> Self {
        self.in_memory_store = true;
        self
    }

    fn default_registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        tools
    }

    pub fn build_components(&mut self) -> Result<AgentComponents, AgentError> {
        let cfg = &self.config;
        std::fs::create_dir_all(&cfg.app.data_dir)?;

        let counter = TokenCounter::from_path(cfg.llm.tokenizer_path.as_deref());
        let budgeter = TokenBudgeter::new(counter.clone(), cfg.budget.max_tokens);
        let llm = match self.llm.take() {
            Some(llm) => llm,
            None => create_llm_from_config(cfg, counter)?,
        };

        let graph: Arc<dyn GraphStore> = match self.graph.take() {
            Some(g) => g,
            None => match cfg.retrieval.graph.as_str() {
                "neo4j" => {
                    let (user, password) = cfg.retrieval.neo4j_credentials();
                    Arc::new(Neo4jGraph::new(&cfg.retrieval.neo4j_url, user, password))
                }
                "memory" => Arc::new(InMemoryGraph::new()),
                other => return Err(AgentError::Config(format!("unknown graph store: {other}"))),
            },
        };
        let index: Arc<dyn VectorIndex> = match self.index.take() {
            Some(i) => i,
            None => match cfg.retrieval.vector.as_str() {
                "qdrant" => Arc::new(QdrantIndex::new(&cfg.retrieval.qdrant_url, llm.clone())),
                "memory" => Arc::new(InMemoryVectorIndex::with_embedder(llm.clone())),
                other => return Err(AgentError::Config(format!("unknown vector index: {other}"))),
            },
        };

        let retrieval = Arc::new(
            RetrievalCoordinator::new(graph, index.clone())
                .with_collection(cfg.retrieval.documents_collection.clone())
                .with_limits(cfg.retrieval.graph_limit, cfg.retrieval.top_k),
        );

        let store = if self.in_memory_store {
            TaskStore::in_memory(index.clone())?
        } else {
            TaskStore::open(&cfg.store.db_path, index.clone())?
        };
        let store = Arc::new(store.with_collection(cfg.store.tasks_collection.clone()));

        let registry = self.registry.take().unwrap_or_else(Self::default_registry);
        let executor = Arc::new(
            ToolExecutor::new(registry, cfg.orchestrator.tool_timeout_secs)
                .with_approval_tools(cfg.hitl.approval_tools.iter().cloned()),
        );

        let hitl = Arc::new(
            HitlQueue::new(&cfg.hitl.queue_dir, ReflectionLog::new(&cfg.hitl.reflection_log))
                .with_ttl(Duration::from_secs(cfg.hitl.ttl_secs))
                .with_index(index.clone(), cfg.hitl.reflections_collection.clone()),
        );

        let broker = Arc::new(EventBroker::with_log(RotatingLog::new(
            &cfg.events.log_path,
            cfg.events.rotate_bytes,
        )));

        Ok(AgentComponents {
            llm,
            budgeter,
            retrieval,
            index,
            store,
            executor,
            hitl,
            broker,
            guidelines: Some(Guidelines::new(&cfg.app.guidelines_path)),
        })
    }

    pub fn build(mut self) -> Result<Orchestrator, AgentError> {
        let components = self.build_components()?;
        let rules_path = self.config.priority.rules_path.clone();
        let rules = match self.rules.take() {
            Some(rules) => rules,
            None => PriorityRules::load(&rules_path)?,
        };
        Ok(Orchestrator::new(components, rules)
            .with_rules_path(rules_path)
            .with_max_iterations(self.config.orchestrator.max_iterations))
    }
}
