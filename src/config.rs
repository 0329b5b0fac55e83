//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TASKHIVE__*` 覆盖（双下划线表示嵌套，如 `TASKHIVE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub budget: BudgetSection,
    pub priority: PrioritySection,
    pub retrieval: RetrievalSection,
    pub store: StoreSection,
    pub hitl: HitlSection,
    pub events: EventsSection,
    pub orchestrator: OrchestratorSection,
}

/// [app] 段：数据目录与指导文本
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub data_dir: PathBuf,
    /// meta-agent 写入、Plan / Respond 读取
    pub guidelines_path: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            guidelines_path: PathBuf::from("guidelines.txt"),
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / deepseek / ollama / mock；环境变量 LLM_BACKEND 可覆盖
    pub provider: String,
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub base_url: Option<String>,
    /// 子词分词器文件（需启用 hf-tokenizer feature）
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: None,
            embedding_model: None,
            base_url: None,
            tokenizer_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    pub max_tokens: usize,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self { max_tokens: 4096 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrioritySection {
    pub rules_path: PathBuf,
}

impl Default for PrioritySection {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from("rules/priority.toml"),
        }
    }
}

/// [retrieval] 段：图库 / 向量库选择与连接参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    /// neo4j / memory
    pub graph: String,
    /// qdrant / memory
    pub vector: String,
    pub neo4j_url: String,
    pub neo4j_user: Option<String>,
    pub neo4j_password: Option<String>,
    pub qdrant_url: String,
    pub documents_collection: String,
    pub graph_limit: usize,
    pub top_k: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            graph: "memory".to_string(),
            vector: "memory".to_string(),
            neo4j_url: "http://localhost:7474".to_string(),
            neo4j_user: None,
            neo4j_password: None,
            qdrant_url: "http://localhost:6333".to_string(),
            documents_collection: "ingestion".to_string(),
            graph_limit: 10,
            top_k: 4,
        }
    }
}

impl RetrievalSection {
    /// 用户名 / 密码：配置优先，其次 NEO4J_AUTH=user/pass
    pub fn neo4j_credentials(&self) -> (String, String) {
        let from_env = std::env::var("NEO4J_AUTH").ok().and_then(|auth| {
            auth.split_once('/')
                .map(|(u, p)| (u.to_string(), p.to_string()))
        });
        let (env_user, env_pass) = from_env.unwrap_or_else(|| ("neo4j".to_string(), String::new()));
        (
            self.neo4j_user.clone().unwrap_or(env_user),
            self.neo4j_password.clone().unwrap_or(env_pass),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub db_path: PathBuf,
    pub tasks_collection: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/tasks.db"),
            tasks_collection: "task_snippets".to_string(),
        }
    }
}

/// [hitl] 段：审批队列、反思日志、需审批的工具
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HitlSection {
    pub queue_dir: PathBuf,
    pub ttl_secs: u64,
    pub reflection_log: PathBuf,
    pub reflections_collection: String,
    pub approval_tools: Vec<String>,
}

impl Default for HitlSection {
    fn default() -> Self {
        Self {
            queue_dir: PathBuf::from("data/hitl_queue"),
            ttl_secs: 24 * 60 * 60,
            reflection_log: PathBuf::from("logs/hitl_log.jsonl"),
            reflections_collection: "reflections_log".to_string(),
            approval_tools: ["send_email", "pay_invoice", "update_calendar"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    pub log_path: PathBuf,
    pub rotate_bytes: u64,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("logs/events.jsonl"),
            rotate_bytes: crate::events::DEFAULT_ROTATE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_iterations: usize,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_iterations: crate::core::DEFAULT_MAX_ITERATIONS,
            tool_timeout_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TASKHIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TASKHIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TASKHIVE")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("hitl.approval_tools"),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 加载失败时记录告警并回退到默认配置
pub fn load_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, "ollama");
        assert_eq!(cfg.budget.max_tokens, 4096);
        assert_eq!(cfg.hitl.ttl_secs, 86_400);
        assert_eq!(cfg.retrieval.documents_collection, "ingestion");
        assert_eq!(cfg.store.tasks_collection, "task_snippets");
        assert_eq!(cfg.events.rotate_bytes, 5 * 1024 * 1024);
        assert_eq!(
            cfg.hitl.approval_tools,
            vec!["send_email", "pay_invoice", "update_calendar"]
        );
    }

    #[test]
    fn test_shipped_file_matches_defaults() {
        let shipped = config::Config::builder()
            .add_source(config::File::from(PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml"))))
            .build()
            .unwrap()
            .try_deserialize::<AppConfig>()
            .unwrap();
        assert_eq!(shipped.hitl.approval_tools, AppConfig::default().hitl.approval_tools);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[llm]\nprovider = \"mock\"\n\n[hitl]\napproval_tools = [\"send_email\"]\n",
        )
        .unwrap();
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .unwrap()
            .try_deserialize::<AppConfig>()
            .unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.hitl.approval_tools, vec!["send_email"]);
        assert_eq!(cfg.hitl.queue_dir, PathBuf::from("data/hitl_queue"));
        assert_eq!(cfg.orchestrator.max_iterations, 16);
    }

    #[test]
    fn test_neo4j_credentials_prefer_config() {
        let section = RetrievalSection {
            neo4j_user: Some("ops".into()),
            neo4j_password: Some("secret".into()),
            ..RetrievalSection::default()
        };
        assert_eq!(section.neo4j_credentials(), ("ops".to_string(), "secret".to_string()));
    }
}
