//! 检索层：知识图谱（PKG）实体查询 + 向量检索
//!
//! 图库与向量库都以 trait 注入，内存实现用于测试与离线运行，Neo4j / Qdrant 适配器用于生产。

pub mod coordinator;
pub mod memory;
pub mod neo4j;
pub mod qdrant;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;

pub use coordinator::{Retrieval, RetrievalCoordinator};
pub use memory::{InMemoryGraph, InMemoryVectorIndex};
pub use neo4j::Neo4jGraph;
pub use qdrant::QdrantIndex;

/// 图查询返回的实体提示
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

impl EntityRecord {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            document_id: None,
            contact: None,
        }
    }

    pub fn with_document(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }

    /// Plan 提示词中的写法：`Alice <alice@acme.com>` 或 `Alice`
    pub fn describe(&self) -> String {
        match &self.contact {
            Some(contact) => format!("{} <{}>", self.entity, contact),
            None => self.entity.clone(),
        }
    }
}

/// 检索到的文档片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 文档是否满足 any 语义的过滤条件：元数据中 key 对应的值（字符串或字符串数组）与候选集合有交集
    pub fn matches(&self, filter: &MetadataFilter) -> bool {
        match self.metadata.get(&filter.key) {
            Some(serde_json::Value::String(s)) => filter.any.iter().any(|c| c == s),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .any(|s| filter.any.iter().any(|c| c == s)),
            _ => false,
        }
    }
}

/// 元数据过滤：`{"key": ..., "match": {"any": [...]}}`
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFilter {
    pub key: String,
    pub any: Vec<String>,
}

impl MetadataFilter {
    pub fn entities(any: Vec<String>) -> Self {
        Self {
            key: "entities".to_string(),
            any,
        }
    }
}

/// 检索质量元数据，供调用方判断图谱引导是否真的起作用
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMeta {
    pub pkg_match_count: usize,
    pub doc_count: usize,
    /// 过滤检索为空后是否回退到了无过滤检索
    #[serde(default)]
    pub fell_back: bool,
}

/// 图查询能力
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// 名称包含 query（忽略大小写）的实体，最多 limit 条
    async fn query_entities(&self, query: &str, limit: usize) -> Result<Vec<EntityRecord>, AgentError>;
}

/// 向量检索能力；collection 区分文档、任务摘要、审批反思等不同集合
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, collection: &str, id: &str, doc: Document) -> Result<(), AgentError>;

    /// 删除指定 id；不存在时视为成功
    async fn remove(&self, collection: &str, id: &str) -> Result<(), AgentError>;

    async fn search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Document>, AgentError>;
}
