//! 内存版图库与向量库
//!
//! 向量库在有 LLM 时用 embed 余弦相似度排序，embed 不可用时退化为 Jaccard 关键词相似度。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::tokenizer;
use crate::retrieval::{Document, EntityRecord, GraphStore, MetadataFilter, VectorIndex};

/// 内存图：(实体, 文档 id, 联系方式) 三元组列表
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    records: RwLock<Vec<EntityRecord>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<EntityRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn insert(&self, record: EntityRecord) {
        if let Ok(mut records) = self.records.write() {
            records.push(record);
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn query_entities(&self, query: &str, limit: usize) -> Result<Vec<EntityRecord>, AgentError> {
        let needle = query.to_lowercase();
        let records = self
            .records
            .read()
            .map_err(|_| AgentError::LockPoisoned("graph"))?;
        Ok(records
            .iter()
            .filter(|r| r.entity.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    doc: Document,
    embedding: Option<Vec<f32>>,
}

/// 内存向量库：按 collection 分组，同 id 再次写入会覆盖
#[derive(Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<String, Vec<Entry>>>,
    embedder: Option<Arc<dyn LlmClient>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用 LLM 的 embed 能力做向量化
    pub fn with_embedder(embedder: Arc<dyn LlmClient>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            embedder: Some(embedder),
        }
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    async fn embed_one(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(&[text.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => Some(vectors.swap_remove(0)),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("embed failed ({}), using keyword similarity", e);
                None
            }
        }
    }
}

fn poisoned() -> AgentError {
    AgentError::LockPoisoned("vector index")
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn add(&self, collection: &str, id: &str, doc: Document) -> Result<(), AgentError> {
        // 先在锁外完成向量化
        let embedding = self.embed_one(&doc.text).await;
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let entries = collections.entry(collection.to_string()).or_default();
        entries.retain(|e| e.id != id);
        entries.push(Entry {
            id: id.to_string(),
            doc,
            embedding,
        });
        Ok(())
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<(), AgentError> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        if let Some(entries) = collections.get_mut(collection) {
            entries.retain(|e| e.id != id);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Document>, AgentError> {
        let query_embedding = self.embed_one(query).await;
        let query_tokens = tokenizer::tokenize_to_set(query);

        let collections = self.collections.read().map_err(|_| poisoned())?;
        let Some(entries) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &Entry)> = entries
            .iter()
            .filter(|e| filter.map_or(true, |f| e.doc.matches(f)))
            .map(|e| {
                let score = match (&query_embedding, &e.embedding) {
                    (Some(q), Some(v)) => cosine_similarity(q, v),
                    _ => tokenizer::jaccard_similarity(
                        &query_tokens,
                        &tokenizer::tokenize_to_set(&e.doc.text),
                    ),
                };
                (score, e)
            })
            .collect();

        // 稳定排序：同分时保持插入顺序
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(k).map(|(_, e)| e.doc.clone()).collect())
    }
}

/// 余弦相似度
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_graph_query_is_case_insensitive_and_bounded() {
        let graph = InMemoryGraph::with_records(
            (0..15)
                .map(|i| EntityRecord::new(format!("Acme Branch {i}")))
                .chain([EntityRecord::new("Globex")])
                .collect(),
        );
        let hits = graph.query_entities("acme", 10).await.unwrap();
        assert_eq!(hits.len(), 10);
        assert!(graph.query_entities("nothing", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filter_uses_any_semantics() {
        let index = InMemoryVectorIndex::new();
        index
            .add("docs", "1", Document::new("invoice from acme").with_metadata("entities", json!(["Acme"])))
            .await
            .unwrap();
        index
            .add("docs", "2", Document::new("invoice from globex").with_metadata("entities", json!(["Globex"])))
            .await
            .unwrap();

        let filter = MetadataFilter::entities(vec!["Globex".into(), "Initech".into()]);
        let docs = index.search("docs", "invoice", 4, Some(&filter)).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "invoice from globex");
    }

    #[tokio::test]
    async fn test_add_same_id_replaces_and_remove_is_idempotent() {
        let index = InMemoryVectorIndex::with_embedder(Arc::new(MockLlmClient::new()));
        index.add("tasks", "t1", Document::new("pay invoice")).await.unwrap();
        index.add("tasks", "t1", Document::new("pay invoice today")).await.unwrap();
        assert_eq!(index.len("tasks"), 1);

        index.remove("tasks", "t1").await.unwrap();
        index.remove("tasks", "t1").await.unwrap();
        assert!(index.is_empty("tasks"));
    }

    #[tokio::test]
    async fn test_embedding_ranks_closer_text_first() {
        let index = InMemoryVectorIndex::with_embedder(Arc::new(MockLlmClient::new()));
        index.add("docs", "a", Document::new("team offsite agenda")).await.unwrap();
        index.add("docs", "b", Document::new("overdue invoice payment")).await.unwrap();
        let docs = index.search("docs", "invoice payment", 1, None).await.unwrap();
        assert_eq!(docs[0].text, "overdue invoice payment");
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.001);
    }
}
