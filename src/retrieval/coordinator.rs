//! 检索协调器
//!
//! 1. 图谱中查名称包含 query 的实体（最多 graph_limit 条）
//! 2. 实体非空时按实体标签过滤向量检索；过滤结果为空则记 warn 并回退到无过滤检索
//! 3. 返回文档与 {pkg_match_count, doc_count}

use std::sync::Arc;

use crate::core::AgentError;
use crate::retrieval::{
    Document, EntityRecord, GraphStore, MetadataFilter, RetrievalMeta, VectorIndex,
};

/// 一次检索的完整结果
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub documents: Vec<Document>,
    pub records: Vec<EntityRecord>,
    pub meta: RetrievalMeta,
}

pub struct RetrievalCoordinator {
    graph: Arc<dyn GraphStore>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    graph_limit: usize,
    top_k: usize,
}

impl RetrievalCoordinator {
    pub fn new(graph: Arc<dyn GraphStore>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            graph,
            index,
            collection: "ingestion".to_string(),
            graph_limit: 10,
            top_k: 4,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_limits(mut self, graph_limit: usize, top_k: usize) -> Self {
        self.graph_limit = graph_limit;
        self.top_k = top_k;
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// PKG 实体查询
    pub async fn lookup(&self, query: &str) -> Result<Vec<EntityRecord>, AgentError> {
        self.graph.query_entities(query, self.graph_limit).await
    }

    pub async fn retrieve(&self, query: &str) -> Result<Retrieval, AgentError> {
        let records = self.lookup(query).await?;

        let mut entities: Vec<String> = Vec::new();
        for r in &records {
            if !entities.contains(&r.entity) {
                entities.push(r.entity.clone());
            }
        }

        let mut fell_back = false;
        let documents = if entities.is_empty() {
            self.index.search(&self.collection, query, self.top_k, None).await?
        } else {
            let filter = MetadataFilter::entities(entities);
            let docs = self
                .index
                .search(&self.collection, query, self.top_k, Some(&filter))
                .await?;
            if docs.is_empty() {
                tracing::warn!(
                    entities = filter.any.len(),
                    "PKG filter returned 0 docs; falling back to vector search"
                );
                fell_back = true;
                self.index.search(&self.collection, query, self.top_k, None).await?
            } else {
                docs
            }
        };

        let meta = RetrievalMeta {
            pkg_match_count: records.len(),
            doc_count: documents.len(),
            fell_back,
        };
        tracing::debug!(
            pkg_match_count = meta.pkg_match_count,
            doc_count = meta.doc_count,
            fell_back,
            "retrieval resolved"
        );
        Ok(Retrieval {
            documents,
            records,
            meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{InMemoryGraph, InMemoryVectorIndex};
    use serde_json::json;

    async fn seeded_index() -> Arc<InMemoryVectorIndex> {
        let index = Arc::new(InMemoryVectorIndex::new());
        index
            .add(
                "ingestion",
                "d1",
                Document::new("acme invoice #123 due friday").with_metadata("entities", json!(["Acme"])),
            )
            .await
            .unwrap();
        index
            .add("ingestion", "d2", Document::new("invoice policy handbook"))
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_filtered_search_uses_entities() {
        let graph = Arc::new(InMemoryGraph::with_records(vec![
            EntityRecord::new("Acme").with_document("d1"),
        ]));
        let coordinator = RetrievalCoordinator::new(graph, seeded_index().await);
        let r = coordinator.retrieve("acme").await.unwrap();
        assert_eq!(r.meta.pkg_match_count, 1);
        assert_eq!(r.meta.doc_count, 1);
        assert!(!r.meta.fell_back);
        assert!(r.documents[0].text.contains("acme"));
    }

    #[tokio::test]
    async fn test_fallback_when_filter_matches_nothing() {
        let graph = Arc::new(InMemoryGraph::with_records(vec![EntityRecord::new("Invoice Desk")]));
        let coordinator = RetrievalCoordinator::new(graph, seeded_index().await);
        let r = coordinator.retrieve("invoice").await.unwrap();
        assert!(r.meta.fell_back);
        assert_eq!(r.meta.pkg_match_count, 1);
        assert_eq!(r.meta.doc_count, r.documents.len());
        assert_eq!(r.meta.doc_count, 2);
    }

    #[tokio::test]
    async fn test_empty_graph_and_index_is_not_an_error() {
        let coordinator = RetrievalCoordinator::new(
            Arc::new(InMemoryGraph::new()),
            Arc::new(InMemoryVectorIndex::new()),
        );
        let r = coordinator.retrieve("anything").await.unwrap();
        assert!(r.documents.is_empty());
        assert_eq!(r.meta, RetrievalMeta::default());
    }
}
