//! Qdrant 向量库适配器（REST）
//!
//! payload 平铺：`page_content` 为正文，`doc_id` 为调用方 id，其余元数据键原样写入，
//! 因此 `{"key": "entities", "match": {"any": [...]}}` 可直接作用于元数据。
//! 集合在第一次写入时按向量维度创建；读 / 删一个不存在的集合视为空。

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::retrieval::{Document, MetadataFilter, VectorIndex};

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    embedder: Arc<dyn LlmClient>,
    /// 已确认存在的集合
    known: Mutex<HashSet<String>>,
}

impl QdrantIndex {
    pub fn new(base_url: &str, embedder: Arc<dyn LlmClient>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            embedder,
            known: Mutex::new(HashSet::new()),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        let mut vectors = self.embedder.embed(&[text.to_string()]).await?;
        if vectors.is_empty() {
            return Err(AgentError::VectorIndex("embedder returned no vector".to_string()));
        }
        Ok(vectors.swap_remove(0))
    }

    /// 发送请求；404 返回 None，其余非 2xx 为错误
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>, AgentError> {
        let mut req = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AgentError::VectorIndex(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| AgentError::VectorIndex(e.to_string()))?;
        resp.json()
            .await
            .map(Some)
            .map_err(|e| AgentError::VectorIndex(format!("invalid response: {e}")))
    }

    fn is_known(&self, collection: &str) -> bool {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(collection)
    }

    fn mark_known(&self, collection: &str) {
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collection.to_string());
    }

    /// 集合不存在时按给定维度创建（余弦距离）
    async fn ensure_collection(&self, collection: &str, size: usize) -> Result<(), AgentError> {
        if self.is_known(collection) {
            return Ok(());
        }
        let path = format!("/collections/{collection}");
        if self.request(Method::GET, &path, None).await?.is_none() {
            let body = json!({ "vectors": { "size": size, "distance": "Cosine" } });
            let resp = self
                .client
                .put(format!("{}{}", self.base_url, path))
                .json(&body)
                .send()
                .await
                .map_err(|e| AgentError::VectorIndex(e.to_string()))?;
            // 409：另一个写入者刚建好
            if resp.status() != StatusCode::CONFLICT {
                resp.error_for_status()
                    .map_err(|e| AgentError::VectorIndex(e.to_string()))?;
            }
            tracing::info!(collection, size, "qdrant collection created");
        }
        self.mark_known(collection);
        Ok(())
    }
}

fn filter_json(filter: &MetadataFilter) -> Value {
    json!({ "must": [{ "key": filter.key, "match": { "any": filter.any } }] })
}

fn doc_id_filter(id: &str) -> Value {
    json!({ "must": [{ "key": "doc_id", "match": { "value": id } }] })
}

/// Qdrant 点 id 只接受 UUID 或整数；调用方 id 不是 UUID 时生成一个新的
fn point_id(id: &str) -> String {
    uuid::Uuid::parse_str(id)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
}

fn payload_for(id: &str, doc: Document) -> Value {
    let mut payload: Map<String, Value> = doc.metadata.into_iter().collect();
    payload.insert("page_content".to_string(), Value::String(doc.text));
    payload.insert("doc_id".to_string(), Value::String(id.to_string()));
    Value::Object(payload)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    #[serde(default)]
    payload: Map<String, Value>,
}

fn to_document(point: ScoredPoint) -> Document {
    let mut payload = point.payload;
    let text = match payload.remove("page_content") {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    payload.remove("doc_id");
    Document {
        text,
        metadata: payload.into_iter().collect(),
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn add(&self, collection: &str, id: &str, doc: Document) -> Result<(), AgentError> {
        let vector = self.embed(&doc.text).await?;
        self.ensure_collection(collection, vector.len()).await?;
        // 同 doc_id 的旧点先删掉，保证覆盖语义
        self.remove(collection, id).await?;
        let body = json!({
            "points": [{
                "id": point_id(id),
                "vector": vector,
                "payload": payload_for(id, doc),
            }]
        });
        let path = format!("/collections/{collection}/points?wait=true");
        if self.request(Method::PUT, &path, Some(&body)).await?.is_none() {
            return Err(AgentError::VectorIndex(format!("collection {collection} not found")));
        }
        Ok(())
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<(), AgentError> {
        let body = json!({ "filter": doc_id_filter(id) });
        let path = format!("/collections/{collection}/points/delete?wait=true");
        self.request(Method::POST, &path, Some(&body)).await?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Document>, AgentError> {
        let vector = self.embed(query).await?;
        let mut body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(f) = filter {
            body["filter"] = filter_json(f);
        }
        let path = format!("/collections/{collection}/points/search");
        let Some(raw) = self.request(Method::POST, &path, Some(&body)).await? else {
            tracing::debug!(collection, "qdrant collection missing, no results");
            return Ok(Vec::new());
        };
        let parsed: SearchResponse = serde_json::from_value(raw)?;
        Ok(parsed.result.into_iter().map(to_document).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_filter_shape() {
        let f = MetadataFilter::entities(vec!["Acme".into(), "Alice".into()]);
        assert_eq!(
            filter_json(&f),
            json!({"must": [{"key": "entities", "match": {"any": ["Acme", "Alice"]}}]})
        );
    }

    #[test]
    fn test_point_id_keeps_uuid() {
        let id = uuid::Uuid::new_v4().to_string();
        assert_eq!(point_id(&id), id);
        assert!(uuid::Uuid::parse_str(&point_id("reflection-1")).is_ok());
    }

    #[test]
    fn test_payload_roundtrip_strips_internal_keys() {
        let doc = Document::new("invoice from acme").with_metadata("entities", json!(["Acme"]));
        let payload = payload_for("d1", doc);
        let point = ScoredPoint {
            payload: payload.as_object().cloned().unwrap_or_default(),
        };
        let back = to_document(point);
        assert_eq!(back.text, "invoice from acme");
        assert!(back.metadata.contains_key("entities"));
        assert!(!back.metadata.contains_key("doc_id"));
    }

    /// 本地假 Qdrant：按 "METHOD path" 返回固定状态码，并记录收到的请求
    struct FakeQdrant {
        base_url: String,
        seen: Arc<Mutex<Vec<(String, String)>>>,
    }

    async fn fake_qdrant(routes: Vec<(&'static str, u16, &'static str)>) -> FakeQdrant {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut raw = Vec::new();
                let mut buf = [0u8; 4096];
                let (head, body) = loop {
                    let n = sock.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break (String::new(), String::new());
                    }
                    raw.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&raw).to_string();
                    let Some(split) = text.find("\r\n\r\n") else { continue };
                    let head = text[..split].to_string();
                    let len = head
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + len {
                        break (head, text[split + 4..].to_string());
                    }
                };
                let line = head.lines().next().unwrap_or_default().to_string();
                let mut parts = line.split_whitespace();
                let key = format!("{} {}", parts.next().unwrap_or(""), parts.next().unwrap_or(""));
                log.lock().unwrap().push((key.clone(), body));
                let (status, reply) = routes
                    .iter()
                    .find(|(route, _, _)| key.starts_with(route))
                    .map(|(_, status, reply)| (*status, *reply))
                    .unwrap_or((200, "{\"result\": true}"));
                let resp = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                    reply.len()
                );
                sock.write_all(resp.as_bytes()).await.unwrap();
            }
        });
        FakeQdrant { base_url, seen }
    }

    #[tokio::test]
    async fn test_add_creates_missing_collection_once() {
        let fake = fake_qdrant(vec![("GET /collections/task_snippets", 404, "{}")]).await;
        let index = QdrantIndex::new(&fake.base_url, Arc::new(crate::llm::MockLlmClient::new()));

        index
            .add("task_snippets", "t1", Document::new("pay invoice"))
            .await
            .unwrap();
        index
            .add("task_snippets", "t2", Document::new("email bob"))
            .await
            .unwrap();

        let seen = fake.seen.lock().unwrap().clone();
        let keys: Vec<&str> = seen.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys.iter().filter(|k| **k == "GET /collections/task_snippets").count(), 1);
        let create: Vec<_> = seen
            .iter()
            .filter(|(k, _)| k == "PUT /collections/task_snippets")
            .collect();
        assert_eq!(create.len(), 1);
        let body: Value = serde_json::from_str(&create[0].1).unwrap();
        assert_eq!(body["vectors"]["size"], json!(64));
        assert_eq!(body["vectors"]["distance"], json!("Cosine"));
        assert_eq!(
            keys.iter()
                .filter(|k| k.starts_with("PUT /collections/task_snippets/points"))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_missing_collection_reads_as_empty() {
        let fake = fake_qdrant(vec![
            ("POST /collections/ingestion/points/search", 404, "{}"),
            ("POST /collections/ingestion/points/delete", 404, "{}"),
        ])
        .await;
        let index = QdrantIndex::new(&fake.base_url, Arc::new(crate::llm::MockLlmClient::new()));

        let docs = index.search("ingestion", "invoice", 4, None).await.unwrap();
        assert!(docs.is_empty());
        index.remove("ingestion", "t1").await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_still_fails() {
        let fake = fake_qdrant(vec![("POST /collections/ingestion/points/search", 500, "{}")]).await;
        let index = QdrantIndex::new(&fake.base_url, Arc::new(crate::llm::MockLlmClient::new()));
        let err = index.search("ingestion", "invoice", 4, None).await.unwrap_err();
        assert!(matches!(err, AgentError::VectorIndex(_)));
    }
}
