//! Neo4j 图库适配器（HTTP 事务端点）

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::core::AgentError;
use crate::retrieval::{EntityRecord, GraphStore};

const ENTITY_QUERY: &str = "MATCH (d:Document)-[r]->(e) \
WHERE toLower(e.name) CONTAINS toLower($q) \
RETURN d.id AS id, e.name AS entity, e.email AS email \
LIMIT $limit";

pub struct Neo4jGraph {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl Neo4jGraph {
    /// base_url 形如 `http://localhost:7474`，database 默认 `neo4j`
    pub fn new(base_url: &str, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/db/neo4j/tx/commit", base_url.trim_end_matches('/')),
            user: user.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

fn as_opt_string(v: Option<&serde_json::Value>) -> Option<String> {
    match v? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    async fn query_entities(&self, query: &str, limit: usize) -> Result<Vec<EntityRecord>, AgentError> {
        let body = json!({
            "statements": [{
                "statement": ENTITY_QUERY,
                "parameters": { "q": query, "limit": limit }
            }]
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Graph(e.to_string()))?
            .error_for_status()
            .map_err(|e| AgentError::Graph(e.to_string()))?;
        let tx: TxResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::Graph(format!("invalid response: {e}")))?;

        if let Some(err) = tx.errors.first() {
            return Err(AgentError::Graph(format!("{}: {}", err.code, err.message)));
        }

        let records = tx
            .results
            .into_iter()
            .flat_map(|r| r.data)
            .filter_map(|row| {
                let entity = as_opt_string(row.row.get(1))?;
                Some(EntityRecord {
                    entity,
                    document_id: as_opt_string(row.row.first()),
                    contact: as_opt_string(row.row.get(2)),
                })
            })
            .take(limit)
            .collect();
        Ok(records)
    }
}
