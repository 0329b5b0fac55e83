//! Meta-agent：把人工审批的反思记录提炼成指导文本
//!
//! 读取最近的反思（优先检索库，其次反思日志），交给模型总结，写入 guidelines 文件；
//! Plan 与 Respond 之后会把它作为 system 消息前置。

use std::sync::Arc;

use crate::core::AgentError;
use crate::hitl::ReflectionLog;
use crate::llm::LlmClient;
use crate::memory::{Guidelines, Message};
use crate::retrieval::VectorIndex;

pub const REFLECTION_QUERY: &str = "recent reflections";
pub const MAX_REFLECTIONS: usize = 20;

const META_PROMPT: &str = "Below are recent human approval decisions on automated tasks. \
Summarise them into short guidelines the planner should follow.";

pub struct MetaAgent {
    llm: Arc<dyn LlmClient>,
    index: Arc<dyn VectorIndex>,
    collection: String,
}

impl MetaAgent {
    pub fn new(llm: Arc<dyn LlmClient>, index: Arc<dyn VectorIndex>, collection: impl Into<String>) -> Self {
        Self {
            llm,
            index,
            collection: collection.into(),
        }
    }

    async fn reflections(&self, log: &ReflectionLog) -> Result<Vec<String>, AgentError> {
        let docs = self
            .index
            .search(&self.collection, REFLECTION_QUERY, MAX_REFLECTIONS, None)
            .await?;
        if !docs.is_empty() {
            return Ok(docs.into_iter().map(|d| d.text).collect());
        }
        // 检索库为空（例如换了向量库）时退回本地日志
        Ok(log
            .recent(MAX_REFLECTIONS)?
            .iter()
            .map(|r| r.index_text())
            .collect())
    }

    /// 没有任何反思时返回 None，不改动指导文件
    pub async fn run(
        &self,
        log: &ReflectionLog,
        guidelines: &Guidelines,
    ) -> Result<Option<String>, AgentError> {
        let texts = self.reflections(log).await?;
        if texts.is_empty() {
            tracing::info!("no reflections yet, guidelines unchanged");
            return Ok(None);
        }

        let messages = vec![Message::system(META_PROMPT), Message::user(texts.join("\n"))];
        let reply = self.llm.chat(&messages).await?;
        let text = reply.content.trim();
        if text.is_empty() {
            tracing::warn!("meta-agent produced empty guidelines, keeping previous file");
            return Ok(None);
        }
        guidelines.save(text)?;
        tracing::info!(
            reflections = texts.len(),
            path = %guidelines.path().display(),
            "guidelines updated"
        );
        Ok(Some(text.to_string()))
    }
}
