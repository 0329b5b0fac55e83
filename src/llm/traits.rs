//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Ollama / Mock）实现 LlmClient：
//! chat（非流式）、stream_chat（流式片段）、embed（向量化）、count_tokens（token 估算）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::memory::{Message, TokenCounter};

/// 后端错误分类
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// 流式回复：逐个返回消息片段
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM 能力 trait；核心不关心具体由哪个后端实现
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 后端名称（日志用）
    fn backend(&self) -> &str;

    /// 非流式完成，返回一条 assistant 消息
    async fn chat(&self, messages: &[Message]) -> Result<Message, LlmError>;

    /// 流式完成，返回片段流
    async fn stream_chat(&self, messages: &[Message]) -> Result<FragmentStream, LlmError>;

    /// 批量向量化
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// 估算消息序列的 token 数；默认使用空白切分近似
    fn count_tokens(&self, messages: &[Message]) -> usize {
        TokenCounter::Whitespace.count_messages(messages)
    }
}
