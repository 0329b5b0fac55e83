//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 回复来源依次为：按关键字匹配的规则 → 预置回复队列 → 回显最后一条 User 消息。
//! 向量化使用词哈希（bag-of-words），同一文本总得到同一向量。

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{FragmentStream, LlmClient, LlmError};
use crate::memory::{tokenizer, Message, Role};

const EMBEDDING_DIM: usize = 64;

/// Mock 客户端：可脚本化的回复，并记录每次调用的消息
#[derive(Debug, Default)]
pub struct MockLlmClient {
    /// (关键字, 回复)：最后一条 User 消息包含关键字时返回该回复
    rules: Vec<(String, String)>,
    script: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<Message>>>,
    fail_with: Option<String>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序消费的回复队列
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// 添加关键字规则（优先于回复队列）
    pub fn when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    /// 所有 chat 调用都返回该错误（模拟后端不可达）
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    /// 已记录的调用（每次调用的完整消息序列）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn reply_for(&self, messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if let Some((_, reply)) = self.rules.iter().find(|(needle, _)| last_user.contains(needle.as_str())) {
            return reply.clone();
        }
        if let Some(reply) = self.script.lock().ok().and_then(|mut q| q.pop_front()) {
            return reply;
        }
        format!("Echo from Mock: {}", last_user)
    }
}

/// 词哈希向量：每个词落入一个桶，最后做 L2 归一化
fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    for token in tokenizer::tokenize(text) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        v[(hasher.finish() as usize) % EMBEDDING_DIM] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn backend(&self) -> &str {
        "mock"
    }

    async fn chat(&self, messages: &[Message]) -> Result<Message, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        if let Some(err) = &self.fail_with {
            return Err(LlmError::Request(err.clone()));
        }
        Ok(Message::assistant(self.reply_for(messages)))
    }

    async fn stream_chat(&self, messages: &[Message]) -> Result<FragmentStream, LlmError> {
        let content = self.chat(messages).await?.content;
        let fragments: Vec<Result<String, LlmError>> = content
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(fragments)))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| hashed_embedding(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_rules_take_precedence_over_script() {
        let llm = MockLlmClient::scripted(["first"]).when("urgent", "0.9");
        let reply = llm.chat(&[Message::user("how urgent is this")]).await.unwrap();
        assert_eq!(reply.content, "0.9");
        let reply = llm.chat(&[Message::user("plan it")]).await.unwrap();
        assert_eq!(reply.content, "first");
        let reply = llm.chat(&[Message::user("again")]).await.unwrap();
        assert_eq!(reply.content, "Echo from Mock: again");
        assert_eq!(llm.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_stream_reassembles_reply() {
        let llm = MockLlmClient::scripted(["hello streaming world"]);
        let mut stream = llm.stream_chat(&[Message::user("hi")]).await.unwrap();
        let mut out = String::new();
        while let Some(fragment) = stream.next().await {
            out.push_str(&fragment.unwrap());
        }
        assert_eq!(out, "hello streaming world");
    }

    #[tokio::test]
    async fn test_embedding_is_deterministic() {
        let llm = MockLlmClient::new();
        let a = llm.embed(&["invoice payment".to_string()]).await.unwrap();
        let b = llm.embed(&["invoice payment".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn test_failing_client() {
        let llm = MockLlmClient::failing("connection refused");
        assert!(llm.chat(&[Message::user("x")]).await.is_err());
    }
}
