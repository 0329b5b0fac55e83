//! Token 预算控制
//!
//! `count` 估算文本 token 数：配置了子词分词器（`hf-tokenizer` 特性）时精确计数，否则按空白切分近似。
//! 调用方只能依赖单调性（词越多估算值不会越少），不能依赖具体策略。
//! `trim` 从序列**前端**（最旧）逐条淘汰，直到累计估算值 ≤ 预算或序列为空；剩余元素保持原顺序。

use std::borrow::Cow;
use std::path::Path;
#[cfg(feature = "hf-tokenizer")]
use std::sync::Arc;

use crate::memory::Message;

/// 可参与预算计算的条目（消息、工具调用等）
pub trait Budgeted {
    fn budget_text(&self) -> Cow<'_, str>;
}

impl Budgeted for Message {
    fn budget_text(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.content)
    }
}

/// Token 计数策略
#[derive(Clone)]
pub enum TokenCounter {
    /// 空白切分近似
    Whitespace,
    /// 子词分词器精确计数
    #[cfg(feature = "hf-tokenizer")]
    Subword(Arc<tokenizers::Tokenizer>),
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenCounter::Whitespace => f.write_str("TokenCounter::Whitespace"),
            #[cfg(feature = "hf-tokenizer")]
            TokenCounter::Subword(_) => f.write_str("TokenCounter::Subword"),
        }
    }
}

impl TokenCounter {
    /// 优先加载分词器文件；不可用时回退到空白切分
    pub fn from_path(path: Option<&Path>) -> Self {
        #[cfg(feature = "hf-tokenizer")]
        if let Some(path) = path {
            match tokenizers::Tokenizer::from_file(path) {
                Ok(tok) => {
                    tracing::info!("Using subword tokenizer from {}", path.display());
                    return TokenCounter::Subword(Arc::new(tok));
                }
                Err(e) => {
                    tracing::warn!("Tokenizer load failed ({}), using whitespace estimate", e);
                }
            }
        }
        #[cfg(not(feature = "hf-tokenizer"))]
        if let Some(path) = path {
            tracing::debug!(
                "tokenizer {} ignored: built without hf-tokenizer",
                path.display()
            );
        }
        TokenCounter::Whitespace
    }

    pub fn count(&self, text: &str) -> usize {
        match self {
            TokenCounter::Whitespace => text.split_whitespace().count(),
            #[cfg(feature = "hf-tokenizer")]
            TokenCounter::Subword(tok) => tok
                .encode(text, false)
                .map(|enc| enc.len())
                .unwrap_or_else(|_| text.split_whitespace().count()),
        }
    }

    pub fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count(&m.content)).sum()
    }
}

/// 裁剪结果：保留的条目与被裁掉的 token 数
#[derive(Debug, Clone)]
pub struct Trimmed<T> {
    pub items: Vec<T>,
    pub token_delta: usize,
}

impl<T> Trimmed<T> {
    pub fn was_trimmed(&self) -> bool {
        self.token_delta > 0
    }
}

/// Token 预算器
#[derive(Debug, Clone)]
pub struct TokenBudgeter {
    counter: TokenCounter,
    max_tokens: usize,
}

impl TokenBudgeter {
    pub fn new(counter: TokenCounter, max_tokens: usize) -> Self {
        Self {
            counter,
            max_tokens,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    pub fn count(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    pub fn total<T: Budgeted>(&self, items: &[T]) -> usize {
        items.iter().map(|i| self.count(&i.budget_text())).sum()
    }

    /// 从前端淘汰直到不超预算；已在预算内的序列原样返回
    pub fn trim<T: Budgeted + Clone>(&self, items: &[T], budget: usize) -> Vec<T> {
        let costs: Vec<usize> = items.iter().map(|i| self.count(&i.budget_text())).collect();
        let mut total: usize = costs.iter().sum();
        let mut start = 0;
        while start < items.len() && total > budget {
            total -= costs[start];
            start += 1;
        }
        items[start..].to_vec()
    }

    /// 按默认预算裁剪，并返回裁掉的 token 数
    pub fn fit<T: Budgeted + Clone>(&self, items: &[T]) -> Trimmed<T> {
        let before = self.total(items);
        let kept = self.trim(items, self.max_tokens);
        let after = self.total(&kept);
        let trimmed = Trimmed {
            items: kept,
            token_delta: before - after,
        };
        if trimmed.was_trimmed() {
            tracing::debug!(trimmed = true, token_delta = trimmed.token_delta, "token budget applied");
        }
        trimmed
    }
}

impl Default for TokenBudgeter {
    fn default() -> Self {
        Self::new(TokenCounter::Whitespace, 4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(contents: &[&str]) -> Vec<Message> {
        contents.iter().map(|c| Message::user(*c)).collect()
    }

    #[test]
    fn test_whitespace_count() {
        let counter = TokenCounter::Whitespace;
        assert_eq!(counter.count("pay invoice #123"), 3);
        assert_eq!(counter.count("   "), 0);
        assert!(counter.count("one two three four") >= counter.count("one two three"));
    }

    #[test]
    fn test_trim_within_budget_is_unchanged() {
        let budgeter = TokenBudgeter::new(TokenCounter::Whitespace, 100);
        let messages = msgs(&["a b", "c d e", "f"]);
        let trimmed = budgeter.trim(&messages, 100);
        assert_eq!(trimmed, messages);
        assert_eq!(budgeter.trim(&trimmed, 100), trimmed);
    }

    #[test]
    fn test_trim_evicts_oldest_first() {
        let budgeter = TokenBudgeter::default();
        let messages = msgs(&["one two three", "four five", "six"]);
        let trimmed = budgeter.trim(&messages, 3);
        assert_eq!(trimmed, msgs(&["four five", "six"]));

        let trimmed = budgeter.trim(&messages, 1);
        assert_eq!(trimmed, msgs(&["six"]));
    }

    #[test]
    fn test_trim_to_empty() {
        let budgeter = TokenBudgeter::default();
        let messages = msgs(&["one two", "three"]);
        assert!(budgeter.trim(&messages, 0).is_empty());
    }

    #[test]
    fn test_fit_reports_delta() {
        let budgeter = TokenBudgeter::new(TokenCounter::Whitespace, 2);
        let fitted = budgeter.fit(&msgs(&["one two three", "four"]));
        assert!(fitted.was_trimmed());
        assert_eq!(fitted.token_delta, 3);
        assert_eq!(fitted.items, msgs(&["four"]));
    }

    #[test]
    fn test_missing_tokenizer_falls_back() {
        let counter = TokenCounter::from_path(Some(Path::new("/nonexistent/tokenizer.json")));
        assert!(matches!(counter, TokenCounter::Whitespace));
    }
}
