//! 记忆层：对话消息、token 预算、分词、持久化指导文本

pub mod conversation;
pub mod guidelines;
pub mod token_budget;
pub mod tokenizer;

pub use conversation::{latest_user_message, Message, Role};
pub use guidelines::Guidelines;
pub use token_budget::{Budgeted, TokenBudgeter, TokenCounter, Trimmed};
