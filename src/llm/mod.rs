//! LLM 层：能力抽象与实现（OpenAI 兼容 / DeepSeek / Ollama / Mock）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{
    create_deepseek_client, create_ollama_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER,
};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{FragmentStream, LlmClient, LlmError};
