//! 预置后端：DeepSeek 与本地 Ollama（均为 OpenAI 兼容格式）
//!
//! - DeepSeek Base URL: https://api.deepseek.com，模型 deepseek-chat / deepseek-reasoner
//! - Ollama 默认监听 http://localhost:11434，OpenAI 兼容端点位于 /v1

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
pub const OLLAMA_DEFAULT_MODEL: &str = "llama3";

/// 创建 DeepSeek 客户端
///
/// - 优先使用环境变量 `DEEPSEEK_API_KEY`
/// - 模型可通过 `model` 参数或 `DEEPSEEK_MODEL` 环境变量指定
pub fn create_deepseek_client(model: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), &model, Some(api_key.as_str())).with_backend("deepseek")
}

/// 创建本地 Ollama 客户端；`OLLAMA_HOST` 可覆盖地址（不含 /v1）
pub fn create_ollama_client(base_url: Option<&str>, model: Option<&str>) -> OpenAiClient {
    let base = base_url
        .map(String::from)
        .or_else(|| {
            std::env::var("OLLAMA_HOST")
                .ok()
                .map(|h| format!("{}/v1", h.trim_end_matches('/')))
        })
        .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());
    let model = model.unwrap_or(OLLAMA_DEFAULT_MODEL);

    // Ollama 不校验 key，但 OpenAI 兼容端点要求请求头存在
    OpenAiClient::new(Some(&base), model, Some("ollama"))
        .with_backend("ollama")
        .with_embedding_model(model)
}
