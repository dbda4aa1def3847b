//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use message::{ImageAttachment, Message, Role};
pub use mock::{MockLlmClient, MockReply};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};

use crate::config::LlmSection;

/// 根据 [llm] 段创建客户端：provider = mock 或缺少 API Key 时退回 Mock
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let provider = cfg.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM (offline)");
        return Arc::new(MockLlmClient::new());
    }

    match std::env::var(&cfg.api_key_env) {
        Ok(key) => {
            tracing::info!(model = %cfg.model, base_url = ?cfg.base_url, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, Some(&key)))
        }
        Err(_) => {
            tracing::warn!(env = %cfg.api_key_env, "No API key set, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}
