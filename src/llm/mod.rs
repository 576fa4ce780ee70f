//! LLM 层：模型网关抽象与实现（Ollama / Mock / 脚本）

pub mod mock;
pub mod ollama;
pub mod traits;

use std::sync::Arc;

pub use mock::{MockGateway, ScriptedGateway};
pub use ollama::{strip_think_blocks, OllamaGateway, TokenUsage};
pub use traits::{ModelGateway, ModelReply};

use crate::config::LlmSection;

/// 按配置的 provider 创建网关；未知取值回退到 mock 并告警
pub fn create_gateway(section: &LlmSection) -> Arc<dyn ModelGateway> {
    match section.provider.to_lowercase().as_str() {
        "ollama" => {
            tracing::info!(model = %section.model, base_url = %section.base_url, "using Ollama gateway");
            Arc::new(OllamaGateway::from_config(section))
        }
        "mock" => Arc::new(MockGateway),
        other => {
            tracing::warn!(provider = %other, "unknown LLM provider, falling back to mock");
            Arc::new(MockGateway)
        }
    }
}
