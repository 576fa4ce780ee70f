//! 模型网关抽象
//!
//! 每次调用都重发完整历史（无状态），返回纯文本回复或一批工具调用请求。

use async_trait::async_trait;

use crate::core::GatewayError;
use crate::memory::{Message, ToolCallRequest};
use crate::tools::ToolSpec;

/// 模型的一次回复：要么是给用户的文本，要么是工具调用
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Assistant(String),
    ToolCalls(Vec<ToolCallRequest>),
}

/// 模型网关 trait：history + 声明的工具 → 回复
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, GatewayError>;

    /// 后端名称（用于日志）
    fn name(&self) -> &str {
        "gateway"
    }

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
