//! Headless 对话服务
//!
//! 供 HTTP 等前端调用：create_agent_components 从配置构建网关、工具执行器、编排引擎与会话注册表，
//! ChatService::handle 对单条用户消息跑一次完整运行并返回 ChatResponse。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{OrchestrationError, SessionError};
use crate::llm::{create_gateway, ModelGateway};
use crate::tools::{default_registry, EchoTool, ToolExecutor};
use crate::turn::{Termination, TurnEngine};
use crate::session::SessionRegistry;

/// 预构建的组件，可多会话共享
pub struct AgentComponents {
    pub gateway: Arc<dyn ModelGateway>,
    pub executor: Arc<ToolExecutor>,
    pub engine: Arc<TurnEngine>,
    pub registry: Arc<SessionRegistry>,
}

/// 按配置创建全部组件；mock 后端额外注册 echo 工具以便本地跑通工具循环
pub fn create_agent_components(cfg: &AppConfig) -> AgentComponents {
    let gateway = create_gateway(&cfg.llm);

    let mut tools = default_registry(&cfg.tools);
    if gateway.name() == "mock" {
        tools.register(EchoTool);
    }
    tracing::info!(tools = ?tools.tool_names(), "tools registered");

    let executor = Arc::new(ToolExecutor::from_config(tools, &cfg.tools));
    let engine = Arc::new(TurnEngine::from_config(
        cfg,
        Arc::clone(&gateway),
        Arc::clone(&executor),
    ));
    let registry = Arc::new(SessionRegistry::new(
        Arc::clone(&engine),
        cfg.system_prompt(),
    ));

    AgentComponents {
        gateway,
        executor,
        engine,
        registry,
    }
}

/// /chat 请求体
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// /chat 与 /chat/reset 的响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 工具批次用尽时为 true
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub limit_reached: bool,
}

impl ChatResponse {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            success: true,
            answer: Some(text.into()),
            error: None,
            limit_reached: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            success: false,
            answer: None,
            error: Some(text.into()),
            limit_reached: false,
        }
    }
}

/// 失败分类，前端据此选择状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// 请求本身有误（空消息、空 session id）
    BadRequest,
    /// 会话上有运行在进行中（只用于 reset）
    Conflict,
    /// 编排失败（模型不可用、超时、取消）
    Internal,
}

/// 对话服务：包住会话注册表，负责输入校验与错误到 ChatResponse 的映射
#[derive(Clone)]
pub struct ChatService {
    registry: Arc<SessionRegistry>,
}

impl ChatService {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub async fn handle(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<ChatResponse, (Failure, ChatResponse)> {
        self.handle_with_cancel(session_id, text, &CancellationToken::new())
            .await
    }

    pub async fn handle_with_cancel(
        &self,
        session_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, (Failure, ChatResponse)> {
        let text = text.trim();
        if text.is_empty() {
            return Err((Failure::BadRequest, ChatResponse::error("Message must not be empty")));
        }

        match self
            .registry
            .run_with_cancel(session_id, text, cancel, None)
            .await
        {
            Ok(outcome) => {
                let mut response = ChatResponse::answer(outcome.answer);
                response.limit_reached = outcome.termination == Termination::LimitNotice;
                Ok(response)
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "chat request failed");
                let failure = if e.is_client_error() {
                    Failure::BadRequest
                } else {
                    Failure::Internal
                };
                Err((failure, ChatResponse::error(e.public_message())))
            }
        }
    }

    pub async fn reset(&self, session_id: &str) -> Result<ChatResponse, (Failure, ChatResponse)> {
        match self.registry.reset(session_id).await {
            Ok(()) => Ok(ChatResponse::answer("Session reset")),
            Err(e @ SessionError::RunInFlight(_)) => Err((
                Failure::Conflict,
                ChatResponse::error(OrchestrationError::from(e).public_message()),
            )),
            Err(e) => Err((
                Failure::BadRequest,
                ChatResponse::error(OrchestrationError::from(e).public_message()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_service() -> ChatService {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        let components = create_agent_components(&cfg);
        ChatService::new(components.registry)
    }

    #[tokio::test]
    async fn test_mock_components_answer() {
        let service = mock_service();
        let response = service.handle("s1", "  hello  ").await.unwrap();
        assert_eq!(response.answer.as_deref(), Some("Echo from Mock: hello"));
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_blank_message_is_bad_request() {
        let service = mock_service();
        let (failure, response) = service.handle("s1", "   ").await.unwrap_err();
        assert_eq!(failure, Failure::BadRequest);
        assert!(!response.success);
        assert!(!service.registry().contains("s1").await);
    }

    #[test]
    fn test_response_serialization_omits_empty_fields() {
        let json = serde_json::to_value(ChatResponse::answer("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "answer": "hi"}));
    }
}
