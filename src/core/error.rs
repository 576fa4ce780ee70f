//! 错误分层
//!
//! - ToolError：单个工具失败，在 Turn Controller 内被包装成 Failure ToolResult，不向上传播
//! - GatewayError：模型调用失败，终止本次运行
//! - SessionError：会话注册表前置条件被违反（客户端错误）
//! - OrchestrationError：运行级错误，带一条不泄露内部细节的对外消息

use std::time::Duration;

use thiserror::Error;

/// 模型网关调用失败（超时、传输、接口错误、响应无法解析）
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model transport error: {0}")]
    Transport(String),

    #[error("Model API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
}

/// 工具执行失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool execution failed: {0}")]
    Failed(String),

    #[error("Tool timeout: {0}")]
    Timeout(String),
}

/// 会话注册表前置条件错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session id must not be blank")]
    InvalidSessionId,

    /// reset 只能在两次运行之间调用
    #[error("Session {0} has a run in flight")]
    RunInFlight(String),
}

/// 单次编排运行失败
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Run cancelled")]
    Cancelled,
}

impl OrchestrationError {
    /// 返回给调用方的安全消息（详细信息只进日志）
    pub fn public_message(&self) -> String {
        match self {
            OrchestrationError::Gateway(GatewayError::Timeout(_)) => {
                "The language model did not respond in time, please retry".to_string()
            }
            OrchestrationError::Gateway(_) => {
                "The language model is unavailable, please retry later".to_string()
            }
            OrchestrationError::Session(e) => e.to_string(),
            OrchestrationError::Cancelled => "The request was cancelled".to_string(),
        }
    }

    /// 是否属于客户端错误（HTTP 4xx）
    pub fn is_client_error(&self) -> bool {
        matches!(self, OrchestrationError::Session(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_gateway_details() {
        let err = OrchestrationError::from(GatewayError::Api {
            status: 500,
            body: "stack trace at llama.cpp:42".to_string(),
        });
        let msg = err.public_message();
        assert!(!msg.contains("llama"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_session_errors_are_client_errors() {
        let err = OrchestrationError::from(SessionError::InvalidSessionId);
        assert!(err.is_client_error());
        assert_eq!(err.public_message(), "Session id must not be blank");
    }
}
