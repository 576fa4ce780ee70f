//! Mock 网关（用于测试与本地联调，无需模型服务）
//!
//! - `MockGateway`：最后一条是用户消息时请求 echo 工具；拿到工具结果后直接作答
//! - `ScriptedGateway`：按预设脚本依次返回回复，并记录调用次数与每次收到的历史

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::GatewayError;
use crate::llm::{ModelGateway, ModelReply};
use crate::memory::{Message, Role, ToolCallRequest};
use crate::tools::ToolSpec;

/// Mock 网关：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockGateway;

#[async_trait]
impl ModelGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, GatewayError> {
        let last = messages
            .last()
            .ok_or_else(|| GatewayError::MalformedResponse("empty history".to_string()))?;

        if last.role == Role::Tool {
            return Ok(ModelReply::Assistant(format!(
                "Echo from Mock: {}",
                last.content
            )));
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if !tools.iter().any(|t| t.name == "echo") {
            return Ok(ModelReply::Assistant(format!("Echo from Mock: {}", last_user)));
        }

        let mut args = Map::new();
        args.insert("text".to_string(), Value::String(last_user.to_string()));
        Ok(ModelReply::ToolCalls(vec![ToolCallRequest::new(
            uuid::Uuid::new_v4().to_string(),
            "echo",
            args,
        )]))
    }
}

/// 脚本网关：依次弹出预设回复；脚本耗尽后重复最后一条
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<ModelReply, GatewayError>>>,
    last: Mutex<Option<Result<ModelReply, GatewayError>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedGateway {
    pub fn new(script: impl IntoIterator<Item = Result<ModelReply, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 每次都返回同一回复
    pub fn repeating(reply: ModelReply) -> Self {
        Self::new([Ok(reply)])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 每次调用时收到的历史快照
    pub fn seen_histories(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<ModelReply, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let mut last = self
            .last
            .lock()
            .map_err(|_| GatewayError::Transport("script lock poisoned".to_string()))?;
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(GatewayError::Transport("script is empty".to_string()))),
        }
    }
}
