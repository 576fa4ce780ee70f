//! 会话状态：system 指令 + 有序消息历史
//!
//! 只追加、不重排、不剪枝；唯一的截断入口是 reset()（回到只剩 system 指令）。
//! 工具结果总是紧跟在发起调用的 assistant 消息之后，由 record_tool_batch 一次性写入保证。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型发起的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// 单次模型回复内唯一，对应的 ToolResult 原样回显
    pub request_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(
        request_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Failure,
}

/// 工具执行结果（失败也是结果，payload 为可读的错误描述）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub request_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    pub payload: String,
}

impl ToolResult {
    pub fn success(call: &ToolCallRequest, payload: impl Into<String>) -> Self {
        Self {
            request_id: call.request_id.clone(),
            tool_name: call.tool_name.clone(),
            status: ToolStatus::Success,
            payload: payload.into(),
        }
    }

    pub fn failure(call: &ToolCallRequest, payload: impl Into<String>) -> Self {
        Self {
            request_id: call.request_id.clone(),
            tool_name: call.tool_name.clone(),
            status: ToolStatus::Failure,
            payload: payload.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 仅 Assistant：本条消息发起的工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// 仅 Tool：回显的调用 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// 仅 Tool：工具名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// 仅 Tool：执行状态
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolStatus>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            request_id: None,
            tool_name: None,
            status: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, String::new())
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.payload,
            tool_calls: Vec::new(),
            request_id: Some(result.request_id),
            tool_name: Some(result.tool_name),
            status: Some(result.status),
        }
    }

    pub fn is_tool_call_request(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// 一次会话的完整历史；同一时刻只被一个 Turn Controller 持有
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_instruction)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system_instruction(&self) -> &str {
        &self.messages[0].content
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    /// 质量门判定为 Bad 后注入的纠正指令（以 user 身份）
    pub fn push_remediation(&mut self, instruction: impl Into<String>) {
        self.messages.push(Message::user(instruction));
    }

    /// 写入一整批工具调用及其结果：先 assistant 调用消息，再按调用顺序逐条结果。
    /// 结果按 request_id 对齐；缺失的调用补一条 Failure，多余的结果丢弃。
    pub fn record_tool_batch(&mut self, calls: Vec<ToolCallRequest>, results: Vec<ToolResult>) {
        let mut results = results;
        let ordered: Vec<ToolResult> = calls
            .iter()
            .map(|call| {
                match results.iter().position(|r| r.request_id == call.request_id) {
                    Some(idx) => results.swap_remove(idx),
                    None => ToolResult::failure(call, "Error: no result was produced for this call"),
                }
            })
            .collect();
        self.messages.push(Message::assistant_tool_calls(calls));
        self.messages
            .extend(ordered.into_iter().map(Message::tool_result));
    }

    /// 丢弃全部历史，只保留 system 指令
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
