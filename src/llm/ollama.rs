//! Ollama 客户端（/api/chat，非流式，原生 tool calling）
//!
//! 将 Message 历史与工具声明转为 Ollama 请求体；回复中带 tool_calls 则映射为 ModelReply::ToolCalls，
//! 否则取 message.content（剥离 <think> 推理块）作为 ModelReply::Assistant。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::LlmSection;
use crate::core::GatewayError;
use crate::llm::{ModelGateway, ModelReply};
use crate::memory::{Message, Role, ToolCallRequest};
use crate::tools::ToolSpec;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_ctx: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Ollama 网关：持有 HTTP 客户端、端点与模型参数
pub struct OllamaGateway {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    context_length: u32,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OllamaGateway {
    pub fn new(base_url: &str, model: &str) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: model.to_string(),
            temperature: 0.15,
            context_length: 40_960,
            usage: TokenUsage::new(),
        }
    }

    pub fn from_config(section: &LlmSection) -> Self {
        let mut gateway = Self::new(&section.base_url, &section.model);
        gateway.temperature = section.temperature;
        gateway.context_length = section.context_length;
        gateway
    }

    fn build_request<'a>(&'a self, messages: &[Message], tools: &[ToolSpec]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: messages.iter().map(to_ollama_message).collect(),
            tools: tools.iter().map(to_ollama_tool).collect(),
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_ctx: self.context_length,
            },
        }
    }
}

fn to_ollama_message(m: &Message) -> Value {
    match m.role {
        Role::System => json!({"role": "system", "content": m.content}),
        Role::User => json!({"role": "user", "content": m.content}),
        Role::Assistant if !m.tool_calls.is_empty() => {
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.request_id,
                        "function": {"name": c.tool_name, "arguments": c.arguments}
                    })
                })
                .collect();
            json!({"role": "assistant", "content": m.content, "tool_calls": calls})
        }
        Role::Assistant => json!({"role": "assistant", "content": m.content}),
        Role::Tool => json!({
            "role": "tool",
            "content": m.content,
            "tool_name": m.tool_name,
            "tool_call_id": m.request_id,
        }),
    }
}

fn to_ollama_tool(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}

fn think_block() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").ok())
        .as_ref()
}

/// 去掉推理模型输出的 <think>…</think> 段
pub fn strip_think_blocks(content: &str) -> String {
    match think_block() {
        Some(re) => re.replace_all(content, "").trim().to_string(),
        None => content.trim().to_string(),
    }
}

/// 将 Ollama 回复映射为 ModelReply；缺少 id 的调用补 uuid
fn into_reply(message: ResponseMessage) -> Result<ModelReply, GatewayError> {
    if !message.tool_calls.is_empty() {
        let calls = message
            .tool_calls
            .into_iter()
            .map(|tc| {
                let arguments = match tc.function.arguments {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    // 部分模型把参数编码成 JSON 字符串
                    Value::String(s) => serde_json::from_str::<Map<String, Value>>(&s)
                        .map_err(|e| {
                            GatewayError::MalformedResponse(format!(
                                "tool {} arguments are not a JSON object: {}",
                                tc.function.name, e
                            ))
                        })?,
                    other => {
                        return Err(GatewayError::MalformedResponse(format!(
                            "tool {} arguments are not a JSON object: {}",
                            tc.function.name, other
                        )))
                    }
                };
                let id = tc
                    .id
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                Ok(ToolCallRequest::new(id, tc.function.name, arguments))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(ModelReply::ToolCalls(calls));
    }

    let content = strip_think_blocks(&message.content);
    if content.is_empty() {
        return Err(GatewayError::MalformedResponse(
            "empty assistant message".to_string(),
        ));
    }
    Ok(ModelReply::Assistant(content))
}

#[async_trait]
impl ModelGateway for OllamaGateway {
    fn name(&self) -> &str {
        "ollama"
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, GatewayError> {
        let request = self.build_request(messages, tools);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        self.usage.add(
            body.prompt_eval_count.unwrap_or(0),
            body.eval_count.unwrap_or(0),
        );

        let message = body
            .message
            .ok_or_else(|| GatewayError::MalformedResponse("missing message".to_string()))?;
        into_reply(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_think_blocks() {
        let raw = "<think>\nlet me look\n</think>\n\nResources is a catalog";
        assert_eq!(strip_think_blocks(raw), "Resources is a catalog");
    }

    #[test]
    fn test_tool_call_without_id_gets_uuid() {
        let message: ResponseMessage = serde_json::from_value(json!({
            "content": "",
            "tool_calls": [
                {"function": {"name": "get_metadata_by_type", "arguments": {"metadata_type": "Catalogs"}}},
                {"function": {"name": "get_types_metadata", "arguments": "{}"}}
            ]
        }))
        .unwrap();
        match into_reply(message).unwrap() {
            ModelReply::ToolCalls(calls) => {
                assert_eq!(calls.len(), 2);
                assert_ne!(calls[0].request_id, calls[1].request_id);
                assert_eq!(calls[0].arguments["metadata_type"], "Catalogs");
                assert!(calls[1].arguments.is_empty());
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_content_is_malformed() {
        let message: ResponseMessage =
            serde_json::from_value(json!({"content": "<think>hmm</think>"})).unwrap();
        assert!(matches!(
            into_reply(message),
            Err(GatewayError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_request_maps_roles() {
        let gateway = OllamaGateway::new("http://localhost:11434/", "qwen3:8b");
        assert_eq!(gateway.endpoint, "http://localhost:11434/api/chat");

        let call = ToolCallRequest::new("c1", "echo", Map::new());
        let messages = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant_tool_calls(vec![call.clone()]),
            Message::tool_result(crate::memory::ToolResult::success(&call, "hi")),
        ];
        let spec = ToolSpec {
            name: "echo".to_string(),
            description: "Echo text".to_string(),
            parameters: json!({"type": "object"}),
        };
        let req = serde_json::to_value(gateway.build_request(&messages, &[spec])).unwrap();
        assert_eq!(req["stream"], false);
        assert_eq!(req["messages"][2]["tool_calls"][0]["function"]["name"], "echo");
        assert_eq!(req["messages"][3]["role"], "tool");
        assert_eq!(req["messages"][3]["tool_name"], "echo");
        assert_eq!(req["tools"][0]["function"]["name"], "echo");
    }
}
