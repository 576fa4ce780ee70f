//! 工具执行器
//!
//! 持有 ToolRegistry、单次超时与并发信号量。execute 永不返回错误：未知工具、参数错误、远端失败、超时
//! 一律包装成 Failure ToolResult（payload 为错误描述），交由模型自行处理。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::config::ToolsSection;
use crate::core::ToolError;
use crate::memory::{ToolCallRequest, ToolResult};
use crate::tools::{ToolRegistry, ToolSpec};

/// 工具执行器：超时 + 批内限流 + 结果截断
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    permits: Arc<Semaphore>,
    max_result_chars: usize,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            permits: Arc::new(Semaphore::new(3)),
            max_result_chars: 12_000,
        }
    }

    pub fn from_config(registry: ToolRegistry, section: &ToolsSection) -> Self {
        Self::new(registry, section.tool_timeout_secs)
            .with_max_concurrency(section.max_concurrent_tools)
            .with_max_result_chars(section.max_result_chars)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(n.max(1)));
        self
    }

    pub fn with_max_result_chars(mut self, n: usize) -> Self {
        self.max_result_chars = n;
        self
    }

    /// 执行单个调用；失败与超时都转为 Failure 结果并输出 JSON 审计日志
    pub async fn execute(&self, call: &ToolCallRequest) -> ToolResult {
        let start = Instant::now();
        let args = Value::Object(call.arguments.clone());
        let preview = args_preview(&args);

        let result = match self.permits.acquire().await {
            Ok(_permit) => match timeout(self.timeout, self.registry.execute(&call.tool_name, args)).await {
                Ok(inner) => inner,
                Err(_) => Err(ToolError::Timeout(call.tool_name.clone())),
            },
            Err(_) => Err(ToolError::Failed("tool executor is shut down".to_string())),
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(_) => (true, "ok"),
            Err(ToolError::Timeout(_)) => (false, "timeout"),
            Err(ToolError::UnknownTool(_)) => (false, "unknown_tool"),
            Err(ToolError::InvalidArguments { .. }) => (false, "invalid_arguments"),
            Err(ToolError::Failed(_)) => (false, "error"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.tool_name,
            "request_id": call.request_id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(content) => ToolResult::success(call, truncate_chars(&content, self.max_result_chars)),
            Err(e) => ToolResult::failure(call, format!("Error: {}", e)),
        }
    }

    /// 并发执行一批调用（受信号量限制），结果与调用顺序一一对应
    pub async fn execute_batch(&self, calls: &[ToolCallRequest]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.execute(call))).await
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

/// 按字符截断，超出时附带原长度提示
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if max_chars == 0 || total <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}\n... [truncated, {} of {} chars shown]", head, max_chars, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolStatus;
    use crate::tools::{EchoTool, Tool};
    use async_trait::async_trait;
    use serde_json::Map;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    fn call(id: &str, tool: &str, args: Value) -> ToolCallRequest {
        let arguments = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ToolCallRequest::new(id, tool, arguments)
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SlowTool);
        ToolExecutor::new(registry, 30).with_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_failures_become_failure_results() {
        let executor = executor();
        let calls = vec![
            call("1", "echo", serde_json::json!({"text": "hi"})),
            call("2", "missing", serde_json::json!({})),
            call("3", "slow", serde_json::json!({})),
            call("4", "echo", serde_json::json!({"wrong": 1})),
        ];
        let results = executor.execute_batch(&calls).await;
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].status, ToolStatus::Success);
        assert_eq!(results[0].payload, "hi");
        assert_eq!(results[1].status, ToolStatus::Failure);
        assert!(results[1].payload.contains("Unknown tool"));
        assert_eq!(results[2].status, ToolStatus::Failure);
        assert!(results[2].payload.contains("timeout"));
        assert_eq!(results[3].status, ToolStatus::Failure);
        for (c, r) in calls.iter().zip(&results) {
            assert_eq!(c.request_id, r.request_id);
        }
    }

    #[tokio::test]
    async fn test_success_payload_is_truncated() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let executor = ToolExecutor::new(registry, 5).with_max_result_chars(5);
        let result = executor
            .execute(&call("1", "echo", serde_json::json!({"text": "абвгдеёжз"})))
            .await;
        assert!(result.payload.starts_with("абвгд\n"));
        assert!(result.payload.contains("5 of 9 chars"));
    }
}
