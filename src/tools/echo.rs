//! Echo 工具（mock 后端与测试用）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::schema::parameters_schema_for;
use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoArgs {
    /// Text to echo back
    text: String,
}

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back unchanged (diagnostics)."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<EchoArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: EchoArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
                tool: "echo".to_string(),
                reason: e.to_string(),
            })?;
        Ok(args.text)
    }
}
