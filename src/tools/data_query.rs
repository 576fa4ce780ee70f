//! 远端元数据 / 查询工具集
//!
//! 通过 HTTP 调用 ERP 侧的元数据与查询接口（base_url 下的 get-types-metadata、get-all-metadata、
//! get-class-metadata、get-reference、get-query-language-description、execute-query），
//! 把 JSON 响应整理成便于模型阅读的文本。传输错误、非 2xx、无法解析的 JSON 都是 ToolError。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::ToolsSection;
use crate::core::ToolError;
use crate::tools::metadata_format::{
    format_class_list, format_class_metadata, format_query_result, format_types, text_of_response,
};
use crate::tools::schema::parameters_schema_for;
use crate::tools::{Tool, ToolRegistry};

const GET_TIMEOUT: Duration = Duration::from_secs(15);
const POST_TIMEOUT: Duration = Duration::from_secs(20);

/// 只读查询中禁止出现的关键字（整词匹配）
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "EXEC", "EXECUTE", "GRANT", "REVOKE",
    "TRUNCATE", "MERGE", "BACKUP", "RESTORE",
];

/// 远端接口客户端，六个工具共享
#[derive(Debug, Clone)]
pub struct DataQueryApi {
    client: Client,
    base_url: String,
    max_query_chars: usize,
    sample_rows: usize,
}

impl DataQueryApi {
    pub fn new(base_url: &str) -> Self {
        Self::from_config(&ToolsSection {
            base_url: base_url.to_string(),
            ..ToolsSection::default()
        })
    }

    pub fn from_config(section: &ToolsSection) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(section.connect_timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: section.base_url.trim_end_matches('/').to_string(),
            max_query_chars: section.max_query_chars,
            sample_rows: section.sample_rows,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn get(&self, endpoint: &str) -> Result<Value, ToolError> {
        let request = self
            .client
            .get(self.url(endpoint))
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(GET_TIMEOUT);
        self.send(endpoint, request).await
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Value, ToolError> {
        tracing::debug!(endpoint, body = %body, "data query request");
        let request = self
            .client
            .post(self.url(endpoint))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .timeout(POST_TIMEOUT);
        self.send(endpoint, request).await
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, ToolError> {
        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Failed(format!("HTTP error calling {}: {}", endpoint, e)))?;
        let status = response.status();
        tracing::debug!(endpoint, status = %status, "data query response");
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::Failed(format!("HTTP error calling {}: {}", endpoint, e)))?;
        if !status.is_success() {
            let snippet: String = text.chars().take(300).collect();
            return Err(ToolError::Failed(format!(
                "{} returned {}: {}",
                endpoint, status, snippet
            )));
        }
        serde_json::from_str(&text)
            .map_err(|e| ToolError::Failed(format!("{} returned invalid JSON: {}", endpoint, e)))
    }

    /// 执行前校验查询：只读、包含 ВЫБРАТЬ 与 ИЗ、长度不超过上限
    pub fn validate_query(&self, query: &str) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let upper = query.to_uppercase();

        for keyword in FORBIDDEN_KEYWORDS {
            if has_word(&upper, keyword) {
                errors.push(format!("Forbidden operation: {}", keyword));
            }
        }
        if !has_word(&upper, "ВЫБРАТЬ") || !has_word(&upper, "ИЗ") {
            errors.push("Query must contain the keywords ВЫБРАТЬ and ИЗ".to_string());
        }
        let len = query.chars().count();
        if len > self.max_query_chars {
            errors.push(format!(
                "Query is too long ({} chars, at most {})",
                len, self.max_query_chars
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// 整词匹配（按非字母数字切分）
fn has_word(upper: &str, word: &str) -> bool {
    upper
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|token| token == word)
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MetadataTypeArgs {
    /// Metadata type as returned by get_types_metadata, e.g. Справочники or Документы
    metadata_type: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ClassArgs {
    /// Metadata type, e.g. Справочники, Документы, РегистрыСведений
    metadata_type: String,
    /// System name of the class, e.g. ОбъектыОбслуживания
    class_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct QueryArgs {
    /// Read-only query text in the system query language (ВЫБРАТЬ ... ИЗ ...)
    query: String,
}

/// 列出全部元数据类型
pub struct GetTypesMetadataTool(pub Arc<DataQueryApi>);

#[async_trait]
impl Tool for GetTypesMetadataTool {
    fn name(&self) -> &str {
        "get_types_metadata"
    }

    fn description(&self) -> &str {
        "List every metadata type of the accounting system (catalogs, documents, registers...). \
         Call this first, then get_metadata_by_type for each candidate type."
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        let body = self.0.get("get-types-metadata").await?;
        Ok(format_types(&body))
    }
}

/// 列出某一类型下的全部类
pub struct GetMetadataByTypeTool(pub Arc<DataQueryApi>);

#[async_trait]
impl Tool for GetMetadataByTypeTool {
    fn name(&self) -> &str {
        "get_metadata_by_type"
    }

    fn description(&self) -> &str {
        "List the classes of one metadata type with id, system name and title. \
         To answer \"what is X\" questions, find X in the result and answer directly."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<MetadataTypeArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: MetadataTypeArgs = parse_args(self.name(), args)?;
        let body = self
            .0
            .post(
                "get-all-metadata",
                json!({"request": {"type": args.metadata_type}}),
            )
            .await?;
        Ok(format_class_list(&body))
    }
}

/// 某个类的字段结构
pub struct GetClassMetadataTool(pub Arc<DataQueryApi>);

#[async_trait]
impl Tool for GetClassMetadataTool {
    fn name(&self) -> &str {
        "get_class_metadata"
    }

    fn description(&self) -> &str {
        "Describe the structure of one metadata class: fields, data types, tabular sections \
         or register dimensions and resources. Use before writing a query."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<ClassArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: ClassArgs = parse_args(self.name(), args)?;
        let body = self
            .0
            .post(
                "get-class-metadata",
                json!({"request": {"type": args.metadata_type, "class": args.class_name}}),
            )
            .await?;
        Ok(format_class_metadata(&body))
    }
}

/// 某个类的参考说明
pub struct GetReferenceTool(pub Arc<DataQueryApi>);

#[async_trait]
impl Tool for GetReferenceTool {
    fn name(&self) -> &str {
        "get_reference"
    }

    fn description(&self) -> &str {
        "Get the reference description of one metadata class: its business role, \
         its fields and related entities."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<ClassArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: ClassArgs = parse_args(self.name(), args)?;
        let body = self
            .0
            .post(
                "get-reference",
                json!({"request": {"type": args.metadata_type, "class": args.class_name}}),
            )
            .await?;
        Ok(text_of_response(&body))
    }
}

/// 查询语言说明
pub struct GetQueryLanguageDescriptionTool(pub Arc<DataQueryApi>);

#[async_trait]
impl Tool for GetQueryLanguageDescriptionTool {
    fn name(&self) -> &str {
        "get_query_language_description"
    }

    fn description(&self) -> &str {
        "Get the reference of the system query language (keywords, functions, joins, examples)."
    }

    async fn execute(&self, _args: Value) -> Result<String, ToolError> {
        let body = self.0.get("get-query-language-description").await?;
        Ok(text_of_response(&body))
    }
}

/// 校验后执行只读查询
pub struct ExecuteQueryTool(pub Arc<DataQueryApi>);

#[async_trait]
impl Tool for ExecuteQueryTool {
    fn name(&self) -> &str {
        "execute_query"
    }

    fn description(&self) -> &str {
        "Run a read-only query (ВЫБРАТЬ ... ИЗ ...) and return a summary: record count, \
         field names and sample rows. Check the class structure with get_class_metadata first."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<QueryArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: QueryArgs = parse_args(self.name(), args)?;
        if let Err(errors) = self.0.validate_query(&args.query) {
            return Err(ToolError::InvalidArguments {
                tool: self.name().to_string(),
                reason: errors.join("; "),
            });
        }
        let body = self
            .0
            .post(
                "execute-query",
                json!({"request": {"text_query": args.query}}),
            )
            .await?;
        format_query_result(&body, &args.query, self.0.sample_rows)
    }
}

/// 向注册表注册全部六个远端工具
pub fn register_data_query_tools(registry: &mut ToolRegistry, api: Arc<DataQueryApi>) {
    registry.register(GetTypesMetadataTool(Arc::clone(&api)));
    registry.register(GetMetadataByTypeTool(Arc::clone(&api)));
    registry.register(GetClassMetadataTool(Arc::clone(&api)));
    registry.register(GetReferenceTool(Arc::clone(&api)));
    registry.register(GetQueryLanguageDescriptionTool(Arc::clone(&api)));
    registry.register(ExecuteQueryTool(api));
}
