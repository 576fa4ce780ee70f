//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `METACHAT__*` 覆盖（双下划线表示嵌套，如 `METACHAT__LLM__MODEL=qwen3:8b`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::limits::{
    DEFAULT_MAX_REMEDIATION_ATTEMPTS, DEFAULT_MAX_TOOL_ITERATIONS, DEFAULT_MODEL_TIMEOUT_SECS,
};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub orchestrator: OrchestratorSection,
    pub quality: QualitySection,
}

/// [server] 段：监听地址、会话闲置回收
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// 会话闲置超过该秒数即被回收
    pub session_ttl_secs: u64,
    /// 回收任务的执行间隔
    pub sweep_interval_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8089,
            session_ttl_secs: 1800,
            sweep_interval_secs: 60,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：ollama / mock
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub context_length: u32,
    /// 单次模型调用超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "qwen3:8b".to_string(),
            temperature: 0.15,
            context_length: 40_960,
            request_timeout_secs: DEFAULT_MODEL_TIMEOUT_SECS,
        }
    }
}

/// [tools] 段：远端元数据/查询接口、工具超时与并发、结果大小
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 远端接口根地址，如 http://host:port/base/hs/agent_smart_api_v1
    pub base_url: String,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// 同一批次内并发执行的工具数上限
    pub max_concurrent_tools: usize,
    pub max_query_chars: usize,
    /// 返回给模型的工具结果最大字符数，超出截断
    pub max_result_chars: usize,
    /// execute_query 结果中附带的样例行数
    pub sample_rows: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/hs/agent_smart_api_v1".to_string(),
            tool_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_concurrent_tools: 3,
            max_query_chars: 5000,
            max_result_chars: 12_000,
            sample_rows: 3,
        }
    }
}

/// [orchestrator] 段：计数上限与固定文案
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_tool_iterations: usize,
    pub max_remediation_attempts: usize,
    /// 内联 system 指令；为空时读取 system_prompt_path，再退回内置默认
    pub system_prompt: Option<String>,
    pub system_prompt_path: Option<PathBuf>,
    pub remediation_prompt: String,
    pub limit_notice: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            max_remediation_attempts: DEFAULT_MAX_REMEDIATION_ATTEMPTS,
            system_prompt: None,
            system_prompt_path: None,
            remediation_prompt: DEFAULT_REMEDIATION_PROMPT.to_string(),
            limit_notice: DEFAULT_LIMIT_NOTICE.to_string(),
        }
    }
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant for an accounting and maintenance system. \
Use the available tools to look up metadata and data before answering. \
Answer the user's question directly and concisely from the data you retrieved.";

pub const DEFAULT_REMEDIATION_PROMPT: &str = "STOP. Your previous answer is not acceptable. \
You have already received the data from the system. \
Find the object the user asked about in that data and answer directly in one short sentence, \
for example \"X is a catalog\" or \"X belongs to category Y\". \
Do not explain how to search and do not give recommendations.";

pub const DEFAULT_LIMIT_NOTICE: &str =
    "The maximum number of steps was exceeded. The request is too complex.";

/// [quality] 段：质量门的否定短语、正向模式与短答阈值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualitySection {
    /// 大小写不敏感的子串匹配
    pub deny_phrases: Vec<String>,
    /// 大小写不敏感的正则
    pub direct_answer_patterns: Vec<String>,
    pub short_answer_chars: usize,
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            deny_phrases: default_deny_phrases(),
            direct_answer_patterns: default_direct_answer_patterns(),
            short_answer_chars: 300,
        }
    }
}

fn default_deny_phrases() -> Vec<String> {
    [
        "используйте следующие рекомендации",
        "как искать:",
        "можете найти",
        "попробуйте использовать",
        "вы можете найти",
        "чтобы найти нужный",
        "для поиска используйте",
        "рекомендации",
        "use the following recommendations",
        "how to search:",
        "you can find",
        "you could search",
        "try using",
        "in order to find the",
        "to search, use",
        "here are some recommendations",
        "recommendations",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_direct_answer_patterns() -> Vec<String> {
    [
        "(это справочник|это документ|относится к|является|системное имя)",
        r"\bis an? (catalog|document|register)\b",
        r"\bis an?\b",
        r"\bbelongs to\b",
        r"\brefers to\b",
        r"\bsystem name\b",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl AppConfig {
    /// 解析 system 指令：内联 > 文件 > 内置默认
    pub fn system_prompt(&self) -> String {
        if let Some(inline) = self
            .orchestrator
            .system_prompt
            .as_ref()
            .filter(|s| !s.trim().is_empty())
        {
            return inline.clone();
        }
        self.orchestrator
            .system_prompt_path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }
}

/// 从 config 目录加载配置，环境变量 METACHAT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 METACHAT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("METACHAT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_limits() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.orchestrator.max_tool_iterations, 5);
        assert_eq!(cfg.orchestrator.max_remediation_attempts, 1);
        assert_eq!(cfg.quality.short_answer_chars, 300);
        assert_eq!(cfg.server.port, 8089);
        assert!(!cfg.quality.deny_phrases.is_empty());
    }

    #[test]
    fn test_shipped_quality_lists_match_builtin_defaults() {
        let shipped = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from(shipped))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let builtin = QualitySection::default();
        assert_eq!(cfg.quality.deny_phrases, builtin.deny_phrases);
        assert_eq!(cfg.quality.direct_answer_patterns, builtin.direct_answer_patterns);
        assert_eq!(cfg.quality.short_answer_chars, builtin.short_answer_chars);
    }

    #[test]
    fn test_load_config_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[orchestrator]
max_tool_iterations = 3
limit_notice = "too many steps"

[quality]
deny_phrases = ["можете найти"]
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.orchestrator.max_tool_iterations, 3);
        assert_eq!(cfg.orchestrator.limit_notice, "too many steps");
        // 未出现的键保留默认值
        assert_eq!(cfg.orchestrator.max_remediation_attempts, 1);
        assert_eq!(cfg.quality.deny_phrases, vec!["можете найти".to_string()]);
        assert_eq!(cfg.quality.short_answer_chars, 300);
    }

    #[test]
    fn test_system_prompt_prefers_inline() {
        let mut cfg = AppConfig::default();
        assert_eq!(cfg.system_prompt(), DEFAULT_SYSTEM_PROMPT);
        cfg.orchestrator.system_prompt = Some("inline prompt".to_string());
        assert_eq!(cfg.system_prompt(), "inline prompt");
    }
}
