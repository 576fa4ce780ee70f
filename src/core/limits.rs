//! 运行上限：启动时确定，之后只读

use std::time::Duration;

use crate::config::OrchestratorSection;

pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 5;
pub const DEFAULT_MAX_REMEDIATION_ATTEMPTS: usize = 1;
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 60;

/// 两个单调耗尽的计数上限 + 单次模型调用超时
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// 工具批次上限（每批 +1，不按单个工具计）
    pub max_tool_iterations: usize,
    /// 纠正重提示上限
    pub max_remediation_attempts: usize,
    pub model_timeout: Duration,
}

impl Limits {
    pub fn from_config(section: &OrchestratorSection, model_timeout_secs: u64) -> Self {
        Self {
            max_tool_iterations: section.max_tool_iterations,
            max_remediation_attempts: section.max_remediation_attempts,
            model_timeout: Duration::from_secs(model_timeout_secs.max(1)),
        }
    }

    pub fn with_max_tool_iterations(mut self, n: usize) -> Self {
        self.max_tool_iterations = n;
        self
    }

    pub fn with_max_remediation_attempts(mut self, n: usize) -> Self {
        self.max_remediation_attempts = n;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// 一次运行最多经历的状态转移数（终止性上界）
    pub fn transition_bound(&self) -> usize {
        // 每个工具批次：ExecutingTool + SendingToolResult；每次纠正：CheckingQuality + ForcingRemediation + AwaitingRemediatedModel；
        // 再加上 Start / AwaitingModel / 最后一次 CheckingQuality / Finished
        2 * self.max_tool_iterations + 3 * self.max_remediation_attempts + 4
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            max_remediation_attempts: DEFAULT_MAX_REMEDIATION_ATTEMPTS,
            model_timeout: Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
        }
    }
}
