//! 运行过程事件：可选地推送给调用方，用于展示阶段切换、工具调用、质量结论与终止

use serde::Serialize;

use super::quality::VerdictLabel;

/// 状态机阶段（不带数据，用于事件与日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Start,
    AwaitingModel,
    ExecutingTool,
    SendingToolResult,
    CheckingQuality,
    ForcingRemediation,
    AwaitingRemediatedModel,
    Finished,
    FinishedWithLimitNotice,
}

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 进入新阶段
    Phase { phase: TurnPhase },
    /// 发起工具调用
    ToolCall {
        request_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览）
    ToolResult {
        request_id: String,
        tool: String,
        ok: bool,
        preview: String,
    },
    /// 质量门结论
    Verdict { verdict: VerdictLabel },
    /// 注入纠正指令（第几次）
    Remediation { attempt: usize },
    /// 运行结束
    Finished { answer: String, limit_reached: bool },
}
