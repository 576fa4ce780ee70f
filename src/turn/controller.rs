//! Turn Controller：一次用户消息 → 一个最终答案的状态机
//!
//! 显式的 `match` 循环驱动 Model Gateway / Tool Executor / Quality Gate。两个单调耗尽的计数器
//! （工具批次、纠正次数）存放在本次运行自己的 RunState 中，每个可能复现的状态在计数器饱和后都有无条件出口，
//! 因此任何输入都会在 `Limits::transition_bound()` 步内终止。
//!
//! 状态转移（按顺序匹配，先匹配者胜）：
//! - Start → AwaitingModel：追加用户消息，提交给网关
//! - AwaitingModel → ExecutingTool：回复为工具调用且批次未用尽（用尽则 FinishedWithLimitNotice）
//! - AwaitingModel → CheckingQuality：回复为纯文本
//! - ExecutingTool → SendingToolResult：整批结果写入历史，批次 +1
//! - SendingToolResult → FinishedWithLimitNotice：批次已用尽，不再调用网关
//! - SendingToolResult → ExecutingTool / CheckingQuality：重新提交后按回复类型分派
//! - CheckingQuality → Finished：Good / Uncertain，或 Bad 但纠正次数已用尽
//! - CheckingQuality → ForcingRemediation：Bad 且仍可纠正
//! - ForcingRemediation → AwaitingRemediatedModel：追加纠正指令，纠正次数 +1
//! - AwaitingRemediatedModel → Finished：最后一次纠正的回答无条件接受（仍有余量时回到 CheckingQuality）
//! - AwaitingRemediatedModel → ExecutingTool：模型改为调用工具，受同一批次上限约束
//!
//! 网关错误与取消会终止本次运行；工具失败只会变成 Failure 结果写回历史。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{GatewayError, Limits, OrchestrationError};
use crate::llm::{ModelGateway, ModelReply};
use crate::memory::{Conversation, ToolCallRequest};
use crate::tools::{ToolExecutor, ToolSpec};
use crate::turn::{QualityGate, QualityVerdict, TurnEvent, TurnPhase};

/// 事件中工具结果预览的最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 运行如何结束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// 正常给出答案（含纠正次数用尽后原样返回的 Bad 答案）
    Answered,
    /// 工具批次用尽，返回固定提示
    LimitNotice,
}

/// 单次运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub model_calls: usize,
    pub tool_batches: usize,
    pub tool_calls: usize,
    pub remediations: usize,
    /// 经历的状态数（含 Start 与终止状态）
    pub transitions: usize,
}

/// 单次运行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub answer: String,
    pub termination: Termination,
    pub stats: RunStats,
}

/// 状态机状态；携带进入该状态所需的数据
#[derive(Debug)]
enum TurnState {
    Start,
    AwaitingModel,
    ExecutingTool(Vec<ToolCallRequest>),
    SendingToolResult,
    CheckingQuality(String),
    ForcingRemediation,
    AwaitingRemediatedModel,
    Finished(String),
    FinishedWithLimitNotice,
}

impl TurnState {
    fn phase(&self) -> TurnPhase {
        match self {
            TurnState::Start => TurnPhase::Start,
            TurnState::AwaitingModel => TurnPhase::AwaitingModel,
            TurnState::ExecutingTool(_) => TurnPhase::ExecutingTool,
            TurnState::SendingToolResult => TurnPhase::SendingToolResult,
            TurnState::CheckingQuality(_) => TurnPhase::CheckingQuality,
            TurnState::ForcingRemediation => TurnPhase::ForcingRemediation,
            TurnState::AwaitingRemediatedModel => TurnPhase::AwaitingRemediatedModel,
            TurnState::Finished(_) => TurnPhase::Finished,
            TurnState::FinishedWithLimitNotice => TurnPhase::FinishedWithLimitNotice,
        }
    }
}

/// 本次运行独占的计数器
#[derive(Debug, Default)]
struct RunState {
    tool_iterations: usize,
    remediation_attempts: usize,
    stats: RunStats,
}

/// 编排引擎：无会话状态，可被所有会话共享
pub struct TurnEngine {
    gateway: Arc<dyn ModelGateway>,
    executor: Arc<ToolExecutor>,
    quality: QualityGate,
    limits: Limits,
    remediation_prompt: String,
    limit_notice: String,
}

impl TurnEngine {
    pub fn new(gateway: Arc<dyn ModelGateway>, executor: Arc<ToolExecutor>) -> Self {
        let defaults = AppConfig::default();
        Self {
            gateway,
            executor,
            quality: QualityGate::default(),
            limits: Limits::default(),
            remediation_prompt: defaults.orchestrator.remediation_prompt,
            limit_notice: defaults.orchestrator.limit_notice,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        gateway: Arc<dyn ModelGateway>,
        executor: Arc<ToolExecutor>,
    ) -> Self {
        Self::new(gateway, executor)
            .with_quality_gate(QualityGate::from_config(&config.quality))
            .with_limits(Limits::from_config(
                &config.orchestrator,
                config.llm.request_timeout_secs,
            ))
            .with_remediation_prompt(config.orchestrator.remediation_prompt.clone())
            .with_limit_notice(config.orchestrator.limit_notice.clone())
    }

    pub fn with_quality_gate(mut self, quality: QualityGate) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_remediation_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.remediation_prompt = prompt.into();
        self
    }

    pub fn with_limit_notice(mut self, notice: impl Into<String>) -> Self {
        self.limit_notice = notice.into();
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn limit_notice(&self) -> &str {
        &self.limit_notice
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    pub async fn run(
        &self,
        conversation: &mut Conversation,
        user_message: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, OrchestrationError> {
        self.run_with_events(conversation, user_message, cancel, None)
            .await
    }

    /// 执行一次完整运行；可选 event_tx 接收阶段切换、工具调用与终止事件
    pub async fn run_with_events(
        &self,
        conversation: &mut Conversation,
        user_message: &str,
        cancel: &CancellationToken,
        event_tx: Option<&UnboundedSender<TurnEvent>>,
    ) -> Result<TurnOutcome, OrchestrationError> {
        let specs = self.executor.specs();
        let mut run = RunState::default();
        let mut state = TurnState::Start;

        loop {
            run.stats.transitions += 1;
            let phase = state.phase();
            tracing::debug!(
                ?phase,
                tool_iterations = run.tool_iterations,
                remediation_attempts = run.remediation_attempts,
                "turn transition"
            );
            emit(event_tx, TurnEvent::Phase { phase });

            state = match state {
                TurnState::Start => {
                    conversation.push_user(user_message);
                    TurnState::AwaitingModel
                }

                TurnState::AwaitingModel => {
                    let reply = self.call_model(conversation, &specs, cancel, &mut run).await?;
                    self.dispatch_reply(conversation, reply, &run)
                }

                TurnState::ExecutingTool(calls) => {
                    for call in &calls {
                        emit(
                            event_tx,
                            TurnEvent::ToolCall {
                                request_id: call.request_id.clone(),
                                tool: call.tool_name.clone(),
                                args: serde_json::Value::Object(call.arguments.clone()),
                            },
                        );
                    }
                    let results = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
                        results = self.executor.execute_batch(&calls) => results,
                    };
                    for result in &results {
                        if !result.is_success() {
                            tracing::warn!(
                                tool = %result.tool_name,
                                request_id = %result.request_id,
                                "tool call failed, reporting failure to the model"
                            );
                        }
                        emit(
                            event_tx,
                            TurnEvent::ToolResult {
                                request_id: result.request_id.clone(),
                                tool: result.tool_name.clone(),
                                ok: result.is_success(),
                                preview: result.payload.chars().take(RESULT_PREVIEW_CHARS).collect(),
                            },
                        );
                    }
                    run.tool_iterations += 1;
                    run.stats.tool_batches += 1;
                    run.stats.tool_calls += calls.len();
                    conversation.record_tool_batch(calls, results);
                    TurnState::SendingToolResult
                }

                TurnState::SendingToolResult => {
                    if run.tool_iterations >= self.limits.max_tool_iterations {
                        TurnState::FinishedWithLimitNotice
                    } else {
                        let reply = self.call_model(conversation, &specs, cancel, &mut run).await?;
                        self.dispatch_reply(conversation, reply, &run)
                    }
                }

                TurnState::CheckingQuality(text) => {
                    let verdict = self.quality.classify(&text);
                    tracing::debug!(verdict = ?verdict.label(), "quality verdict");
                    emit(event_tx, TurnEvent::Verdict { verdict: verdict.label() });
                    match verdict {
                        QualityVerdict::Bad(text)
                            if run.remediation_attempts >= self.limits.max_remediation_attempts =>
                        {
                            tracing::info!("remediation budget exhausted, returning answer as is");
                            TurnState::Finished(text)
                        }
                        QualityVerdict::Bad(_) => TurnState::ForcingRemediation,
                        acceptable => TurnState::Finished(acceptable.into_text()),
                    }
                }

                TurnState::ForcingRemediation => {
                    conversation.push_remediation(self.remediation_prompt.as_str());
                    run.remediation_attempts += 1;
                    run.stats.remediations += 1;
                    emit(
                        event_tx,
                        TurnEvent::Remediation {
                            attempt: run.remediation_attempts,
                        },
                    );
                    TurnState::AwaitingRemediatedModel
                }

                TurnState::AwaitingRemediatedModel => {
                    let reply = self.call_model(conversation, &specs, cancel, &mut run).await?;
                    match reply {
                        ModelReply::Assistant(text) => {
                            conversation.push_assistant(text.as_str());
                            if run.remediation_attempts < self.limits.max_remediation_attempts {
                                TurnState::CheckingQuality(text)
                            } else {
                                TurnState::Finished(text)
                            }
                        }
                        tool_calls => self.dispatch_reply(conversation, tool_calls, &run),
                    }
                }

                TurnState::Finished(answer) => {
                    tracing::info!(
                        model_calls = run.stats.model_calls,
                        tool_batches = run.stats.tool_batches,
                        remediations = run.stats.remediations,
                        "turn finished"
                    );
                    emit(
                        event_tx,
                        TurnEvent::Finished {
                            answer: answer.clone(),
                            limit_reached: false,
                        },
                    );
                    return Ok(TurnOutcome {
                        answer,
                        termination: Termination::Answered,
                        stats: run.stats,
                    });
                }

                TurnState::FinishedWithLimitNotice => {
                    tracing::info!(
                        model_calls = run.stats.model_calls,
                        tool_batches = run.stats.tool_batches,
                        max_tool_iterations = self.limits.max_tool_iterations,
                        "tool iteration budget exhausted"
                    );
                    conversation.push_assistant(self.limit_notice.as_str());
                    emit(
                        event_tx,
                        TurnEvent::Finished {
                            answer: self.limit_notice.clone(),
                            limit_reached: true,
                        },
                    );
                    return Ok(TurnOutcome {
                        answer: self.limit_notice.clone(),
                        termination: Termination::LimitNotice,
                        stats: run.stats,
                    });
                }
            };
        }
    }

    /// AwaitingModel / SendingToolResult / AwaitingRemediatedModel 共用的回复分派：
    /// 文本 → 写入历史并进入质量检查；工具调用 → 批次未用尽则执行，否则终止
    fn dispatch_reply(
        &self,
        conversation: &mut Conversation,
        reply: ModelReply,
        run: &RunState,
    ) -> TurnState {
        match reply {
            ModelReply::Assistant(text) => {
                conversation.push_assistant(text.as_str());
                TurnState::CheckingQuality(text)
            }
            ModelReply::ToolCalls(calls) => {
                if run.tool_iterations < self.limits.max_tool_iterations {
                    TurnState::ExecutingTool(calls)
                } else {
                    TurnState::FinishedWithLimitNotice
                }
            }
        }
    }

    /// 调用网关：超时与取消都在此处施加
    async fn call_model(
        &self,
        conversation: &Conversation,
        specs: &[ToolSpec],
        cancel: &CancellationToken,
        run: &mut RunState,
    ) -> Result<ModelReply, OrchestrationError> {
        run.stats.model_calls += 1;
        let call = tokio::time::timeout(
            self.limits.model_timeout,
            self.gateway.complete(conversation.messages(), specs),
        );
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            outcome = call => outcome,
        };

        let err = match outcome {
            Ok(Ok(ModelReply::ToolCalls(calls))) if calls.is_empty() => {
                GatewayError::MalformedResponse("tool call list is empty".to_string())
            }
            Ok(Ok(reply)) => return Ok(reply),
            Ok(Err(e)) => e,
            Err(_) => GatewayError::Timeout(self.limits.model_timeout),
        };
        tracing::warn!(gateway = %self.gateway.name(), error = %err, "model call failed, aborting run");
        Err(err.into())
    }
}

fn emit(event_tx: Option<&UnboundedSender<TurnEvent>>, event: TurnEvent) {
    if let Some(tx) = event_tx {
        let _ = tx.send(event);
    }
}
