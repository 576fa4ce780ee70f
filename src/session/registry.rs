//! 会话注册表
//!
//! sessionId → SessionSlot。槽位表由 RwLock 保护（创建在写锁下完成，同一 id 的并发首请求只会得到一个槽位），
//! 每个槽位自带一把 tokio Mutex 包住对话历史：同一会话的运行严格串行，不同会话互不阻塞。
//! Mutex guard 跨 await 持有，future 被 drop（客户端断开、取消）时随之释放，会话不会被永久卡住。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::core::{OrchestrationError, SessionError};
use crate::memory::Conversation;
use crate::turn::{TurnEngine, TurnEvent, TurnOutcome};

/// 单个会话的并发与状态容器
pub struct SessionSlot {
    id: String,
    conversation: Arc<AsyncMutex<Conversation>>,
    last_access: Mutex<Instant>,
}

impl SessionSlot {
    fn new(id: &str, system_instruction: &str) -> Self {
        Self {
            id: id.to_string(),
            conversation: Arc::new(AsyncMutex::new(Conversation::new(system_instruction))),
            last_access: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn touch(&self) {
        if let Ok(mut t) = self.last_access.lock() {
            *t = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    /// 是否有运行正持有互斥锁
    pub fn is_busy(&self) -> bool {
        self.conversation.try_lock().is_err()
    }
}

/// 会话注册表：进程启动时创建，由回收任务定期清理，关闭时 clear
pub struct SessionRegistry {
    slots: RwLock<HashMap<String, Arc<SessionSlot>>>,
    engine: Arc<TurnEngine>,
    system_instruction: String,
}

impl SessionRegistry {
    pub fn new(engine: Arc<TurnEngine>, system_instruction: impl Into<String>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            engine,
            system_instruction: system_instruction.into(),
        }
    }

    pub fn engine(&self) -> &Arc<TurnEngine> {
        &self.engine
    }

    /// 取已有槽位或原子地创建一个（只含 system 指令），并刷新访问时间；不等待会话互斥锁
    pub async fn acquire(&self, session_id: &str) -> Result<Arc<SessionSlot>, SessionError> {
        if session_id.trim().is_empty() {
            return Err(SessionError::InvalidSessionId);
        }

        if let Some(slot) = self.slots.read().await.get(session_id) {
            slot.touch();
            return Ok(Arc::clone(slot));
        }

        let mut slots = self.slots.write().await;
        let slot = slots
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "creating session slot");
                Arc::new(SessionSlot::new(session_id, &self.system_instruction))
            });
        slot.touch();
        Ok(Arc::clone(slot))
    }

    pub async fn run(
        &self,
        session_id: &str,
        user_message: &str,
    ) -> Result<TurnOutcome, OrchestrationError> {
        self.run_with_cancel(session_id, user_message, &CancellationToken::new(), None)
            .await
    }

    /// 在会话互斥锁内执行一次完整运行；锁在所有退出路径（含错误与取消）上释放
    pub async fn run_with_cancel(
        &self,
        session_id: &str,
        user_message: &str,
        cancel: &CancellationToken,
        event_tx: Option<&tokio::sync::mpsc::UnboundedSender<TurnEvent>>,
    ) -> Result<TurnOutcome, OrchestrationError> {
        let span = tracing::info_span!("session", id = %session_id);
        async move {
            let (slot, mut conversation) = loop {
                let slot = self.acquire(session_id).await?;
                let guard = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
                    guard = Arc::clone(&slot.conversation).lock_owned() => guard,
                };
                // 等锁期间槽位可能已被 reset / sweep 移除；此时重新取槽位
                if self.is_registered(&slot).await {
                    break (slot, guard);
                }
                tracing::debug!("slot was removed while waiting, re-acquiring");
            };

            let result = self
                .engine
                .run_with_events(&mut conversation, user_message, cancel, event_tx)
                .await;
            slot.touch();
            if let Err(e) = &result {
                tracing::warn!(error = %e, "run failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn is_registered(&self, slot: &Arc<SessionSlot>) -> bool {
        self.slots
            .read()
            .await
            .get(slot.id())
            .map(|current| Arc::ptr_eq(current, slot))
            .unwrap_or(false)
    }

    /// 移除槽位并丢弃其历史。前置条件：该会话没有运行在进行中，违反时返回 RunInFlight（不会自动取消）。
    /// 未知 id 视为已重置。
    pub async fn reset(&self, session_id: &str) -> Result<(), SessionError> {
        if session_id.trim().is_empty() {
            return Err(SessionError::InvalidSessionId);
        }
        let mut slots = self.slots.write().await;
        match slots.get(session_id) {
            Some(slot) if slot.is_busy() => {
                Err(SessionError::RunInFlight(session_id.to_string()))
            }
            Some(_) => {
                slots.remove(session_id);
                tracing::info!(session_id, "session reset");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// 移除闲置超过 max_idle 的槽位（正在运行的会话不算闲置），返回移除数量
    pub async fn sweep(&self, max_idle: Duration) -> usize {
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| slot.is_busy() || slot.idle_for() <= max_idle);
        before - slots.len()
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.slots.read().await.contains_key(session_id)
    }

    /// 当前历史的快照（会等待进行中的运行结束）
    pub async fn snapshot(&self, session_id: &str) -> Option<Conversation> {
        let slot = self.slots.read().await.get(session_id).cloned()?;
        let conversation = slot.conversation.lock().await;
        Some(conversation.clone())
    }

    /// 关闭时丢弃全部会话
    pub async fn clear(&self) -> usize {
        let mut slots = self.slots.write().await;
        let n = slots.len();
        slots.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelReply, ScriptedGateway};
    use crate::tools::{ToolExecutor, ToolRegistry};

    fn registry() -> SessionRegistry {
        let gateway = Arc::new(ScriptedGateway::repeating(ModelReply::Assistant(
            "Resources is a catalog".to_string(),
        )));
        let executor = Arc::new(ToolExecutor::new(ToolRegistry::new(), 5));
        SessionRegistry::new(Arc::new(TurnEngine::new(gateway, executor)), "sys")
    }

    #[tokio::test]
    async fn test_acquire_creates_once() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.acquire("s1").await.unwrap() })
            })
            .collect();
        let mut slots = Vec::new();
        for h in handles {
            slots.push(h.await.unwrap());
        }
        assert_eq!(registry.len().await, 1);
        assert!(slots.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_blank_id_is_rejected() {
        let registry = registry();
        assert_eq!(
            registry.acquire("  ").await.err(),
            Some(SessionError::InvalidSessionId)
        );
        assert!(matches!(
            registry.run("", "hi").await,
            Err(OrchestrationError::Session(SessionError::InvalidSessionId))
        ));
        assert_eq!(registry.reset("").await, Err(SessionError::InvalidSessionId));
    }

    #[tokio::test]
    async fn test_run_appends_to_history_and_reset_discards() {
        let registry = registry();
        registry.run("s1", "what is Resources?").await.unwrap();
        registry.run("s1", "and again?").await.unwrap();
        let conversation = registry.snapshot("s1").await.unwrap();
        // sys + 2 × (user, assistant)
        assert_eq!(conversation.len(), 5);

        registry.reset("s1").await.unwrap();
        assert!(!registry.contains("s1").await);
        registry.reset("unknown").await.unwrap();

        registry.run("s1", "fresh").await.unwrap();
        assert_eq!(registry.snapshot("s1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reset_refuses_while_run_in_flight() {
        let registry = registry();
        let slot = registry.acquire("s1").await.unwrap();
        let guard = slot.conversation.lock().await;
        assert_eq!(
            registry.reset("s1").await,
            Err(SessionError::RunInFlight("s1".to_string()))
        );
        drop(guard);
        assert!(registry.reset("s1").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_idle_but_not_busy() {
        let registry = registry();
        registry.acquire("idle").await.unwrap();
        let busy = registry.acquire("busy").await.unwrap();
        let _guard = busy.conversation.lock().await;

        tokio::time::advance(Duration::from_secs(120)).await;
        registry.acquire("fresh").await.unwrap();

        let removed = registry.sweep(Duration::from_secs(60)).await;
        assert_eq!(removed, 1);
        assert!(!registry.contains("idle").await);
        assert!(registry.contains("busy").await);
        assert!(registry.contains("fresh").await);
    }
}
