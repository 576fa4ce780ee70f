//! 会话层：按 sessionId 隔离对话历史，保证同一会话同一时刻只有一个运行

pub mod registry;
pub mod sweeper;

pub use registry::{SessionRegistry, SessionSlot};
pub use sweeper::spawn_sweeper;
