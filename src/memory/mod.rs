//! 记忆层：单个会话的对话状态

pub mod conversation;

pub use conversation::{Conversation, Message, Role, ToolCallRequest, ToolResult, ToolStatus};
