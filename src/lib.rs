//! metachat：面向 ERP 元数据/查询后端的对话服务
//!
//! 模块划分：
//! - **agent**: 无头对话服务（组件装配、输入校验、错误映射）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分层、运行上限、优雅关闭
//! - **llm**: 模型网关抽象与实现（Ollama / Mock）
//! - **memory**: 对话历史与消息类型
//! - **session**: 会话注册表与闲置回收
//! - **tools**: 工具注册表、执行器、远端元数据/查询工具
//! - **turn**: Turn Controller 状态机与质量门
//! - **server**: axum HTTP 入口（feature `server`）

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
#[cfg(feature = "server")]
pub mod server;
pub mod session;
pub mod tools;
pub mod turn;

pub use agent::{create_agent_components, ChatResponse, ChatService};
pub use session::SessionRegistry;
pub use turn::{TurnEngine, TurnOutcome};
