//! 核心层：错误分层、运行上限、优雅关闭

pub mod error;
pub mod limits;
pub mod shutdown;

pub use error::{GatewayError, OrchestrationError, SessionError, ToolError};
pub use limits::Limits;
pub use shutdown::{ShutdownManager, ShutdownReason};
