//! 工具层：Tool trait、注册表、执行器、远端元数据/查询工具集

pub mod data_query;
pub mod echo;
pub mod executor;
pub mod metadata_format;
pub mod registry;
pub mod schema;

use std::sync::Arc;

pub use data_query::{register_data_query_tools, DataQueryApi};
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry, ToolSpec};

use crate::config::ToolsSection;

/// 按配置组装默认工具集：远端六个工具
pub fn default_registry(section: &ToolsSection) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_data_query_tools(&mut registry, Arc::new(DataQueryApi::from_config(section)));
    registry
}
