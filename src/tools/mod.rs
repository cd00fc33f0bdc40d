//! 工具层：Tool trait、注册表、过滤与带超时的执行器

pub mod echo;
pub mod executor;
pub mod filter;
pub mod registry;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use filter::{AllTools, NamedTools, ToolFilter};
pub use registry::{Tool, ToolRegistry, ToolSpec};
