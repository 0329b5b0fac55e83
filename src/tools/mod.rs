//! 工具：Tool trait、注册表、执行器（带超时与审计日志）

pub mod echo;
pub mod executor;
pub mod registry;

pub use echo::EchoTool;
pub use executor::{ToolExecutor, ToolOutput};
pub use registry::{Tool, ToolRegistry};
