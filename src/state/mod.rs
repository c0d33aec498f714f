//! 运行时状态模块
//!
//! 编排上下文与全局 shutdown 信号

pub mod context;

pub use context::{get_shutdown_token, trigger_shutdown, Context};
