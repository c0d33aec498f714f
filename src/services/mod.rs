//! 服务层模块
//!
//! Layer 生命周期、依赖解析、run-only 执行、应用级操作和定时任务

pub mod apps;
pub mod cron;
pub mod lifecycle;
pub mod options;
pub mod resolver;
pub mod runner;

pub use apps::{Action, ExecutionMode, Target};
pub use cron::CronScanner;
pub use lifecycle::{DownOptions, UpOptions};
pub use runner::RunOptions;
