//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio

pub mod application;
pub mod cron;
pub mod layer;
pub mod log;
pub mod vars;

// Re-exports for convenience
pub use application::{Application, Directory};
pub use cron::Cron;
pub use layer::{Layer, LayerKind, Link, NameValue, Port, RunAfter, Volume, VolumeFrom};
pub use log::LogLine;
