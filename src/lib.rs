//! layerctl - 多容器应用的声明式 layer 编排
//!
//! 库入口

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
pub mod state;

pub use error::{Error, ErrorKind, Result};
pub use state::Context;
