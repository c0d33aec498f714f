//! 配置模块
//!
//! 环境变量解析与应用描述文件加载

pub mod env;
pub mod document;
pub mod loader;

pub use env::{RegistryAuth, RepositoryConfig, Settings};
pub use loader::{load_application, load_applications};
