//! 基础设施模块
//!
//! 封装外部依赖（命令执行、容器运行时）

pub mod command;
pub mod docker_cli;
pub mod runtime;

#[cfg(test)]
pub mod testing;

pub use command::CommandRunner;
pub use docker_cli::DockerCli;
pub use runtime::{ContainerRuntime, RuntimeError};
