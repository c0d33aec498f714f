//! Container runtime adapter interface
//!
//! The orchestrator only talks to the container runtime through
//! [`ContainerRuntime`]; the production implementation shells out to the
//! docker CLI (see `docker_cli`), tests use an in-memory fake.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::env::RegistryAuth;
use crate::domain::log::LogLine;

/// Errors raised by a runtime call
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("no such container: {0}")]
    NoSuchContainer(String),

    #[error("unexpected runtime output: {0}")]
    Parse(String),
}

/// Handle on a created container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Runtime id when known, otherwise the name
    pub id: String,
    pub name: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Handle addressing a container by name only
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
        }
    }
}

/// Result of inspecting an existing container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub id: String,
    pub running: bool,
}

/// One port binding on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
    pub host_ip: Option<String>,
    /// "tcp" | "udp"
    pub protocol: &'static str,
}

/// One bind mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bind {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
    /// Directories are declared as runtime volumes; files are only bind-mounted
    pub is_volume: bool,
}

impl Bind {
    pub fn spec(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.host_path, self.container_path)
        } else {
            format!("{}:{}", self.host_path, self.container_path)
        }
    }
}

/// Everything the runtime needs to create a container for a layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub dns: Vec<String>,
    /// Restart policy name, e.g. "always"
    pub restart_policy: Option<String>,
    pub labels: Vec<(String, String)>,
    /// "{container}:{alias}"
    pub links: Vec<String>,
    /// "{port}/{proto}"
    pub exposed_ports: Vec<String>,
    pub port_bindings: Vec<PortBinding>,
    /// "NAME=VALUE"
    pub env: Vec<String>,
    pub binds: Vec<Bind>,
    pub volumes_from: Vec<String>,
    pub memory: Option<i64>,
    pub cpu_shares: i64,
    pub working_dir: Option<String>,
    pub tty: bool,
    pub open_stdin: bool,
}

impl ContainerSpec {
    /// Container paths declared as volumes
    pub fn volumes(&self) -> Vec<&str> {
        self.binds
            .iter()
            .filter(|b| b.is_volume)
            .map(|b| b.container_path.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    pub force: bool,
}

/// Log streaming options
#[derive(Debug, Clone)]
pub struct LogsOptions {
    pub timestamps: bool,
    /// Last N lines
    pub tail: usize,
    pub follow: bool,
}

impl Default for LogsOptions {
    fn default() -> Self {
        Self {
            timestamps: false,
            tail: default_log_lines(),
            follow: false,
        }
    }
}

fn default_log_lines() -> usize {
    100
}

/// One progress event of an image pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullProgress {
    pub status: String,
}

pub type PullStream = BoxStream<'static, Result<PullProgress, RuntimeError>>;

/// Container runtime contract consumed by the lifecycle services
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// `Ok(None)` when no container with that name exists
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, RuntimeError>;

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    async fn start(&self, container: &ContainerHandle) -> Result<(), RuntimeError>;

    async fn stop(&self, container: &ContainerHandle) -> Result<(), RuntimeError>;

    async fn remove(
        &self,
        container: &ContainerHandle,
        options: RemoveOptions,
    ) -> Result<(), RuntimeError>;

    /// Local image presence check
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Starts pulling `image`; the returned stream ends when the pull completes
    async fn pull(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<PullStream, RuntimeError>;

    /// Starts the container attached to the caller's terminal and resolves
    /// with its exit code once the process has finished
    async fn run_attached(
        &self,
        container: &ContainerHandle,
        interactive: bool,
    ) -> Result<i64, RuntimeError>;

    /// Streams container logs into `log_tx` until the stream ends
    async fn logs(
        &self,
        container: &ContainerHandle,
        options: &LogsOptions,
        log_tx: broadcast::Sender<LogLine>,
    ) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_spec() {
        let bind = Bind {
            host_path: "/srv/data".to_string(),
            container_path: "/data".to_string(),
            read_only: true,
            is_volume: true,
        };
        assert_eq!(bind.spec(), "/srv/data:/data:ro");
    }

    #[test]
    fn test_only_directories_are_volumes() {
        let spec = ContainerSpec {
            binds: vec![
                Bind {
                    host_path: "/srv/data".to_string(),
                    container_path: "/data".to_string(),
                    read_only: false,
                    is_volume: true,
                },
                Bind {
                    host_path: "/srv/app.conf".to_string(),
                    container_path: "/etc/app.conf".to_string(),
                    read_only: true,
                    is_volume: false,
                },
            ],
            ..Default::default()
        };
        assert_eq!(spec.volumes(), vec!["/data"]);
    }

    #[test]
    fn test_logs_options_default() {
        let options = LogsOptions::default();
        assert_eq!(options.tail, 100);
        assert!(!options.timestamps);
        assert!(!options.follow);
    }
}
