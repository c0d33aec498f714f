//! Docker CLI runtime adapter
//!
//! Implements [`ContainerRuntime`] by shelling out to the `docker` binary.
//! Every invocation is prefixed with `-H <host>` when a runtime host is
//! configured.

use async_trait::async_trait;
use futures::StreamExt;
use std::process::{Output, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::env::{RegistryAuth, Settings};
use crate::domain::log::LogLine;

use super::command::{CommandError, CommandRunner};
use super::runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, LogsOptions, PullProgress,
    PullStream, RemoveOptions, RuntimeError,
};

/// `docker inspect` output format: `<id>|<running>`
const INSPECT_FORMAT: &str = "{{.Id}}|{{.State.Running}}";

/// Docker CLI adapter
#[derive(Clone, Debug)]
pub struct DockerCli {
    program: String,
    host: Option<String>,
    shutdown: CancellationToken,
}

impl DockerCli {
    pub fn new(settings: &Settings) -> Self {
        Self {
            program: settings.docker_bin.clone(),
            host: settings.docker_host.clone(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stops followed log streams when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Full argument list including the host prefix
    fn args(&self, args: Vec<String>) -> Vec<String> {
        match &self.host {
            Some(host) => {
                let mut full = vec!["-H".to_string(), host.clone()];
                full.extend(args);
                full
            }
            None => args,
        }
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    fn spawn_error(&self, args: &[String], err: CommandError) -> RuntimeError {
        RuntimeError::Spawn {
            command: self.describe(args),
            source: err.into(),
        }
    }

    /// Runs a command and captures its output without checking the exit status
    async fn output(&self, args: Vec<String>) -> Result<(Vec<String>, Output), RuntimeError> {
        let args = self.args(args);
        let output = CommandRunner::run_simple(&self.program, &args)
            .await
            .map_err(|e| self.spawn_error(&args, e))?;
        Ok((args, output))
    }

    /// Runs a command and fails on a non-zero exit status
    async fn exec(&self, args: Vec<String>) -> Result<String, RuntimeError> {
        let (args, output) = self.output(args).await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: self.describe(&args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Like [`exec`](Self::exec), but maps "No such container" to `NoSuchContainer`
    async fn exec_on(&self, container: &ContainerHandle, args: Vec<String>) -> Result<(), RuntimeError> {
        match self.exec(args).await {
            Err(RuntimeError::CommandFailed { stderr, .. }) if is_missing(&stderr) => {
                Err(RuntimeError::NoSuchContainer(container.name.clone()))
            }
            other => other.map(|_| ()),
        }
    }

    async fn login(&self, auth: &RegistryAuth) -> Result<(), RuntimeError> {
        let args = self.args(vec![
            "login".to_string(),
            "--username".to_string(),
            auth.username.clone(),
            "--password-stdin".to_string(),
            auth.server_address.clone(),
        ]);
        debug!(server = %auth.server_address, username = %auth.username, "Logging in to registry");

        let output = CommandRunner::run_with_input(&self.program, &args, &auth.password)
            .await
            .map_err(|e| self.spawn_error(&args, e))?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: self.describe(&args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

fn is_missing(stderr: &str) -> bool {
    stderr.contains("No such")
}

/// `docker create` arguments for a container spec
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];

    for dns in &spec.dns {
        args.push("--dns".to_string());
        args.push(dns.clone());
    }
    if let Some(policy) = &spec.restart_policy {
        args.push("--restart".to_string());
        args.push(policy.clone());
    }
    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for link in &spec.links {
        args.push("--link".to_string());
        args.push(link.clone());
    }
    for exposed in &spec.exposed_ports {
        args.push("--expose".to_string());
        args.push(exposed.clone());
    }
    for binding in &spec.port_bindings {
        let publish = match &binding.host_ip {
            Some(ip) => format!(
                "{}:{}:{}/{}",
                ip, binding.host_port, binding.container_port, binding.protocol
            ),
            None => format!(
                "{}:{}/{}",
                binding.host_port, binding.container_port, binding.protocol
            ),
        };
        args.push("-p".to_string());
        args.push(publish);
    }
    for env in &spec.env {
        args.push("-e".to_string());
        args.push(env.clone());
    }
    for bind in &spec.binds {
        if bind.is_volume {
            args.push("-v".to_string());
            args.push(bind.spec());
        } else {
            // 文件挂载：源路径必须已存在
            let mut mount = format!(
                "type=bind,source={},target={}",
                bind.host_path, bind.container_path
            );
            if bind.read_only {
                mount.push_str(",readonly");
            }
            args.push("--mount".to_string());
            args.push(mount);
        }
    }
    for from in &spec.volumes_from {
        args.push("--volumes-from".to_string());
        args.push(from.clone());
    }
    if let Some(memory) = spec.memory {
        args.push("--memory".to_string());
        args.push(memory.to_string());
    }
    args.push("--cpu-shares".to_string());
    args.push(spec.cpu_shares.to_string());
    if let Some(dir) = &spec.working_dir {
        args.push("-w".to_string());
        args.push(dir.clone());
    }
    if spec.open_stdin {
        args.push("-i".to_string());
    }
    if spec.tty {
        args.push("-t".to_string());
    }

    args.push(spec.image.clone());
    args.extend(spec.cmd.iter().cloned());
    args
}

/// `docker logs` arguments
pub fn logs_args(container: &str, options: &LogsOptions) -> Vec<String> {
    let mut args = vec![
        "logs".to_string(),
        "--tail".to_string(),
        options.tail.to_string(),
    ];
    if options.timestamps {
        args.push("--timestamps".to_string());
    }
    if options.follow {
        args.push("--follow".to_string());
    }
    args.push(container.to_string());
    args
}

/// Parses `<id>|<running>`
fn parse_inspect(stdout: &str) -> Result<ContainerState, RuntimeError> {
    let line = stdout.lines().next().unwrap_or("").trim();
    let (id, running) = line
        .split_once('|')
        .ok_or_else(|| RuntimeError::Parse(line.to_string()))?;
    let running = match running {
        "true" => true,
        "false" => false,
        other => return Err(RuntimeError::Parse(format!("running={}", other))),
    };
    Ok(ContainerState {
        id: id.to_string(),
        running,
    })
}

/// Reader state of an in-flight pull
struct PullState {
    lines: Lines<BufReader<ChildStdout>>,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    command: String,
    done: bool,
}

async fn next_progress(
    mut state: PullState,
) -> Option<(Result<PullProgress, RuntimeError>, PullState)> {
    if state.done {
        return None;
    }

    match state.lines.next_line().await {
        Ok(Some(line)) => Some((Ok(PullProgress { status: line }), state)),
        Ok(None) => {
            state.done = true;
            let status = match state.child.wait().await {
                Ok(status) => status,
                Err(source) => {
                    let err = RuntimeError::Spawn {
                        command: state.command.clone(),
                        source,
                    };
                    return Some((Err(err), state));
                }
            };
            if status.success() {
                return None;
            }
            let stderr = match state.stderr.take() {
                Some(handle) => handle.await.unwrap_or_default(),
                None => String::new(),
            };
            let err = RuntimeError::CommandFailed {
                command: state.command.clone(),
                stderr: stderr.trim().to_string(),
            };
            Some((Err(err), state))
        }
        Err(e) => {
            state.done = true;
            Some((Err(RuntimeError::Parse(e.to_string())), state))
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, RuntimeError> {
        let (args, output) = self
            .output(vec![
                "inspect".to_string(),
                "--type".to_string(),
                "container".to_string(),
                "--format".to_string(),
                INSPECT_FORMAT.to_string(),
                name.to_string(),
            ])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing(&stderr) {
                return Ok(None);
            }
            return Err(RuntimeError::CommandFailed {
                command: self.describe(&args),
                stderr: stderr.trim().to_string(),
            });
        }

        parse_inspect(&String::from_utf8_lossy(&output.stdout)).map(Some)
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let id = self.exec(create_args(spec)).await?;
        debug!(container = %spec.name, id = %id, "Container created");
        Ok(ContainerHandle::new(id, spec.name.clone()))
    }

    async fn start(&self, container: &ContainerHandle) -> Result<(), RuntimeError> {
        self.exec_on(container, vec!["start".to_string(), container.id.clone()])
            .await
    }

    async fn stop(&self, container: &ContainerHandle) -> Result<(), RuntimeError> {
        self.exec_on(container, vec!["stop".to_string(), container.id.clone()])
            .await
    }

    async fn remove(
        &self,
        container: &ContainerHandle,
        options: RemoveOptions,
    ) -> Result<(), RuntimeError> {
        let mut args = vec!["rm".to_string()];
        if options.force {
            args.push("-f".to_string());
        }
        args.push(container.id.clone());
        self.exec_on(container, args).await
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let (args, output) = self
            .output(vec![
                "image".to_string(),
                "inspect".to_string(),
                "--format".to_string(),
                "{{.Id}}".to_string(),
                image.to_string(),
            ])
            .await?;

        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing(&stderr) {
            Ok(false)
        } else {
            Err(RuntimeError::CommandFailed {
                command: self.describe(&args),
                stderr: stderr.trim().to_string(),
            })
        }
    }

    async fn pull(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<PullStream, RuntimeError> {
        if let Some(auth) = auth {
            self.login(auth).await?;
        }

        let args = self.args(vec!["pull".to_string(), image.to_string()]);
        let command = self.describe(&args);
        info!(image = %image, "Pulling image");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Parse(format!("{}: stdout not captured", command)))?;
        let stderr = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let state = PullState {
            lines: BufReader::new(stdout).lines(),
            child,
            stderr,
            command,
            done: false,
        };
        Ok(futures::stream::unfold(state, next_progress).boxed())
    }

    async fn run_attached(
        &self,
        container: &ContainerHandle,
        interactive: bool,
    ) -> Result<i64, RuntimeError> {
        let mut args = vec!["start".to_string(), "--attach".to_string()];
        if interactive {
            args.push("--interactive".to_string());
        }
        args.push(container.id.clone());
        let args = self.args(args);

        let status = CommandRunner::run_inherited(&self.program, &args)
            .await
            .map_err(|e| self.spawn_error(&args, e))?;
        // 被信号终止时没有退出码
        Ok(status.code().map(i64::from).unwrap_or(-1))
    }

    async fn logs(
        &self,
        container: &ContainerHandle,
        options: &LogsOptions,
        log_tx: broadcast::Sender<LogLine>,
    ) -> Result<(), RuntimeError> {
        let args = self.args(logs_args(&container.id, options));
        let result = CommandRunner::run_with_streaming(
            &self.program,
            &args,
            log_tx,
            self.shutdown.child_token(),
        )
        .await;

        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(RuntimeError::CommandFailed {
                command: self.describe(&args),
                stderr: format!("exit status {}", status.code().unwrap_or(-1)),
            }),
            Err(CommandError::Cancelled) => Ok(()),
            Err(e) => Err(self.spawn_error(&args, e)),
        }
    }
}
