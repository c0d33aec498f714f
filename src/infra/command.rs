//! 命令执行器
//!
//! 提供统一的外部命令执行接口，支持：
//! - 捕获输出的一次性执行
//! - 通过 stdin 传入敏感数据
//! - 实时日志流式输出（可取消）
//! - 继承当前终端的交互式执行

use std::process::{ExitStatus, Output, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::log::LogLine;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed(std::io::Error),
    /// 写入 stdin 失败
    StdinFailed(std::io::Error),
    /// 命令被取消
    Cancelled,
    /// 等待命令完成失败
    WaitFailed(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::StdinFailed(e) => write!(f, "Failed to write command input: {}", e),
            CommandError::Cancelled => write!(f, "Command was cancelled"),
            CommandError::WaitFailed(e) => write!(f, "Failed to wait for command: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e)
            | CommandError::StdinFailed(e)
            | CommandError::WaitFailed(e) => Some(e),
            CommandError::Cancelled => None,
        }
    }
}

impl From<CommandError> for std::io::Error {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::SpawnFailed(e)
            | CommandError::StdinFailed(e)
            | CommandError::WaitFailed(e) => e,
            CommandError::Cancelled => {
                std::io::Error::new(std::io::ErrorKind::Interrupted, "command was cancelled")
            }
        }
    }
}

impl CommandRunner {
    /// 执行命令并捕获 stdout/stderr
    pub async fn run_simple(program: &str, args: &[String]) -> Result<Output, CommandError> {
        debug!(program = %program, args = ?args, "Running command");
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(CommandError::SpawnFailed)
    }

    /// 执行命令，并把 `input` 写入其 stdin（用于 `--password-stdin`）
    pub async fn run_with_input(
        program: &str,
        args: &[String],
        input: &str,
    ) -> Result<Output, CommandError> {
        debug!(program = %program, args = ?args, "Running command with stdin input");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(CommandError::StdinFailed)?;
            // 关闭 stdin，让子进程读到 EOF
            drop(stdin);
        }

        child
            .wait_with_output()
            .await
            .map_err(CommandError::WaitFailed)
    }

    /// 执行命令并流式输出日志
    ///
    /// stdout/stderr 每一行作为 `LogLine` 发送到 `log_tx`；
    /// `cancel` 触发时杀掉子进程并返回 `Cancelled`。
    pub async fn run_with_streaming(
        program: &str,
        args: &[String],
        log_tx: broadcast::Sender<LogLine>,
        cancel: CancellationToken,
    ) -> Result<ExitStatus, CommandError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // 启动 stdout 读取任务
        let stdout_tx = log_tx.clone();
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = stdout_tx.send(LogLine::stdout(line));
                }
            }
        });

        // 启动 stderr 读取任务
        let stderr_tx = log_tx;
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = stderr_tx.send(LogLine::stderr(line));
                }
            }
        });

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(program = %program, "Command cancelled, killing process");
                let _ = child.kill().await;
                Err(CommandError::Cancelled)
            }
            status = child.wait() => status.map_err(CommandError::WaitFailed),
        };

        // 等待日志读取完成
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        result
    }

    /// 继承当前进程的 stdin/stdout/stderr 执行命令，直到其退出
    pub async fn run_inherited(program: &str, args: &[String]) -> Result<ExitStatus, CommandError> {
        debug!(program = %program, args = ?args, "Running attached command");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        child.wait().await.map_err(CommandError::WaitFailed)
    }
}
