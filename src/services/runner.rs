//! Run-only layer 执行
//!
//! 流程：清理旧容器 → 构建参数 → 检查镜像 → can_run 检查，启动缺失的依赖 →
//! 前台执行 → 停止本次启动的依赖 → 依次执行 runAfter。

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info};

use crate::domain::application::Application;
use crate::domain::layer::Layer;
use crate::error::{Error, Result};
use crate::state::Context;

use super::lifecycle::{self, DownOptions, UpOptions};
use super::options::container_spec;
use super::resolver::{can_run, pending_dependencies};

/// `run` 选项
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// 追加到命令之后的参数
    pub args: Vec<String>,
    /// 替换 layer 自身命令（runAfter 的覆盖命令）
    pub command: Option<Vec<String>>,
    /// 总是先拉取镜像
    pub pull: bool,
    pub quiet: bool,
    /// 附加 stdin 并分配 TTY
    pub interactive: bool,
}

impl RunOptions {
    fn up_options(&self) -> UpOptions {
        UpOptions {
            pull: self.pull,
            quiet: self.quiet,
        }
    }

    /// runAfter 条目的选项：参数清空，非空的覆盖命令替换目标命令
    fn chained(&self, command: &[String]) -> Self {
        Self {
            args: Vec::new(),
            command: (!command.is_empty()).then(|| command.to_vec()),
            pull: self.pull,
            quiet: self.quiet,
            interactive: self.interactive,
        }
    }
}

/// 执行 run-only layer 及其 runAfter 链
///
/// 容器退出码非 0 时返回 `RunFailed`，后续 runAfter 不再执行。
pub fn run<'a>(
    ctx: &'a Context,
    app: &'a Application,
    layer: &'a Layer,
    options: RunOptions,
) -> BoxFuture<'a, Result<()>> {
    run_chain(ctx, app, layer, options, Vec::new())
}

fn run_chain<'a>(
    ctx: &'a Context,
    app: &'a Application,
    layer: &'a Layer,
    options: RunOptions,
    mut chain: Vec<String>,
) -> BoxFuture<'a, Result<()>> {
    async move {
        if !layer.run_only() {
            return Err(Error::state(format!(
                "layer {} is not run-only; use up",
                layer.container_name()
            )));
        }
        if chain.iter().any(|name| name == layer.name()) {
            chain.push(layer.name().to_string());
            return Err(Error::DependencyCycle(chain));
        }
        chain.push(layer.name().to_string());

        let code = execute(ctx, app, layer, &options).await?;
        if code != 0 {
            return Err(Error::RunFailed {
                layer: layer.container_name(),
                code,
            });
        }

        for (next, command) in layer.run_after_layers(app)? {
            debug!(
                container = %layer.container_name(),
                next = %next.container_name(),
                "Running follow-up layer"
            );
            run_chain(ctx, app, next, options.chained(command), chain.clone()).await?;
        }
        Ok(())
    }
    .boxed()
}

/// 单次执行（不含 runAfter），返回容器退出码
async fn execute(
    ctx: &Context,
    app: &Application,
    layer: &Layer,
    options: &RunOptions,
) -> Result<i64> {
    let name = layer.container_name();
    let guard = ctx.lock_container(&name).await;

    lifecycle::remove_stale(ctx, layer).await?;

    let mut spec = container_spec(ctx, app, layer).await?;
    let base = options
        .command
        .clone()
        .unwrap_or_else(|| layer.command().to_vec());
    spec.cmd = base.into_iter().chain(options.args.iter().cloned()).collect();
    spec.open_stdin = options.interactive;
    spec.tty = options.interactive;
    // 一次性容器退出后不重启
    spec.restart_policy = None;

    lifecycle::ensure_image(ctx, layer, options.pull, options.quiet).await?;

    // 只记录本次启动的依赖（含间接依赖），结束后只停止这些
    let mut started = Vec::new();
    if !can_run(ctx, app, layer).await? {
        for dependency in pending_dependencies(ctx, app, layer).await? {
            started.extend(lifecycle::bring_up(ctx, app, dependency, options.up_options()).await?);
        }
    }

    if !options.quiet {
        info!(container = %name, command = ?spec.cmd, "Running layer");
    }
    let handle = ctx.runtime.create(&spec).await?;
    let code = ctx.runtime.run_attached(&handle, options.interactive).await?;
    drop(guard);

    if !options.quiet {
        info!(container = %name, exit_code = code, "Run finished");
    }

    for dependency in started.iter().rev() {
        lifecycle::down(
            ctx,
            dependency,
            DownOptions {
                rm: true,
                force: true,
                quiet: options.quiet,
            },
        )
        .await?;
    }

    Ok(code)
}
