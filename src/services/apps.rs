//! 应用级操作
//!
//! 对整个应用（或 `app/layer` 目标）批量执行 up / down / restart / pull，
//! 以及在线状态汇总。run-only layer 不参与 up / down / restart 与在线判断。

use std::fmt;
use std::str::FromStr;

use futures::future::join_all;
use serde::Serialize;
use tracing::info;

use crate::domain::application::Application;
use crate::domain::layer::{Layer, LayerKind};
use crate::error::{Error, Result};
use crate::state::Context;

use super::lifecycle::{self, is_up, DownOptions, UpOptions};

/// 批量操作的执行方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// 前一个完成后再开始下一个
    #[default]
    Sequential,
    /// 同时开始，全部完成后按输入顺序报告第一个错误
    Parallel,
}

impl ExecutionMode {
    pub fn from_parallel(parallel: bool) -> Self {
        if parallel {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        }
    }
}

/// 非 run-only 的 layer，按文档顺序
fn service_layers(app: &Application) -> impl DoubleEndedIterator<Item = &Layer> {
    app.layers().iter().filter(|l| !l.run_only())
}

/// 所有非 run-only layer 都在线
pub async fn is_all_up(ctx: &Context, app: &Application) -> bool {
    for layer in service_layers(app) {
        if !is_up(ctx, layer).await {
            return false;
        }
    }
    true
}

/// 至少一个非 run-only layer 在线
pub async fn is_any_up(ctx: &Context, app: &Application) -> bool {
    for layer in service_layers(app) {
        if is_up(ctx, layer).await {
            return true;
        }
    }
    false
}

pub async fn up(ctx: &Context, app: &Application, options: UpOptions) -> Result<()> {
    for layer in service_layers(app) {
        lifecycle::up(ctx, app, layer, options).await?;
    }
    if !options.quiet {
        info!(application = %app.name(), "Application is up");
    }
    Ok(())
}

/// 按文档逆序停止
pub async fn down(ctx: &Context, app: &Application, options: DownOptions) -> Result<()> {
    for layer in service_layers(app).rev() {
        lifecycle::down(ctx, layer, options).await?;
    }
    if !options.quiet {
        info!(application = %app.name(), "Application is down");
    }
    Ok(())
}

pub async fn restart(ctx: &Context, app: &Application, options: UpOptions) -> Result<()> {
    for layer in service_layers(app) {
        lifecycle::restart(ctx, app, layer, options).await?;
    }
    Ok(())
}

/// 拉取所有 layer（含 run-only）的镜像，同一镜像只拉一次
pub async fn pull(ctx: &Context, app: &Application, quiet: bool) -> Result<()> {
    let mut seen = Vec::new();
    for layer in app.layers() {
        let image = layer.image(ctx.repository_address());
        if seen.contains(&image) {
            continue;
        }
        lifecycle::pull_image(ctx, layer, quiet).await?;
        seen.push(image);
    }
    Ok(())
}

/// 单个 layer 的状态
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct LayerStatus {
    pub layer: String,
    pub container: String,
    pub kind: LayerKind,
    pub image: String,
    pub up: bool,
}

impl fmt::Display for LayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<30} {:<9} {:<5} {}",
            self.container,
            self.kind.name(),
            if self.up { "up" } else { "down" },
            self.image
        )
    }
}

pub async fn status(ctx: &Context, app: &Application) -> Vec<LayerStatus> {
    let mut statuses = Vec::with_capacity(app.layers().len());
    for layer in app.layers() {
        statuses.push(LayerStatus {
            layer: layer.name().to_string(),
            container: layer.container_name(),
            kind: layer.kind(),
            image: layer.image(ctx.repository_address()),
            up: is_up(ctx, layer).await,
        });
    }
    statuses
}

/// 命令行目标：`app` 或 `app/layer`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub application: String,
    pub layer: Option<String>,
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (application, layer) = match s.split_once('/') {
            Some((app, layer)) => (app, Some(layer)),
            None => (s, None),
        };
        if application.is_empty() || layer.is_some_and(str::is_empty) {
            return Err(Error::configuration(format!(
                "invalid target '{}', expected <app> or <app>/<layer>",
                s
            )));
        }
        Ok(Self {
            application: application.to_string(),
            layer: layer.map(str::to_string),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.layer {
            Some(layer) => write!(f, "{}/{}", self.application, layer),
            None => f.write_str(&self.application),
        }
    }
}

/// 对目标执行的操作
#[derive(Clone, Copy, Debug)]
pub enum Action {
    Up(UpOptions),
    Down(DownOptions),
    Restart(UpOptions),
    Pull { quiet: bool },
}

/// 对单个目标执行操作
pub async fn apply(ctx: &Context, target: &Target, action: Action) -> Result<()> {
    let app = ctx.application(&target.application)?;
    match &target.layer {
        None => match action {
            Action::Up(options) => up(ctx, app, options).await,
            Action::Down(options) => down(ctx, app, options).await,
            Action::Restart(options) => restart(ctx, app, options).await,
            Action::Pull { quiet } => pull(ctx, app, quiet).await,
        },
        Some(name) => {
            let layer = app.layer(name)?;
            match action {
                Action::Up(options) => lifecycle::up(ctx, app, layer, options).await,
                Action::Down(options) => lifecycle::down(ctx, layer, options).await,
                Action::Restart(options) => lifecycle::restart(ctx, app, layer, options).await,
                Action::Pull { quiet } => lifecycle::pull_image(ctx, layer, quiet).await,
            }
        }
    }
}

/// 对多个目标执行操作
pub async fn apply_all(
    ctx: &Context,
    targets: &[Target],
    action: Action,
    mode: ExecutionMode,
) -> Result<()> {
    match mode {
        ExecutionMode::Sequential => {
            for target in targets {
                apply(ctx, target, action).await?;
            }
            Ok(())
        }
        ExecutionMode::Parallel => {
            let results = join_all(targets.iter().map(|t| apply(ctx, t, action))).await;
            results.into_iter().collect()
        }
    }
}
