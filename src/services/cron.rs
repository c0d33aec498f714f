//! 定时任务调度
//!
//! 按约 1 秒的粒度轮询所有应用的 cron 条目。应用需满足：
//! 有 cron 条目、至少一条到期、整体在线，到期条目才会执行。

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::application::Application;
use crate::domain::cron::Cron;
use crate::error::Result;
use crate::state::Context;

use super::apps::{is_all_up, ExecutionMode};
use super::runner::{run, RunOptions};

/// 应用中当前到期的 cron 条目及其触发时间
///
/// 应用没有完全在线时返回空。
pub async fn due_crons<'a>(
    ctx: &Context,
    app: &'a Application,
    now: DateTime<Utc>,
) -> Vec<(&'a Cron, DateTime<Utc>)> {
    if app.crons().is_empty() {
        return Vec::new();
    }

    let due: Vec<(&Cron, DateTime<Utc>)> = app
        .crons()
        .iter()
        .filter_map(|cron| cron.due_at(now).map(|at| (cron, at)))
        .collect();
    if due.is_empty() {
        return Vec::new();
    }

    if !is_all_up(ctx, app).await {
        debug!(application = %app.name(), "Application not fully up, skipping crons");
        return Vec::new();
    }
    due
}

/// 执行一个 cron 条目：以附加参数运行目标 run-only layer
pub async fn execute(ctx: &Context, app: &Application, cron: &Cron) -> Result<()> {
    info!(
        application = %app.name(),
        cron = %cron.name(),
        layer = %cron.run(),
        "Executing cron"
    );
    let layer = app.layer(cron.run())?;
    let options = RunOptions {
        args: cron.command().to_vec(),
        ..Default::default()
    };
    run(ctx, app, layer, options).await
}

/// cron 扫描器
///
/// 记录每个条目最近一次执行的触发时间，同一触发时间在容差窗口内
/// 被多次轮询到时只执行一次。
#[derive(Debug)]
pub struct CronScanner {
    mode: ExecutionMode,
    fired: HashMap<(String, String), DateTime<Utc>>,
}

impl CronScanner {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            fired: HashMap::new(),
        }
    }

    /// 扫描一次，返回执行的条目数
    ///
    /// 所有到期条目都会执行；有失败时返回第一个错误。
    pub async fn scan(&mut self, ctx: &Context, now: DateTime<Utc>) -> Result<usize> {
        let mut jobs: Vec<(&Application, &Cron, DateTime<Utc>)> = Vec::new();
        for app in ctx.applications() {
            for (cron, at) in due_crons(ctx, app, now).await {
                if self.fired.get(&fired_key(app, cron)) == Some(&at) {
                    continue;
                }
                jobs.push((app, cron, at));
            }
        }

        let count = jobs.len();
        let results = match self.mode {
            ExecutionMode::Sequential => {
                let mut results = Vec::with_capacity(count);
                for (app, cron, at) in jobs {
                    self.fired.insert(fired_key(app, cron), at);
                    results.push(execute(ctx, app, cron).await);
                }
                results
            }
            ExecutionMode::Parallel => {
                for (app, cron, at) in &jobs {
                    self.fired.insert(fired_key(app, cron), *at);
                }
                join_all(
                    jobs.into_iter()
                        .map(|(app, cron, _)| execute(ctx, app, cron)),
                )
                .await
            }
        };
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(count)
    }

    /// 每个 tick 扫描一次，直到 `cancel` 被触发
    ///
    /// 单次扫描失败只记录日志。
    pub async fn watch(mut self, ctx: &Context, tick: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_ms = tick.as_millis() as u64, mode = ?self.mode, "Cron watcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cron watcher stopped");
                    break;
                }
                _ = interval.tick() => {
                    match self.scan(ctx, Utc::now()).await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "Cron scan finished"),
                        Err(e) => error!(error = %e, kind = e.kind().as_str(), "Cron scan failed"),
                    }
                }
            }
        }
    }
}

fn fired_key(app: &Application, cron: &Cron) -> (String, String) {
    (app.name().to_string(), cron.name().to_string())
}
