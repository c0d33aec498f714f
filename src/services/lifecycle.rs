//! Layer 生命周期
//!
//! 单个 layer 的 is_up / up / down / restart / pull / logs。
//! 状态：absent → up（运行中；数据 layer 只需存在）→ stopped / absent。

use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::application::Application;
use crate::domain::layer::{is_repository_image, Layer};
use crate::domain::log::LogLine;
use crate::error::{Error, Result};
use crate::infra::runtime::{ContainerHandle, ContainerState, LogsOptions, RemoveOptions};
use crate::state::Context;

use super::options::container_spec;
use super::resolver::pending_dependencies;

/// `up` 选项
#[derive(Clone, Copy, Debug, Default)]
pub struct UpOptions {
    /// 总是先拉取镜像（否则仅在本地缺失时拉取）
    pub pull: bool,
    pub quiet: bool,
}

/// `down` 选项
#[derive(Clone, Copy, Debug, Default)]
pub struct DownOptions {
    /// 停止后删除容器
    pub rm: bool,
    /// 删除时使用 force
    pub force: bool,
    pub quiet: bool,
}

/// 查询容器状态；查询失败按不存在处理
async fn observe(ctx: &Context, layer: &Layer) -> Option<ContainerState> {
    let name = layer.container_name();
    match ctx.runtime.inspect(&name).await {
        Ok(state) => state,
        Err(e) => {
            debug!(container = %name, error = %e, "Inspect failed, treating as absent");
            None
        }
    }
}

fn state_is_up(layer: &Layer, state: &ContainerState) -> bool {
    layer.data_only() || state.running
}

/// 数据 layer 存在即在线，其它 layer 需要处于运行状态
pub async fn is_up(ctx: &Context, layer: &Layer) -> bool {
    observe(ctx, layer)
        .await
        .map(|state| state_is_up(layer, &state))
        .unwrap_or(false)
}

/// 启动 layer（先启动尚未在线的依赖）
///
/// 已在线时直接返回。run-only layer 不能 `up`。
pub async fn up(ctx: &Context, app: &Application, layer: &Layer, options: UpOptions) -> Result<()> {
    bring_up(ctx, app, layer, options).await.map(|_| ())
}

/// 同 `up`，返回本次实际启动的 layer（含间接依赖），按启动顺序排列
pub(crate) fn bring_up<'a>(
    ctx: &'a Context,
    app: &'a Application,
    layer: &'a Layer,
    options: UpOptions,
) -> BoxFuture<'a, Result<Vec<&'a Layer>>> {
    up_with_stack(ctx, app, layer, options, Vec::new())
}

fn up_with_stack<'a>(
    ctx: &'a Context,
    app: &'a Application,
    layer: &'a Layer,
    options: UpOptions,
    mut stack: Vec<String>,
) -> BoxFuture<'a, Result<Vec<&'a Layer>>> {
    async move {
        if layer.run_only() {
            return Err(Error::state(format!(
                "layer {} is run-only and cannot be brought up; use run",
                layer.container_name()
            )));
        }

        if is_up(ctx, layer).await {
            debug!(container = %layer.container_name(), "Layer already up");
            return Ok(Vec::new());
        }

        if stack.iter().any(|name| name == layer.name()) {
            stack.push(layer.name().to_string());
            return Err(Error::DependencyCycle(stack));
        }
        stack.push(layer.name().to_string());

        let mut started = Vec::new();
        for dependency in pending_dependencies(ctx, app, layer).await? {
            started.extend(up_with_stack(ctx, app, dependency, options, stack.clone()).await?);
        }

        let _guard = ctx.lock_container(&layer.container_name()).await;
        // 等锁期间可能已被其它任务启动
        if is_up(ctx, layer).await {
            return Ok(started);
        }

        ensure_image(ctx, layer, options.pull, options.quiet).await?;
        recreate_locked(ctx, app, layer, options.quiet).await?;
        started.push(layer);
        Ok(started)
    }
    .boxed()
}

/// 删除同名旧容器，创建并（非数据 layer）启动新容器
///
/// 调用方持有容器锁。
async fn recreate_locked(
    ctx: &Context,
    app: &Application,
    layer: &Layer,
    quiet: bool,
) -> Result<()> {
    let name = layer.container_name();
    remove_stale(ctx, layer).await?;

    let spec = container_spec(ctx, app, layer).await?;
    let handle = ctx.runtime.create(&spec).await?;
    if !layer.data_only() {
        ctx.runtime.start(&handle).await?;
    }

    if !quiet {
        info!(
            container = %name,
            image = %spec.image,
            kind = layer.kind().name(),
            "Layer is up"
        );
    }
    Ok(())
}

/// 删除同名的残留容器（不存在时什么都不做）
pub(crate) async fn remove_stale(ctx: &Context, layer: &Layer) -> Result<()> {
    if let Some(state) = observe(ctx, layer).await {
        let handle = ContainerHandle::new(state.id, layer.container_name());
        debug!(container = %handle.name, "Removing stale container");
        ctx.runtime
            .remove(&handle, RemoveOptions { force: true })
            .await?;
    }
    Ok(())
}

/// `pull` 为 false 时只在本地缺少镜像时拉取
pub(crate) async fn ensure_image(ctx: &Context, layer: &Layer, pull: bool, quiet: bool) -> Result<()> {
    if !pull {
        let image = layer.image(ctx.repository_address());
        if ctx.runtime.image_exists(&image).await? {
            return Ok(());
        }
    }
    pull_image(ctx, layer, quiet).await
}

/// 停止 layer
///
/// 未在线时直接返回。数据 layer 不 stop，只在 `rm` 时删除。
pub async fn down(ctx: &Context, layer: &Layer, options: DownOptions) -> Result<()> {
    let name = layer.container_name();
    let _guard = ctx.lock_container(&name).await;

    let state = match observe(ctx, layer).await {
        Some(state) if state_is_up(layer, &state) => state,
        _ => {
            debug!(container = %name, "Layer already down");
            return Ok(());
        }
    };
    let handle = ContainerHandle::new(state.id, name.as_str());

    if layer.data_only() && !options.rm {
        debug!(container = %name, "Data layer kept, nothing to do");
        return Ok(());
    }

    if !layer.data_only() {
        ctx.runtime.stop(&handle).await?;
    }
    if options.rm {
        ctx.runtime
            .remove(
                &handle,
                RemoveOptions {
                    force: options.force,
                },
            )
            .await?;
    }

    if !options.quiet {
        info!(container = %name, removed = options.rm, "Layer is down");
    }
    Ok(())
}

/// 重启 layer；未在线时等同于 `up`
pub async fn restart(ctx: &Context, app: &Application, layer: &Layer, options: UpOptions) -> Result<()> {
    if !is_up(ctx, layer).await {
        return up(ctx, app, layer, options).await;
    }

    let name = layer.container_name();
    let _guard = ctx.lock_container(&name).await;
    if !options.quiet {
        info!(container = %name, "Restarting layer");
    }

    ensure_image(ctx, layer, options.pull, true).await?;
    recreate_locked(ctx, app, layer, true).await?;

    if !options.quiet {
        info!(container = %name, "Layer restarted");
    }
    Ok(())
}

/// 拉取 layer 镜像，消费完进度流后返回
///
/// 私有仓库镜像缺少认证信息时直接失败，不发起拉取。
pub async fn pull_image(ctx: &Context, layer: &Layer, quiet: bool) -> Result<()> {
    let image = layer.image(ctx.repository_address());

    let auth = match ctx.repository_address() {
        Some(address) if is_repository_image(&image, address) => {
            Some(ctx.registry_auth().ok_or_else(|| Error::Auth {
                image: image.clone(),
                repository: address.to_string(),
            })?)
        }
        _ => None,
    };

    if !quiet {
        info!(container = %layer.container_name(), image = %image, "Pulling image");
    }

    let mut progress = ctx.runtime.pull(&image, auth).await?;
    while let Some(event) = progress.next().await {
        let event = event?;
        debug!(image = %image, status = %event.status, "Pull progress");
    }

    if !quiet {
        info!(image = %image, "Image pulled");
    }
    Ok(())
}

/// 把容器日志写入 `log_tx`
pub async fn logs(
    ctx: &Context,
    layer: &Layer,
    options: &LogsOptions,
    log_tx: broadcast::Sender<LogLine>,
) -> Result<()> {
    let name = layer.container_name();
    let state = observe(ctx, layer)
        .await
        .ok_or_else(|| Error::state(format!("container {} does not exist", name)))?;
    let handle = ContainerHandle::new(state.id, name);
    ctx.runtime.logs(&handle, options, log_tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::env::{RegistryAuth, RepositoryConfig, Settings};
    use crate::config::loader::application_from_value;
    use crate::error::ErrorKind;
    use crate::infra::testing::{Call, FakeRuntime, LogCapture};
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;

    fn app() -> Application {
        application_from_value(
            json!({
                "name": "shop",
                "layers": {
                    "assets": { "image": "shop/assets", "dataOnly": true },
                    "db": { "image": "postgres:15" },
                    "web": {
                        "image": "shop/web",
                        "links": [{ "container": "db" }],
                        "volumesFrom": [{ "container": "assets" }]
                    },
                    "migrate": { "image": "shop/web", "runOnly": true },
                    "private": { "image": "registry.local:5000/team/api" },
                    "ping": { "image": "busybox", "links": [{ "container": "pong" }] },
                    "pong": { "image": "busybox", "links": [{ "container": "ping" }] }
                }
            }),
            Path::new("/srv"),
        )
        .unwrap()
    }

    fn context(runtime: FakeRuntime) -> (Context, Arc<FakeRuntime>) {
        context_with(Settings::default(), runtime)
    }

    fn context_with(settings: Settings, runtime: FakeRuntime) -> (Context, Arc<FakeRuntime>) {
        let runtime = Arc::new(runtime);
        let ctx = Context::new(settings, runtime.clone(), Vec::new());
        (ctx, runtime)
    }

    fn quiet() -> UpOptions {
        UpOptions {
            pull: false,
            quiet: true,
        }
    }

    #[tokio::test]
    async fn test_is_up() {
        let (ctx, _) = context(
            FakeRuntime::new()
                .with_running("shop_db")
                .with_stopped("shop_web")
                .with_stopped("shop_assets"),
        );
        let app = app();
        assert!(is_up(&ctx, app.layer("db").unwrap()).await);
        assert!(!is_up(&ctx, app.layer("web").unwrap()).await);
        // 数据 layer 存在即可
        assert!(is_up(&ctx, app.layer("assets").unwrap()).await);
        assert!(!is_up(&ctx, app.layer("migrate").unwrap()).await);
    }

    #[tokio::test]
    async fn test_up_is_idempotent() {
        let (ctx, runtime) = context(FakeRuntime::new().with_running("shop_db"));
        let app = app();
        up(&ctx, &app, app.layer("db").unwrap(), quiet()).await.unwrap();
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_up_brings_dependencies_up_first() {
        let (ctx, runtime) = context(
            FakeRuntime::new()
                .with_image("shop/web:latest")
                .with_image("postgres:15")
                .with_image("shop/assets:latest"),
        );
        let app = app();
        up(&ctx, &app, app.layer("web").unwrap(), quiet()).await.unwrap();

        assert_eq!(runtime.created(), vec!["shop_db", "shop_assets", "shop_web"]);
        assert!(runtime.is_running("shop_db"));
        assert!(runtime.is_running("shop_web"));
        // 数据 layer 只创建不启动
        assert!(runtime.exists("shop_assets"));
        assert!(!runtime.is_running("shop_assets"));
        assert!(runtime.pulled().is_empty());
    }

    #[tokio::test]
    async fn test_up_pulls_missing_image() {
        let (ctx, runtime) = context(FakeRuntime::new());
        let app = app();
        up(&ctx, &app, app.layer("db").unwrap(), quiet()).await.unwrap();
        assert_eq!(runtime.pulled(), vec!["postgres:15"]);
    }

    #[tokio::test]
    async fn test_up_with_pull_always_pulls() {
        let (ctx, runtime) = context(FakeRuntime::new().with_image("postgres:15"));
        let app = app();
        let options = UpOptions {
            pull: true,
            quiet: true,
        };
        up(&ctx, &app, app.layer("db").unwrap(), options).await.unwrap();
        assert_eq!(runtime.pulled(), vec!["postgres:15"]);
    }

    #[tokio::test]
    async fn test_up_replaces_stopped_container() {
        let (ctx, runtime) = context(
            FakeRuntime::new()
                .with_image("postgres:15")
                .with_stopped("shop_db"),
        );
        let app = app();
        up(&ctx, &app, app.layer("db").unwrap(), quiet()).await.unwrap();

        let calls = runtime.calls();
        assert_eq!(
            calls[0],
            Call::Remove {
                name: "shop_db".to_string(),
                force: true
            }
        );
        assert_eq!(calls[1], Call::Create("shop_db".to_string()));
        assert!(runtime.is_running("shop_db"));
    }

    #[tokio::test]
    async fn test_up_rejects_run_only_layer() {
        let (ctx, _) = context(FakeRuntime::new());
        let app = app();
        let err = up(&ctx, &app, app.layer("migrate").unwrap(), quiet())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[tokio::test]
    async fn test_up_detects_dependency_cycle() {
        let (ctx, runtime) = context(FakeRuntime::new().with_image("busybox:latest"));
        let app = app();
        let err = up(&ctx, &app, app.layer("ping").unwrap(), quiet())
            .await
            .unwrap_err();
        match err {
            Error::DependencyCycle(path) => assert_eq!(path, vec!["ping", "pong", "ping"]),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(runtime.created().is_empty());
    }

    #[tokio::test]
    async fn test_down_is_idempotent() {
        let (ctx, runtime) = context(FakeRuntime::new().with_stopped("shop_db"));
        let app = app();
        let options = DownOptions {
            rm: true,
            force: false,
            quiet: true,
        };
        down(&ctx, app.layer("db").unwrap(), options).await.unwrap();
        down(&ctx, app.layer("web").unwrap(), options).await.unwrap();
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_down_stops_and_removes() {
        let (ctx, runtime) = context(FakeRuntime::new().with_running("shop_db"));
        let app = app();

        down(&ctx, app.layer("db").unwrap(), DownOptions::default())
            .await
            .unwrap();
        assert!(runtime.exists("shop_db"));
        assert!(!runtime.is_running("shop_db"));

        let (ctx, runtime) = context(FakeRuntime::new().with_running("shop_db"));
        let options = DownOptions {
            rm: true,
            ..Default::default()
        };
        down(&ctx, app.layer("db").unwrap(), options).await.unwrap();
        assert!(!runtime.exists("shop_db"));
    }

    #[tokio::test]
    async fn test_down_data_layer_never_stops() {
        let (ctx, runtime) = context(FakeRuntime::new().with_stopped("shop_assets"));
        let app = app();
        let assets = app.layer("assets").unwrap();

        down(&ctx, assets, DownOptions::default()).await.unwrap();
        assert!(runtime.calls().is_empty());

        let options = DownOptions {
            rm: true,
            ..Default::default()
        };
        down(&ctx, assets, options).await.unwrap();
        assert_eq!(runtime.removed(), vec!["shop_assets"]);
        assert!(!runtime
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Stop(_))));
    }

    #[tokio::test]
    async fn test_down_data_layer_logs_only_when_removed() {
        let (ctx, runtime) = context(FakeRuntime::new().with_stopped("shop_assets"));
        let app = app();
        let assets = app.layer("assets").unwrap();
        let logs = LogCapture::default();
        let _guard = logs.install();

        down(&ctx, assets, DownOptions::default()).await.unwrap();
        assert!(!logs.contents().contains("Layer is down"));
        assert!(runtime.exists("shop_assets"));

        let options = DownOptions {
            rm: true,
            ..Default::default()
        };
        down(&ctx, assets, options).await.unwrap();
        assert!(logs.contents().contains("Layer is down"));
    }

    #[tokio::test]
    async fn test_bring_up_reports_started_layers() {
        let (ctx, _) = context(
            FakeRuntime::new()
                .with_image("shop/web:latest")
                .with_image("postgres:15")
                .with_running("shop_db")
                .with_image("shop/assets:latest"),
        );
        let app = app();
        let started = bring_up(&ctx, &app, app.layer("web").unwrap(), quiet())
            .await
            .unwrap();
        let names: Vec<&str> = started.iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["assets", "web"]);

        let again = bring_up(&ctx, &app, app.layer("web").unwrap(), quiet())
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_restart_recreates_running_container() {
        let (ctx, runtime) = context(
            FakeRuntime::new()
                .with_image("postgres:15")
                .with_running("shop_db"),
        );
        let app = app();
        restart(&ctx, &app, app.layer("db").unwrap(), quiet())
            .await
            .unwrap();

        assert_eq!(runtime.removed(), vec!["shop_db"]);
        assert_eq!(runtime.created(), vec!["shop_db"]);
        assert!(runtime.is_running("shop_db"));
    }

    #[tokio::test]
    async fn test_restart_when_down_delegates_to_up() {
        let (ctx, runtime) = context(FakeRuntime::new().with_image("postgres:15"));
        let app = app();
        restart(&ctx, &app, app.layer("db").unwrap(), quiet())
            .await
            .unwrap();
        assert!(runtime.removed().is_empty());
        assert!(runtime.is_running("shop_db"));
    }

    fn repository(auth: Option<RegistryAuth>) -> Settings {
        Settings {
            repository: Some(RepositoryConfig {
                url: "https://registry.local:5000".to_string(),
                auth,
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pull_private_image_requires_auth() {
        let (ctx, runtime) = context_with(repository(None), FakeRuntime::new());
        let app = app();
        let err = pull_image(&ctx, app.layer("private").unwrap(), true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(runtime.pulled().is_empty());

        // 公共镜像不需要认证
        pull_image(&ctx, app.layer("db").unwrap(), true).await.unwrap();
        assert_eq!(runtime.pull_auth(), vec![("postgres:15".to_string(), None)]);
    }

    #[tokio::test]
    async fn test_pull_private_image_with_auth() {
        let auth = RegistryAuth {
            username: "deploy".to_string(),
            password: "secret".to_string(),
            email: None,
            server_address: "registry.local:5000".to_string(),
        };
        let (ctx, runtime) = context_with(repository(Some(auth)), FakeRuntime::new());
        let app = app();
        pull_image(&ctx, app.layer("private").unwrap(), true)
            .await
            .unwrap();
        assert_eq!(
            runtime.pull_auth(),
            vec![(
                "registry.local:5000/team/api:latest".to_string(),
                Some("deploy".to_string())
            )]
        );
        assert!(runtime.has_image("registry.local:5000/team/api:latest"));
    }

    #[tokio::test]
    async fn test_logs() {
        let (ctx, _) = context(FakeRuntime::new().with_running("shop_db"));
        let app = app();
        let (tx, mut rx) = broadcast::channel(8);
        logs(&ctx, app.layer("db").unwrap(), &LogsOptions::default(), tx)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().content, "shop_db line 0");

        let (tx, _rx) = broadcast::channel(8);
        let err = logs(&ctx, app.layer("web").unwrap(), &LogsOptions::default(), tx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }
}
