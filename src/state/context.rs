//! 编排上下文
//!
//! 持有配置、运行时适配器、已加载的应用，以及每个容器名一把的异步锁。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::config::env::{RegistryAuth, Settings};
use crate::config::loader::load_applications;
use crate::domain::application::Application;
use crate::error::{Error, Result};
use crate::infra::runtime::ContainerRuntime;

/// 全局 shutdown token（Ctrl-C 时触发）
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN
        .get_or_init(CancellationToken::new)
        .clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

/// 编排上下文
pub struct Context {
    /// 全局配置
    pub settings: Settings,
    /// 容器运行时
    pub runtime: Arc<dyn ContainerRuntime>,
    /// 已加载的应用（按加载顺序）
    applications: Vec<Application>,
    /// 容器名 -> 锁；同一进程内对同一容器的变更操作串行化
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Context {
    pub fn new(
        settings: Settings,
        runtime: Arc<dyn ContainerRuntime>,
        applications: Vec<Application>,
    ) -> Self {
        Self {
            settings,
            runtime,
            applications,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 从 `settings.apps_dir` 加载所有应用并构建上下文
    pub async fn load(settings: Settings, runtime: Arc<dyn ContainerRuntime>) -> Result<Self> {
        let applications = load_applications(&settings.apps_dir, &settings.storage_root).await?;
        Ok(Self::new(settings, runtime, applications))
    }

    pub fn applications(&self) -> &[Application] {
        &self.applications
    }

    /// 按名称查找应用
    pub fn application(&self, name: &str) -> Result<&Application> {
        self.applications
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| Error::UnknownApplication(name.to_string()))
    }

    /// 私有仓库地址（已去掉 scheme）
    pub fn repository_address(&self) -> Option<&str> {
        self.settings.repository.as_ref().map(|r| r.address())
    }

    pub fn registry_auth(&self) -> Option<&RegistryAuth> {
        self.settings.registry_auth()
    }

    /// 获取容器锁，guard 释放前其它对该容器的操作会等待
    pub async fn lock_container(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
