//! 内存中的容器运行时（仅测试使用）

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::config::env::RegistryAuth;
use crate::domain::log::LogLine;

use super::runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, LogsOptions, PullProgress,
    PullStream, RemoveOptions, RuntimeError,
};

/// 记录下来的运行时调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Start(String),
    Stop(String),
    Remove { name: String, force: bool },
    Pull(String),
    RunAttached { name: String, interactive: bool },
    Logs(String),
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    running: bool,
    spec: Option<ContainerSpec>,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    images: HashSet<String>,
    exit_codes: HashMap<String, i64>,
    pull_auth: Vec<(String, Option<String>)>,
    calls: Vec<Call>,
    next_id: u64,
}

impl FakeState {
    fn find_mut(&mut self, handle: &ContainerHandle) -> Result<&mut FakeContainer, RuntimeError> {
        let key = self
            .containers
            .iter()
            .find(|(name, c)| c.id == handle.id || **name == handle.name)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| RuntimeError::NoSuchContainer(handle.name.clone()))?;
        self.containers
            .get_mut(&key)
            .ok_or_else(|| RuntimeError::NoSuchContainer(handle.name.clone()))
    }
}

/// 假运行时：容器 / 镜像状态保存在内存中，所有变更操作都会被记录
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state(&self, f: impl FnOnce(&mut FakeState)) {
        let mut state = self.state.lock().unwrap();
        f(&mut state);
    }

    /// 预置本地镜像
    pub fn with_image(self, image: &str) -> Self {
        self.with_state(|s| {
            s.images.insert(image.to_string());
        });
        self
    }

    /// 预置运行中的容器
    pub fn with_running(self, name: &str) -> Self {
        self.seed(name, true);
        self
    }

    /// 预置已存在但未运行的容器
    pub fn with_stopped(self, name: &str) -> Self {
        self.seed(name, false);
        self
    }

    /// `run_attached` 对该容器返回的退出码
    pub fn with_exit_code(self, name: &str, code: i64) -> Self {
        self.with_state(|s| {
            s.exit_codes.insert(name.to_string(), code);
        });
        self
    }

    fn seed(&self, name: &str, running: bool) {
        self.with_state(|s| {
            s.containers.insert(
                name.to_string(),
                FakeContainer {
                    id: format!("seeded-{}", name),
                    running,
                    spec: None,
                },
            );
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// 按顺序创建过的容器名称
    pub fn created(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// 按顺序删除过的容器名称
    pub fn removed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Remove { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    /// 按顺序拉取过的镜像
    pub fn pulled(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Pull(image) => Some(image),
                _ => None,
            })
            .collect()
    }

    /// 每次拉取使用的认证用户名
    pub fn pull_auth(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().unwrap().pull_auth.clone()
    }

    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .and_then(|c| c.spec.clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().containers.contains_key(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.lock().unwrap().images.contains(image)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerState>, RuntimeError> {
        let state = self.state.lock().unwrap();
        Ok(state.containers.get(name).map(|c| ContainerState {
            id: c.id.clone(),
            running: c.running,
        }))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Create(spec.name.clone()));
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::CommandFailed {
                command: format!("create {}", spec.name),
                stderr: format!("Conflict. The container name \"/{}\" is already in use", spec.name),
            });
        }
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                running: false,
                spec: Some(spec.clone()),
            },
        );
        Ok(ContainerHandle::new(id, spec.name.clone()))
    }

    async fn start(&self, container: &ContainerHandle) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Start(container.name.clone()));
        state.find_mut(container)?.running = true;
        Ok(())
    }

    async fn stop(&self, container: &ContainerHandle) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Stop(container.name.clone()));
        state.find_mut(container)?.running = false;
        Ok(())
    }

    async fn remove(
        &self,
        container: &ContainerHandle,
        options: RemoveOptions,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Remove {
            name: container.name.clone(),
            force: options.force,
        });
        let found = state.find_mut(container)?;
        if found.running && !options.force {
            return Err(RuntimeError::CommandFailed {
                command: format!("rm {}", container.name),
                stderr: "You cannot remove a running container".to_string(),
            });
        }
        state.containers.retain(|name, c| c.id != container.id && *name != container.name);
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn pull(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<PullStream, RuntimeError> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Pull(image.to_string()));
            state
                .pull_auth
                .push((image.to_string(), auth.map(|a| a.username.clone())));
            state.images.insert(image.to_string());
        }

        let events = vec![
            Ok(PullProgress {
                status: format!("Pulling from {}", image),
            }),
            Ok(PullProgress {
                status: format!("Status: Downloaded newer image for {}", image),
            }),
        ];
        Ok(futures::stream::iter(events).boxed())
    }

    async fn run_attached(
        &self,
        container: &ContainerHandle,
        interactive: bool,
    ) -> Result<i64, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::RunAttached {
            name: container.name.clone(),
            interactive,
        });
        // 容器执行完毕后处于退出状态
        state.find_mut(container)?.running = false;
        Ok(state
            .exit_codes
            .get(&container.name)
            .copied()
            .unwrap_or(0))
    }

    async fn logs(
        &self,
        container: &ContainerHandle,
        options: &LogsOptions,
        log_tx: broadcast::Sender<LogLine>,
    ) -> Result<(), RuntimeError> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call::Logs(container.name.clone()));
            state.find_mut(container)?;
        }
        for i in 0..options.tail.min(2) {
            let _ = log_tx.send(LogLine::stdout(format!("{} line {}", container.name, i)));
        }
        Ok(())
    }
}

/// 收集当前线程上的 tracing 输出
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// 安装为当前线程的默认 subscriber，guard 释放后恢复
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
