//! 环境变量配置加载

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use tracing::warn;

/// 全局配置
#[derive(Clone, Debug)]
pub struct Settings {
    /// 容器运行时地址（传给 `docker -H`）
    pub docker_host: Option<String>,
    /// docker 可执行文件
    pub docker_bin: String,
    /// 私有镜像仓库
    pub repository: Option<RepositoryConfig>,
    /// DNS 服务器
    pub dns: Vec<String>,
    /// 全局环境变量（`NAME=VALUE`），追加在 layer 自身的环境变量之后
    pub global_environment: Vec<String>,
    /// Directory 相对路径的根目录
    pub storage_root: PathBuf,
    /// 应用描述文件目录
    pub apps_dir: PathBuf,
    /// 全局目录映射（`${name}` 替换的后备）
    pub directories: BTreeMap<String, String>,
    /// 全局变量（`${name}` 替换的最后后备）
    pub variables: BTreeMap<String, String>,
    /// cron 轮询间隔（毫秒）
    pub cron_tick_ms: u64,
}

/// 私有仓库配置
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// 仓库地址，可以带 scheme 和端口（如 https://registry.local:5000）
    pub url: String,
    pub auth: Option<RegistryAuth>,
}

impl RepositoryConfig {
    /// 去掉 scheme 的仓库地址
    pub fn address(&self) -> &str {
        strip_scheme(&self.url)
    }
}

/// 仓库认证信息
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub server_address: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("email", &self.email)
            .field("server_address", &self.server_address)
            .finish()
    }
}

impl Settings {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let docker_host = load_with_fallback("LAYERCTL_DOCKER_HOST", "DOCKER_HOST")
            .filter(|s| !s.is_empty());
        let docker_bin = env::var("LAYERCTL_DOCKER_BIN").unwrap_or_else(|_| "docker".to_string());

        let repository = env::var("LAYERCTL_REPOSITORY_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|url| {
                let username = env::var("LAYERCTL_REPOSITORY_USERNAME").ok();
                let password = env::var("LAYERCTL_REPOSITORY_PASSWORD").ok();
                let email = env::var("LAYERCTL_REPOSITORY_EMAIL").ok().filter(|s| !s.is_empty());

                let auth = match (username, password) {
                    (Some(username), Some(password)) => Some(RegistryAuth {
                        username,
                        password,
                        email,
                        server_address: strip_scheme(&url).to_string(),
                    }),
                    (Some(_), None) | (None, Some(_)) => {
                        warn!("Repository credentials are incomplete, pulls from {} will fail", url);
                        None
                    }
                    (None, None) => None,
                };

                RepositoryConfig { url, auth }
            });

        let dns = env::var("LAYERCTL_DNS")
            .map(|v| split_list(&v, ','))
            .unwrap_or_default();

        let global_environment = env::var("LAYERCTL_GLOBAL_ENV")
            .map(|v| split_list(&v, ';'))
            .unwrap_or_default();

        let storage_root = env::var("LAYERCTL_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(constants::DEFAULT_STORAGE_ROOT));

        let apps_dir = env::var("LAYERCTL_APPS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(constants::DEFAULT_APPS_DIR));

        let cron_tick_ms = env::var("LAYERCTL_CRON_TICK_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(constants::CRON_TICK_MS);

        Self {
            docker_host,
            docker_bin,
            repository,
            dns,
            global_environment,
            storage_root,
            apps_dir,
            directories: prefixed_map(env::vars(), "LAYERCTL_DIR_"),
            variables: prefixed_map(env::vars(), "LAYERCTL_VAR_"),
            cron_tick_ms,
        }
    }

    /// 仓库认证信息（如果已配置）
    pub fn registry_auth(&self) -> Option<&RegistryAuth> {
        self.repository.as_ref().and_then(|r| r.auth.as_ref())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_host: None,
            docker_bin: "docker".to_string(),
            repository: None,
            dns: Vec::new(),
            global_environment: Vec::new(),
            storage_root: PathBuf::from(constants::DEFAULT_STORAGE_ROOT),
            apps_dir: PathBuf::from(constants::DEFAULT_APPS_DIR),
            directories: BTreeMap::new(),
            variables: BTreeMap::new(),
            cron_tick_ms: constants::CRON_TICK_MS,
        }
    }
}

/// 去掉地址中的 scheme（`https://`）
pub fn strip_scheme(address: &str) -> &str {
    match address.find("://") {
        Some(idx) => &address[idx + 3..],
        None => address,
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

fn split_list(value: &str, separator: char) -> Vec<String> {
    value
        .split(separator)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 从 `PREFIX_<NAME>=value` 形式的变量构建映射，`<NAME>` 转小写、`_` 转 `-`
fn prefixed_map(
    vars: impl Iterator<Item = (String, String)>,
    prefix: &str,
) -> BTreeMap<String, String> {
    vars.filter_map(|(key, value)| {
        let name = key.strip_prefix(prefix)?;
        if name.is_empty() {
            return None;
        }
        Some((name.to_lowercase().replace('_', "-"), value))
    })
    .collect()
}

/// 常量
pub mod constants {
    /// 默认存储根目录
    pub const DEFAULT_STORAGE_ROOT: &str = "/var/lib/layerctl";

    /// 默认应用描述文件目录
    pub const DEFAULT_APPS_DIR: &str = "./apps";

    /// cron 轮询间隔（毫秒）
    pub const CRON_TICK_MS: u64 = 1000;

    /// 未设置时的 CPU shares
    pub const DEFAULT_CPU_SHARES: i64 = 1024;

    /// 重启策略
    pub const RESTART_POLICY: &str = "always";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
