//! Layer 领域模型
//!
//! 一个 layer 对应应用中的一个容器。跨 layer 引用（link / volumesFrom /
//! runAfter）只保存名称，访问时再到所属 Application 中查找。

use serde::Serialize;

use crate::config::env::constants::DEFAULT_CPU_SHARES;
use crate::error::Result;

use super::application::Application;

/// Layer 类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// 常驻服务
    Standard,
    /// 只需存在、从不启动的数据 layer
    Data,
    /// 每次调用执行一次的一次性 layer
    RunOnly,
}

impl LayerKind {
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Standard => "standard",
            LayerKind::Data => "data",
            LayerKind::RunOnly => "run_only",
        }
    }
}

/// 端口映射
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Port {
    pub container_port: u16,
    pub host_port: Option<u16>,
    /// 绑定 IP，支持 `${name}` 替换
    pub ip: Option<String>,
    pub tcp: bool,
    pub udp: bool,
}

impl Port {
    /// 启用的协议
    pub fn protocols(&self) -> Vec<&'static str> {
        let mut protocols = Vec::with_capacity(2);
        if self.tcp {
            protocols.push("tcp");
        }
        if self.udp {
            protocols.push("udp");
        }
        protocols
    }
}

/// 标签 / 环境变量
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameValue {
    pub name: String,
    /// `None` 表示文档中的值无法表示为字符串
    pub value: Option<String>,
}

/// 硬依赖：容器链接
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    /// 目标 layer 名称
    pub container: String,
    pub alias: Option<String>,
}

impl Link {
    /// 别名，默认为目标名称
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.container)
    }
}

/// 主机目录 / 文件挂载
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Volume {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// 硬依赖：从另一个 layer 挂载卷
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeFrom {
    pub container: String,
}

/// 执行完成后接着执行的 layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunAfter {
    pub layer: String,
    /// 非空时替换目标 layer 的命令
    pub command: Vec<String>,
}

/// Layer
#[derive(Clone, Debug)]
pub struct Layer {
    name: String,
    application: String,
    kind: LayerKind,
    image: String,
    command: Vec<String>,
    restart: bool,
    mem_limit: Option<String>,
    cpu_shares: Option<i64>,
    working_directory: Option<String>,
    pub ports: Vec<Port>,
    pub labels: Vec<NameValue>,
    pub links: Vec<Link>,
    pub volumes: Vec<Volume>,
    pub volumes_from: Vec<VolumeFrom>,
    pub environment: Vec<NameValue>,
    pub run_after: Vec<RunAfter>,
}

impl Layer {
    /// 创建只有镜像的 layer，其余属性通过 builder 方法设置
    pub fn new(
        application: impl Into<String>,
        name: impl Into<String>,
        kind: LayerKind,
        image: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            application: application.into(),
            kind,
            image: image.into(),
            command: Vec::new(),
            restart: false,
            mem_limit: None,
            cpu_shares: None,
            working_directory: None,
            ports: Vec::new(),
            labels: Vec::new(),
            links: Vec::new(),
            volumes: Vec::new(),
            volumes_from: Vec::new(),
            environment: Vec::new(),
            run_after: Vec::new(),
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_mem_limit(mut self, mem_limit: Option<String>) -> Self {
        self.mem_limit = mem_limit;
        self
    }

    pub fn with_cpu_shares(mut self, cpu_shares: Option<i64>) -> Self {
        self.cpu_shares = cpu_shares;
        self
    }

    pub fn with_working_directory(mut self, working_directory: Option<String>) -> Self {
        self.working_directory = working_directory;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 所属应用名称
    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn data_only(&self) -> bool {
        self.kind == LayerKind::Data
    }

    pub fn run_only(&self) -> bool {
        self.kind == LayerKind::RunOnly
    }

    /// `{application}_{layer}`
    pub fn container_name(&self) -> String {
        container_name(&self.application, &self.name)
    }

    /// 文档中写的镜像
    pub fn raw_image(&self) -> &str {
        &self.image
    }

    /// 带 tag 的镜像；未指定 tag 时追加 `:latest`
    pub fn image(&self, repository_address: Option<&str>) -> String {
        resolve_image(&self.image, repository_address)
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn restart(&self) -> bool {
        self.restart
    }

    pub fn mem_limit(&self) -> Option<&str> {
        self.mem_limit.as_deref()
    }

    /// 默认 1024
    pub fn cpu_shares(&self) -> i64 {
        self.cpu_shares.unwrap_or(DEFAULT_CPU_SHARES)
    }

    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }

    /// 启动本 layer 之前必须在线的 layer 名称
    ///
    /// links、volumesFrom，以及（非数据 layer）应用的 auto-mount 列表；
    /// 按出现顺序去重，不做传递展开。
    pub fn dependent_layers(&self, application: &Application) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        };

        for link in &self.links {
            push(&link.container);
        }
        for volume_from in &self.volumes_from {
            push(&volume_from.container);
        }
        if !self.data_only() {
            for name in application.auto_mount() {
                push(name);
            }
        }
        names
    }

    /// 解析 runAfter 条目到目标 layer
    pub fn run_after_layers<'a>(
        &'a self,
        application: &'a Application,
    ) -> Result<Vec<(&'a Layer, &'a [String])>> {
        self.run_after
            .iter()
            .map(|entry| {
                let layer = application.layer(&entry.layer)?;
                Ok((layer, entry.command.as_slice()))
            })
            .collect()
    }
}

/// `{application}_{layer}`
pub fn container_name(application: &str, layer: &str) -> String {
    format!("{}_{}", application, layer)
}

/// 镜像是否托管在私有仓库（地址已去掉 scheme）
pub fn is_repository_image(image: &str, repository_address: &str) -> bool {
    !repository_address.is_empty() && image.starts_with(repository_address)
}

/// 补全镜像 tag
///
/// 若镜像来自私有仓库，先去掉仓库地址（地址里可能含端口冒号），
/// 再在最后一个 `/` 之后查找 `:`。带 digest 的镜像原样返回。
pub fn resolve_image(image: &str, repository_address: Option<&str>) -> String {
    if image.contains('@') {
        return image.to_string();
    }

    let remainder = match repository_address {
        Some(address) if is_repository_image(image, address) => &image[address.len()..],
        _ => image,
    };
    let name_part = match remainder.rfind('/') {
        Some(idx) => &remainder[idx + 1..],
        None => remainder,
    };

    if name_part.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}
