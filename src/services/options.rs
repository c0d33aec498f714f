//! Layer → 容器创建参数
//!
//! 每次创建容器前按 layer 属性重新计算，不缓存。

use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use crate::config::env::constants::RESTART_POLICY;
use crate::domain::application::Application;
use crate::domain::layer::{container_name, Layer, NameValue};
use crate::domain::vars::{parse_mem_limit, substitute};
use crate::error::{Error, Result};
use crate::infra::runtime::{Bind, ContainerSpec, PortBinding};
use crate::state::Context;

/// 构建 layer 的容器创建参数
///
/// 会在宿主机上创建缺失的卷路径。
pub async fn container_spec(ctx: &Context, app: &Application, layer: &Layer) -> Result<ContainerSpec> {
    let lookup = |name: &str| {
        app.lookup_variable(name, &ctx.settings.directories, &ctx.settings.variables)
    };

    let mut spec = ContainerSpec {
        name: layer.container_name(),
        image: layer.image(ctx.repository_address()),
        cmd: layer.command().to_vec(),
        dns: ctx.settings.dns.clone(),
        restart_policy: layer.restart().then(|| RESTART_POLICY.to_string()),
        cpu_shares: layer.cpu_shares(),
        working_dir: layer.working_directory().map(|dir| substitute(dir, lookup)),
        ..Default::default()
    };

    spec.labels = layer
        .labels
        .iter()
        .filter_map(|label| match &label.value {
            Some(value) if !label.name.is_empty() => Some((label.name.clone(), value.clone())),
            _ => {
                warn!(layer = %layer.name(), label = %label.name, "Skipping malformed label");
                None
            }
        })
        .collect();

    spec.links = layer
        .links
        .iter()
        .map(|link| {
            format!(
                "{}:{}",
                container_name(app.name(), &link.container),
                link.alias()
            )
        })
        .collect();

    for port in &layer.ports {
        for protocol in port.protocols() {
            spec.exposed_ports
                .push(format!("{}/{}", port.container_port, protocol));
            if let Some(host_port) = port.host_port {
                spec.port_bindings.push(PortBinding {
                    container_port: port.container_port,
                    host_port,
                    host_ip: port.ip.as_deref().map(|ip| substitute(ip, lookup)),
                    protocol,
                });
            }
        }
    }

    spec.env = merge_environment(layer, &layer.environment, &ctx.settings.global_environment);

    for volume in &layer.volumes {
        let host_path = substitute(&volume.host_path, lookup);
        let is_volume = provision_host_path(Path::new(&host_path)).await?;
        spec.binds.push(Bind {
            host_path,
            container_path: volume.container_path.clone(),
            read_only: volume.read_only,
            is_volume,
        });
    }

    for from in &layer.volumes_from {
        push_unique(&mut spec.volumes_from, container_name(app.name(), &from.container));
    }
    if !layer.data_only() {
        for name in app.auto_mount() {
            push_unique(&mut spec.volumes_from, container_name(app.name(), name));
        }
    }

    if let Some(value) = layer.mem_limit() {
        let bytes = parse_mem_limit(value).ok_or_else(|| Error::InvalidMemLimit {
            layer: layer.container_name(),
            value: value.to_string(),
        })?;
        spec.memory = Some(bytes);
    }

    Ok(spec)
}

/// layer 自身的环境变量在前，全局环境变量在后；格式错误的条目跳过
fn merge_environment(layer: &Layer, entries: &[NameValue], global: &[String]) -> Vec<String> {
    let mut env = Vec::with_capacity(entries.len() + global.len());

    for entry in entries {
        match &entry.value {
            Some(value) if !entry.name.is_empty() => {
                env.push(format!("{}={}", entry.name, value));
            }
            _ => warn!(
                layer = %layer.name(),
                name = %entry.name,
                "Skipping malformed environment entry"
            ),
        }
    }

    for entry in global {
        match entry.split_once('=') {
            Some((name, _)) if !name.trim().is_empty() => env.push(entry.clone()),
            _ => warn!(entry = %entry, "Skipping malformed global environment entry"),
        }
    }

    env
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// 确保宿主机路径存在，返回是否为目录
///
/// 不存在时：文件名含 `.` 视为文件（创建空文件），否则创建目录。
pub async fn provision_host_path(path: &Path) -> Result<bool> {
    if let Ok(metadata) = fs::metadata(path).await {
        return Ok(metadata.is_dir());
    }

    let looks_like_file = path
        .file_name()
        .map(|name| name.to_string_lossy().contains('.'))
        .unwrap_or(false);

    if looks_like_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        debug!(path = %path.display(), "Created host file");
        Ok(false)
    } else {
        fs::create_dir_all(path).await?;
        debug!(path = %path.display(), "Created host directory");
        Ok(true)
    }
}
