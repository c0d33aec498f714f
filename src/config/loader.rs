//! 应用描述文件加载
//!
//! 读取 `*.json` 文档并转换为领域模型

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;
use tokio::fs;
use tracing::{info, warn};

use crate::domain::application::{Application, Directory};
use crate::domain::cron::Cron;
use crate::domain::layer::{
    Layer, LayerKind, Link, NameValue, Port, RunAfter, Volume, VolumeFrom,
};
use crate::error::{Error, Result};

use super::document::{normalize_command, ApplicationDoc, CronDoc, LayerDoc, NameValueDoc};

/// 从 JSON 字符串构建应用
pub fn parse_application(content: &str, storage_root: &Path) -> Result<Application> {
    let doc: ApplicationDoc = serde_json::from_str(content)?;
    build_application(doc, storage_root)
}

/// 文档转换为应用
pub fn build_application(doc: ApplicationDoc, storage_root: &Path) -> Result<Application> {
    if doc.name.is_empty() {
        return Err(Error::configuration("application name must not be empty"));
    }
    let app_name = doc.name;

    let mut app = Application::new(&app_name)
        .with_description(doc.description)
        .with_auto_mount(doc.auto_mount);

    for dir in doc.directories {
        app = app.with_directory(Directory::resolve(
            dir.name,
            dir.description,
            &dir.path,
            storage_root,
            &app_name,
        ));
    }

    for (name, value) in doc.layers {
        let layer_doc: LayerDoc = serde_json::from_value(value).map_err(|e| {
            Error::configuration(format!("layer '{}' in '{}': {}", name, app_name, e))
        })?;
        app = app.with_layer(build_layer(&app_name, name, layer_doc)?);
    }

    for (name, value) in doc.crons {
        let cron_doc: CronDoc = serde_json::from_value(value).map_err(|e| {
            Error::configuration(format!("cron '{}' in '{}': {}", name, app_name, e))
        })?;
        app = app.with_cron(Cron::new(
            &app_name,
            name,
            cron_doc.at,
            cron_doc.run,
            normalize_command(cron_doc.command),
        )?);
    }

    Ok(app)
}

fn build_layer(application: &str, name: String, doc: LayerDoc) -> Result<Layer> {
    let kind = match (doc.data_only, doc.run_only) {
        (false, false) => LayerKind::Standard,
        (true, false) => LayerKind::Data,
        (false, true) => LayerKind::RunOnly,
        (true, true) => {
            return Err(Error::configuration(format!(
                "layer '{}' in '{}' cannot be both dataOnly and runOnly",
                name, application
            )))
        }
    };

    if doc.image.is_empty() {
        return Err(Error::configuration(format!(
            "layer '{}' in '{}' has no image",
            name, application
        )));
    }

    let mut layer = Layer::new(application, name, kind, doc.image)
        .with_command(normalize_command(doc.command))
        .with_restart(doc.restart)
        .with_mem_limit(doc.mem_limit)
        .with_cpu_shares(doc.cpu_shares)
        .with_working_directory(doc.working_directory);

    layer.ports = doc
        .ports
        .into_iter()
        .map(|p| Port {
            container_port: p.container_port,
            host_port: p.host_port,
            ip: p.ip,
            tcp: p.tcp,
            udp: p.udp,
        })
        .collect();
    layer.labels = doc.labels.into_iter().map(name_value).collect();
    layer.environment = doc.environment.into_iter().map(name_value).collect();
    layer.links = doc
        .links
        .into_iter()
        .map(|l| Link {
            container: l.container,
            alias: l.name,
        })
        .collect();
    layer.volumes = doc
        .volumes
        .into_iter()
        .map(|v| Volume {
            host_path: v.host_path,
            container_path: v.container_path,
            read_only: v.read_only,
        })
        .collect();
    layer.volumes_from = doc
        .volumes_from
        .into_iter()
        .map(|v| VolumeFrom {
            container: v.container,
        })
        .collect();
    layer.run_after = doc
        .run_after
        .into_iter()
        .map(|r| RunAfter {
            layer: r.layer,
            command: normalize_command(r.command),
        })
        .collect();

    Ok(layer)
}

fn name_value(doc: NameValueDoc) -> NameValue {
    let value = doc.value_string();
    NameValue {
        name: doc.name,
        value,
    }
}

/// 从文件加载应用
pub async fn load_application(path: &Path, storage_root: &Path) -> Result<Application> {
    let content = fs::read_to_string(path).await?;
    parse_application(&content, storage_root).map_err(|e| match e {
        Error::Document(inner) => {
            Error::configuration(format!("{}: {}", path.display(), inner))
        }
        other => other,
    })
}

/// 加载目录下所有 `*.json` 应用（按文件名排序）
///
/// 应用名重复为配置错误；悬空引用只告警。
pub async fn load_applications(dir: &Path, storage_root: &Path) -> Result<Vec<Application>> {
    let mut paths = Vec::new();
    let mut entries = fs::read_dir(dir).await.map_err(|e| {
        Error::configuration(format!(
            "cannot read applications directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut seen = HashSet::new();
    let mut applications = Vec::with_capacity(paths.len());
    for path in paths {
        let app = load_application(&path, storage_root).await?;
        if !seen.insert(app.name().to_string()) {
            return Err(Error::configuration(format!(
                "application '{}' is defined more than once ({})",
                app.name(),
                path.display()
            )));
        }

        for problem in app.validate() {
            warn!(application = %app.name(), "{}", problem);
        }
        info!(
            application = %app.name(),
            layers = app.layers().len(),
            crons = app.crons().len(),
            path = %path.display(),
            "Loaded application"
        );
        applications.push(app);
    }

    Ok(applications)
}

/// 从已解析的 JSON 值构建应用
pub fn application_from_value(value: Value, storage_root: &Path) -> Result<Application> {
    let doc: ApplicationDoc = serde_json::from_value(value)?;
    build_application(doc, storage_root)
}
