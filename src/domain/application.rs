//! 应用领域模型

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use super::cron::Cron;
use super::layer::Layer;

/// 应用目录
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directory {
    /// `${name}` 替换时使用的名称
    pub name: String,
    pub description: Option<String>,
    /// 已相对存储根目录解析的路径
    pub path: PathBuf,
}

impl Directory {
    /// 相对路径解析为 `{storage_root}/{application}/{path}`，绝对路径保持不变
    pub fn resolve(
        name: Option<String>,
        description: Option<String>,
        path: &str,
        storage_root: &Path,
        application: &str,
    ) -> Self {
        let raw = Path::new(path);
        let name = name.unwrap_or_else(|| {
            raw.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string())
        });
        let path = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            storage_root.join(application).join(raw)
        };
        Self {
            name,
            description,
            path,
        }
    }
}

/// 应用：一组 layer、目录和定时任务
///
/// 进程启动时从配置构建一次，之后只读。
#[derive(Clone, Debug)]
pub struct Application {
    name: String,
    description: Option<String>,
    layers: Vec<Layer>,
    directories: Vec<Directory>,
    crons: Vec<Cron>,
    auto_mount: Vec<String>,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            layers: Vec::new(),
            directories: Vec::new(),
            crons: Vec::new(),
            auto_mount: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_directory(mut self, directory: Directory) -> Self {
        self.directories.push(directory);
        self
    }

    pub fn with_cron(mut self, cron: Cron) -> Self {
        self.crons.push(cron);
        self
    }

    pub fn with_auto_mount(mut self, auto_mount: Vec<String>) -> Self {
        self.auto_mount = auto_mount;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// 按文档顺序
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// 查找 layer；不存在时为配置错误
    pub fn layer(&self, name: &str) -> Result<&Layer> {
        self.layers
            .iter()
            .find(|l| l.name() == name)
            .ok_or_else(|| Error::unknown_layer(&self.name, name))
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.layers.iter().any(|l| l.name() == name)
    }

    pub fn directories(&self) -> &[Directory] {
        &self.directories
    }

    pub fn directory(&self, name: &str) -> Option<&Directory> {
        self.directories.iter().find(|d| d.name == name)
    }

    pub fn crons(&self) -> &[Cron] {
        &self.crons
    }

    pub fn auto_mount(&self) -> &[String] {
        &self.auto_mount
    }

    /// `${name}` 查找：先应用目录，再全局目录，最后全局变量
    pub fn lookup_variable(
        &self,
        name: &str,
        global_directories: &BTreeMap<String, String>,
        global_variables: &BTreeMap<String, String>,
    ) -> Option<String> {
        self.directory(name)
            .map(|d| d.path.to_string_lossy().to_string())
            .or_else(|| global_directories.get(name).cloned())
            .or_else(|| global_variables.get(name).cloned())
    }

    /// 列出所有悬空引用
    ///
    /// 引用仍在访问时解析；这里只用于加载时提前告警。
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for name in &self.auto_mount {
            match self.layers.iter().find(|l| l.name() == name) {
                None => problems.push(format!("auto-mount layer '{}' is not defined", name)),
                Some(layer) if !layer.data_only() => problems.push(format!(
                    "auto-mount layer '{}' is not a data-only layer",
                    name
                )),
                Some(_) => {}
            }
        }

        for layer in &self.layers {
            for link in &layer.links {
                if !self.has_layer(&link.container) {
                    problems.push(format!(
                        "layer '{}' links to undefined layer '{}'",
                        layer.name(),
                        link.container
                    ));
                }
            }
            for volume_from in &layer.volumes_from {
                if !self.has_layer(&volume_from.container) {
                    problems.push(format!(
                        "layer '{}' mounts volumes from undefined layer '{}'",
                        layer.name(),
                        volume_from.container
                    ));
                }
            }
            for run_after in &layer.run_after {
                if !self.has_layer(&run_after.layer) {
                    problems.push(format!(
                        "layer '{}' runs undefined layer '{}' afterwards",
                        layer.name(),
                        run_after.layer
                    ));
                }
            }
        }

        for cron in &self.crons {
            match self.layers.iter().find(|l| l.name() == cron.run()) {
                None => problems.push(format!(
                    "cron '{}' targets undefined layer '{}'",
                    cron.name(),
                    cron.run()
                )),
                Some(layer) if !layer.run_only() => problems.push(format!(
                    "cron '{}' targets layer '{}' which is not run-only",
                    cron.name(),
                    cron.run()
                )),
                Some(_) => {}
            }
        }

        problems
    }
}
