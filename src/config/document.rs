//! 应用描述文件结构
//!
//! JSON 文档的原始形态；未知字段一律拒绝。转换为领域模型见 `loader`。

use serde::Deserialize;
use serde_json::{Map, Value};

/// 应用描述文件
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApplicationDoc {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub directories: Vec<DirectoryDoc>,
    /// 自动挂载到所有非数据 layer 的数据 layer 名称
    #[serde(default)]
    pub auto_mount: Vec<String>,
    /// layer 名称 -> LayerDoc，保持文档顺序
    #[serde(default)]
    pub layers: Map<String, Value>,
    #[serde(default)]
    pub crons: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DirectoryDoc {
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// 单个 layer
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LayerDoc {
    pub image: String,
    #[serde(default)]
    pub data_only: bool,
    #[serde(default)]
    pub run_only: bool,
    #[serde(default)]
    pub command: Option<CommandDoc>,
    #[serde(default)]
    pub restart: bool,
    #[serde(default)]
    pub mem_limit: Option<String>,
    #[serde(default)]
    pub cpu_shares: Option<i64>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortDoc>,
    #[serde(default)]
    pub labels: Vec<NameValueDoc>,
    #[serde(default)]
    pub links: Vec<LinkDoc>,
    #[serde(default)]
    pub volumes: Vec<VolumeDoc>,
    #[serde(default)]
    pub volumes_from: Vec<VolumeFromDoc>,
    #[serde(default)]
    pub environment: Vec<NameValueDoc>,
    #[serde(default)]
    pub run_after: Vec<RunAfterDoc>,
}

/// 命令：字符串或字符串数组
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CommandDoc {
    One(String),
    Many(Vec<String>),
}

impl CommandDoc {
    /// 统一为数组：单个字符串包装为一个元素，不做分词
    pub fn into_vec(self) -> Vec<String> {
        match self {
            CommandDoc::One(command) => vec![command],
            CommandDoc::Many(commands) => commands,
        }
    }
}

/// 可选命令统一为数组，缺省为空数组
pub fn normalize_command(command: Option<CommandDoc>) -> Vec<String> {
    command.map(CommandDoc::into_vec).unwrap_or_default()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PortDoc {
    pub container_port: u16,
    #[serde(default)]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default = "default_true")]
    pub tcp: bool,
    #[serde(default)]
    pub udp: bool,
}

fn default_true() -> bool {
    true
}

/// 环境变量 / 标签
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameValueDoc {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl NameValueDoc {
    /// 值转字符串；字符串原样，数字/布尔按 JSON 表示，null 为空串
    pub fn value_string(&self) -> Option<String> {
        match &self.value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null => Some(String::new()),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LinkDoc {
    pub container: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VolumeDoc {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VolumeFromDoc {
    pub container: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunAfterDoc {
    pub layer: String,
    #[serde(default)]
    pub command: Option<CommandDoc>,
}

/// cron 条目
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CronDoc {
    /// cron 表达式
    pub at: String,
    /// 目标 run-only layer
    pub run: String,
    #[serde(default)]
    pub command: Option<CommandDoc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_normalization() {
        let doc: LayerDoc = serde_json::from_value(json!({
            "image": "busybox",
            "command": "echo hello"
        }))
        .unwrap();
        assert_eq!(normalize_command(doc.command), vec!["echo hello"]);

        let doc: LayerDoc = serde_json::from_value(json!({
            "image": "busybox",
            "command": ["echo", "hello"]
        }))
        .unwrap();
        assert_eq!(normalize_command(doc.command), vec!["echo", "hello"]);

        let doc: LayerDoc = serde_json::from_value(json!({ "image": "busybox" })).unwrap();
        assert!(normalize_command(doc.command).is_empty());
    }

    #[test]
    fn test_port_defaults() {
        let port: PortDoc = serde_json::from_value(json!({ "containerPort": 80 })).unwrap();
        assert!(port.tcp);
        assert!(!port.udp);
        assert!(port.host_port.is_none());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<LayerDoc, _> = serde_json::from_value(json!({
            "image": "busybox",
            "imgae": "typo"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_name_value_string() {
        let entry: NameValueDoc =
            serde_json::from_value(json!({ "name": "PORT", "value": 8080 })).unwrap();
        assert_eq!(entry.value_string().as_deref(), Some("8080"));

        let entry: NameValueDoc =
            serde_json::from_value(json!({ "name": "DEBUG", "value": true })).unwrap();
        assert_eq!(entry.value_string().as_deref(), Some("true"));

        let entry: NameValueDoc =
            serde_json::from_value(json!({ "name": "BAD", "value": [1, 2] })).unwrap();
        assert!(entry.value_string().is_none());
    }

    #[test]
    fn test_layer_order_preserved() {
        let doc: ApplicationDoc = serde_json::from_value(json!({
            "name": "shop",
            "layers": {
                "web": { "image": "nginx" },
                "api": { "image": "shop/api" },
                "db": { "image": "postgres" }
            }
        }))
        .unwrap();
        let names: Vec<&String> = doc.layers.keys().collect();
        assert_eq!(names, vec!["web", "api", "db"]);
    }
}
