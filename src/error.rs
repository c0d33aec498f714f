//! 统一错误处理
//!
//! 所有编排操作都返回 `Result<T, Error>`；`Error::kind()` 将错误归类为
//! 配置 / 运行时 / 认证 / 状态 四类。

use thiserror::Error;

use crate::infra::runtime::RuntimeError;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 配置错误（引用了不存在的 layer / application 等），终止当前命令
    Configuration,
    /// 容器运行时调用失败，原样传播，不重试
    Runtime,
    /// 私有仓库镜像缺少认证信息
    Auth,
    /// 操作与当前观察到的状态矛盾
    State,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Auth => "auth",
            ErrorKind::State => "state",
        }
    }
}

/// 统一错误类型
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("layer '{layer}' is not defined in application '{application}'")]
    UnknownLayer { application: String, layer: String },

    #[error("application '{0}' is not defined")]
    UnknownApplication(String),

    #[error("invalid cron expression '{expression}' for {cron}: {reason}")]
    InvalidCron {
        cron: String,
        expression: String,
        reason: String,
    },

    #[error("invalid memory limit '{value}' on layer {layer}")]
    InvalidMemLimit { layer: String, value: String },

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("failed to parse application document: {0}")]
    Document(#[from] serde_json::Error),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image {image} is hosted on {repository} but no repository credentials are configured")]
    Auth { image: String, repository: String },

    #[error("{0}")]
    State(String),

    #[error("{layer} exited with status {code}")]
    RunFailed { layer: String, code: i64 },
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::State(message.into())
    }

    pub fn unknown_layer(application: impl Into<String>, layer: impl Into<String>) -> Self {
        Self::UnknownLayer {
            application: application.into(),
            layer: layer.into(),
        }
    }

    /// 归类错误
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_)
            | Error::UnknownLayer { .. }
            | Error::UnknownApplication(_)
            | Error::InvalidCron { .. }
            | Error::InvalidMemLimit { .. }
            | Error::DependencyCycle(_)
            | Error::Document(_) => ErrorKind::Configuration,
            Error::Runtime(_) | Error::Io(_) => ErrorKind::Runtime,
            Error::Auth { .. } => ErrorKind::Auth,
            Error::State(_) | Error::RunFailed { .. } => ErrorKind::State,
        }
    }
}

/// 便捷类型别名
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(
            Error::unknown_layer("app", "db").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::Auth {
                image: "registry.local/app".to_string(),
                repository: "registry.local".to_string(),
            }
            .kind(),
            ErrorKind::Auth
        );
        assert_eq!(Error::state("busy").kind(), ErrorKind::State);
        assert_eq!(
            Error::Runtime(RuntimeError::Parse("bad".to_string())).kind(),
            ErrorKind::Runtime
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::unknown_layer("shop", "db");
        assert_eq!(
            err.to_string(),
            "layer 'db' is not defined in application 'shop'"
        );

        let err = Error::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }
}
