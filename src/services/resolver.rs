//! 依赖解析
//!
//! 只看 layer 的直接依赖（links / volumesFrom / auto-mount），
//! 每个依赖 layer 被启动时再自行解析它自己的依赖。

use crate::domain::application::Application;
use crate::domain::layer::Layer;
use crate::error::{Error, Result};
use crate::state::Context;

use super::lifecycle::is_up;

/// 尚未在线的直接依赖，保持 `dependent_layers` 的顺序
///
/// 引用了未定义的 layer 时为配置错误。
pub async fn pending_dependencies<'a>(
    ctx: &Context,
    app: &'a Application,
    layer: &Layer,
) -> Result<Vec<&'a Layer>> {
    let mut pending = Vec::new();
    for name in layer.dependent_layers(app) {
        let dependency = app.layer(&name).map_err(|_| {
            Error::configuration(format!(
                "layer '{}' in '{}' depends on undefined layer '{}'",
                layer.name(),
                app.name(),
                name
            ))
        })?;
        if !is_up(ctx, dependency).await {
            pending.push(dependency);
        }
    }
    Ok(pending)
}

/// 所有直接依赖都已在线
pub async fn can_run(ctx: &Context, app: &Application, layer: &Layer) -> Result<bool> {
    Ok(pending_dependencies(ctx, app, layer).await?.is_empty())
}
