use minijinja::Environment;
use serde::Serialize;

use crate::config::WebConfig;
use crate::error::AppError;

/// 首页模板名
pub const INDEX_TEMPLATE: &str = "index.html";

const EMBEDDED_INDEX: &str = include_str!("../../../templates/index.html");

/// 页面模板环境：默认使用编译期内嵌模板，配置了 `web.template_dir` 时改为从目录加载。
pub struct PageTemplates {
    env: Environment<'static>,
}

impl PageTemplates {
    pub fn from_config(web: &WebConfig) -> Result<Self, AppError> {
        let mut env = Environment::new();
        match web.template_dir.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(dir) => {
                tracing::info!("从目录加载页面模板: {}", dir);
                env.set_loader(minijinja::path_loader(dir));
            }
            None => env
                .add_template(INDEX_TEMPLATE, EMBEDDED_INDEX)
                .map_err(|e| AppError::Internal(format!("内嵌模板解析失败: {e}")))?,
        }
        Ok(Self { env })
    }

    pub fn render<T: Serialize>(&self, name: &str, ctx: &T) -> Result<String, AppError> {
        let tpl = self
            .env
            .get_template(name)
            .map_err(|e| AppError::Internal(format!("加载页面模板失败（{name}）: {e}")))?;
        tpl.render(ctx)
            .map_err(|e| AppError::Internal(format!("渲染页面模板失败（{name}）: {e}")))
    }
}
