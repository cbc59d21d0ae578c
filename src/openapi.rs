use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// 在 OpenAPI 中注入 `X-CSRFToken` 的安全定义（令牌由首页 meta 标签下发）。
struct CsrfTokenSecurity;

impl Modify for CsrfTokenSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "CsrfToken",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-CSRFToken"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::health_check,
        crate::features::removal::handler::remove_background,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::features::health::handler::HealthResponse,
        crate::features::removal::models::RemoveBgJsonResponse,
    )),
    modifiers(&CsrfTokenSecurity),
    tags(
        (name = "Removal", description = "背景去除：上传图片，返回透明背景 PNG。"),
        (name = "Health", description = "健康检查：服务探活。"),
    ),
    info(
        title = "SnapErase API",
        version = env!("CARGO_PKG_VERSION"),
        description = "图片背景去除服务（Axum + utoipa）。错误响应统一为 `{\"error\": \"...\"}`。"
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::ApiDoc;
    use utoipa::OpenApi;

    #[test]
    fn document_lists_public_endpoints() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/remove-bg"));
        assert!(doc.paths.paths.contains_key("/health"));
        let schemes = doc.components.expect("components").security_schemes;
        assert!(schemes.contains_key("CsrfToken"));
    }
}
