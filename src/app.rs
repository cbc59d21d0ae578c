use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use utoipa::OpenApi;

use crate::config::AppConfig;
use crate::features::{health, removal, web};
use crate::openapi::ApiDoc;
use crate::request_id::request_id_middleware;
use crate::security::{
    csrf_middleware, rate_limit_middleware, security_headers_middleware,
};
use crate::state::AppState;

fn compression_predicate() -> impl tower_http::compression::predicate::Predicate {
    use tower_http::compression::predicate::{NotForContentType, Predicate, SizeAbove};

    // 处理结果本身是 PNG，压缩只浪费 CPU；页面、脚本与 JSON（含 base64 结果）照常压缩
    SizeAbove::default()
        .and(NotForContentType::GRPC)
        .and(NotForContentType::IMAGES)
        .and(NotForContentType::SSE)
        .and(NotForContentType::const_new("application/octet-stream"))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// 组装完整路由与中间件栈。
///
/// 中间件由外到内：request_id → 压缩 → 安全头 → CSRF → 限流 → 请求体上限 → handler。
///
/// CSRF 校验失败的请求不计入限流配额。
pub fn build_app(state: AppState, config: &AppConfig) -> Router {
    let body_limit = usize::try_from(config.upload.max_content_length).unwrap_or(usize::MAX);

    Router::<AppState>::new()
        .merge(web::create_web_router())
        .merge(health::create_health_router())
        .merge(removal::create_removal_router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest_service("/static", ServeDir::new(&config.web.static_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn_with_state(
            state.rate_limit.clone(),
            rate_limit_middleware,
        ))
        .layer(from_fn_with_state(state.csrf.clone(), csrf_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(CompressionLayer::new().compress_when(compression_predicate()))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

#[cfg(test)]
mod compression_predicate_tests {
    use super::compression_predicate;
    use axum::body::Body;
    use axum::http::{Response as HttpResponse, header};
    use tower_http::compression::predicate::Predicate;

    fn should_compress_for(ct: &str) -> bool {
        // 命中 SizeAbove（默认 32B），避免因为 body 太小导致测试不稳定。
        let body_bytes = vec![b'x'; 2048];
        let resp = HttpResponse::builder()
            .header(header::CONTENT_TYPE, ct)
            .body(Body::from(body_bytes))
            .unwrap();
        compression_predicate().should_compress(&resp)
    }

    #[test]
    fn result_png_is_not_compressed() {
        assert!(!should_compress_for("image/png"));
        assert!(!should_compress_for("image/webp"));
    }

    #[test]
    fn page_and_json_are_compressed() {
        assert!(should_compress_for("text/html; charset=utf-8"));
        assert!(should_compress_for("application/javascript"));
        assert!(should_compress_for("application/json"));
    }
}
