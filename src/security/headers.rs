use axum::{
    extract::Request,
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};

/// 页面只加载同源脚本与 Google Fonts，结果预览使用 data:/blob: 图片
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
script-src 'self' https://fonts.googleapis.com; \
style-src 'self' 'unsafe-inline' https://fonts.googleapis.com; \
font-src 'self' https://fonts.gstatic.com; \
img-src 'self' data: blob:; \
connect-src 'self';";

/// 为所有响应附加浏览器安全头（已存在的同名头不覆盖）。
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    let defaults = [
        (
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ),
        (
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ),
        (header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN")),
        (header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block")),
    ];
    for (name, value) in defaults {
        headers.entry(name).or_insert(value);
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn adds_all_security_headers() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(security_headers_middleware));
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let h = resp.headers();
        assert_eq!(h[header::CONTENT_SECURITY_POLICY], CONTENT_SECURITY_POLICY);
        assert!(
            h[header::CONTENT_SECURITY_POLICY]
                .to_str()
                .unwrap()
                .contains("img-src 'self' data: blob:;")
        );
        assert_eq!(h[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(h[header::X_FRAME_OPTIONS], "SAMEORIGIN");
        assert_eq!(h["x-xss-protection"], "1; mode=block");
    }

    #[tokio::test]
    async fn keeps_handler_supplied_values() {
        let app = Router::new()
            .route(
                "/",
                get(|| async { ([(header::X_FRAME_OPTIONS, "DENY")], "ok") }),
            )
            .layer(axum::middleware::from_fn(security_headers_middleware));
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.headers()[header::X_FRAME_OPTIONS], "DENY");
    }
}
