#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, header},
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use snaperase::features::removal::{BackgroundRemover, SegmentationError, SegmentationOutput};
use snaperase::{AppConfig, AppState, build_app};

pub const BOUNDARY: &str = "snaperase-test-boundary";

/// 记录调用次数的引擎：原样返回输入（转为 RGBA），或按需失败
#[derive(Default)]
pub struct CountingEngine {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingEngine {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BackgroundRemover for CountingEngine {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn remove(&self, image: DynamicImage) -> Result<SegmentationOutput, SegmentationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SegmentationError::Failed("inference backend unavailable".into()));
        }
        Ok(SegmentationOutput::Image(DynamicImage::ImageRgba8(
            image.to_rgba8(),
        )))
    }
}

/// CSRF 关闭、静态目录指向仓库内 `static/` 的测试配置
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.security.csrf_enabled = false;
    config.web.static_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/static").to_string();
    config
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub engine: Arc<CountingEngine>,
}

impl TestApp {
    pub fn new(config: AppConfig) -> Self {
        Self::with_engine(config, Arc::new(CountingEngine::default()))
    }

    pub fn with_engine(config: AppConfig, engine: Arc<CountingEngine>) -> Self {
        let state = AppState::from_config(&config, engine.clone()).expect("build state");
        let router = build_app(state.clone(), &config);
        Self {
            router,
            state,
            engine,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router.clone().oneshot(req).await.expect("oneshot")
    }
}

pub fn red_png() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).expect("encode png");
    buf.into_inner()
}

/// multipart 报文中的一个字段：(字段名, 文件名, Content-Type, 内容)
pub type Part<'a> = (&'a str, Option<&'a str>, &'a str, &'a [u8]);

/// 手工拼接 multipart/form-data 报文
pub fn multipart_parts(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, file_name, content_type, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{field}\"\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_body(
    field: &str,
    file_name: Option<&str>,
    content_type: &str,
    data: &[u8],
) -> Vec<u8> {
    multipart_parts(&[(field, file_name, content_type, data)])
}

pub fn upload_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("build request")
}

pub fn png_upload(uri: &str, data: &[u8]) -> Request<Body> {
    upload_request(uri, multipart_body("image", Some("red.png"), "image/png", data))
}

pub async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
    to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body")
        .to_vec()
}

pub async fn body_json(resp: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).expect("parse json")
}
