use std::time::Instant;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Multipart, Query, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::{error::AppError, state::AppState};

use super::fingerprint::Fingerprint;
use super::models::{OutputFormat, RESULT_DISPOSITION, RemoveBgJsonResponse, RemoveBgQuery};
use super::validator::UploadedImage;

/// 表单中图片字段名
const IMAGE_FIELD: &str = "image";

fn map_multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge
    } else {
        AppError::MalformedUpload(err.body_text())
    }
}

/// 取出第一个带文件名的 `image` 字段；同名的普通文本字段不算上传文件。
///
/// 找到图片后仍读完剩余字段，整个请求体都受传输层上限约束。
async fn read_image_field(multipart: &mut Multipart) -> Result<Option<UploadedImage>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(map_multipart_error)? {
        if upload.is_some() || field.name() != Some(IMAGE_FIELD) {
            // 丢弃内容，只为推进读取进度
            field.bytes().await.map_err(map_multipart_error)?;
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            field.bytes().await.map_err(map_multipart_error)?;
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(map_multipart_error)?;

        upload = Some(UploadedImage {
            bytes,
            content_type,
            file_name: Some(file_name),
        });
    }
    Ok(upload)
}

async fn process_upload(state: &AppState, upload: UploadedImage) -> Result<Bytes, AppError> {
    let _permit = state
        .processing_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| AppError::Internal(format!("获取处理信号量失败: {e}")))?;

    let adapter = state.remover.clone();
    let t_process = Instant::now();
    // 推理/编码为 CPU 密集操作，移出 tokio worker
    let png = tokio::task::spawn_blocking(move || adapter.remove_background(&upload.bytes))
        .await
        .map_err(|e| AppError::Internal(format!("背景去除任务异常退出: {e}")))??;

    tracing::debug!(
        engine = state.remover.engine_name(),
        elapsed_ms = t_process.elapsed().as_millis() as u64,
        output_bytes = png.len(),
        "背景去除完成"
    );
    Ok(Bytes::from(png))
}

fn render_result(format: OutputFormat, png: Bytes) -> Response {
    match format {
        OutputFormat::Json => Json(RemoveBgJsonResponse {
            success: true,
            image: format!("data:image/png;base64,{}", STANDARD.encode(&png)),
        })
        .into_response(),
        OutputFormat::Attachment => {
            (
                [
                    (header::CONTENT_TYPE, HeaderValue::from_static("image/png")),
                    (
                        header::CONTENT_DISPOSITION,
                        HeaderValue::from_static(RESULT_DISPOSITION),
                    ),
                ],
                png,
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/remove-bg",
    summary = "去除图片背景",
    description = "上传 png/jpeg/webp 图片（multipart 字段 `image`），返回去除背景后的透明 PNG。相同内容的图片会命中结果缓存。需要在 `X-CSRFToken` 头中携带首页下发的 CSRF token。",
    params(RemoveBgQuery),
    request_body(content = super::models::RemoveBgUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "PNG 附件（默认）或 JSON（format=json）", body = RemoveBgJsonResponse),
        (status = 400, description = "缺少图片 / 类型不支持 / 文件过大 / CSRF 校验失败", body = crate::error::ErrorBody),
        (status = 413, description = "请求体超过上限", body = crate::error::ErrorBody),
        (status = 429, description = "触发限流", body = crate::error::ErrorBody),
        (status = 500, description = "处理失败", body = crate::error::ErrorBody)
    ),
    tag = "Removal"
)]
pub async fn remove_background(
    State(state): State<AppState>,
    Query(query): Query<RemoveBgQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    // 非 multipart 请求等同于没有上传文件
    let Ok(mut multipart) = multipart else {
        return Err(AppError::NoImage);
    };
    let upload = read_image_field(&mut multipart)
        .await?
        .ok_or(AppError::NoImage)?;

    state.validator.validate(&upload)?;

    let fingerprint = Fingerprint::of(&upload.bytes);
    let png = match state.result_cache.get(&fingerprint) {
        Some(hit) => {
            tracing::info!(fingerprint = %fingerprint, "结果缓存命中");
            hit
        }
        None => {
            tracing::info!(
                fingerprint = %fingerprint,
                size = upload.size(),
                mimetype = %upload.mimetype(),
                "结果缓存未命中，开始处理"
            );
            let png = process_upload(&state, upload).await?;
            state.result_cache.put(fingerprint, png.clone());
            png
        }
    };

    Ok(render_result(query.output_format(), png))
}

pub fn create_removal_router() -> Router<AppState> {
    Router::new().route("/remove-bg", post(remove_background))
}
