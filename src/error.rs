use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::features::removal::adapter::ProcessingFailure;
use crate::features::removal::validator::ValidationError;
use crate::security::csrf::CsrfError;

/// 对外统一的 500 文案，不透出任何内部细节
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred during processing";

/// 传输层请求体超限文案
pub const PAYLOAD_TOO_LARGE_MESSAGE: &str = "File is too large. Maximum size is 16MB.";

/// 应用统一错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 请求中没有 `image` 文件字段
    #[error("No image uploaded")]
    NoImage,

    /// 上传校验失败（类型/大小/空文件）
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// multipart 报文无法解析
    #[error("Malformed multipart payload")]
    MalformedUpload(String),

    /// CSRF 校验失败
    #[error(transparent)]
    Csrf(#[from] CsrfError),

    /// 请求体超过传输层上限
    #[error("{}", PAYLOAD_TOO_LARGE_MESSAGE)]
    PayloadTooLarge,

    /// 触发限流
    #[error("Rate limit exceeded: {limit}")]
    RateLimited {
        /// 限额描述，如 `10 per 1 minute`
        limit: String,
        /// 距离窗口重置的秒数
        retry_after_secs: u64,
    },

    /// 背景去除失败
    #[error(transparent)]
    Processing(#[from] ProcessingFailure),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误响应体：`{"error": "..."}`
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// 人类可读的错误信息
    #[schema(example = "No image uploaded")]
    pub error: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NoImage
            | AppError::Validation(_)
            | AppError::MalformedUpload(_)
            | AppError::Csrf(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Processing(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回给客户端的文案；5xx 一律收敛为通用文案。
    pub fn public_message(&self) -> String {
        if self.status_code().is_server_error() {
            return INTERNAL_ERROR_MESSAGE.to_string();
        }
        self.to_string()
    }

    /// 日志事件名，每类错误单独区分
    fn log_event(&self) -> &'static str {
        match self {
            AppError::NoImage | AppError::Validation(_) => "Invalid upload attempt",
            AppError::MalformedUpload(_) => "multipart 解析失败",
            AppError::Csrf(_) => "CSRF 校验失败",
            AppError::PayloadTooLarge => "请求体超过上限",
            AppError::RateLimited { .. } => "请求触发限流",
            AppError::Processing(_) => "Processing error",
            AppError::Internal(_) => "内部错误",
        }
    }

    fn log(&self) {
        let event = self.log_event();
        match self {
            AppError::Processing(failure) => {
                tracing::error!(
                    stage = %failure.stage(),
                    error = %failure,
                    source = ?std::error::Error::source(failure),
                    "{event}"
                );
            }
            AppError::Internal(detail) => {
                tracing::error!(detail = %detail, "{event}");
            }
            AppError::MalformedUpload(detail) => {
                tracing::warn!(detail = %detail, "{event}");
            }
            AppError::RateLimited { limit, .. } => {
                tracing::info!(limit = %limit, "{event}");
            }
            AppError::Csrf(reason) => {
                tracing::warn!(reason = %reason, "{event}");
            }
            AppError::PayloadTooLarge => {
                tracing::warn!("{event}");
            }
            AppError::NoImage | AppError::Validation(_) => {
                tracing::warn!(error = %self, "{event}");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.status_code();
        let body = ErrorBody {
            error: self.public_message(),
        };

        let mut res = (status, Json(body)).into_response();
        if let AppError::RateLimited {
            retry_after_secs, ..
        } = self
            && let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string())
        {
            res.headers_mut().insert(header::RETRY_AFTER, v);
        }
        res
    }
}
