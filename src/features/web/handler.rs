use axum::{
    Router,
    extract::State,
    http::{HeaderMap, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::Serialize;

use crate::{error::AppError, state::AppState};

use super::templates::INDEX_TEMPLATE;

#[derive(Serialize)]
struct IndexContext<'a> {
    csrf_token: &'a str,
    max_upload_mb: u64,
}

/// 首页：渲染上传页面并下发 CSRF 令牌
pub async fn index(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let issued = state
        .csrf
        .issue_for(&headers, chrono::Utc::now().timestamp());

    let html = state.templates.render(
        INDEX_TEMPLATE,
        &IndexContext {
            csrf_token: &issued.token,
            max_upload_mb: state.validator.max_bytes() / (1024 * 1024),
        },
    )?;

    let mut res = Html(html).into_response();
    if let Some(cookie) = issued.set_cookie {
        res.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    Ok(res)
}

pub fn create_web_router() -> Router<AppState> {
    Router::new().route("/", get(index))
}
