//! CSRF 防护
//!
//! 首页下发会话 nonce（HttpOnly Cookie）与签名令牌 `<nonce>.<issued_at>.<hmac>`，
//! 非安全方法必须在请求头中带回令牌；校验签名、有效期以及与 Cookie 中 nonce 的一致性。

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// 会话 nonce 所在的 Cookie 名
pub const CSRF_COOKIE_NAME: &str = "snaperase_csrf";

/// 依次查找的令牌请求头
pub const CSRF_HEADER_NAMES: &[&str] = &["x-csrftoken", "x-csrf-token"];

/// CSRF 校验失败原因（文案直接返回给客户端）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CsrfError {
    #[error("The CSRF token is missing.")]
    TokenMissing,
    #[error("The CSRF session token is missing.")]
    SessionTokenMissing,
    #[error("The CSRF token is invalid.")]
    Invalid,
    #[error("The CSRF token has expired.")]
    Expired,
    #[error("The CSRF tokens do not match.")]
    Mismatch,
}

/// 签发与校验 CSRF 令牌
#[derive(Clone)]
pub struct CsrfGuard {
    /// 以密钥初始化好的 MAC，每次签名/校验时克隆一份
    mac: HmacSha256,
    time_limit_secs: i64,
    enabled: bool,
}

/// 首页渲染时需要的令牌，以及（新会话时）需要下发的 Cookie
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub set_cookie: Option<HeaderValue>,
}

impl CsrfGuard {
    pub fn new(
        secret_key: &str,
        time_limit_secs: u64,
        enabled: bool,
    ) -> Result<Self, InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret_key.as_bytes())?,
            time_limit_secs: i64::try_from(time_limit_secs).unwrap_or(i64::MAX),
            enabled,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn mac(&self) -> HmacSha256 {
        self.mac.clone()
    }

    fn sign(&self, nonce: &str, issued_at: i64) -> String {
        let mut mac = self.mac();
        mac.update(nonce.as_bytes());
        mac.update(b".");
        mac.update(issued_at.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// 为给定会话 nonce 签发令牌
    pub fn issue(&self, nonce: &str, now_ts: i64) -> String {
        format!("{nonce}.{now_ts}.{}", self.sign(nonce, now_ts))
    }

    /// 复用请求中已有的会话 nonce；没有则生成新的并附带 Set-Cookie。
    pub fn issue_for(&self, headers: &HeaderMap, now_ts: i64) -> IssuedToken {
        if let Some(nonce) = session_nonce(headers) {
            return IssuedToken {
                token: self.issue(&nonce, now_ts),
                set_cookie: None,
            };
        }

        let nonce = new_nonce();
        let cookie = format!("{CSRF_COOKIE_NAME}={nonce}; Path=/; HttpOnly; SameSite=Lax");
        IssuedToken {
            token: self.issue(&nonce, now_ts),
            set_cookie: HeaderValue::from_str(&cookie).ok(),
        }
    }

    pub fn verify(
        &self,
        token: Option<&str>,
        session_nonce: Option<&str>,
        now_ts: i64,
    ) -> Result<(), CsrfError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(CsrfError::TokenMissing)?;
        let session_nonce = session_nonce
            .filter(|n| !n.is_empty())
            .ok_or(CsrfError::SessionTokenMissing)?;

        let mut parts = token.splitn(3, '.');
        let (Some(nonce), Some(ts), Some(sig)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(CsrfError::Invalid);
        };
        let issued_at: i64 = ts.parse().map_err(|_| CsrfError::Invalid)?;
        let sig = hex::decode(sig).map_err(|_| CsrfError::Invalid)?;

        let mut mac = self.mac();
        mac.update(nonce.as_bytes());
        mac.update(b".");
        mac.update(ts.as_bytes());
        mac.verify_slice(&sig).map_err(|_| CsrfError::Invalid)?;

        if now_ts.saturating_sub(issued_at) > self.time_limit_secs {
            return Err(CsrfError::Expired);
        }
        if nonce != session_nonce {
            return Err(CsrfError::Mismatch);
        }
        Ok(())
    }
}

fn new_nonce() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// 从 Cookie 头中取出会话 nonce
pub fn session_nonce(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == CSRF_COOKIE_NAME)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    CSRF_HEADER_NAMES
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
}

fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// 对非安全方法校验 CSRF 令牌
pub async fn csrf_middleware(
    State(guard): State<Arc<CsrfGuard>>,
    req: Request,
    next: Next,
) -> Response {
    if !guard.is_enabled() || is_safe_method(req.method()) {
        return next.run(req).await;
    }

    let headers = req.headers();
    let nonce = session_nonce(headers);
    let now_ts = chrono::Utc::now().timestamp();
    if let Err(e) = guard.verify(token_from_headers(headers), nonce.as_deref(), now_ts) {
        return AppError::Csrf(e).into_response();
    }

    next.run(req).await
}
