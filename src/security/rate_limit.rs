use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{config::RateLimitConfig, error::AppError};

/// 计数表超过该规模时清理过期窗口
const PRUNE_THRESHOLD: usize = 50_000;

/// 不参与限流的路径前缀
const EXEMPT_PREFIXES: &[&str] = &["/health", "/static", "/api-docs"];

/// 单独声明限额的路由
pub const REMOVE_BG_PATH: &str = "/remove-bg";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("无法解析限流规则: {0:?}")]
pub struct RateLimitParseError(pub String);

/// 限流窗口单位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl RateUnit {
    fn secs(self) -> u64 {
        match self {
            RateUnit::Second => 1,
            RateUnit::Minute => 60,
            RateUnit::Hour => 3600,
            RateUnit::Day => 86_400,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let unit = raw.trim().to_ascii_lowercase();
        let unit = unit.strip_suffix('s').unwrap_or(unit.as_str());
        match unit {
            "second" | "sec" => Some(RateUnit::Second),
            "minute" | "min" => Some(RateUnit::Minute),
            "hour" => Some(RateUnit::Hour),
            "day" => Some(RateUnit::Day),
            _ => None,
        }
    }
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RateUnit::Second => "second",
            RateUnit::Minute => "minute",
            RateUnit::Hour => "hour",
            RateUnit::Day => "day",
        })
    }
}

/// 一条限额：`amount` 次 / `multiple` 个 `unit`
///
/// 支持 `10 per minute`、`50/hour`、`200 per 1 day`、`5 per 10 seconds` 等写法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub amount: u32,
    pub multiple: u32,
    pub unit: RateUnit,
}

impl RateLimit {
    pub fn window_secs(&self) -> u64 {
        u64::from(self.multiple.max(1)) * self.unit.secs()
    }
}

impl FromStr for RateLimit {
    type Err = RateLimitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || RateLimitParseError(s.to_string());
        let lower = s.trim().to_ascii_lowercase();
        let (amount, period) = lower
            .split_once(" per ")
            .or_else(|| lower.split_once('/'))
            .ok_or_else(err)?;

        let amount: u32 = amount.trim().parse().map_err(|_| err())?;
        let mut words = period.split_whitespace();
        let (multiple, unit) = match (words.next(), words.next(), words.next()) {
            (Some(unit), None, None) => (1, unit),
            (Some(n), Some(unit), None) => (n.parse().map_err(|_| err())?, unit),
            _ => return Err(err()),
        };
        let unit = RateUnit::parse(unit).ok_or_else(err)?;
        if amount == 0 || multiple == 0 {
            return Err(err());
        }
        Ok(Self {
            amount,
            multiple,
            unit,
        })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {} {}", self.amount, self.multiple, self.unit)
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    slot: i64,
    window_end: i64,
    count: u32,
}

/// 进程内固定窗口计数器
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按存储地址创建；目前只有内存实现，其他地址告警后回退。
    pub fn from_storage_url(url: &str) -> Self {
        if !url.trim().starts_with("memory://") {
            tracing::warn!(storage_url = %url, "不支持的限流存储，回退到进程内存计数");
        }
        Self::new()
    }

    /// 计一次请求；超限时返回距离窗口重置的秒数。
    pub async fn hit(&self, key: &str, limit: &RateLimit, now_ts: i64) -> Result<(), u64> {
        let window = i64::try_from(limit.window_secs()).unwrap_or(i64::MAX);
        let slot = now_ts.div_euclid(window);
        let window_end = (slot + 1).saturating_mul(window);

        let mut guard = self.windows.lock().await;
        let entry = guard.entry(key.to_string()).or_insert(RateWindow {
            slot,
            window_end,
            count: 0,
        });
        if entry.slot != slot {
            *entry = RateWindow {
                slot,
                window_end,
                count: 0,
            };
        }

        if entry.count >= limit.amount {
            let retry_after = (entry.window_end - now_ts).max(1) as u64;
            return Err(retry_after);
        }
        entry.count += 1;

        if guard.len() > PRUNE_THRESHOLD {
            guard.retain(|_, w| w.window_end > now_ts);
        }
        Ok(())
    }
}

/// 路由 → 限额的映射策略
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    enabled: bool,
    defaults: Vec<RateLimit>,
    routes: Vec<(String, Vec<RateLimit>)>,
    trust_proxy_headers: bool,
}

impl RateLimitPolicy {
    pub fn from_config(cfg: &RateLimitConfig) -> Result<Self, RateLimitParseError> {
        let defaults = cfg
            .default_limits
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>, _>>()?;
        let remove_bg = cfg.remove_bg_limit.parse()?;
        Ok(Self {
            enabled: cfg.enabled,
            defaults,
            routes: vec![(REMOVE_BG_PATH.to_string(), vec![remove_bg])],
            trust_proxy_headers: cfg.trust_proxy_headers,
        })
    }

    /// 路由级限额替代默认限额；豁免路径返回 None。
    pub fn limits_for(&self, path: &str) -> Option<&[RateLimit]> {
        if !self.enabled || EXEMPT_PREFIXES.iter().any(|p| path.starts_with(p)) {
            return None;
        }
        let limits = self
            .routes
            .iter()
            .find(|(route, _)| route == path)
            .map(|(_, limits)| limits.as_slice())
            .unwrap_or(&self.defaults);
        (!limits.is_empty()).then_some(limits)
    }

    fn client_key(&self, req: &Request) -> String {
        if self.trust_proxy_headers
            && let Some(ip) = client_ip_from_headers(req.headers())
        {
            return ip;
        }
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn client_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(v) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
    {
        let ip = v.trim();
        if !ip.is_empty() {
            return Some(ip.to_string());
        }
    }
    if let Some(v) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let ip = v.trim();
        if !ip.is_empty() {
            return Some(ip.to_string());
        }
    }
    None
}

/// 限流中间件共享状态
#[derive(Debug)]
pub struct RateLimitGuard {
    pub policy: RateLimitPolicy,
    pub limiter: RateLimiter,
}

pub async fn rate_limit_middleware(
    State(guard): State<Arc<RateLimitGuard>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let Some(limits) = guard.policy.limits_for(&path) else {
        return next.run(req).await;
    };

    let client = guard.policy.client_key(&req);
    let now_ts = chrono::Utc::now().timestamp();
    for limit in limits {
        let key = format!("{path}|{limit}|{client}");
        if let Err(retry_after_secs) = guard.limiter.hit(&key, limit, now_ts).await {
            tracing::debug!(client = %client, path = %path, "限流窗口已满");
            return AppError::RateLimited {
                limit: limit.to_string(),
                retry_after_secs,
            }
            .into_response();
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const NOW: i64 = 1_700_000_000;

    fn limit(s: &str) -> RateLimit {
        s.parse().unwrap()
    }

    #[test]
    fn parses_common_notations() {
        assert_eq!(limit("10 per minute").to_string(), "10 per 1 minute");
        assert_eq!(limit("50/hour").to_string(), "50 per 1 hour");
        assert_eq!(limit("200 per 1 day").to_string(), "200 per 1 day");
        assert_eq!(limit("5 per 10 seconds").window_secs(), 10);
        assert_eq!(limit("200 per day").window_secs(), 86_400);
    }

    #[test]
    fn rejects_bad_notations() {
        for bad in ["", "ten per minute", "10 per fortnight", "0 per minute", "10"] {
            assert!(bad.parse::<RateLimit>().is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn blocks_after_amount_and_resets_next_window() {
        let limiter = RateLimiter::new();
        let l = limit("2 per minute");
        // NOW 对齐到分钟起点，便于断言
        let start = NOW - NOW.rem_euclid(60);
        assert!(limiter.hit("k", &l, start).await.is_ok());
        assert!(limiter.hit("k", &l, start + 1).await.is_ok());
        assert_eq!(limiter.hit("k", &l, start + 15).await, Err(45));
        assert!(limiter.hit("other", &l, start + 15).await.is_ok());
        assert!(limiter.hit("k", &l, start + 60).await.is_ok());
    }

    #[test]
    fn route_limits_replace_defaults_and_exempt_paths_skip() {
        let policy = RateLimitPolicy::from_config(&RateLimitConfig::default()).unwrap();
        let remove = policy.limits_for("/remove-bg").unwrap();
        assert_eq!(remove.len(), 1);
        assert_eq!(remove[0].to_string(), "10 per 1 minute");
        assert_eq!(policy.limits_for("/").unwrap().len(), 2);
        assert!(policy.limits_for("/health").is_none());
        assert!(policy.limits_for("/static/js/main.js").is_none());
        assert!(policy.limits_for("/api-docs/openapi.json").is_none());
    }

    #[test]
    fn disabled_policy_limits_nothing() {
        let cfg = RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        };
        let policy = RateLimitPolicy::from_config(&cfg).unwrap();
        assert!(policy.limits_for("/remove-bg").is_none());
    }

    #[test]
    fn client_ip_prefers_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 9.9.9.9"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("8.8.8.8"));
        assert_eq!(
            client_ip_from_headers(&headers),
            Some("1.2.3.4".to_string())
        );
    }

    #[test]
    fn proxy_headers_ignored_unless_trusted() {
        let policy = RateLimitPolicy::from_config(&RateLimitConfig::default()).unwrap();
        let req = Request::builder()
            .header("x-forwarded-for", "1.2.3.4")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(policy.client_key(&req), "unknown");

        let trusted = RateLimitPolicy::from_config(&RateLimitConfig {
            trust_proxy_headers: true,
            ..RateLimitConfig::default()
        })
        .unwrap();
        assert_eq!(trusted.client_key(&req), "1.2.3.4");
    }
}
