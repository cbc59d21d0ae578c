//! 浏览器安全头、CSRF 防护与请求限流

pub mod csrf;
pub mod headers;
pub mod rate_limit;

pub use csrf::{CsrfError, CsrfGuard, csrf_middleware};
pub use headers::security_headers_middleware;
pub use rate_limit::{RateLimitGuard, RateLimitPolicy, RateLimiter, rate_limit_middleware};
