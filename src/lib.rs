/// 统一错误处理模块
pub mod error;

/// 配置模块
pub mod config;

/// 启动检查模块
pub mod startup;

/// 功能聚合模块
pub mod features;

/// 安全相关中间件（安全头 / CSRF / 限流）
pub mod security;

/// 应用状态聚合模块
pub mod state;

/// 路由与中间件组装
pub mod app;

/// OpenAPI 文档
pub mod openapi;

/// 请求 ID 中间件
pub mod request_id;

/// 优雅退出管理模块
pub mod shutdown;

// 导出常用类型供外部使用
pub use app::build_app;
pub use config::AppConfig;
pub use error::AppError;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::AppState;
