use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 开发环境默认签名密钥（生产环境必须覆盖）
pub const DEV_SECRET_KEY: &str = "default-dev-key";

/// 默认上传大小上限：16 MiB
pub const DEFAULT_MAX_CONTENT_LENGTH: u64 = 16 * 1024 * 1024;

/// 兼容旧部署的扁平环境变量 → 配置键映射
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("SECRET_KEY", "security.secret_key"),
    ("MAX_CONTENT_LENGTH", "upload.max_content_length"),
    ("UPLOAD_FOLDER", "upload.upload_folder"),
    ("PROCESSED_FOLDER", "upload.processed_folder"),
    ("RATE_LIMIT_STORAGE_URL", "rate_limit.storage_url"),
    ("DEBUG", "debug"),
];

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    /// 日志格式：full | json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// 安全配置（签名密钥与 CSRF）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// CSRF 令牌签名密钥
    pub secret_key: String,
    /// 是否对非安全方法强制校验 CSRF 令牌
    pub csrf_enabled: bool,
    /// CSRF 令牌有效期（秒）
    pub csrf_time_limit_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: DEV_SECRET_KEY.to_string(),
            csrf_enabled: true,
            csrf_time_limit_secs: 3600,
        }
    }
}

impl SecurityConfig {
    pub fn uses_dev_secret(&self) -> bool {
        self.secret_key == DEV_SECRET_KEY
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// 请求体与单文件大小上限（字节）
    pub max_content_length: u64,
    /// 上传临时目录（内存处理路径不使用，仅保证存在）
    pub upload_folder: String,
    /// 处理结果目录（内存处理路径不使用，仅保证存在）
    pub processed_folder: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            upload_folder: "uploads".to_string(),
            processed_folder: "processed".to_string(),
        }
    }
}

/// 限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// 是否启用限流
    pub enabled: bool,
    /// 计数存储位置（目前仅支持 memory://）
    pub storage_url: String,
    /// 未单独声明限额的路由使用的默认限额
    pub default_limits: Vec<String>,
    /// `/remove-bg` 的限额（替代默认限额）
    pub remove_bg_limit: String,
    /// 是否信任 X-Forwarded-For / X-Real-IP（仅在反向代理之后开启）
    pub trust_proxy_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_url: "memory://".to_string(),
            default_limits: vec!["200 per day".to_string(), "50 per hour".to_string()],
            remove_bg_limit: "10 per minute".to_string(),
            trust_proxy_headers: false,
        }
    }
}

/// 背景去除配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalConfig {
    /// 结果缓存软上限（条目数）
    pub cache_soft_limit: usize,
    /// 并发处理许可数（0=自动，取 CPU 核心数）
    pub max_parallel: u32,
    /// 内置边缘取色引擎的颜色容差（0-255）
    pub edge_tolerance: u8,
    /// PNG 压缩档位：fast | default | best
    pub png_compression: String,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            cache_soft_limit: crate::features::removal::cache::DEFAULT_SOFT_LIMIT,
            max_parallel: 0,
            edge_tolerance: 24,
            png_compression: "default".to_string(),
        }
    }
}

impl RemovalConfig {
    /// 实际生效的并发许可数
    pub fn effective_parallelism(&self) -> usize {
        match self.max_parallel {
            0 => num_cpus::get().max(1),
            n => n as usize,
        }
    }
}

/// 页面与静态资源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// 静态资源目录（挂载到 /static）
    pub static_dir: String,
    /// 外部模板目录；为空时使用编译期内嵌的模板
    pub template_dir: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            static_dir: "static".to_string(),
            template_dir: None,
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// 等待进行中任务完成的超时时间（秒）
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl ShutdownConfig {
    pub fn timeout_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub upload: UploadConfig,
    pub rate_limit: RateLimitConfig,
    pub removal: RemovalConfig,
    pub web: WebConfig,
    pub shutdown: ShutdownConfig,
    /// 调试模式：提升默认日志级别
    pub debug: bool,
}

impl AppConfig {
    /// 从 `config.toml`（可选）与环境变量加载配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("config.toml"), |key| std::env::var(key).ok())
    }

    /// 按优先级合并：默认值 < 配置文件 < `APP_` 前缀环境变量 < 扁平旧变量。
    ///
    /// `lookup` 用于读取扁平旧变量，测试中可替换为固定映射。
    pub fn load_from<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        tracing::debug!("正在从 {:?} 加载配置文件", path);

        let mut builder = ConfigBuilder::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            // 例如：APP_SERVER__PORT=8080
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        for (key, value) in legacy_overrides(lookup) {
            builder = builder.set_override(key, value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn upload_path(&self) -> PathBuf {
        PathBuf::from(&self.upload.upload_folder)
    }

    pub fn processed_path(&self) -> PathBuf {
        PathBuf::from(&self.upload.processed_folder)
    }

    /// 默认日志过滤指令（RUST_LOG 未设置时使用）
    pub fn default_log_filter(&self) -> String {
        let level = if self.debug {
            "debug"
        } else {
            self.logging.level.as_str()
        };
        format!("snaperase={level},tower_http={level}")
    }
}

/// 收集已设置的扁平旧变量，返回 (配置键, 值)。
fn legacy_overrides<F>(lookup: F) -> Vec<(&'static str, String)>
where
    F: Fn(&str) -> Option<String>,
{
    LEGACY_ENV_KEYS
        .iter()
        .filter_map(|(env_key, cfg_key)| {
            lookup(env_key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (*cfg_key, v))
        })
        .collect()
}
