use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::features::removal::{
    BackgroundRemover, ImageValidator, PngCompression, RemovalAdapter, ResultCache,
};
use crate::features::web::PageTemplates;
use crate::security::{CsrfGuard, RateLimitGuard, RateLimitPolicy, RateLimiter};

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    /// 上传校验器
    pub validator: Arc<ImageValidator>,
    /// 背景去除引擎适配层
    pub remover: RemovalAdapter,
    /// 处理结果缓存（指纹 → PNG）
    pub result_cache: Arc<ResultCache>,
    /// 控制并发处理的信号量（限制 CPU 密集型任务数量）
    pub processing_semaphore: Arc<Semaphore>,
    /// 信号量总许可数（退出时用于回收全部许可）
    pub processing_permits: u32,
    /// CSRF 令牌签发与校验
    pub csrf: Arc<CsrfGuard>,
    /// 限流策略与计数器
    pub rate_limit: Arc<RateLimitGuard>,
    /// 页面模板
    pub templates: Arc<PageTemplates>,
}

impl AppState {
    pub fn from_config(
        config: &AppConfig,
        engine: Arc<dyn BackgroundRemover>,
    ) -> Result<Self, AppError> {
        let permits = u32::try_from(config.removal.effective_parallelism())
            .unwrap_or(u32::MAX)
            .max(1);

        let policy = RateLimitPolicy::from_config(&config.rate_limit)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let csrf = CsrfGuard::new(
            &config.security.secret_key,
            config.security.csrf_time_limit_secs,
            config.security.csrf_enabled,
        )
        .map_err(|e| AppError::Internal(format!("CSRF 密钥初始化失败: {e}")))?;

        Ok(Self {
            validator: Arc::new(ImageValidator::new(config.upload.max_content_length)),
            remover: RemovalAdapter::new(
                engine,
                PngCompression::from_config(&config.removal.png_compression),
            ),
            result_cache: Arc::new(ResultCache::new(config.removal.cache_soft_limit)),
            processing_semaphore: Arc::new(Semaphore::new(permits as usize)),
            processing_permits: permits,
            csrf: Arc::new(csrf),
            rate_limit: Arc::new(RateLimitGuard {
                policy,
                limiter: RateLimiter::from_storage_url(&config.rate_limit.storage_url),
            }),
            templates: Arc::new(PageTemplates::from_config(&config.web)?),
        })
    }

    /// 等待进行中的背景去除任务结束：回收全部处理许可并关闭信号量。
    ///
    /// 超时返回 false，此时仍有任务在阻塞线程池中运行。
    pub async fn drain_processing(&self, timeout: Duration) -> bool {
        let sem = self.processing_semaphore.clone();
        match tokio::time::timeout(timeout, sem.acquire_many(self.processing_permits)).await {
            Ok(Ok(_permits)) => {
                self.processing_semaphore.close();
                true
            }
            Ok(Err(_closed)) => true,
            Err(_) => false,
        }
    }
}
