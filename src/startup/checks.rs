use crate::config::AppConfig;
use crate::error::AppError;
use std::fs;
use std::path::Path;

/// 执行启动检查
///
/// 1. 检查并创建上传/结果目录（内存处理路径不使用，保留给旧部署的挂载点）
/// 2. 检查签名密钥是否仍为开发默认值
/// 3. 检查静态资源目录
pub fn run_startup_checks(config: &AppConfig) -> Result<(), AppError> {
    tracing::info!("🔍 开始执行启动检查...");

    ensure_folder("upload_folder", &config.upload_path())?;
    ensure_folder("processed_folder", &config.processed_path())?;

    if config.security.uses_dev_secret() {
        tracing::warn!(
            "⚠️ 正在使用开发默认签名密钥，CSRF 令牌可被伪造；生产环境请设置 SECRET_KEY"
        );
    }

    let static_dir = Path::new(&config.web.static_dir);
    if !static_dir.is_dir() {
        tracing::warn!("未找到静态资源目录: {:?}，页面脚本与样式将返回 404", static_dir);
    }

    tracing::info!("✅ 启动检查完成");
    Ok(())
}

/// 确保目录存在
fn ensure_folder(label: &str, path: &Path) -> Result<(), AppError> {
    if path.is_dir() {
        tracing::info!("✅ {} 已存在: {:?}", label, path);
        return Ok(());
    }

    tracing::warn!("📁 未找到 {}，正在创建: {:?}", label, path);
    fs::create_dir_all(path)
        .map_err(|e| AppError::Internal(format!("创建 {label} 失败: {e}")))?;
    tracing::info!("✅ {} 创建成功", label);
    Ok(())
}
