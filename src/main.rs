use std::net::SocketAddr;
use std::sync::Arc;

use snaperase::features::removal::EdgeKeyRemover;
use snaperase::shutdown::drain_in_flight;
use snaperase::startup::run_startup_checks;
use snaperase::{AppConfig, AppState, ShutdownManager, build_app};

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.default_log_filter().into());

    if config.logging.is_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    // .env 仅在存在时加载
    let dotenv_loaded = dotenv::dotenv().is_ok();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config init failed: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config);
    if dotenv_loaded {
        tracing::debug!("已加载 .env");
    }

    // 创建优雅退出管理器并启动信号处理器
    let shutdown_manager = ShutdownManager::new();
    if let Err(e) = shutdown_manager.start_signal_handler().await {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run_startup_checks(&config) {
        tracing::error!("Startup checks failed: {}", e);
        std::process::exit(1);
    }

    let engine = Arc::new(EdgeKeyRemover::new(config.removal.edge_tolerance));
    let app_state = match AppState::from_config(&config, engine) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("应用状态初始化失败: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        engine = app_state.remover.engine_name(),
        max_parallel = app_state.processing_permits,
        cache_soft_limit = app_state.result_cache.soft_limit(),
        "背景去除服务就绪"
    );

    let app = build_app(app_state.clone(), &config);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Bind address failed {}: {}", addr, e);
            std::process::exit(1);
        });

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("OpenAPI: http://{}/api-docs/openapi.json", addr);

    let shutdown_timeout = config.shutdown.timeout_duration();
    let signal_manager = shutdown_manager.clone();
    let graceful = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let reason = signal_manager.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}，开始优雅关闭HTTP服务器...", reason);
    });

    if let Err(e) = graceful.await {
        tracing::error!("服务器运行错误: {}", e);
        std::process::exit(1);
    }

    tracing::info!("优雅退出超时时间: {}秒", config.shutdown.timeout_secs);
    match drain_in_flight(&app_state, shutdown_timeout).await {
        Ok(()) => tracing::info!("服务器已优雅关闭"),
        Err(e) => tracing::warn!("{}，强制退出", e),
    }
}
