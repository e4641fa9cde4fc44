use rts_reconcile::{api, AppConfig, MemoryStore, PgStore, ReconcileService, ReconcileStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::from_env();
    info!("Starting server with config: {:?}", config);

    // 创建存储
    let store: Arc<dyn ReconcileStore> = if config.database.is_memory() {
        warn!("Using in-memory store, data will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        let store = PgStore::connect(&config.database).await?;
        info!("Database pool created");
        Arc::new(store)
    };

    let service = Arc::new(ReconcileService::new(
        store,
        config.cache.ttl(),
        config.summary.snapshot_path.clone(),
    ));

    let app = api::router(service);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  PUT    /api/manifests/:date            - upload manifest");
    info!("  POST   /api/manifests/:date/scan       - scan barcode");
    info!("  GET    /api/manifests/:date/couriers   - courier distribution");
    info!("  GET    /api/summary?force=true         - aggregate summary");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
