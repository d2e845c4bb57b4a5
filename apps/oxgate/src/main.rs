//! oxgate：物联网边缘网关运行时数据面。
//!
//! 启动顺序：配置 → 日志 → 三个 SQLite 库 → 引擎与派发循环 →
//! 通知清理循环 → 等待退出信号后取消根令牌。

use ox_config::AppConfig;
use ox_engine::{Engine, EngineServices, ReplayConfig};
use ox_store::{DataCenter, KvStore, LostCache, NotifyStore, connect_pool};
use ox_telemetry::init_tracing;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 单目标离线缓存行数上限。
const LOST_CACHE_MAX_ROWS: i64 = 10_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    // 三个库文件分别承载通知日志、离线缓存与数据中心
    let notify_pool = connect_pool(&config.notify_db_path).await?;
    let notify = Arc::new(NotifyStore::init(notify_pool).await?);
    let cache_pool = connect_pool(&config.lostcache_db_path).await?;
    let lost_cache = LostCache::init(
        cache_pool,
        LOST_CACHE_MAX_ROWS,
        config.cache_ttl_seconds as i64,
    )
    .await?;
    let datacenter_pool = connect_pool(&config.datacenter_db_path).await?;
    let datacenter = Arc::new(DataCenter::new(datacenter_pool));

    let services = EngineServices {
        kv: Arc::new(KvStore::new(config.kv_max_size)),
        datacenter: Some(datacenter),
        notify: Some(Arc::clone(&notify)),
        lost_cache: Some(lost_cache),
        replay: ReplayConfig {
            batch_size: config.replay_batch_size as i64,
            interval: Duration::from_secs(5),
        },
    };
    let (engine, receivers) = Engine::new(config.max_queue_size, services);
    let dispatchers = engine.spawn_dispatchers(receivers);

    // 通知日志按天清理
    let reaper = Arc::clone(&notify);
    let reaper_token = engine.root_token();
    let debug_mode = config.debug_mode;
    tokio::spawn(async move {
        reaper.run_reaper(reaper_token, debug_mode).await;
    });

    info!(
        source_types = ?engine.source_types(),
        driver_types = ?engine.driver_types(),
        target_types = ?engine.target_types(),
        "oxgate started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    engine.shutdown();
    for handle in dispatchers {
        let _ = handle.await;
    }
    info!("oxgate stopped");
    Ok(())
}
