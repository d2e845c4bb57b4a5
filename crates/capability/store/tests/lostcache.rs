use ox_store::{LostCache, connect_memory};

#[tokio::test]
async fn save_load_delete_fifo() {
    let pool = connect_memory().await.expect("pool");
    let cache = LostCache::init(pool, 100, 3600).await.expect("init");
    cache.save("OUT1", "{\"v\":1}").await.expect("save");
    cache.save("OUT1", "{\"v\":2}").await.expect("save");
    cache.save("OUT2", "{\"v\":9}").await.expect("save");

    let batch = cache.load_batch("OUT1", 10).await.expect("load");
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].payload, "{\"v\":1}");
    assert_eq!(batch[1].payload, "{\"v\":2}");

    cache.delete(batch[0].id).await.expect("delete");
    let rest = cache.load_batch("OUT1", 10).await.expect("load");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].payload, "{\"v\":2}");
    assert_eq!(cache.count("OUT2").await.expect("count"), 1);
}

#[tokio::test]
async fn capacity_evicts_oldest() {
    let pool = connect_memory().await.expect("pool");
    let cache = LostCache::init(pool, 2, 3600).await.expect("init");
    cache.save("OUT1", "a").await.expect("save");
    cache.save("OUT1", "b").await.expect("save");
    cache.save("OUT1", "c").await.expect("save");

    let batch = cache.load_batch("OUT1", 10).await.expect("load");
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].payload, "b");
    assert_eq!(batch[1].payload, "c");
}

#[tokio::test]
async fn expired_entries_purged() {
    let pool = connect_memory().await.expect("pool");
    // TTL 为 0：所有记录立即过期
    let cache = LostCache::init(pool, 100, 0).await.expect("init");
    cache.save("OUT1", "stale").await.expect("save");
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let removed = cache.purge_expired().await.expect("purge");
    assert_eq!(removed, 1);
    assert!(cache.load_batch("OUT1", 10).await.expect("load").is_empty());
}
