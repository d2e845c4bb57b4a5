use domain::NotifyType;
use ox_store::{NotifyStore, connect_memory};

#[tokio::test]
async fn push_and_list_latest_first() {
    let pool = connect_memory().await.expect("pool");
    let store = NotifyStore::init(pool).await.expect("init");
    store
        .push(NotifyType::Info, "source.start", "source IN1 started", "")
        .await
        .expect("push");
    store
        .push(NotifyType::Error, "target.down", "target OUT1 down", "connect refused")
        .await
        .expect("push");

    let rows = store.list(1, 10).await.expect("list");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].event, "target.down");
    assert_eq!(rows[0].notify_type, "ERROR");
    assert_eq!(rows[0].status, 1);
}

#[tokio::test]
async fn mark_read_and_clear() {
    let pool = connect_memory().await.expect("pool");
    let store = NotifyStore::init(pool).await.expect("init");
    store
        .push(NotifyType::Warning, "device.flaky", "device retries", "")
        .await
        .expect("push");
    let uuid = store.list(1, 1).await.expect("list")[0].uuid.clone();
    store.mark_read(&uuid).await.expect("mark");
    assert_eq!(store.list(1, 1).await.expect("list")[0].status, 2);

    store.clear().await.expect("clear");
    assert_eq!(store.count().await.expect("count"), 0);
}

#[tokio::test]
async fn insert_trigger_caps_row_count() {
    let pool = connect_memory().await.expect("pool");
    let store = NotifyStore::init(pool).await.expect("init");
    // 1100 条插入后触发器应已裁剪过最旧的批次
    for i in 0..1100 {
        store
            .push(NotifyType::Info, "tick", &format!("event {i}"), "")
            .await
            .expect("push");
    }
    let count = store.count().await.expect("count");
    assert!(count <= 1000, "count was {count}");
    // 留下的是较新的记录
    let rows = store.list(1, 1).await.expect("list");
    assert_eq!(rows[0].event, "tick");
    assert_eq!(rows[0].summary, "event 1099");
}
