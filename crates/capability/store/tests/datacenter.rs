use ox_store::{ColumnType, DataCenter, DataSchema, SchemaColumn, connect_memory};
use serde_json::{Map, Value, json};

fn power_schema() -> DataSchema {
    DataSchema {
        uuid: "SCHEMA6DD0E21F".to_string(),
        columns: vec![
            SchemaColumn {
                name: "meter".to_string(),
                column_type: ColumnType::Text,
                description: "电表编号".to_string(),
            },
            SchemaColumn {
                name: "energy".to_string(),
                column_type: ColumnType::Float,
                description: "电能示数".to_string(),
            },
            SchemaColumn {
                name: "online".to_string(),
                column_type: ColumnType::Bool,
                description: String::new(),
            },
        ],
    }
}

fn row(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn save_and_list_pages() {
    let pool = connect_memory().await.expect("pool");
    let dc = DataCenter::new(pool);
    dc.register_schema(power_schema()).await.expect("register");

    for i in 0..5 {
        dc.save(
            "SCHEMA6DD0E21F",
            &row(json!({"meter": format!("M{i}"), "energy": i as f64 * 1.5, "online": true})),
        )
        .await
        .expect("save");
    }

    let page = dc
        .list("SCHEMA6DD0E21F", 1, 2, &[])
        .await
        .expect("list");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["meter"], json!("M4"));
    assert_eq!(page[1]["meter"], json!("M3"));

    let second = dc
        .list("SCHEMA6DD0E21F", 2, 2, &["meter".to_string()])
        .await
        .expect("list");
    assert_eq!(second[0]["meter"], json!("M2"));
    assert!(second[0].get("energy").is_none());
}

#[tokio::test]
async fn last_and_update_last() {
    let pool = connect_memory().await.expect("pool");
    let dc = DataCenter::new(pool);
    dc.register_schema(power_schema()).await.expect("register");
    dc.save(
        "SCHEMA6DD0E21F",
        &row(json!({"meter": "M1", "energy": 10.0, "online": true})),
    )
    .await
    .expect("save");
    dc.save(
        "SCHEMA6DD0E21F",
        &row(json!({"meter": "M2", "energy": 20.0, "online": false})),
    )
    .await
    .expect("save");

    let last = dc
        .last("SCHEMA6DD0E21F", &[])
        .await
        .expect("last")
        .expect("some");
    assert_eq!(last["meter"], json!("M2"));
    assert_eq!(last["online"], json!(false));

    dc.update_last("SCHEMA6DD0E21F", &row(json!({"energy": 21.5})))
        .await
        .expect("update");
    let updated = dc
        .last("SCHEMA6DD0E21F", &[])
        .await
        .expect("last")
        .expect("some");
    assert_eq!(updated["energy"], json!(21.5));
    assert_eq!(updated["meter"], json!("M2"));
}

#[tokio::test]
async fn rejects_bad_identifiers_and_unknown_columns() {
    let pool = connect_memory().await.expect("pool");
    let dc = DataCenter::new(pool);
    let mut bad = power_schema();
    bad.columns[0].name = "meter; DROP TABLE".to_string();
    assert!(dc.register_schema(bad).await.is_err());

    dc.register_schema(power_schema()).await.expect("register");
    let err = dc
        .list("SCHEMA6DD0E21F", 1, 1, &["nope".to_string()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown column"));
}
