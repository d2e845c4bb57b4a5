//! 数据中心
//!
//! 按注册模式逐表落地入站记录：每个模式（uuid + 有序列清单）
//! 对应一张本地表 oxgate_datacenter_<uuid>。列名直接拼入 SQL，
//! 注册时强制校验标识符字符集。

use crate::error::StorageError;
use crate::models::{ColumnType, DataSchema};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::sync::Mutex;

fn table_name(schema_uuid: &str) -> String {
    format!("oxgate_datacenter_{schema_uuid}")
}

fn ensure_ident(name: &str) -> Result<(), StorageError> {
    let legal = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if legal {
        Ok(())
    } else {
        Err(StorageError::new(format!("illegal identifier: {name}")))
    }
}

/// 数据中心存储。
pub struct DataCenter {
    pool: SqlitePool,
    schemas: Mutex<HashMap<String, DataSchema>>,
}

impl DataCenter {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            schemas: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DataSchema>> {
        match self.schemas.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn schema(&self, schema_uuid: &str) -> Result<DataSchema, StorageError> {
        self.lock()
            .get(schema_uuid)
            .cloned()
            .ok_or_else(|| StorageError::new(format!("schema not registered: {schema_uuid}")))
    }

    /// 注册模式并建表。
    pub async fn register_schema(&self, schema: DataSchema) -> Result<(), StorageError> {
        ensure_ident(&schema.uuid)?;
        if schema.columns.is_empty() {
            return Err(StorageError::new("schema has no columns"));
        }
        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             created_at TEXT NOT NULL DEFAULT (datetime('now'))",
            table_name(&schema.uuid)
        );
        for column in &schema.columns {
            ensure_ident(&column.name)?;
            ddl.push_str(&format!(", {} {}", column.name, column.column_type.sql_type()));
        }
        ddl.push(')');
        sqlx::query(&ddl).execute(&self.pool).await?;
        self.lock().insert(schema.uuid.clone(), schema);
        Ok(())
    }

    /// 卸载模式，保留已落地数据。
    pub fn unregister_schema(&self, schema_uuid: &str) {
        self.lock().remove(schema_uuid);
    }

    /// 按模式写入一行。
    pub async fn save(
        &self,
        schema_uuid: &str,
        row: &Map<String, Value>,
    ) -> Result<(), StorageError> {
        let schema = self.schema(schema_uuid)?;
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO {} (", table_name(schema_uuid)));
        let mut first = true;
        for column in &schema.columns {
            if !first {
                builder.push(", ");
            }
            builder.push(column.name.as_str());
            first = false;
        }
        builder.push(") VALUES (");
        let mut separated = builder.separated(", ");
        for column in &schema.columns {
            let value = row.get(&column.name);
            match column.column_type {
                ColumnType::Integer => {
                    separated.push_bind(value.and_then(Value::as_i64));
                }
                ColumnType::Bool => {
                    separated.push_bind(value.and_then(Value::as_bool).map(i64::from));
                }
                ColumnType::Float => {
                    separated.push_bind(value.and_then(Value::as_f64));
                }
                ColumnType::Text => {
                    separated.push_bind(value.map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    }));
                }
            }
        }
        drop(separated);
        builder.push(")");
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    /// 分页查询，最新在前。fields 为空时返回全部列。
    pub async fn list(
        &self,
        schema_uuid: &str,
        page: i64,
        size: i64,
        fields: &[String],
    ) -> Result<Vec<Map<String, Value>>, StorageError> {
        let schema = self.schema(schema_uuid)?;
        let selected = self.selected_columns(&schema, fields)?;
        let sql = format!(
            "SELECT id, {} FROM {} ORDER BY id DESC LIMIT ? OFFSET ?",
            selected
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            table_name(schema_uuid)
        );
        let offset = (page.max(1) - 1) * size;
        let rows = sqlx::query(&sql)
            .bind(size)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| decode_row(r, &selected)).collect()
    }

    /// 最新一行。
    pub async fn last(
        &self,
        schema_uuid: &str,
        fields: &[String],
    ) -> Result<Option<Map<String, Value>>, StorageError> {
        let mut rows = self.list(schema_uuid, 1, 1, fields).await?;
        Ok(rows.pop())
    }

    /// 原位更新最新一行的指定字段。
    pub async fn update_last(
        &self,
        schema_uuid: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), StorageError> {
        let schema = self.schema(schema_uuid)?;
        if fields.is_empty() {
            return Ok(());
        }
        let table = table_name(schema_uuid);
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!("UPDATE {table} SET "));
        let mut separated = builder.separated(", ");
        for (name, value) in fields {
            let column = schema
                .columns
                .iter()
                .find(|c| &c.name == name)
                .ok_or_else(|| StorageError::new(format!("unknown column: {name}")))?;
            separated.push(format!("{name} = "));
            match column.column_type {
                ColumnType::Integer => separated.push_bind_unseparated(value.as_i64()),
                ColumnType::Bool => {
                    separated.push_bind_unseparated(value.as_bool().map(i64::from))
                }
                ColumnType::Float => separated.push_bind_unseparated(value.as_f64()),
                ColumnType::Text => separated.push_bind_unseparated(match value {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                }),
            };
        }
        drop(separated);
        builder.push(format!(
            " WHERE id = (SELECT MAX(id) FROM {table})"
        ));
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    fn selected_columns(
        &self,
        schema: &DataSchema,
        fields: &[String],
    ) -> Result<Vec<crate::models::SchemaColumn>, StorageError> {
        if fields.is_empty() {
            return Ok(schema.columns.clone());
        }
        fields
            .iter()
            .map(|name| {
                schema
                    .columns
                    .iter()
                    .find(|c| &c.name == name)
                    .cloned()
                    .ok_or_else(|| StorageError::new(format!("unknown column: {name}")))
            })
            .collect()
    }
}

fn decode_row(
    row: &SqliteRow,
    columns: &[crate::models::SchemaColumn],
) -> Result<Map<String, Value>, StorageError> {
    let mut out = Map::new();
    let id: i64 = row.try_get("id")?;
    out.insert("id".to_string(), Value::from(id));
    for column in columns {
        let name = column.name.as_str();
        let value = match column.column_type {
            ColumnType::Integer => row
                .try_get::<Option<i64>, _>(name)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            ColumnType::Bool => row
                .try_get::<Option<i64>, _>(name)?
                .map(|v| Value::from(v != 0))
                .unwrap_or(Value::Null),
            ColumnType::Float => row
                .try_get::<Option<f64>, _>(name)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            ColumnType::Text => row
                .try_get::<Option<String>, _>(name)?
                .map(Value::from)
                .unwrap_or(Value::Null),
        };
        out.insert(name.to_string(), value);
    }
    Ok(out)
}
