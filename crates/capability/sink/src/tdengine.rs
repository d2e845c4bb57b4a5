//! TDengine 输出目标。
//!
//! 走 REST 接口执行插入 SQL。配置的模板里 `${key}` 占位符用
//! 记录 JSON 的同名字段填充；不配模板时记录本身即 SQL 文本。

use crate::{StatusCell, Target, TargetError};
use async_trait::async_trait;
use domain::EntityStatus;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn default_timeout() -> u64 {
    3000
}

/// TDengine 输出目标配置。
#[derive(Debug, Clone, Deserialize)]
pub struct TdEngineTargetConfig {
    /// REST 入口，形如 `http://host:6041`。
    pub url: String,
    pub username: String,
    pub password: String,
    pub database: String,
    /// 插入 SQL 模板，`${key}` 用记录字段填充。
    #[serde(default)]
    pub sql_template: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RestReply {
    code: i64,
    #[serde(default)]
    desc: Option<String>,
}

/// TDengine 输出目标。
pub struct TdEngineTarget {
    uuid: String,
    config: TdEngineTargetConfig,
    client: reqwest::Client,
    status: StatusCell,
}

impl TdEngineTarget {
    pub fn new(uuid: &str, config: TdEngineTargetConfig) -> Result<Self, TargetError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| TargetError::Config(e.to_string()))?;
        Ok(Self {
            uuid: uuid.to_string(),
            config,
            client,
            status: StatusCell::default(),
        })
    }

    fn rest_url(&self) -> String {
        format!(
            "{}/rest/sql/{}",
            self.config.url.trim_end_matches('/'),
            self.config.database
        )
    }

    async fn exec_sql(&self, sql: &str) -> Result<(), TargetError> {
        let response = self
            .client
            .post(self.rest_url())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .body(sql.to_string())
            .send()
            .await
            .map_err(|err| TargetError::Transient(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if status.is_client_error() {
                return Err(TargetError::Fatal(format!("tdengine status {status}")));
            }
            return Err(TargetError::Transient(format!("tdengine status {status}")));
        }
        let reply: RestReply = response
            .json()
            .await
            .map_err(|err| TargetError::Transient(err.to_string()))?;
        if reply.code != 0 {
            return Err(TargetError::Fatal(format!(
                "tdengine code {}: {}",
                reply.code,
                reply.desc.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

/// 用记录字段填充 `${key}` 占位符。缺字段按原样保留占位符。
fn render_template(template: &str, record: &serde_json::Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        match tail.find('}') {
            Some(end) => {
                let key = &tail[..end];
                match record.get(key) {
                    Some(serde_json::Value::String(s)) => out.push_str(s),
                    Some(v) => out.push_str(&v.to_string()),
                    None => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

#[async_trait]
impl Target for TdEngineTarget {
    async fn start(&self, token: CancellationToken) -> Result<(), TargetError> {
        self.status.set(EntityStatus::Up);
        token.cancelled().await;
        self.status.set(EntityStatus::Stop);
        Ok(())
    }

    async fn to(&self, data: &str) -> Result<usize, TargetError> {
        let sql = match &self.config.sql_template {
            Some(template) => {
                let record: serde_json::Value = serde_json::from_str(data)
                    .map_err(|e| TargetError::Fatal(format!("bad record json: {e}")))?;
                render_template(template, &record)
            }
            None => data.to_string(),
        };
        debug!(target_id = %self.uuid, sql_len = sql.len(), "tdengine insert");
        self.exec_sql(&sql).await?;
        Ok(sql.len())
    }

    fn status(&self) -> EntityStatus {
        self.status.get()
    }

    async fn ping(&self) -> Result<(), TargetError> {
        self.exec_sql("SELECT SERVER_VERSION()").await
    }

    async fn stop(&self) {
        self.status.set(EntityStatus::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_fills_fields() {
        let record = json!({"tag": "voltage", "value": 221.5, "ts": 1700000000000i64});
        let sql = render_template(
            "INSERT INTO d_${tag} VALUES (${ts}, ${value})",
            &record,
        );
        assert_eq!(sql, "INSERT INTO d_voltage VALUES (1700000000000, 221.5)");
    }

    #[test]
    fn missing_field_keeps_placeholder() {
        let record = json!({"tag": "voltage"});
        let sql = render_template("${tag} ${missing}", &record);
        assert_eq!(sql, "voltage ${missing}");
    }

    #[test]
    fn unterminated_placeholder_passes_through() {
        let record = json!({});
        assert_eq!(render_template("abc ${tail", &record), "abc ${tail");
    }

    #[test]
    fn rest_url_includes_database() {
        let target = TdEngineTarget::new(
            "OUT1",
            TdEngineTargetConfig {
                url: "http://127.0.0.1:6041/".to_string(),
                username: "root".to_string(),
                password: "taosdata".to_string(),
                database: "oxgate".to_string(),
                sql_template: None,
                timeout_ms: 3000,
            },
        )
        .unwrap();
        assert_eq!(target.rest_url(), "http://127.0.0.1:6041/rest/sql/oxgate");
    }
}
