//! HTTP 输出目标。
//!
//! `to` 把记录作为 JSON 体 POST 到配置的端点。4xx 视为载荷
//! 问题不重试，5xx 与超时视为瞬态。

use crate::{StatusCell, Target, TargetError};
use async_trait::async_trait;
use domain::EntityStatus;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn default_timeout() -> u64 {
    3000
}

/// HTTP 输出目标配置。
#[derive(Debug, Clone, Deserialize)]
pub struct HttpTargetConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

/// HTTP 输出目标。无长连接状态，start 只标记就绪。
pub struct HttpTarget {
    uuid: String,
    config: HttpTargetConfig,
    client: reqwest::Client,
    status: StatusCell,
}

impl HttpTarget {
    pub fn new(uuid: &str, config: HttpTargetConfig) -> Result<Self, TargetError> {
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
}

#[async_trait]
impl Target for HttpTarget {
    async fn start(&self, token: CancellationToken) -> Result<(), TargetError> {
        self.status.set(EntityStatus::Up);
        token.cancelled().await;
        self.status.set(EntityStatus::Stop);
        Ok(())
    }

    async fn to(&self, data: &str) -> Result<usize, TargetError> {
        let mut request = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .body(data.to_string());
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|err| TargetError::Transient(err.to_string()))?;

        let status = response.status();
        debug!(target_id = %self.uuid, status = %status, "http target delivered");
        if status.is_success() {
            Ok(data.len())
        } else if status.is_client_error() {
            Err(TargetError::Fatal(format!("http status {status}")))
        } else {
            Err(TargetError::Transient(format!("http status {status}")))
        }
    }

    fn status(&self) -> EntityStatus {
        self.status.get()
    }

    async fn ping(&self) -> Result<(), TargetError> {
        self.client
            .head(&self.config.url)
            .send()
            .await
            .map_err(|err| TargetError::Transient(err.to_string()))?;
        Ok(())
    }

    async fn stop(&self) {
        self.status.set(EntityStatus::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: HttpTargetConfig =
            serde_json::from_str(r#"{"url": "http://127.0.0.1:8080/ingest"}"#).unwrap();
        assert_eq!(config.timeout_ms, 3000);
        assert!(config.headers.is_empty());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        // 不可路由地址，立刻失败或超时
        let target = HttpTarget::new(
            "OUT1",
            HttpTargetConfig {
                url: "http://127.0.0.1:1/ingest".to_string(),
                headers: HashMap::new(),
                timeout_ms: 200,
            },
        )
        .unwrap();
        let err = target.to("{}").await.unwrap_err();
        assert!(!err.is_fatal());
    }
}
