//! MQTT 采集源。
//!
//! 订阅配置的主题集合，把每条消息原样推入南向队列。事件循环
//! 出错时退避重连，取消后断开退出。

use crate::{Source, SourceError, StatusCell};
use async_trait::async_trait;
use domain::EntityStatus;
use ox_bus::XQueue;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

/// MQTT 采集源配置。
#[derive(Debug, Clone, Deserialize)]
pub struct MqttSourceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub topics: Vec<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,
}

/// MQTT 采集源。
pub struct MqttSource {
    uuid: String,
    config: MqttSourceConfig,
    status: StatusCell,
}

impl MqttSource {
    pub fn new(uuid: &str, config: MqttSourceConfig) -> Self {
        Self {
            uuid: uuid.to_string(),
            config,
            status: StatusCell::default(),
        }
    }

    async fn run_session(
        &self,
        queue: &XQueue,
        token: &CancellationToken,
    ) -> Result<(), SourceError> {
        let client_id = format!("oxgate-{}", self.uuid);
        let mut options =
            rumqttc::MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_seconds));
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = rumqttc::AsyncClient::new(options, 10);
        for topic in &self.config.topics {
            client
                .subscribe(topic, rumqttc::QoS::AtMostOnce)
                .await
                .map_err(|err| SourceError::Source(err.to_string()))?;
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    let _ = client.disconnect().await;
                    return Ok(());
                }
                event = eventloop.poll() => match event {
                    Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                        self.status.set(EntityStatus::Up);
                        info!(source_id = %self.uuid, "mqtt source connected");
                    }
                    Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).to_string();
                        if let Err(err) = queue.push_in(&self.uuid, payload) {
                            warn!(source_id = %self.uuid, error = %err, "push_in failed");
                        }
                    }
                    Ok(_) => {}
                    Err(err) => return Err(SourceError::Source(err.to_string())),
                }
            }
        }
    }
}

#[async_trait]
impl Source for MqttSource {
    async fn start(&self, queue: XQueue, token: CancellationToken) -> Result<(), SourceError> {
        self.status.set(EntityStatus::Pending);
        loop {
            match self.run_session(&queue, &token).await {
                Ok(()) => break,
                Err(err) => {
                    self.status.set(EntityStatus::Down);
                    warn!(source_id = %self.uuid, error = %err, "mqtt source session lost");
                }
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
            self.status.set(EntityStatus::Pending);
        }
        self.status.set(EntityStatus::Stop);
        Ok(())
    }

    fn status(&self) -> EntityStatus {
        self.status.get()
    }

    async fn stop(&self) {
        self.status.set(EntityStatus::Stop);
    }
}
