//! MQTT 输出目标。
//!
//! 维持长连接与事件循环，`to` 把记录发布到固定主题。

use crate::{StatusCell, Target, TargetError};
use async_trait::async_trait;
use domain::EntityStatus;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EVENTLOOP_RETRY: Duration = Duration::from_secs(1);

fn default_port() -> u16 {
    1883
}

fn default_qos() -> u8 {
    1
}

/// MQTT 输出目标配置。
#[derive(Debug, Clone, Deserialize)]
pub struct MqttTargetConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub topic: String,
    #[serde(default = "default_qos")]
    pub qos: u8,
}

fn qos_from_u8(raw: u8) -> QoS {
    match raw {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

/// MQTT 输出目标。
pub struct MqttTarget {
    uuid: String,
    config: MqttTargetConfig,
    status: StatusCell,
    client: Mutex<Option<AsyncClient>>,
}

impl MqttTarget {
    pub fn new(uuid: &str, config: MqttTargetConfig) -> Self {
        Self {
            uuid: uuid.to_string(),
            config,
            status: StatusCell::default(),
            client: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Target for MqttTarget {
    async fn start(&self, token: CancellationToken) -> Result<(), TargetError> {
        self.status.set(EntityStatus::Pending);
        let client_id = format!("oxgate-out-{}", self.uuid);
        let mut options =
            MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        *self.client.lock().await = Some(client);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        self.status.set(EntityStatus::Up);
                        info!(target_id = %self.uuid, "mqtt target connected");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        self.status.set(EntityStatus::Down);
                        warn!(target_id = %self.uuid, error = %err, "mqtt target eventloop error");
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(EVENTLOOP_RETRY) => {}
                        }
                    }
                }
            }
        }
        *self.client.lock().await = None;
        self.status.set(EntityStatus::Stop);
        Ok(())
    }

    async fn to(&self, data: &str) -> Result<usize, TargetError> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| TargetError::Transient("mqtt client not started".into()))?;
        client
            .publish(
                &self.config.topic,
                qos_from_u8(self.config.qos),
                false,
                data.as_bytes(),
            )
            .await
            .map_err(|err| TargetError::Transient(err.to_string()))?;
        Ok(data.len())
    }

    fn status(&self) -> EntityStatus {
        self.status.get()
    }

    async fn ping(&self) -> Result<(), TargetError> {
        if self.status.get() == EntityStatus::Up {
            Ok(())
        } else {
            Err(TargetError::Transient("mqtt link down".into()))
        }
    }

    async fn stop(&self) {
        if let Some(client) = self.client.lock().await.take() {
            let _ = client.disconnect().await;
        }
        self.status.set(EntityStatus::Stop);
    }
}
