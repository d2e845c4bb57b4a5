//! 南向采集能力。
//!
//! 采集源把外部链路上收到的报文推入南向队列，生命周期由引擎
//! 的子令牌控制。内置 MQTT 订阅源与按帧切分的 TCP 监听源，
//! 其余类型经注册表按类型标签扩展。

mod mqtt;
mod tcp;

pub use mqtt::{MqttSource, MqttSourceConfig};
pub use tcp::{FrameModeConfig, TcpSource, TcpSourceConfig};

use async_trait::async_trait;
use domain::EntityStatus;
use ox_bus::XQueue;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub(crate) use domain::StatusCell;

/// 采集错误。
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("bad source config: {0}")]
    Config(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("unknown source type: {0}")]
    UnknownType(String),
}

/// 采集源抽象。`start` 即采集循环本体，令牌取消后返回。
#[async_trait]
pub trait Source: Send + Sync {
    async fn start(&self, queue: XQueue, token: CancellationToken) -> Result<(), SourceError>;

    fn status(&self) -> EntityStatus;

    /// 幂等停止。
    async fn stop(&self);
}

impl std::fmt::Debug for dyn Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Source").finish_non_exhaustive()
    }
}

/// 采集源工厂。
pub type SourceFactory =
    Box<dyn Fn(&str, &serde_json::Value) -> Result<Box<dyn Source>, SourceError> + Send + Sync>;

/// 类型标签到工厂的注册表。
#[derive(Default)]
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl SourceRegistry {
    /// 预注册内置源类型。
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register("MQTT", Box::new(|uuid, config| {
            let config: MqttSourceConfig = serde_json::from_value(config.clone())
                .map_err(|e| SourceError::Config(e.to_string()))?;
            Ok(Box::new(MqttSource::new(uuid, config)))
        }));
        registry.register("TCP", Box::new(|uuid, config| {
            let config: TcpSourceConfig = serde_json::from_value(config.clone())
                .map_err(|e| SourceError::Config(e.to_string()))?;
            Ok(Box::new(TcpSource::new(uuid, config)))
        }));
        registry
    }

    pub fn register(&mut self, type_tag: &str, factory: SourceFactory) {
        self.factories.insert(type_tag.to_string(), factory);
    }

    pub fn create(
        &self,
        type_tag: &str,
        uuid: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn Source>, SourceError> {
        let factory = self
            .factories
            .get(type_tag)
            .ok_or_else(|| SourceError::UnknownType(type_tag.to_string()))?;
        factory(uuid, config)
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_types_registered() {
        let registry = SourceRegistry::with_builtin();
        assert_eq!(registry.types(), vec!["MQTT".to_string(), "TCP".to_string()]);
    }

    #[test]
    fn create_rejects_unknown_type() {
        let registry = SourceRegistry::with_builtin();
        let err = registry.create("COAP", "IN1", &json!({})).unwrap_err();
        assert!(matches!(err, SourceError::UnknownType(_)));
    }

    #[test]
    fn create_rejects_bad_config() {
        let registry = SourceRegistry::with_builtin();
        let err = registry
            .create("MQTT", "IN1", &json!({"host": 42}))
            .unwrap_err();
        assert!(matches!(err, SourceError::Config(_)));
    }
}
