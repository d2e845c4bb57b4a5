//! 北向投递能力。
//!
//! 输出目标消费 Out 队列的记录并投递到外部端点。瞬态失败按
//! 指数退避重试，永久失败不重试；配置了离线缓存的目标在链路
//! 中断期间把记录落盘，恢复后按入队顺序回放。

mod http;
mod mqtt;
mod replay;
mod retry;
mod sock;
mod tdengine;

pub use http::{HttpTarget, HttpTargetConfig};
pub use mqtt::{MqttTarget, MqttTargetConfig};
pub use replay::{ReplayConfig, run_replay};
pub use retry::{RetryPolicy, send_with_retry};
pub use sock::{SocketMode, TcpTarget, TcpTargetConfig, UdpTarget, UdpTargetConfig};
pub use tdengine::{TdEngineTarget, TdEngineTargetConfig};

use async_trait::async_trait;
use domain::EntityStatus;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub(crate) use domain::StatusCell;

/// 投递错误。瞬态与永久的区分决定是否重试。
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("bad target config: {0}")]
    Config(String),
    /// 可重试：超时、链路中断、服务端 5xx。
    #[error("transient target error: {0}")]
    Transient(String),
    /// 不可重试：4xx、载荷不合法。
    #[error("fatal target error: {0}")]
    Fatal(String),
}

impl TargetError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TargetError::Config(_) | TargetError::Fatal(_))
    }
}

/// 输出目标抽象。
///
/// `start` 建立链路并维护状态，令牌取消后返回；`to` 投递一条
/// 记录，返回写出的字节数。
#[async_trait]
pub trait Target: Send + Sync {
    async fn start(&self, token: CancellationToken) -> Result<(), TargetError>;

    /// 投递一条记录，返回写出字节数。
    async fn to(&self, data: &str) -> Result<usize, TargetError>;

    fn status(&self) -> EntityStatus;

    /// 链路探活。
    async fn ping(&self) -> Result<(), TargetError>;

    /// 幂等停止。
    async fn stop(&self);
}

/// 输出目标工厂。
pub type TargetFactory =
    Box<dyn Fn(&str, &serde_json::Value) -> Result<Box<dyn Target>, TargetError> + Send + Sync>;

/// 类型标签到输出目标工厂的注册表。
#[derive(Default)]
pub struct TargetRegistry {
    factories: HashMap<String, TargetFactory>,
}

impl TargetRegistry {
    /// 预注册内置目标类型。
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register(
            "MQTT",
            Box::new(|uuid, config| {
                let config: MqttTargetConfig = serde_json::from_value(config.clone())
                    .map_err(|e| TargetError::Config(e.to_string()))?;
                Ok(Box::new(MqttTarget::new(uuid, config)))
            }),
        );
        registry.register(
            "HTTP",
            Box::new(|uuid, config| {
                let config: HttpTargetConfig = serde_json::from_value(config.clone())
                    .map_err(|e| TargetError::Config(e.to_string()))?;
                Ok(Box::new(HttpTarget::new(uuid, config)?))
            }),
        );
        registry.register(
            "TCP",
            Box::new(|uuid, config| {
                let config: TcpTargetConfig = serde_json::from_value(config.clone())
                    .map_err(|e| TargetError::Config(e.to_string()))?;
                Ok(Box::new(TcpTarget::new(uuid, config)))
            }),
        );
        registry.register(
            "UDP",
            Box::new(|uuid, config| {
                let config: UdpTargetConfig = serde_json::from_value(config.clone())
                    .map_err(|e| TargetError::Config(e.to_string()))?;
                Ok(Box::new(UdpTarget::new(uuid, config)))
            }),
        );
        registry.register(
            "TDENGINE",
            Box::new(|uuid, config| {
                let config: TdEngineTargetConfig = serde_json::from_value(config.clone())
                    .map_err(|e| TargetError::Config(e.to_string()))?;
                Ok(Box::new(TdEngineTarget::new(uuid, config)?))
            }),
        );
        registry
    }

    pub fn register(&mut self, type_tag: &str, factory: TargetFactory) {
        self.factories.insert(type_tag.to_string(), factory);
    }

    pub fn create(
        &self,
        type_tag: &str,
        uuid: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn Target>, TargetError> {
        let factory = self
            .factories
            .get(type_tag)
            .ok_or_else(|| TargetError::Config(format!("unknown target type: {type_tag}")))?;
        factory(uuid, config)
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}
