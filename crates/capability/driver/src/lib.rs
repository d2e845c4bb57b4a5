//! 设备驱动能力。
//!
//! 驱动周期性轮询现场设备，把采集记录推入设备队列，并向脚本层
//! 暴露读、写、控制三类点名操作。内置 Modbus TCP 轮询驱动、
//! DL/T 645 主站驱动与 Shelly 设备管理器，其余类型经注册表按
//! 类型标签扩展。

mod dlt645_master;
mod modbus_tcp;
mod shelly;

pub use dlt645_master::{Dlt645MasterConfig, Dlt645MasterDriver, Dlt645Point};
pub use modbus_tcp::{ModbusDataType, ModbusPoint, ModbusTcpConfig, ModbusTcpDriver};
pub use shelly::{
    IoPort, ScanStatus, ShellyDeviceInfo, ShellyDeviceRecord, ShellyManager, expand_cidr,
};

use async_trait::async_trait;
use domain::{DriverInfo, EntityStatus};
use ox_bus::XQueue;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub(crate) use domain::StatusCell;

/// 驱动错误。
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("bad driver config: {0}")]
    Config(String),
    #[error("driver io error: {0}")]
    Io(String),
    #[error("driver protocol error: {0}")]
    Protocol(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("unknown driver type: {0}")]
    UnknownType(String),
}

impl From<ox_transport::TransportError> for DriverError {
    fn from(err: ox_transport::TransportError) -> Self {
        DriverError::Io(err.to_string())
    }
}

impl From<ox_protocol::ProtocolError> for DriverError {
    fn from(err: ox_protocol::ProtocolError) -> Self {
        DriverError::Protocol(err.to_string())
    }
}

/// 设备驱动抽象。
///
/// `start` 即轮询循环本体，令牌取消后返回；点名操作可在循环
/// 运行期间并发调用，由驱动自行串行化对链路的访问。
#[async_trait]
pub trait Driver: Send + Sync {
    async fn start(&self, queue: XQueue, token: CancellationToken) -> Result<(), DriverError>;

    fn status(&self) -> EntityStatus;

    /// 幂等停止。
    async fn stop(&self);

    /// 按点名读一次。
    async fn on_read(
        &self,
        topic: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, DriverError>;

    /// 按点名写一次。
    async fn on_write(
        &self,
        topic: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, DriverError>;

    /// 设备控制指令。
    async fn on_ctrl(
        &self,
        topic: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, DriverError>;

    /// 直连命令通道，绕过点表。
    async fn on_dca_call(
        &self,
        uuid: &str,
        cmd: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, DriverError> {
        let _ = (uuid, args);
        Err(DriverError::Unsupported(cmd.to_string()))
    }

    fn info(&self) -> DriverInfo;
}

impl std::fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Driver").finish_non_exhaustive()
    }
}

/// 驱动工厂。
pub type DriverFactory =
    Box<dyn Fn(&str, &serde_json::Value) -> Result<Box<dyn Driver>, DriverError> + Send + Sync>;

/// 类型标签到驱动工厂的注册表。
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// 预注册内置驱动类型。
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register(
            "MODBUS_TCP",
            Box::new(|uuid, config| {
                let config: ModbusTcpConfig = serde_json::from_value(config.clone())
                    .map_err(|e| DriverError::Config(e.to_string()))?;
                Ok(Box::new(ModbusTcpDriver::new(uuid, config)?))
            }),
        );
        registry.register(
            "DLT645_MASTER",
            Box::new(|uuid, config| {
                let config: Dlt645MasterConfig = serde_json::from_value(config.clone())
                    .map_err(|e| DriverError::Config(e.to_string()))?;
                Ok(Box::new(Dlt645MasterDriver::new(uuid, config)?))
            }),
        );
        registry
    }

    pub fn register(&mut self, type_tag: &str, factory: DriverFactory) {
        self.factories.insert(type_tag.to_string(), factory);
    }

    pub fn create(
        &self,
        type_tag: &str,
        uuid: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn Driver>, DriverError> {
        let factory = self
            .factories
            .get(type_tag)
            .ok_or_else(|| DriverError::UnknownType(type_tag.to_string()))?;
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
        let registry = DriverRegistry::with_builtin();
        assert_eq!(
            registry.types(),
            vec!["DLT645_MASTER".to_string(), "MODBUS_TCP".to_string()]
        );
    }

    #[test]
    fn create_rejects_unknown_type() {
        let registry = DriverRegistry::with_builtin();
        let err = registry.create("BACNET", "DEVICE1", &json!({})).unwrap_err();
        assert!(matches!(err, DriverError::UnknownType(_)));
    }

    #[test]
    fn create_rejects_bad_config() {
        let registry = DriverRegistry::with_builtin();
        let err = registry
            .create("MODBUS_TCP", "DEVICE1", &json!({"host": 1}))
            .unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
    }
}
