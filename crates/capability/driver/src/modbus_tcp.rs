//! Modbus TCP 轮询驱动。
//!
//! 连接从站后按固定周期遍历点表，读保持/输入寄存器并按数据
//! 类型解析，采集记录推入设备队列。连续失败达到阈值后降为
//! Down 并退避重连。

use crate::{Driver, DriverError, StatusCell};
use async_trait::async_trait;
use domain::{DriverInfo, EntityStatus};
use ox_bus::XQueue;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, timeout};
use tokio_modbus::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

fn default_modbus_port() -> u16 {
    502
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_read_timeout() -> u64 {
    3000
}

fn default_max_errors() -> u32 {
    5
}

/// 寄存器数据类型，两寄存器值按高字在前组装。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModbusDataType {
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

/// 点表条目。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusPoint {
    /// 点名，随采集记录一起上送。
    pub tag: String,
    pub slave_id: u8,
    /// 功能码，支持 3（保持寄存器）与 4（输入寄存器）。
    pub function_code: u8,
    pub register_address: u16,
    pub register_count: u16,
    pub data_type: ModbusDataType,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub offset: Option<f64>,
}

/// Modbus TCP 驱动配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusTcpConfig {
    pub host: String,
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// 连续失败阈值，达到后降为 Down 并重连。
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    pub points: Vec<ModbusPoint>,
}

/// Modbus TCP 轮询驱动。
pub struct ModbusTcpDriver {
    uuid: String,
    config: ModbusTcpConfig,
    addr: SocketAddr,
    status: StatusCell,
    // 点名操作与轮询循环共用链路，经此互斥串行化
    ctx: Mutex<Option<client::Context>>,
}

impl ModbusTcpDriver {
    pub fn new(uuid: &str, config: ModbusTcpConfig) -> Result<Self, DriverError> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| DriverError::Config(format!("invalid address: {e}")))?;
        if config.points.is_empty() {
            return Err(DriverError::Config("empty point table".into()));
        }
        Ok(Self {
            uuid: uuid.to_string(),
            config,
            addr,
            status: StatusCell::default(),
            ctx: Mutex::new(None),
        })
    }

    async fn connect(&self) -> Result<(), DriverError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let ctx = timeout(connect_timeout, tcp::connect(self.addr))
            .await
            .map_err(|_| DriverError::Io(format!("connect timeout to {}", self.addr)))?
            .map_err(|e| DriverError::Io(e.to_string()))?;
        *self.ctx.lock().await = Some(ctx);
        Ok(())
    }

    async fn poll_point(&self, point: &ModbusPoint) -> Result<f64, DriverError> {
        let mut guard = self.ctx.lock().await;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| DriverError::Io("not connected".into()))?;
        ctx.set_slave(Slave(point.slave_id));

        let read_timeout = Duration::from_millis(self.config.read_timeout_ms);
        let registers = match point.function_code {
            3 => timeout(
                read_timeout,
                ctx.read_holding_registers(point.register_address, point.register_count),
            )
            .await
            .map_err(|_| DriverError::Io("read timeout".into()))?
            .map_err(|e| DriverError::Io(e.to_string()))?
            .map_err(|e| DriverError::Protocol(format!("exception: {e:?}")))?,
            4 => timeout(
                read_timeout,
                ctx.read_input_registers(point.register_address, point.register_count),
            )
            .await
            .map_err(|_| DriverError::Io("read timeout".into()))?
            .map_err(|e| DriverError::Io(e.to_string()))?
            .map_err(|e| DriverError::Protocol(format!("exception: {e:?}")))?,
            other => {
                return Err(DriverError::Config(format!(
                    "unsupported function code: {other}"
                )));
            }
        };

        debug!(
            device_id = %self.uuid,
            slave = point.slave_id,
            register = point.register_address,
            values = ?registers,
            "read modbus registers"
        );

        let raw = parse_registers(&registers, point.data_type)?;
        Ok(apply_scale(raw, point.scale, point.offset))
    }

    fn find_point(&self, tag: &str) -> Result<&ModbusPoint, DriverError> {
        self.config
            .points
            .iter()
            .find(|p| p.tag == tag)
            .ok_or_else(|| DriverError::Config(format!("unknown point: {tag}")))
    }
}

#[async_trait]
impl Driver for ModbusTcpDriver {
    async fn start(&self, queue: XQueue, token: CancellationToken) -> Result<(), DriverError> {
        loop {
            self.status.set(EntityStatus::Pending);
            match self.connect().await {
                Ok(()) => {
                    self.status.set(EntityStatus::Up);
                    info!(device_id = %self.uuid, addr = %self.addr, "modbus driver connected");
                }
                Err(err) => {
                    self.status.set(EntityStatus::Down);
                    warn!(device_id = %self.uuid, error = %err, "modbus connect failed");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                    }
                }
            }

            let mut ticker = interval(Duration::from_millis(self.config.poll_interval_ms));
            let mut consecutive_errors = 0u32;
            'session: loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        self.status.set(EntityStatus::Stop);
                        return Ok(());
                    }
                    _ = ticker.tick() => {}
                }
                for point in &self.config.points {
                    match self.poll_point(point).await {
                        Ok(value) => {
                            consecutive_errors = 0;
                            let record = json!({
                                "tag": point.tag,
                                "value": value,
                                "ts": chrono::Utc::now().timestamp_millis(),
                            })
                            .to_string();
                            if let Err(err) = queue.push_device(&self.uuid, record) {
                                warn!(device_id = %self.uuid, error = %err, "push_device failed");
                            }
                        }
                        Err(err) => {
                            consecutive_errors += 1;
                            warn!(
                                device_id = %self.uuid,
                                tag = %point.tag,
                                errors = consecutive_errors,
                                error = %err,
                                "modbus poll failed"
                            );
                            if consecutive_errors >= self.config.max_errors {
                                self.status.set(EntityStatus::Down);
                                *self.ctx.lock().await = None;
                                break 'session;
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
        self.status.set(EntityStatus::Stop);
        Ok(())
    }

    fn status(&self) -> EntityStatus {
        self.status.get()
    }

    async fn stop(&self) {
        self.status.set(EntityStatus::Stop);
        *self.ctx.lock().await = None;
    }

    async fn on_read(
        &self,
        topic: &str,
        _args: &serde_json::Value,
    ) -> Result<serde_json::Value, DriverError> {
        let point = self.find_point(topic)?.clone();
        let value = self.poll_point(&point).await?;
        Ok(json!({"tag": point.tag, "value": value}))
    }

    async fn on_write(
        &self,
        topic: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, DriverError> {
        let point = self.find_point(topic)?.clone();
        let value = args
            .get("value")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| DriverError::Config("missing numeric value".into()))?;
        let value =
            u16::try_from(value).map_err(|_| DriverError::Config("value out of range".into()))?;

        let mut guard = self.ctx.lock().await;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| DriverError::Io("not connected".into()))?;
        ctx.set_slave(Slave(point.slave_id));
        ctx.write_single_register(point.register_address, value)
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?
            .map_err(|e| DriverError::Protocol(format!("exception: {e:?}")))?;
        Ok(json!({"tag": point.tag, "written": value}))
    }

    async fn on_ctrl(
        &self,
        topic: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, DriverError> {
        let point = self.find_point(topic)?.clone();
        let on = args
            .get("on")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| DriverError::Config("missing bool field: on".into()))?;

        let mut guard = self.ctx.lock().await;
        let ctx = guard
            .as_mut()
            .ok_or_else(|| DriverError::Io("not connected".into()))?;
        ctx.set_slave(Slave(point.slave_id));
        ctx.write_single_coil(point.register_address, on)
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?
            .map_err(|e| DriverError::Protocol(format!("exception: {e:?}")))?;
        Ok(json!({"tag": point.tag, "on": on}))
    }

    async fn on_dca_call(
        &self,
        _uuid: &str,
        cmd: &str,
        _args: &serde_json::Value,
    ) -> Result<serde_json::Value, DriverError> {
        match cmd {
            "points" => Ok(serde_json::to_value(&self.config.points)
                .map_err(|e| DriverError::Config(e.to_string()))?),
            other => Err(DriverError::Unsupported(other.to_string())),
        }
    }

    fn info(&self) -> DriverInfo {
        DriverInfo {
            name: "modbus-tcp".to_string(),
            model: "GENERIC_MODBUS_TCP".to_string(),
            vendor: "oxgate".to_string(),
            firmware: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// 把寄存器序列按数据类型解析为浮点值。
pub(crate) fn parse_registers(
    registers: &[u16],
    data_type: ModbusDataType,
) -> Result<f64, DriverError> {
    let need = match data_type {
        ModbusDataType::Int16 | ModbusDataType::Uint16 => 1,
        ModbusDataType::Float64 => 4,
        _ => 2,
    };
    if registers.len() < need {
        return Err(DriverError::Protocol(format!(
            "need {need} registers, got {}",
            registers.len()
        )));
    }
    let value = match data_type {
        ModbusDataType::Int16 => registers[0] as i16 as f64,
        ModbusDataType::Uint16 => registers[0] as f64,
        ModbusDataType::Int32 => {
            let bits = ((registers[0] as u32) << 16) | registers[1] as u32;
            bits as i32 as f64
        }
        ModbusDataType::Uint32 => {
            (((registers[0] as u32) << 16) | registers[1] as u32) as f64
        }
        ModbusDataType::Float32 => {
            let bits = ((registers[0] as u32) << 16) | registers[1] as u32;
            f32::from_bits(bits) as f64
        }
        ModbusDataType::Float64 => {
            let bits = ((registers[0] as u64) << 48)
                | ((registers[1] as u64) << 32)
                | ((registers[2] as u64) << 16)
                | registers[3] as u64;
            f64::from_bits(bits)
        }
    };
    Ok(value)
}

fn apply_scale(raw: f64, scale: Option<f64>, offset: Option<f64>) -> f64 {
    raw * scale.unwrap_or(1.0) + offset.unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_table() -> Vec<ModbusPoint> {
        vec![ModbusPoint {
            tag: "voltage".to_string(),
            slave_id: 1,
            function_code: 3,
            register_address: 100,
            register_count: 1,
            data_type: ModbusDataType::Uint16,
            scale: Some(0.1),
            offset: None,
        }]
    }

    #[test]
    fn config_defaults_applied() {
        let config: ModbusTcpConfig = serde_json::from_str(
            r#"{"host": "192.168.1.100", "points": [
                {"tag": "t", "slave_id": 1, "function_code": 3,
                 "register_address": 0, "register_count": 1, "data_type": "int16"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.port, 502);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.read_timeout_ms, 3000);
        assert_eq!(config.max_errors, 5);
    }

    #[test]
    fn empty_point_table_rejected() {
        let config = ModbusTcpConfig {
            host: "127.0.0.1".to_string(),
            port: 502,
            poll_interval_ms: 1000,
            connect_timeout_ms: 5000,
            read_timeout_ms: 3000,
            max_errors: 5,
            points: Vec::new(),
        };
        assert!(ModbusTcpDriver::new("DEVICE1", config).is_err());
    }

    #[test]
    fn bad_host_rejected() {
        let config = ModbusTcpConfig {
            host: "not a host".to_string(),
            port: 502,
            poll_interval_ms: 1000,
            connect_timeout_ms: 5000,
            read_timeout_ms: 3000,
            max_errors: 5,
            points: point_table(),
        };
        assert!(matches!(
            ModbusTcpDriver::new("DEVICE1", config),
            Err(DriverError::Config(_))
        ));
    }

    #[test]
    fn parse_int16_signed() {
        assert_eq!(
            parse_registers(&[100], ModbusDataType::Int16).unwrap(),
            100.0
        );
        assert_eq!(
            parse_registers(&[(-100i16) as u16], ModbusDataType::Int16).unwrap(),
            -100.0
        );
    }

    #[test]
    fn parse_uint32_high_word_first() {
        let value = parse_registers(&[0x0001, 0x0000], ModbusDataType::Uint32).unwrap();
        assert_eq!(value, 65536.0);
    }

    #[test]
    fn parse_float32_bits() {
        let bits = 1.5f32.to_bits();
        let registers = [(bits >> 16) as u16, bits as u16];
        let value = parse_registers(&registers, ModbusDataType::Float32).unwrap();
        assert_eq!(value, 1.5);
    }

    #[test]
    fn parse_rejects_short_register_run() {
        assert!(parse_registers(&[1], ModbusDataType::Int32).is_err());
        assert!(parse_registers(&[], ModbusDataType::Uint16).is_err());
    }

    #[test]
    fn scale_and_offset_applied() {
        assert_eq!(apply_scale(100.0, Some(0.1), Some(-1.0)), 9.0);
        assert_eq!(apply_scale(100.0, None, None), 100.0);
    }
}
