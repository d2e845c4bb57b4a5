//! DL/T 645-2007 主站驱动。
//!
//! 经 TCP 串口服务器连接电表总线，按周期遍历点表发送读数据
//! 请求，应答解出 BCD 数值后推入设备队列。链路访问经主机端口
//! 串行化，一问一答。

use crate::{Driver, DriverError, StatusCell};
use async_trait::async_trait;
use domain::{DriverInfo, EntityStatus};
use ox_bus::XQueue;
use ox_protocol::Dlt645Frame;
use ox_protocol::dlt645::{FRAME_END, FRAME_START, WAKEUP};
use ox_transport::{FrameMode, MasterPort, TcpEndpoint};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// 请求前导的唤醒字节个数。
const WAKEUP_COUNT: usize = 4;

fn default_poll_interval() -> u64 {
    2000
}

fn default_read_timeout() -> u64 {
    1000
}

fn default_max_errors() -> u32 {
    5
}

/// 电表点表条目。地址与数据标识均为线缆字节序的十六进制文本。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dlt645Point {
    pub tag: String,
    /// 6 字节表地址，12 个十六进制字符。
    pub meter_id: String,
    /// 4 字节数据标识（加 0x33 偏移前），8 个十六进制字符。
    pub data_id: String,
}

/// DL/T 645 主站配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dlt645MasterConfig {
    /// 串口服务器地址，host:port。
    pub endpoint: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
    pub points: Vec<Dlt645Point>,
}

struct CompiledPoint {
    tag: String,
    meter_id: String,
    address: [u8; 6],
    data_id: [u8; 4],
}

/// DL/T 645 主站驱动。
pub struct Dlt645MasterDriver {
    uuid: String,
    config: Dlt645MasterConfig,
    points: Vec<CompiledPoint>,
    status: StatusCell,
    port: Mutex<Option<MasterPort>>,
}

impl std::fmt::Debug for Dlt645MasterDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dlt645MasterDriver")
            .field("uuid", &self.uuid)
            .finish_non_exhaustive()
    }
}

fn parse_fixed<const N: usize>(hex_text: &str, what: &str) -> Result<[u8; N], DriverError> {
    let bytes = hex::decode(hex_text)
        .map_err(|e| DriverError::Config(format!("bad {what} hex: {e}")))?;
    let arr: [u8; N] = bytes
        .try_into()
        .map_err(|_| DriverError::Config(format!("{what} must be {N} bytes")))?;
    Ok(arr)
}

impl Dlt645MasterDriver {
    pub fn new(uuid: &str, config: Dlt645MasterConfig) -> Result<Self, DriverError> {
        if config.points.is_empty() {
            return Err(DriverError::Config("empty point table".into()));
        }
        let mut points = Vec::with_capacity(config.points.len());
        for point in &config.points {
            points.push(CompiledPoint {
                tag: point.tag.clone(),
                meter_id: point.meter_id.clone(),
                address: parse_fixed::<6>(&point.meter_id, "meter_id")?,
                data_id: parse_fixed::<4>(&point.data_id, "data_id")?,
            });
        }
        Ok(Self {
            uuid: uuid.to_string(),
            config,
            points,
            status: StatusCell::default(),
            port: Mutex::new(None),
        })
    }

    async fn connect(&self) -> Result<(), DriverError> {
        let stream = TcpStream::connect(&self.config.endpoint)
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?;
        let read_timeout = Duration::from_millis(self.config.read_timeout_ms);
        let port = MasterPort::new(
            Box::new(TcpEndpoint::new(stream)),
            FrameMode::HeadTail {
                head: vec![FRAME_START],
                tail: vec![FRAME_END],
            },
            read_timeout,
            read_timeout,
        );
        *self.port.lock().await = Some(port);
        Ok(())
    }

    /// 对单个点位发一问一答，返回解出的 BCD 数值。
    async fn query_point(&self, point: &CompiledPoint) -> Result<i64, DriverError> {
        let frame = Dlt645Frame::read_request(&point.address, point.data_id)?;
        let mut request = vec![WAKEUP; WAKEUP_COUNT];
        request.extend_from_slice(&frame.encode()?);

        let mut guard = self.port.lock().await;
        let port = guard
            .as_mut()
            .ok_or_else(|| DriverError::Io("not connected".into()))?;
        let reply = port.send_frame(&request).await?;
        let reply = Dlt645Frame::decode(&reply)?;
        Ok(reply.data()?)
    }

    fn find_point(&self, tag: &str) -> Result<&CompiledPoint, DriverError> {
        self.points
            .iter()
            .find(|p| p.tag == tag)
            .ok_or_else(|| DriverError::Config(format!("unknown point: {tag}")))
    }
}

#[async_trait]
impl Driver for Dlt645MasterDriver {
    async fn start(&self, queue: XQueue, token: CancellationToken) -> Result<(), DriverError> {
        loop {
            self.status.set(EntityStatus::Pending);
            match self.connect().await {
                Ok(()) => {
                    self.status.set(EntityStatus::Up);
                    info!(device_id = %self.uuid, endpoint = %self.config.endpoint, "dlt645 master connected");
                }
                Err(err) => {
                    self.status.set(EntityStatus::Down);
                    warn!(device_id = %self.uuid, error = %err, "dlt645 connect failed");
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
                for point in &self.points {
                    match self.query_point(point).await {
                        Ok(value) => {
                            consecutive_errors = 0;
                            let record = json!({
                                "tag": point.tag,
                                "meter_id": point.meter_id,
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
                                "dlt645 query failed"
                            );
                            if consecutive_errors >= self.config.max_errors {
                                self.status.set(EntityStatus::Down);
                                if let Some(mut port) = self.port.lock().await.take() {
                                    port.close().await;
                                }
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
        if let Some(mut port) = self.port.lock().await.take() {
            port.close().await;
        }
    }

    async fn on_read(
        &self,
        topic: &str,
        _args: &serde_json::Value,
    ) -> Result<serde_json::Value, DriverError> {
        let point = self.find_point(topic)?;
        let value = self.query_point(point).await?;
        Ok(json!({"tag": point.tag, "meter_id": point.meter_id, "value": value}))
    }

    async fn on_write(
        &self,
        _topic: &str,
        _args: &serde_json::Value,
    ) -> Result<serde_json::Value, DriverError> {
        // 读数据规约，不支持写
        Err(DriverError::Unsupported("write".into()))
    }

    async fn on_ctrl(
        &self,
        _topic: &str,
        _args: &serde_json::Value,
    ) -> Result<serde_json::Value, DriverError> {
        Err(DriverError::Unsupported("ctrl".into()))
    }

    fn info(&self) -> DriverInfo {
        DriverInfo {
            name: "dlt645-master".to_string(),
            model: "DLT645_2007".to_string(),
            vendor: "oxgate".to_string(),
            firmware: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
