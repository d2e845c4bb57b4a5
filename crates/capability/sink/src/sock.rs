//! TCP 与 UDP 输出目标。
//!
//! 记录按原文或十六进制解码后写出。TCP 目标持有长连接，写失败
//! 置 Down，下次投递时重连；可选的 ping 报文用于探活保连。

use crate::{StatusCell, Target, TargetError};
use async_trait::async_trait;
use domain::EntityStatus;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

fn default_ping_interval() -> u64 {
    0
}

/// 载荷编码：原文写出，或把十六进制文本解码为字节。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SocketMode {
    #[default]
    Raw,
    Hex,
}

fn encode_payload(mode: SocketMode, data: &str) -> Result<Vec<u8>, TargetError> {
    match mode {
        SocketMode::Raw => Ok(data.as_bytes().to_vec()),
        SocketMode::Hex => hex::decode(data.trim())
            .map_err(|e| TargetError::Fatal(format!("bad hex payload: {e}"))),
    }
}

/// TCP 输出目标配置。
#[derive(Debug, Clone, Deserialize)]
pub struct TcpTargetConfig {
    pub addr: String,
    #[serde(default)]
    pub mode: SocketMode,
    /// 探活报文的十六进制文本，空则不探活。
    #[serde(default)]
    pub ping_packet: Option<String>,
    /// 探活周期（秒），0 关闭。
    #[serde(default = "default_ping_interval")]
    pub ping_interval_seconds: u64,
}

/// TCP 输出目标。
pub struct TcpTarget {
    uuid: String,
    config: TcpTargetConfig,
    status: StatusCell,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpTarget {
    pub fn new(uuid: &str, config: TcpTargetConfig) -> Self {
        Self {
            uuid: uuid.to_string(),
            config,
            status: StatusCell::default(),
            stream: Mutex::new(None),
        }
    }

    async fn ensure_connected(
        &self,
        guard: &mut Option<TcpStream>,
    ) -> Result<(), TargetError> {
        if guard.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(&self.config.addr)
            .await
            .map_err(|e| TargetError::Transient(e.to_string()))?;
        *guard = Some(stream);
        self.status.set(EntityStatus::Up);
        Ok(())
    }

    async fn write_bytes(&self, bytes: &[u8]) -> Result<usize, TargetError> {
        let mut guard = self.stream.lock().await;
        self.ensure_connected(&mut guard).await?;
        let stream = guard.as_mut().ok_or_else(|| {
            TargetError::Transient("tcp target not connected".into())
        })?;
        if let Err(err) = stream.write_all(bytes).await {
            *guard = None;
            self.status.set(EntityStatus::Down);
            return Err(TargetError::Transient(err.to_string()));
        }
        Ok(bytes.len())
    }
}

#[async_trait]
impl Target for TcpTarget {
    async fn start(&self, token: CancellationToken) -> Result<(), TargetError> {
        self.status.set(EntityStatus::Pending);
        {
            let mut guard = self.stream.lock().await;
            if let Err(err) = self.ensure_connected(&mut guard).await {
                self.status.set(EntityStatus::Down);
                warn!(target_id = %self.uuid, error = %err, "tcp target connect failed");
            }
        }

        let interval = self.config.ping_interval_seconds;
        if interval == 0 || self.config.ping_packet.is_none() {
            token.cancelled().await;
        } else {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {
                        if let Err(err) = self.ping().await {
                            warn!(target_id = %self.uuid, error = %err, "tcp target ping failed");
                        }
                    }
                }
            }
        }

        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        self.status.set(EntityStatus::Stop);
        Ok(())
    }

    async fn to(&self, data: &str) -> Result<usize, TargetError> {
        let bytes = encode_payload(self.config.mode, data)?;
        let n = self.write_bytes(&bytes).await?;
        debug!(target_id = %self.uuid, bytes = n, "tcp target delivered");
        Ok(n)
    }

    fn status(&self) -> EntityStatus {
        self.status.get()
    }

    async fn ping(&self) -> Result<(), TargetError> {
        match &self.config.ping_packet {
            Some(packet) if !packet.is_empty() => {
                let bytes = hex::decode(packet)
                    .map_err(|e| TargetError::Config(format!("bad ping packet: {e}")))?;
                self.write_bytes(&bytes).await?;
                Ok(())
            }
            _ => {
                if self.stream.lock().await.is_some() {
                    Ok(())
                } else {
                    Err(TargetError::Transient("tcp link down".into()))
                }
            }
        }
    }

    async fn stop(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        self.status.set(EntityStatus::Stop);
    }
}

/// UDP 输出目标配置。
#[derive(Debug, Clone, Deserialize)]
pub struct UdpTargetConfig {
    pub addr: String,
    #[serde(default)]
    pub mode: SocketMode,
}

/// UDP 输出目标。
pub struct UdpTarget {
    uuid: String,
    config: UdpTargetConfig,
    status: StatusCell,
    socket: Mutex<Option<UdpSocket>>,
}

impl UdpTarget {
    pub fn new(uuid: &str, config: UdpTargetConfig) -> Self {
        Self {
            uuid: uuid.to_string(),
            config,
            status: StatusCell::default(),
            socket: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Target for UdpTarget {
    async fn start(&self, token: CancellationToken) -> Result<(), TargetError> {
        self.status.set(EntityStatus::Pending);
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| TargetError::Transient(e.to_string()))?;
        socket
            .connect(&self.config.addr)
            .await
            .map_err(|e| TargetError::Transient(e.to_string()))?;
        *self.socket.lock().await = Some(socket);
        self.status.set(EntityStatus::Up);

        token.cancelled().await;
        *self.socket.lock().await = None;
        self.status.set(EntityStatus::Stop);
        Ok(())
    }

    async fn to(&self, data: &str) -> Result<usize, TargetError> {
        let bytes = encode_payload(self.config.mode, data)?;
        let guard = self.socket.lock().await;
        let socket = guard
            .as_ref()
            .ok_or_else(|| TargetError::Transient("udp target not started".into()))?;
        let n = socket
            .send(&bytes)
            .await
            .map_err(|e| TargetError::Transient(e.to_string()))?;
        debug!(target_id = %self.uuid, bytes = n, "udp target delivered");
        Ok(n)
    }

    fn status(&self) -> EntityStatus {
        self.status.get()
    }

    async fn ping(&self) -> Result<(), TargetError> {
        if self.socket.lock().await.is_some() {
            Ok(())
        } else {
            Err(TargetError::Transient("udp target not started".into()))
        }
    }

    async fn stop(&self) {
        *self.socket.lock().await = None;
        self.status.set(EntityStatus::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn hex_mode_decodes_payload() {
        assert_eq!(
            encode_payload(SocketMode::Hex, "0a0b").unwrap(),
            vec![0x0A, 0x0B]
        );
        assert_eq!(
            encode_payload(SocketMode::Raw, "abc").unwrap(),
            b"abc".to_vec()
        );
    }

    #[test]
    fn bad_hex_payload_is_fatal() {
        let err = encode_payload(SocketMode::Hex, "zz").unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn tcp_target_writes_through() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16];
            let n = stream.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        let target = TcpTarget::new(
            "OUT1",
            TcpTargetConfig {
                addr: addr.to_string(),
                mode: SocketMode::Raw,
                ping_packet: None,
                ping_interval_seconds: 0,
            },
        );
        let n = target.to("hello").await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(target.status(), EntityStatus::Up);
        assert_eq!(accept.await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn udp_target_requires_start() {
        let target = UdpTarget::new(
            "OUT1",
            UdpTargetConfig {
                addr: "127.0.0.1:9000".to_string(),
                mode: SocketMode::Raw,
            },
        );
        let err = target.to("hello").await.unwrap_err();
        assert!(!err.is_fatal());
    }
}
