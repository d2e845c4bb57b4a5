//! 双工字节通道抽象。
//!
//! 串口等硬件通道由外部 shim 以同一 trait 接入；核心自带 TCP
//! 实现与测试用的内存回环实现。

use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// 带每操作期限的双工字节通道。
#[async_trait]
pub trait Endpoint: Send {
    /// 读取若干字节；期限内无数据返回 Timeout，对端关闭返回 Closed。
    async fn read_some(&mut self, buf: &mut [u8], timeout: Duration)
    -> Result<usize, TransportError>;

    /// 整体写入；期限内未完成返回 Timeout。
    async fn write_all(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError>;

    /// 关闭通道；幂等。
    async fn close(&mut self);
}

/// TCP 通道。
pub struct TcpEndpoint {
    stream: Option<TcpStream>,
}

impl TcpEndpoint {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// 建立到远端的连接。
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, TransportError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))??;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Endpoint for TcpEndpoint {
    async fn read_some(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let n = tokio::time::timeout(timeout, stream.read(buf))
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))??;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        Ok(n)
    }

    async fn write_all(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        tokio::time::timeout(timeout, stream.write_all(data))
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))??;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

/// 内存回环通道：测试用，一端写入另一端可读。
pub struct LoopbackEndpoint {
    rx: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
    tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    pending: Vec<u8>,
    closed: bool,
}

impl LoopbackEndpoint {
    /// 创建互联的一对通道。
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = tokio::sync::mpsc::unbounded_channel();
        let (tx_b, rx_a) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                rx: rx_a,
                tx: tx_a,
                pending: Vec::new(),
                closed: false,
            },
            Self {
                rx: rx_b,
                tx: tx_b,
                pending: Vec::new(),
                closed: false,
            },
        )
    }
}

#[async_trait]
impl Endpoint for LoopbackEndpoint {
    async fn read_some(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.pending.is_empty() {
            let chunk = tokio::time::timeout(timeout, self.rx.recv())
                .await
                .map_err(|_| TransportError::Timeout(timeout.as_millis() as u64))?
                .ok_or(TransportError::Closed)?;
            self.pending = chunk;
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    async fn write_all(&mut self, data: &[u8], _timeout: Duration) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(data.to_vec())
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.closed = true;
        self.rx.close();
    }
}
