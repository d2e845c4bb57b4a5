//! 请求/应答主机端口。

use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::framer::{FrameMode, Framer};
use std::time::Duration;
use tokio::time::Instant;

/// 主机端口：写出一帧请求，期限内读回下一帧完整应答。
pub struct MasterPort {
    endpoint: Box<dyn Endpoint>,
    framer: Framer,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl MasterPort {
    pub fn new(
        endpoint: Box<dyn Endpoint>,
        mode: FrameMode,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            framer: Framer::new(mode),
            read_timeout,
            write_timeout,
        }
    }

    /// 发送请求并等待下一帧应答。
    ///
    /// 期限内未凑齐完整帧返回 Timeout；坏帧丢弃由封包器计数，
    /// 不中断等待。
    pub async fn send_frame(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.endpoint.write_all(request, self.write_timeout).await?;
        self.read_frame().await
    }

    /// 读取下一帧完整应答。
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + self.read_timeout;
        let mut chunk = [0u8; 256];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout(self.read_timeout.as_millis() as u64));
            }
            let n = self.endpoint.read_some(&mut chunk, remaining).await?;
            let mut frames = self.framer.push_bytes(&chunk[..n]);
            if !frames.is_empty() {
                return Ok(frames.remove(0));
            }
        }
    }

    /// 关闭下层通道。
    pub async fn close(&mut self) {
        self.endpoint.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::LoopbackEndpoint;

    #[tokio::test]
    async fn request_reply_round_trip() {
        let (master_side, mut slave_side) = LoopbackEndpoint::pair();
        let mut port = MasterPort::new(
            Box::new(master_side),
            FrameMode::HeadTail {
                head: vec![0xEE, 0xEF],
                tail: vec![0x0D, 0x0A],
            },
            Duration::from_millis(500),
            Duration::from_millis(500),
        );

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = slave_side
                .read_some(&mut buf, Duration::from_millis(500))
                .await
                .unwrap();
            assert_eq!(&buf[..n], &[0x01, 0x02]);
            // 应答分两次到达
            slave_side
                .write_all(&[0xEE, 0xEF, 0xAA], Duration::from_millis(100))
                .await
                .unwrap();
            slave_side
                .write_all(&[0xBB, 0x0D, 0x0A], Duration::from_millis(100))
                .await
                .unwrap();
        });

        let reply = port.send_frame(&[0x01, 0x02]).await.unwrap();
        assert_eq!(reply, vec![0xEE, 0xEF, 0xAA, 0xBB, 0x0D, 0x0A]);
    }

    #[tokio::test]
    async fn times_out_without_reply() {
        let (master_side, _slave_side) = LoopbackEndpoint::pair();
        let mut port = MasterPort::new(
            Box::new(master_side),
            FrameMode::Fixed(4),
            Duration::from_millis(50),
            Duration::from_millis(50),
        );
        let err = port.send_frame(&[0x01]).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }
}
