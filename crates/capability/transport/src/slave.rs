//! 从机读循环。

use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::framer::{FrameMode, Framer};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 每帧回调。返回 false 时循环提前退出。
pub type FrameHandler = Box<dyn FnMut(Result<Vec<u8>, &TransportError>) -> bool + Send>;

/// 从机循环：持续读取完整帧并逐帧回调。
///
/// 取消令牌触发或通道不可恢复时终止；读超时不视为错误，
/// 仅继续等待下一帧。
pub struct SlaveLoop {
    endpoint: Box<dyn Endpoint>,
    framer: Framer,
    poll_timeout: Duration,
}

impl SlaveLoop {
    pub fn new(endpoint: Box<dyn Endpoint>, mode: FrameMode, poll_timeout: Duration) -> Self {
        Self {
            endpoint,
            framer: Framer::new(mode),
            poll_timeout,
        }
    }

    pub async fn run(mut self, token: CancellationToken, mut handler: FrameHandler) {
        let mut chunk = [0u8; 256];
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("slave loop cancelled");
                    break;
                }
                read = self.endpoint.read_some(&mut chunk, self.poll_timeout) => {
                    match read {
                        Ok(n) => {
                            for frame in self.framer.push_bytes(&chunk[..n]) {
                                if !handler(Ok(frame)) {
                                    self.endpoint.close().await;
                                    return;
                                }
                            }
                        }
                        Err(TransportError::Timeout(_)) => continue,
                        Err(err) => {
                            handler(Err(&err));
                            break;
                        }
                    }
                }
            }
        }
        self.endpoint.close().await;
    }
}
