//! TCP 采集源。
//!
//! 监听端口，对每个连接套一层封包器，按帧切分后把完整帧的
//! 十六进制文本推入南向队列。

use crate::{Source, SourceError, StatusCell};
use async_trait::async_trait;
use domain::EntityStatus;
use ox_bus::XQueue;
use ox_transport::{Endpoint, FrameMode, SlaveLoop, TcpEndpoint};
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// 帧边界配置，十六进制字符串表达标记序列。
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FrameModeConfig {
    HeadTail { head: String, tail: String },
    LengthPrefixed,
    Fixed { size: usize },
}

impl FrameModeConfig {
    pub fn to_frame_mode(&self) -> Result<FrameMode, SourceError> {
        match self {
            FrameModeConfig::HeadTail { head, tail } => {
                let head = hex::decode(head).map_err(|e| SourceError::Config(e.to_string()))?;
                let tail = hex::decode(tail).map_err(|e| SourceError::Config(e.to_string()))?;
                if head.is_empty() || tail.is_empty() {
                    return Err(SourceError::Config("empty frame marker".into()));
                }
                Ok(FrameMode::HeadTail { head, tail })
            }
            FrameModeConfig::LengthPrefixed => Ok(FrameMode::LengthPrefixed),
            FrameModeConfig::Fixed { size } => {
                if *size == 0 {
                    return Err(SourceError::Config("fixed frame size must be > 0".into()));
                }
                Ok(FrameMode::Fixed(*size))
            }
        }
    }
}

/// TCP 采集源配置。
#[derive(Debug, Clone, Deserialize)]
pub struct TcpSourceConfig {
    pub listen: String,
    pub framing: FrameModeConfig,
}

/// TCP 采集源。
pub struct TcpSource {
    uuid: String,
    config: TcpSourceConfig,
    status: StatusCell,
}

impl TcpSource {
    pub fn new(uuid: &str, config: TcpSourceConfig) -> Self {
        Self {
            uuid: uuid.to_string(),
            config,
            status: StatusCell::default(),
        }
    }
}

#[async_trait]
impl Source for TcpSource {
    async fn start(&self, queue: XQueue, token: CancellationToken) -> Result<(), SourceError> {
        self.status.set(EntityStatus::Pending);
        let mode = self.config.framing.to_frame_mode()?;
        let listener = TcpListener::bind(&self.config.listen)
            .await
            .map_err(|err| SourceError::Source(err.to_string()))?;
        self.status.set(EntityStatus::Up);
        info!(source_id = %self.uuid, listen = %self.config.listen, "tcp source listening");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(source_id = %self.uuid, peer = %peer, "tcp source accepted");
                        let endpoint = Box::new(TcpEndpoint::new(stream));
                        tokio::spawn(pump_frames(
                            endpoint,
                            mode.clone(),
                            queue.clone(),
                            self.uuid.clone(),
                            token.child_token(),
                        ));
                    }
                    Err(err) => {
                        warn!(source_id = %self.uuid, error = %err, "tcp accept failed");
                    }
                }
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
    }
}

/// 单连接的收帧循环，每个完整帧推一条十六进制文本。
pub(crate) async fn pump_frames(
    endpoint: Box<dyn Endpoint>,
    mode: FrameMode,
    queue: XQueue,
    uuid: String,
    token: CancellationToken,
) {
    let lp = SlaveLoop::new(endpoint, mode, POLL_TIMEOUT);
    let push_uuid = uuid.clone();
    lp.run(
        token,
        Box::new(move |frame| {
            match frame {
                Ok(frame) => {
                    if let Err(err) = queue.push_in(&push_uuid, hex::encode(frame)) {
                        warn!(source_id = %push_uuid, error = %err, "push_in failed");
                    }
                }
                Err(err) => {
                    warn!(source_id = %push_uuid, error = %err, "tcp connection lost");
                }
            }
            true
        }),
    )
    .await;
}
