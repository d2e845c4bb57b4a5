//! 队列总线错误。

use thiserror::Error;

/// 入队失败原因。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// 队列已满，本条消息被丢弃。
    #[error("exceed max queue size")]
    ExceedMaxQueueSize,

    /// 消费端已关闭。
    #[error("queue closed")]
    Closed,
}
