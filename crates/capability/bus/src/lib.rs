//! 队列总线能力。
//!
//! 南向采集、设备读数、北向下发三条有界队列，入队非阻塞、
//! 满则丢弃并计数。通道版 XQueue 为默认实现，链表版 YQueue
//! 提供同一契约的轮询变体。

mod error;
mod xqueue;
mod yqueue;

pub use error::BusError;
pub use xqueue::{BusCounters, BusReceivers, DEFAULT_CAPACITY, XQueue};
pub use yqueue::{DRAIN_CADENCE, YQueue};
