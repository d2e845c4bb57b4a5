//! 链表实现的三路队列变体。
//!
//! 与 XQueue 同一套入队契约，消费端按 8 毫秒节拍轮询批量取出。
//! 两种实现可互换，链表版适合无 tokio 消费者的嵌入场景。

use crate::error::BusError;
use domain::QueueData;
use ox_telemetry::{
    record_queue_in, record_queue_in_failed, record_queue_out, record_queue_out_failed,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 轮询节拍。
pub const DRAIN_CADENCE: Duration = Duration::from_millis(8);

struct Lane {
    deque: Mutex<VecDeque<QueueData>>,
    capacity: usize,
    ok: AtomicU64,
    failed: AtomicU64,
    inbound: bool,
}

impl Lane {
    fn new(capacity: usize, inbound: bool) -> Self {
        Self {
            deque: Mutex::new(VecDeque::new()),
            capacity,
            ok: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            inbound,
        }
    }

    fn push(&self, data: QueueData) -> Result<(), BusError> {
        let mut deque = match self.deque.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if deque.len() + 1 > self.capacity {
            self.failed.fetch_add(1, Ordering::Relaxed);
            if self.inbound {
                record_queue_in_failed();
            } else {
                record_queue_out_failed();
            }
            return Err(BusError::ExceedMaxQueueSize);
        }
        deque.push_back(data);
        self.ok.fetch_add(1, Ordering::Relaxed);
        if self.inbound {
            record_queue_in();
        } else {
            record_queue_out();
        }
        Ok(())
    }

    fn pop(&self) -> Option<QueueData> {
        let mut deque = match self.deque.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        deque.pop_front()
    }
}

/// 三路链表队列。
pub struct YQueue {
    in_lane: Lane,
    device_lane: Lane,
    out_lane: Lane,
}

impl YQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            in_lane: Lane::new(capacity, true),
            device_lane: Lane::new(capacity, true),
            out_lane: Lane::new(capacity, false),
        }
    }

    /// 南向数据入队。
    pub fn push_in(&self, uuid: &str, payload: String) -> Result<(), BusError> {
        self.in_lane.push(QueueData::Source {
            uuid: uuid.to_string(),
            payload,
        })
    }

    /// 设备读数入队。
    pub fn push_device(&self, uuid: &str, payload: String) -> Result<(), BusError> {
        self.device_lane.push(QueueData::Device {
            uuid: uuid.to_string(),
            payload,
        })
    }

    /// 北向下发入队。
    pub fn push_out(&self, uuid: &str, payload: String) -> Result<(), BusError> {
        self.out_lane.push(QueueData::Target {
            uuid: uuid.to_string(),
            payload,
        })
    }

    pub fn pop_in(&self) -> Option<QueueData> {
        self.in_lane.pop()
    }

    pub fn pop_device(&self) -> Option<QueueData> {
        self.device_lane.pop()
    }

    pub fn pop_out(&self) -> Option<QueueData> {
        self.out_lane.pop()
    }

    /// 按节拍轮询三条队列，逐条回调，直到令牌取消。
    pub async fn run_drain<F>(&self, token: CancellationToken, mut handler: F)
    where
        F: FnMut(QueueData) + Send,
    {
        let mut tick = tokio::time::interval(DRAIN_CADENCE);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {
                    while let Some(data) = self.pop_in() {
                        handler(data);
                    }
                    while let Some(data) = self.pop_device() {
                        handler(data);
                    }
                    while let Some(data) = self.pop_out() {
                        handler(data);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_fifo() {
        let queue = YQueue::new(4);
        queue.push_in("IN1", "a".into()).unwrap();
        queue.push_in("IN1", "b".into()).unwrap();
        assert_eq!(queue.pop_in().unwrap().payload(), "a");
        assert_eq!(queue.pop_in().unwrap().payload(), "b");
        assert!(queue.pop_in().is_none());
    }

    #[test]
    fn capacity_enforced() {
        let queue = YQueue::new(2);
        queue.push_out("OUT1", "a".into()).unwrap();
        queue.push_out("OUT1", "b".into()).unwrap();
        assert_eq!(
            queue.push_out("OUT1", "c".into()).unwrap_err(),
            BusError::ExceedMaxQueueSize
        );
        // 取出一条后可再入队
        assert!(queue.pop_out().is_some());
        assert!(queue.push_out("OUT1", "d".into()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_loop_delivers_in_order() {
        let queue = YQueue::new(8);
        queue.push_in("IN1", "1".into()).unwrap();
        queue.push_device("DEVICE1", "2".into()).unwrap();
        let token = CancellationToken::new();
        let stop = token.clone();
        let mut seen = Vec::new();
        let drain = queue.run_drain(token, |data| {
            seen.push(data.payload().to_string());
            if seen.len() == 2 {
                stop.cancel();
            }
        });
        drain.await;
        assert_eq!(seen, vec!["1".to_string(), "2".to_string()]);
    }
}
