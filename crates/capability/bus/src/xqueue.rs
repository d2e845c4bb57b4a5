//! 通道实现的三路有界队列。
//!
//! 南向采集、设备读数、北向下发各一条队列，同一条队列内严格
//! 先进先出。入队非阻塞，满则丢弃并返回 ExceedMaxQueueSize。

use crate::error::BusError;
use domain::QueueData;
use ox_telemetry::{
    record_queue_in, record_queue_in_failed, record_queue_out, record_queue_out_failed,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// 默认队列容量。
pub const DEFAULT_CAPACITY: usize = 10_240;

/// 单实例入队计数，便于按队列定位丢弃来源。
#[derive(Debug, Default)]
pub struct BusCounters {
    pub in_ok: AtomicU64,
    pub in_failed: AtomicU64,
    pub out_ok: AtomicU64,
    pub out_failed: AtomicU64,
}

/// 三路队列的消费端。
pub struct BusReceivers {
    pub in_rx: mpsc::Receiver<QueueData>,
    pub device_rx: mpsc::Receiver<QueueData>,
    pub out_rx: mpsc::Receiver<QueueData>,
}

/// 三路队列的生产端。克隆后可分发给各采集与下发任务。
#[derive(Clone)]
pub struct XQueue {
    in_tx: mpsc::Sender<QueueData>,
    device_tx: mpsc::Sender<QueueData>,
    out_tx: mpsc::Sender<QueueData>,
    counters: Arc<BusCounters>,
}

impl XQueue {
    /// 创建生产端与消费端配对。
    pub fn new(capacity: usize) -> (Self, BusReceivers) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (device_tx, device_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        (
            Self {
                in_tx,
                device_tx,
                out_tx,
                counters: Arc::new(BusCounters::default()),
            },
            BusReceivers {
                in_rx,
                device_rx,
                out_rx,
            },
        )
    }

    /// 南向数据入队。
    pub fn push_in(&self, uuid: &str, payload: String) -> Result<(), BusError> {
        let data = QueueData::Source {
            uuid: uuid.to_string(),
            payload,
        };
        push(&self.in_tx, data, &self.counters.in_ok, &self.counters.in_failed, true)
    }

    /// 设备读数入队。
    pub fn push_device(&self, uuid: &str, payload: String) -> Result<(), BusError> {
        let data = QueueData::Device {
            uuid: uuid.to_string(),
            payload,
        };
        push(&self.device_tx, data, &self.counters.in_ok, &self.counters.in_failed, true)
    }

    /// 北向下发入队。
    pub fn push_out(&self, uuid: &str, payload: String) -> Result<(), BusError> {
        let data = QueueData::Target {
            uuid: uuid.to_string(),
            payload,
        };
        push(&self.out_tx, data, &self.counters.out_ok, &self.counters.out_failed, false)
    }

    pub fn counters(&self) -> &BusCounters {
        &self.counters
    }
}

fn push(
    tx: &mpsc::Sender<QueueData>,
    data: QueueData,
    ok: &AtomicU64,
    failed: &AtomicU64,
    inbound: bool,
) -> Result<(), BusError> {
    match tx.try_send(data) {
        Ok(()) => {
            ok.fetch_add(1, Ordering::Relaxed);
            if inbound {
                record_queue_in();
            } else {
                record_queue_out();
            }
            Ok(())
        }
        Err(mpsc::error::TrySendError::Full(data)) => {
            failed.fetch_add(1, Ordering::Relaxed);
            if inbound {
                record_queue_in_failed();
            } else {
                record_queue_out_failed();
            }
            warn!(uuid = data.uuid(), "queue full, message dropped");
            Err(BusError::ExceedMaxQueueSize)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(BusError::Closed),
    }
}
