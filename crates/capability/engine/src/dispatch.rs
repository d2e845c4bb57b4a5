//! 三路队列派发循环。
//!
//! 南向与设备队列的记录按实体当前绑定的规则链逐条执行，北向
//! 队列投递到目标并在失败时落离线缓存。实体 UUID 每次现查，
//! 已删除实体的记录按空操作丢弃。

use crate::{Engine, EngineInner, read};
use domain::QueueData;
use ox_bus::BusReceivers;
use ox_runtime::RuleOutcome;
use ox_sink::{RetryPolicy, send_with_retry};
use ox_telemetry::{record_cache_spilled, record_queue_out_failed};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

enum Binding {
    Source,
    Device,
}

impl Engine {
    /// 拉起三路派发循环。随根令牌或队列关闭退出。
    pub fn spawn_dispatchers(&self, receivers: BusReceivers) -> Vec<JoinHandle<()>> {
        let BusReceivers {
            mut in_rx,
            mut device_rx,
            mut out_rx,
        } = receivers;
        let mut handles = Vec::with_capacity(3);

        let inner = Arc::clone(&self.inner);
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.root.cancelled() => return,
                    data = in_rx.recv() => {
                        let Some(data) = data else { return };
                        if let QueueData::Source { uuid, payload } = data {
                            dispatch_rules(&inner, Binding::Source, &uuid, payload).await;
                        }
                    }
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.root.cancelled() => return,
                    data = device_rx.recv() => {
                        let Some(data) = data else { return };
                        if let QueueData::Device { uuid, payload } = data {
                            dispatch_rules(&inner, Binding::Device, &uuid, payload).await;
                        }
                    }
                }
            }
        }));

        let inner = Arc::clone(&self.inner);
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.root.cancelled() => return,
                    data = out_rx.recv() => {
                        let Some(data) = data else { return };
                        if let QueueData::Target { uuid, payload } = data {
                            deliver(&inner, &uuid, &payload).await;
                        }
                    }
                }
            }
        }));

        handles
    }
}

/// 把一条记录送进实体当前绑定的规则链。
async fn dispatch_rules(
    inner: &Arc<EngineInner>,
    binding: Binding,
    uuid: &str,
    payload: String,
) {
    let rule_ids = match binding {
        Binding::Source => read(&inner.sources)
            .get(uuid)
            .map(|slot| slot.meta.bind_rules.clone()),
        Binding::Device => read(&inner.devices)
            .get(uuid)
            .map(|slot| slot.meta.bind_rules.clone()),
    };
    let Some(rule_ids) = rule_ids else {
        debug!(uuid = %uuid, "record for unknown entity dropped");
        return;
    };
    for rule_id in rule_ids {
        let vm = read(&inner.rules)
            .get(&rule_id)
            .map(|slot| Arc::clone(&slot.vm));
        let Some(vm) = vm else {
            continue;
        };
        let data = payload.clone();
        match tokio::task::spawn_blocking(move || vm.dispatch(&data)).await {
            Ok(Ok(RuleOutcome::Success(_))) => {}
            Ok(Ok(RuleOutcome::Failed(value))) => {
                debug!(rule_id = %rule_id, value = %value, "rule chain short-circuited");
            }
            Ok(Err(err)) => {
                warn!(rule_id = %rule_id, error = %err, "rule dispatch error");
            }
            Err(err) => {
                warn!(rule_id = %rule_id, error = %err, "rule task panicked");
            }
        }
    }
}

/// 投递一条记录到输出目标，失败按配置落离线缓存。
async fn deliver(inner: &Arc<EngineInner>, uuid: &str, payload: &str) {
    let slot = read(&inner.targets)
        .get(uuid)
        .map(|slot| (Arc::clone(&slot.instance), slot.meta.cache_offline_data));
    let Some((target, cache_enabled)) = slot else {
        debug!(uuid = %uuid, "record for unknown target dropped");
        return;
    };
    if let Err(err) = send_with_retry(target.as_ref(), payload, &RetryPolicy::default()).await {
        record_queue_out_failed();
        warn!(uuid = %uuid, error = %err, "delivery failed");
        if cache_enabled {
            if let Some(cache) = inner.services.lost_cache.clone() {
                match cache.save(uuid, payload).await {
                    Ok(()) => record_cache_spilled(),
                    Err(err) => {
                        warn!(uuid = %uuid, error = %err, "offline cache write failed");
                    }
                }
            }
        }
    }
}
