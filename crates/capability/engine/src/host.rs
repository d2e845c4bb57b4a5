//! 脚本宿主桥：把规则与应用脚本的宿主调用接到引擎内部能力。
//!
//! 脚本 VM 跑在阻塞线程上，异步资源经运行时句柄 block_on 桥接。
//! 桥持引擎内核的弱引用，引擎销毁后的调用一律报错而不是悬挂。

use crate::EngineInner;
use crate::read;
use domain::NotifyType;
use ox_driver::Driver;
use ox_runtime::HostContext;
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub struct HostBridge {
    inner: Weak<EngineInner>,
}

impl HostBridge {
    pub(crate) fn new(inner: &Arc<EngineInner>) -> Self {
        Self {
            inner: Arc::downgrade(inner),
        }
    }

    fn inner(&self) -> Result<Arc<EngineInner>, String> {
        self.inner
            .upgrade()
            .ok_or_else(|| "engine stopped".to_string())
    }

    fn device(
        inner: &Arc<EngineInner>,
        device_uuid: &str,
    ) -> Result<Arc<dyn Driver>, String> {
        let devices = read(&inner.devices);
        devices
            .get(device_uuid)
            .map(|slot| Arc::clone(&slot.instance))
            .ok_or_else(|| format!("no such device: {device_uuid}"))
    }
}

/// 空串视为无参。
fn parse_args(args: &str) -> Result<Value, String> {
    if args.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(args).map_err(|e| format!("bad args json: {e}"))
}

fn parse_record(record_json: &str) -> Result<Map<String, Value>, String> {
    serde_json::from_str(record_json).map_err(|e| format!("bad record json: {e}"))
}

fn parse_level(level: &str) -> NotifyType {
    match level.to_ascii_uppercase().as_str() {
        "FATAL" => NotifyType::Fatal,
        "ERROR" => NotifyType::Error,
        "WARNING" | "WARN" => NotifyType::Warning,
        _ => NotifyType::Info,
    }
}

impl HostContext for HostBridge {
    fn push_out(&self, target_uuid: &str, payload: &str) -> Result<(), String> {
        let inner = self.inner()?;
        inner
            .queue
            .push_out(target_uuid, payload.to_string())
            .map_err(|e| e.to_string())
    }

    fn read_device(&self, device_uuid: &str, topic: &str, args: &str) -> Result<String, String> {
        let inner = self.inner()?;
        let driver = Self::device(&inner, device_uuid)?;
        let args = parse_args(args)?;
        let topic = topic.to_string();
        let value = inner
            .handle
            .block_on(async move { driver.on_read(&topic, &args).await })
            .map_err(|e| e.to_string())?;
        Ok(value.to_string())
    }

    fn write_device(&self, device_uuid: &str, topic: &str, args: &str) -> Result<String, String> {
        let inner = self.inner()?;
        let driver = Self::device(&inner, device_uuid)?;
        let args = parse_args(args)?;
        let topic = topic.to_string();
        let value = inner
            .handle
            .block_on(async move { driver.on_write(&topic, &args).await })
            .map_err(|e| e.to_string())?;
        Ok(value.to_string())
    }

    fn ctrl_device(&self, device_uuid: &str, topic: &str, args: &str) -> Result<String, String> {
        let inner = self.inner()?;
        let driver = Self::device(&inner, device_uuid)?;
        let args = parse_args(args)?;
        let topic = topic.to_string();
        let value = inner
            .handle
            .block_on(async move { driver.on_ctrl(&topic, &args).await })
            .map_err(|e| e.to_string())?;
        Ok(value.to_string())
    }

    fn read_source(&self, source_uuid: &str) -> Result<String, String> {
        Err(format!("read from source is not supported: {source_uuid}"))
    }

    fn write_source(&self, source_uuid: &str, payload: &str) -> Result<(), String> {
        let inner = self.inner()?;
        inner
            .queue
            .push_in(source_uuid, payload.to_string())
            .map_err(|e| e.to_string())
    }

    fn kv_set(&self, key: &str, value: &str) -> Result<(), String> {
        let inner = self.inner()?;
        inner.services.kv.set(key, value).map_err(|e| e.to_string())
    }

    fn kv_get(&self, key: &str) -> Result<Option<String>, String> {
        let inner = self.inner()?;
        Ok(inner.services.kv.try_get(key))
    }

    fn kv_del(&self, key: &str) -> Result<(), String> {
        let inner = self.inner()?;
        inner.services.kv.delete(key);
        Ok(())
    }

    fn rds_save(&self, schema_uuid: &str, record_json: &str) -> Result<(), String> {
        let inner = self.inner()?;
        let datacenter = inner
            .services
            .datacenter
            .clone()
            .ok_or_else(|| "data center not configured".to_string())?;
        let row = parse_record(record_json)?;
        let schema_uuid = schema_uuid.to_string();
        inner
            .handle
            .block_on(async move { datacenter.save(&schema_uuid, &row).await })
            .map_err(|e| e.to_string())
    }

    fn rds_list(&self, schema_uuid: &str, limit: i64, offset: i64) -> Result<String, String> {
        let inner = self.inner()?;
        let datacenter = inner
            .services
            .datacenter
            .clone()
            .ok_or_else(|| "data center not configured".to_string())?;
        let size = limit.max(1);
        let page = offset / size + 1;
        let schema_uuid = schema_uuid.to_string();
        let rows = inner
            .handle
            .block_on(async move { datacenter.list(&schema_uuid, page, size, &[]).await })
            .map_err(|e| e.to_string())?;
        serde_json::to_string(&rows).map_err(|e| e.to_string())
    }

    fn rds_last(&self, schema_uuid: &str) -> Result<String, String> {
        let inner = self.inner()?;
        let datacenter = inner
            .services
            .datacenter
            .clone()
            .ok_or_else(|| "data center not configured".to_string())?;
        let schema_uuid = schema_uuid.to_string();
        let row = inner
            .handle
            .block_on(async move { datacenter.last(&schema_uuid, &[]).await })
            .map_err(|e| e.to_string())?;
        match row {
            Some(row) => serde_json::to_string(&row).map_err(|e| e.to_string()),
            None => Ok("null".to_string()),
        }
    }

    fn rds_update_last(&self, schema_uuid: &str, record_json: &str) -> Result<(), String> {
        let inner = self.inner()?;
        let datacenter = inner
            .services
            .datacenter
            .clone()
            .ok_or_else(|| "data center not configured".to_string())?;
        let fields = parse_record(record_json)?;
        let schema_uuid = schema_uuid.to_string();
        inner
            .handle
            .block_on(async move { datacenter.update_last(&schema_uuid, &fields).await })
            .map_err(|e| e.to_string())
    }

    fn notify(&self, level: &str, event: &str, message: &str) -> Result<(), String> {
        let inner = self.inner()?;
        let store = inner
            .services
            .notify
            .clone()
            .ok_or_else(|| "notify store not configured".to_string())?;
        let notify_type = parse_level(level);
        let event = event.to_string();
        let message = message.to_string();
        inner
            .handle
            .block_on(async move { store.push(notify_type, &event, &message, &message).await })
            .map_err(|e| e.to_string())
    }

    fn http_get(&self, url: &str) -> Result<String, String> {
        let inner = self.inner()?;
        let http = inner.http.clone();
        let url = url.to_string();
        inner.handle.block_on(async move {
            let response = http.get(&url).send().await.map_err(|e| e.to_string())?;
            response.text().await.map_err(|e| e.to_string())
        })
    }

    fn http_post(&self, url: &str, body: &str) -> Result<String, String> {
        let inner = self.inner()?;
        let http = inner.http.clone();
        let url = url.to_string();
        let body = body.to_string();
        inner.handle.block_on(async move {
            let response = http
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            response.text().await.map_err(|e| e.to_string())
        })
    }

    /// TCP 可达性探测。拒绝连接说明主机在线，计为可达。
    fn ping(&self, host: &str, timeout_ms: u64) -> bool {
        let Ok(inner) = self.inner() else {
            return false;
        };
        let addr = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:80")
        };
        inner.handle.block_on(async move {
            let connect = tokio::net::TcpStream::connect(&addr);
            match tokio::time::timeout(Duration::from_millis(timeout_ms), connect).await {
                Ok(Ok(_)) => true,
                Ok(Err(err)) => err.kind() == std::io::ErrorKind::ConnectionRefused,
                Err(_) => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing_defaults_to_info() {
        assert_eq!(parse_level("fatal"), NotifyType::Fatal);
        assert_eq!(parse_level("WARN"), NotifyType::Warning);
        assert_eq!(parse_level("banana"), NotifyType::Info);
    }

    #[test]
    fn empty_args_are_null() {
        assert_eq!(parse_args("  ").unwrap(), Value::Null);
        assert!(parse_args("{bad").is_err());
        assert_eq!(parse_args("{\"a\":1}").unwrap()["a"], 1);
    }

    #[tokio::test]
    async fn kv_bridge_distinguishes_empty_value_from_missing_key() {
        let (engine, _receivers) = crate::Engine::new(4, crate::EngineServices::default());
        let bridge = HostBridge::new(&engine.inner);
        bridge.kv_set("flag", "").unwrap();
        assert_eq!(bridge.kv_get("flag").unwrap(), Some(String::new()));
        assert_eq!(bridge.kv_get("missing").unwrap(), None);
    }
}
