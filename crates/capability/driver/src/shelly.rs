//! Shelly 设备管理器。
//!
//! 按槽位归集局域网内扫描到的 Shelly 设备，MAC 作为唯一键，
//! 同一设备换 IP 后覆盖旧记录。扫描走 Gen1 HTTP RPC，存活检测
//! 连续失败达到阈值后将设备逐出槽位。

use crate::DriverError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_millis(800);
/// 存活检测连续失败逐出阈值。
const MAX_ALIVE_FAILURES: u32 = 3;

/// 扫描状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanStatus {
    Scanning,
    Done,
}

impl Default for ScanStatus {
    fn default() -> Self {
        ScanStatus::Done
    }
}

/// Shelly.GetDeviceInfo 应答体。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellyDeviceInfo {
    #[serde(default)]
    pub name: Option<String>,
    pub id: String,
    pub mac: String,
    #[serde(default)]
    pub slot: i64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub r#gen: u32,
    #[serde(default)]
    pub fw_id: String,
    #[serde(default)]
    pub ver: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub auth_en: bool,
    #[serde(default)]
    pub auth_domain: Option<String>,
}

/// 输入或开关端口的即时状态。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IoPort {
    pub name: String,
    pub status: bool,
}

/// 槽位内的设备记录。
#[derive(Debug, Clone, Serialize)]
pub struct ShellyDeviceRecord {
    pub ip: String,
    pub name: Option<String>,
    pub id: String,
    pub mac: String,
    pub slot: i64,
    pub model: String,
    pub r#gen: u32,
    pub fw_id: String,
    pub ver: String,
    pub app: String,
    pub auth_en: bool,
    pub auth_domain: Option<String>,
    /// 输入端口状态，扫描与探活时刷新。
    pub inputs: Vec<IoPort>,
    /// 开关端口状态。
    pub switches: Vec<IoPort>,
    /// 连续存活检测失败次数。
    #[serde(skip)]
    failures: u32,
}

impl ShellyDeviceRecord {
    fn from_info(ip: &str, info: ShellyDeviceInfo) -> Self {
        Self {
            ip: ip.to_string(),
            name: info.name,
            id: info.id,
            mac: info.mac.to_uppercase(),
            slot: info.slot,
            model: info.model,
            r#gen: info.r#gen,
            fw_id: info.fw_id,
            ver: info.ver,
            app: info.app,
            auth_en: info.auth_en,
            auth_domain: info.auth_domain,
            inputs: Vec::new(),
            switches: Vec::new(),
            failures: 0,
        }
    }
}

/// 槽位注册表：slot → mac → 记录，另维护 MAC 插入顺序。
#[derive(Default)]
struct SlotRegistry {
    slots: HashMap<String, HashMap<String, ShellyDeviceRecord>>,
    keys: Vec<String>,
    status: ScanStatus,
}

impl SlotRegistry {
    fn register_slot(&mut self, slot: &str) {
        self.slots.entry(slot.to_string()).or_default();
    }

    fn unregister_slot(&mut self, slot: &str) {
        if let Some(devices) = self.slots.remove(slot) {
            self.keys.retain(|mac| !devices.contains_key(mac));
        }
    }

    fn set(&mut self, slot: &str, record: ShellyDeviceRecord) {
        let Some(devices) = self.slots.get_mut(slot) else {
            return;
        };
        let mac = record.mac.clone();
        devices.insert(mac.clone(), record);
        if !self.keys.contains(&mac) {
            self.keys.push(mac);
        }
    }

    fn get(&self, slot: &str, mac: &str) -> Option<&ShellyDeviceRecord> {
        self.slots.get(slot)?.get(&mac.to_uppercase())
    }

    fn delete(&mut self, slot: &str, mac: &str) {
        let mac = mac.to_uppercase();
        if let Some(devices) = self.slots.get_mut(slot) {
            devices.remove(&mac);
        }
        self.keys.retain(|k| k != &mac);
    }

    /// 槽位内设备，按 MAC 插入顺序。
    fn list(&self, slot: &str) -> Vec<ShellyDeviceRecord> {
        let Some(devices) = self.slots.get(slot) else {
            return Vec::new();
        };
        self.keys
            .iter()
            .filter_map(|mac| devices.get(mac).cloned())
            .collect()
    }

    fn size(&self) -> usize {
        self.slots.values().map(HashMap::len).sum()
    }
}

/// Shelly 设备管理器。
pub struct ShellyManager {
    http: reqwest::Client,
    registry: RwLock<SlotRegistry>,
}

impl ShellyManager {
    pub fn new() -> Result<Self, DriverError> {
        let http = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| DriverError::Config(e.to_string()))?;
        Ok(Self {
            http,
            registry: RwLock::new(SlotRegistry::default()),
        })
    }

    pub async fn status(&self) -> ScanStatus {
        self.registry.read().await.status
    }

    pub async fn register_slot(&self, slot: &str) {
        self.registry.write().await.register_slot(slot);
    }

    pub async fn unregister_slot(&self, slot: &str) {
        self.registry.write().await.unregister_slot(slot);
    }

    pub async fn get(&self, slot: &str, mac: &str) -> Option<ShellyDeviceRecord> {
        self.registry.read().await.get(slot, mac).cloned()
    }

    pub async fn list(&self, slot: &str) -> Vec<ShellyDeviceRecord> {
        self.registry.read().await.list(slot)
    }

    pub async fn size(&self) -> usize {
        self.registry.read().await.size()
    }

    /// 扫描网段并把发现的设备并入槽位。同一 MAC 只保留最新记录。
    pub async fn scan(&self, slot: &str, cidr: &str) -> Result<usize, DriverError> {
        let hosts = expand_cidr(cidr)?;
        {
            let mut registry = self.registry.write().await;
            registry.register_slot(slot);
            registry.status = ScanStatus::Scanning;
        }
        info!(slot, cidr, hosts = hosts.len(), "shelly scan started");

        let mut found = 0usize;
        for ip in &hosts {
            if let Ok(info) = self.device_info(ip).await {
                debug!(slot, ip = %ip, mac = %info.mac, "shelly device found");
                let mut record = ShellyDeviceRecord::from_info(ip, info);
                self.fill_ports(&mut record).await;
                self.registry.write().await.set(slot, record);
                found += 1;
            }
        }

        self.registry.write().await.status = ScanStatus::Done;
        info!(slot, found, "shelly scan finished");
        Ok(found)
    }

    /// 逐设备探活；在线设备刷新记录与端口状态，连续失败达到
    /// 阈值的设备被逐出。
    pub async fn test_alive(&self, slot: &str) {
        let devices = self.list(slot).await;
        for device in devices {
            match self.device_info(&device.ip).await {
                Ok(info) => {
                    let mut refreshed = ShellyDeviceRecord::from_info(&device.ip, info);
                    self.fill_ports(&mut refreshed).await;
                    self.registry.write().await.set(slot, refreshed);
                }
                Err(_) => {
                    let mut registry = self.registry.write().await;
                    let mut evict = false;
                    if let Some(record) = registry
                        .slots
                        .get_mut(slot)
                        .and_then(|devices| devices.get_mut(&device.mac))
                    {
                        record.failures += 1;
                        evict = record.failures >= MAX_ALIVE_FAILURES;
                    }
                    if evict {
                        warn!(slot, mac = %device.mac, ip = %device.ip, "shelly device evicted");
                        registry.delete(slot, &device.mac);
                    }
                }
            }
        }
    }

    /// 翻转设备 0 号开关，返回翻转前状态。
    pub async fn toggle(&self, ip: &str) -> Result<bool, DriverError> {
        #[derive(Deserialize)]
        struct ToggleReply {
            was_on: bool,
        }
        let url = format!("http://{ip}/rpc/Switch.Toggle?id=0");
        let reply: ToggleReply = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?
            .error_for_status()
            .map_err(|e| DriverError::Io(e.to_string()))?
            .json()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        Ok(reply.was_on)
    }

    /// 刷新 Pro1 的两路输入与一路开关状态。读不到的端口跳过。
    async fn fill_ports(&self, record: &mut ShellyDeviceRecord) {
        if record.app != "Pro1" {
            return;
        }
        record.inputs.clear();
        record.switches.clear();
        for id in [0u8, 1] {
            if let Ok(status) = self.port_status(&record.ip, "Input", id).await {
                record.inputs.push(IoPort {
                    name: format!("input{id}"),
                    status,
                });
            }
        }
        if let Ok(status) = self.port_status(&record.ip, "Switch", 0).await {
            record.switches.push(IoPort {
                name: "switch0".to_string(),
                status,
            });
        }
    }

    async fn port_status(&self, ip: &str, component: &str, id: u8) -> Result<bool, DriverError> {
        #[derive(Deserialize)]
        struct StatusReply {
            #[serde(default)]
            output: bool,
        }
        let url = format!("http://{ip}/rpc/{component}.GetStatus?id={id}");
        let reply: StatusReply = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?
            .error_for_status()
            .map_err(|e| DriverError::Io(e.to_string()))?
            .json()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        Ok(reply.output)
    }

    async fn device_info(&self, ip: &str) -> Result<ShellyDeviceInfo, DriverError> {
        let url = format!("http://{ip}/rpc/Shelly.GetDeviceInfo");
        self.http
            .get(&url)
            .send()
            .await
            .map_err(|e| DriverError::Io(e.to_string()))?
            .error_for_status()
            .map_err(|e| DriverError::Io(e.to_string()))?
            .json()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))
    }
}

/// 展开 IPv4 网段为主机地址列表，网络地址与广播地址除外。
pub fn expand_cidr(cidr: &str) -> Result<Vec<String>, DriverError> {
    let (addr_text, len_text) = cidr
        .split_once('/')
        .ok_or_else(|| DriverError::Config(format!("bad cidr: {cidr}")))?;
    let addr: Ipv4Addr = addr_text
        .parse()
        .map_err(|_| DriverError::Config(format!("bad cidr address: {cidr}")))?;
    let prefix: u32 = len_text
        .parse()
        .map_err(|_| DriverError::Config(format!("bad cidr prefix: {cidr}")))?;
    if !(1..=30).contains(&prefix) {
        return Err(DriverError::Config(format!("bad cidr prefix: {cidr}")));
    }
    let mask = u32::MAX << (32 - prefix);
    let network = u32::from(addr) & mask;
    let broadcast = network | !mask;
    Ok((network + 1..broadcast)
        .map(|raw| Ipv4Addr::from(raw).to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mac: &str, ip: &str) -> ShellyDeviceRecord {
        ShellyDeviceRecord::from_info(
            ip,
            ShellyDeviceInfo {
                name: None,
                id: format!("shellypro1-{mac}"),
                mac: mac.to_string(),
                slot: 1,
                model: "SPSW-001XE16EU".to_string(),
                r#gen: 2,
                fw_id: "20230913-112003".to_string(),
                ver: "1.0.3".to_string(),
                app: "Pro1".to_string(),
                auth_en: false,
                auth_domain: None,
            },
        )
    }

    #[test]
    fn from_info_carries_slot_auth_and_empty_ports() {
        let record = record("A1B2C3D4E5F6", "192.168.1.10");
        assert_eq!(record.slot, 1);
        assert!(record.auth_domain.is_none());
        assert!(record.inputs.is_empty());
        assert!(record.switches.is_empty());
    }

    #[test]
    fn device_info_reply_parses_optional_fields() {
        let json = r#"{
            "name": null, "id": "shellypro1-a1b2c3", "mac": "a1b2c3d4e5f6",
            "slot": 2, "model": "SPSW-001XE16EU", "gen": 2,
            "fw_id": "20230913-112003", "ver": "1.0.3", "app": "Pro1",
            "auth_en": true, "auth_domain": "shellypro1-a1b2c3"
        }"#;
        let info: ShellyDeviceInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.slot, 2);
        assert!(info.auth_en);
        assert_eq!(info.auth_domain.as_deref(), Some("shellypro1-a1b2c3"));

        // 老固件的应答缺这些字段时按缺省补齐
        let bare = r#"{"id": "shelly1-aa", "mac": "aa"}"#;
        let info: ShellyDeviceInfo = serde_json::from_str(bare).unwrap();
        assert_eq!(info.slot, 0);
        assert!(info.auth_domain.is_none());
    }

    #[test]
    fn expand_cidr_excludes_network_and_broadcast() {
        let hosts = expand_cidr("192.168.1.0/29").unwrap();
        assert_eq!(
            hosts,
            vec![
                "192.168.1.1",
                "192.168.1.2",
                "192.168.1.3",
                "192.168.1.4",
                "192.168.1.5",
                "192.168.1.6",
            ]
        );
    }

    #[test]
    fn expand_cidr_slash24_has_254_hosts() {
        let hosts = expand_cidr("10.0.0.0/24").unwrap();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], "10.0.0.1");
        assert_eq!(hosts[253], "10.0.0.254");
    }

    #[test]
    fn expand_cidr_rejects_garbage() {
        assert!(expand_cidr("10.0.0.0").is_err());
        assert!(expand_cidr("10.0.0.0/33").is_err());
        assert!(expand_cidr("not-an-ip/24").is_err());
    }

    #[test]
    fn same_mac_overwrites_and_keeps_order() {
        let mut registry = SlotRegistry::default();
        registry.register_slot("hall");
        registry.set("hall", record("A1B2C3D4E5F6", "192.168.1.10"));
        registry.set("hall", record("0011223344AA", "192.168.1.11"));
        // 同一设备换了 IP
        registry.set("hall", record("A1B2C3D4E5F6", "192.168.1.99"));

        let list = registry.list("hall");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].mac, "A1B2C3D4E5F6");
        assert_eq!(list[0].ip, "192.168.1.99");
        assert_eq!(list[1].mac, "0011223344AA");
    }

    #[test]
    fn delete_drops_record_and_key() {
        let mut registry = SlotRegistry::default();
        registry.register_slot("hall");
        registry.set("hall", record("A1B2C3D4E5F6", "192.168.1.10"));
        registry.delete("hall", "a1b2c3d4e5f6");
        assert!(registry.list("hall").is_empty());
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn unregister_slot_clears_keys() {
        let mut registry = SlotRegistry::default();
        registry.register_slot("hall");
        registry.set("hall", record("A1B2C3D4E5F6", "192.168.1.10"));
        registry.unregister_slot("hall");
        assert_eq!(registry.size(), 0);
        assert!(registry.keys.is_empty());
    }

    #[tokio::test]
    async fn manager_registry_round_trip() {
        let manager = ShellyManager::new().unwrap();
        manager.register_slot("hall").await;
        assert_eq!(manager.status().await, ScanStatus::Done);
        assert!(manager.get("hall", "A1B2C3D4E5F6").await.is_none());
        assert!(manager.list("hall").await.is_empty());
    }
}
