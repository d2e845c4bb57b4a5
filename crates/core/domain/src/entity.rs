//! 运行时实体元数据。
//!
//! 所有实体间引用都是 UUID 字符串，派发时经注册表解析，
//! 不持有直接指针，删除并发安全且重启幂等。

use serde::{Deserialize, Serialize};

/// 实体运行状态机。
///
/// Down → Pending（加载）→ Up（就绪）；运行期故障自降为 Down；
/// 显式删除进入 Stop，Stop 对该实例终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityStatus {
    Down,
    Pending,
    Up,
    Stop,
}

/// 数据源实体（InEnd）：向 In 队列生产记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InEnd {
    pub uuid: String,
    /// 类型标签，注册表据此选择工厂。
    pub type_tag: String,
    pub name: String,
    pub description: String,
    /// 类别专属配置，由具体源在 start 时解析。
    pub config: serde_json::Value,
    /// 绑定的规则 UUID，派发时按序执行。
    pub bind_rules: Vec<String>,
    pub status: EntityStatus,
}

/// 输出目标实体（OutEnd）：消费 Out 队列并投递到外部端点。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutEnd {
    pub uuid: String,
    pub type_tag: String,
    pub name: String,
    pub description: String,
    pub config: serde_json::Value,
    /// 投递失败时是否落入离线缓存。
    #[serde(default)]
    pub cache_offline_data: bool,
    pub status: EntityStatus,
}

/// 设备实体：经驱动轮询现场总线，向 Device 队列生产记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,
    pub type_tag: String,
    pub name: String,
    pub description: String,
    pub config: serde_json::Value,
    pub bind_rules: Vec<String>,
    pub status: EntityStatus,
}

/// 规则：绑定到源或设备的脚本变换。
///
/// 三段脚本：`actions` 求值为动作链，前一动作的输出作为后一动作
/// 的输入；任一动作返回 (false, v) 即短路进入 `failed`，全部成功
/// 后调用 `success`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub uuid: String,
    pub name: String,
    pub description: String,
    /// 绑定的数据源 UUID（与 from_device 二选一）。
    pub from_source: String,
    /// 绑定的设备 UUID。
    pub from_device: String,
    pub success: String,
    pub actions: String,
    pub failed: String,
    pub status: EntityStatus,
}

/// 长驻应用：带 `main(arg)` 入口的脚本，不绑定队列。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub uuid: String,
    pub name: String,
    pub version: String,
    pub description: String,
    /// 是否随网关启动自动拉起。
    #[serde(default)]
    pub auto_start: bool,
    pub script: String,
    pub status: EntityStatus,
}

/// 原子状态单元：采集源、驱动与目标共用的运行状态存储。
#[derive(Debug)]
pub struct StatusCell(std::sync::atomic::AtomicU8);

impl Default for StatusCell {
    fn default() -> Self {
        Self::new(EntityStatus::Down)
    }
}

impl StatusCell {
    pub fn new(status: EntityStatus) -> Self {
        Self(std::sync::atomic::AtomicU8::new(encode_status(status)))
    }

    pub fn set(&self, status: EntityStatus) {
        self.0
            .store(encode_status(status), std::sync::atomic::Ordering::Relaxed);
    }

    pub fn get(&self) -> EntityStatus {
        decode_status(self.0.load(std::sync::atomic::Ordering::Relaxed))
    }
}

fn encode_status(status: EntityStatus) -> u8 {
    match status {
        EntityStatus::Down => 0,
        EntityStatus::Pending => 1,
        EntityStatus::Up => 2,
        EntityStatus::Stop => 3,
    }
}

fn decode_status(raw: u8) -> EntityStatus {
    match raw {
        1 => EntityStatus::Pending,
        2 => EntityStatus::Up,
        3 => EntityStatus::Stop,
        _ => EntityStatus::Down,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_cell_round_trip() {
        let cell = StatusCell::default();
        assert_eq!(cell.get(), EntityStatus::Down);
        cell.set(EntityStatus::Up);
        assert_eq!(cell.get(), EntityStatus::Up);
        cell.set(EntityStatus::Stop);
        assert_eq!(cell.get(), EntityStatus::Stop);
    }

    #[test]
    fn status_serializes_uppercase() {
        let s = serde_json::to_string(&EntityStatus::Pending).unwrap();
        assert_eq!(s, "\"PENDING\"");
    }

    #[test]
    fn out_end_cache_flag_defaults_off() {
        let json = r#"{
            "uuid": "OUT1", "type_tag": "MQTT", "name": "t", "description": "",
            "config": {}, "status": "DOWN"
        }"#;
        let out: OutEnd = serde_json::from_str(json).unwrap();
        assert!(!out.cache_offline_data);
    }
}
