//! 队列消息与驱动描述。

use serde::{Deserialize, Serialize};

/// 内部队列消息：三种变体分别进入 In/Device/Out 队列。
///
/// 只携带 UUID，消费端经注册表解引用；入队与派发之间实体被删除
/// 时派发自然落空，不产生悬挂引用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueData {
    /// 数据源产出的记录。
    Source { uuid: String, payload: String },
    /// 设备驱动产出的记录。
    Device { uuid: String, payload: String },
    /// 待投递到输出目标的记录。
    Target { uuid: String, payload: String },
}

impl QueueData {
    /// 消息引用的实体 UUID。
    pub fn uuid(&self) -> &str {
        match self {
            QueueData::Source { uuid, .. }
            | QueueData::Device { uuid, .. }
            | QueueData::Target { uuid, .. } => uuid,
        }
    }

    /// 消息载荷（约定为 UTF-8 JSON）。
    pub fn payload(&self) -> &str {
        match self {
            QueueData::Source { payload, .. }
            | QueueData::Device { payload, .. }
            | QueueData::Target { payload, .. } => payload,
        }
    }
}

/// 驱动自述信息。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    pub model: String,
    pub vendor: String,
    pub firmware: String,
}

/// 内部通知级别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotifyType {
    Info,
    Warning,
    Error,
    Fatal,
}

impl NotifyType {
    pub fn as_str(self) -> &'static str {
        match self {
            NotifyType::Info => "INFO",
            NotifyType::Warning => "WARNING",
            NotifyType::Error => "ERROR",
            NotifyType::Fatal => "FATAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_data_accessors() {
        let d = QueueData::Source {
            uuid: "IN1".to_string(),
            payload: "{\"v\":1}".to_string(),
        };
        assert_eq!(d.uuid(), "IN1");
        assert_eq!(d.payload(), "{\"v\":1}");
    }
}
