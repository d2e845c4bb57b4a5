pub mod data;
pub mod entity;
pub mod error;

pub use data::{DriverInfo, NotifyType, QueueData};
pub use entity::{App, Device, EntityStatus, InEnd, OutEnd, Rule, StatusCell};
pub use error::ClassifiedError;

/// 实体类别：决定 UUID 前缀与注册表归属。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityClass {
    Source,
    Target,
    Device,
    Rule,
    App,
    Schema,
}

impl EntityClass {
    /// 类别对应的 UUID 前缀。
    pub fn prefix(self) -> &'static str {
        match self {
            EntityClass::Source => "IN",
            EntityClass::Target => "OUT",
            EntityClass::Device => "DEVICE",
            EntityClass::Rule => "RULE",
            EntityClass::App => "APP",
            EntityClass::Schema => "SCHEMA",
        }
    }
}

/// 铸造带类别前缀的实体 UUID。UUID 一经分配不可变更，重命名只改元数据。
pub fn mint_uuid(class: EntityClass) -> String {
    let tail = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", class.prefix(), &tail[..12].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_uuid_carries_class_prefix() {
        assert!(mint_uuid(EntityClass::Source).starts_with("IN"));
        assert!(mint_uuid(EntityClass::Device).starts_with("DEVICE"));
        assert!(mint_uuid(EntityClass::Rule).starts_with("RULE"));
    }

    #[test]
    fn minted_uuids_are_unique() {
        let a = mint_uuid(EntityClass::Target);
        let b = mint_uuid(EntityClass::Target);
        assert_ne!(a, b);
    }
}
