//! 本地存储能力。
//!
//! 网关自身的落盘与进程内状态：内部通知日志、北向离线缓存、
//! 脚本共享 KV、告警表达式中心与数据中心逐模式表。SQLite 承载
//! 全部持久化，三个库文件分别用于通知、离线缓存与数据中心。

mod alarm;
mod connection;
mod datacenter;
mod error;
mod kv;
mod lostcache;
mod models;
mod notify;

pub use alarm::AlarmCenter;
pub use connection::{connect_memory, connect_pool};
pub use datacenter::DataCenter;
pub use error::StorageError;
pub use kv::KvStore;
pub use lostcache::LostCache;
pub use models::{CacheRecord, ColumnType, DataSchema, NotifyRecord, SchemaColumn};
pub use notify::NotifyStore;
