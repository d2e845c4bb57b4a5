//! 规则脚本运行时。
//!
//! 每条规则与每个应用各持一台 rhai VM，装载时编译并校验脚本，
//! 派发时把记录绑定进动作链执行。宿主函数库分纯函数模块与
//! 依赖引擎上下文的模块两类，装载 VM 时一并注册。

mod stdlib;
mod vm;

pub use stdlib::{dynamic_to_json, json_to_dynamic};
pub use vm::{AppVm, RuleOutcome, RuleScripts, RuleVm};

/// 脚本运行时错误。
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("script compile error: {0}")]
    Compile(String),
    #[error("script validate error: {0}")]
    Validate(String),
    #[error("script eval error: {0}")]
    Eval(String),
}

/// 脚本对网关内部能力的访问面，由引擎实现。
///
/// 全部方法是同步签名，VM 在阻塞线程上运行，实现方自行桥接
/// 异步资源。错误以文本返回，进入脚本后转为运行时异常。
pub trait HostContext: Send + Sync {
    /// 把记录投到 Out 队列，uuid 指向输出目标。
    fn push_out(&self, target_uuid: &str, payload: &str) -> Result<(), String>;

    fn read_device(&self, device_uuid: &str, topic: &str, args: &str) -> Result<String, String>;
    fn write_device(&self, device_uuid: &str, topic: &str, args: &str) -> Result<String, String>;
    fn ctrl_device(&self, device_uuid: &str, topic: &str, args: &str) -> Result<String, String>;
    fn read_source(&self, source_uuid: &str) -> Result<String, String>;
    fn write_source(&self, source_uuid: &str, payload: &str) -> Result<(), String>;

    fn kv_set(&self, key: &str, value: &str) -> Result<(), String>;
    fn kv_get(&self, key: &str) -> Result<Option<String>, String>;
    fn kv_del(&self, key: &str) -> Result<(), String>;

    fn rds_save(&self, schema_uuid: &str, record_json: &str) -> Result<(), String>;
    fn rds_list(&self, schema_uuid: &str, limit: i64, offset: i64) -> Result<String, String>;
    fn rds_last(&self, schema_uuid: &str) -> Result<String, String>;
    fn rds_update_last(&self, schema_uuid: &str, record_json: &str) -> Result<(), String>;

    fn notify(&self, level: &str, event: &str, message: &str) -> Result<(), String>;
    fn http_get(&self, url: &str) -> Result<String, String>;
    fn http_post(&self, url: &str, body: &str) -> Result<String, String>;
    fn ping(&self, host: &str, timeout_ms: u64) -> bool;
}

/// 空上下文，只用于不触宿主能力的脚本与测试。
#[derive(Debug, Default)]
pub struct NullContext;

impl HostContext for NullContext {
    fn push_out(&self, _target_uuid: &str, _payload: &str) -> Result<(), String> {
        Err("no host context".into())
    }

    fn read_device(&self, _: &str, _: &str, _: &str) -> Result<String, String> {
        Err("no host context".into())
    }

    fn write_device(&self, _: &str, _: &str, _: &str) -> Result<String, String> {
        Err("no host context".into())
    }

    fn ctrl_device(&self, _: &str, _: &str, _: &str) -> Result<String, String> {
        Err("no host context".into())
    }

    fn read_source(&self, _: &str) -> Result<String, String> {
        Err("no host context".into())
    }

    fn write_source(&self, _: &str, _: &str) -> Result<(), String> {
        Err("no host context".into())
    }

    fn kv_set(&self, _: &str, _: &str) -> Result<(), String> {
        Err("no host context".into())
    }

    fn kv_get(&self, _: &str) -> Result<Option<String>, String> {
        Err("no host context".into())
    }

    fn kv_del(&self, _: &str) -> Result<(), String> {
        Err("no host context".into())
    }

    fn rds_save(&self, _: &str, _: &str) -> Result<(), String> {
        Err("no host context".into())
    }

    fn rds_list(&self, _: &str, _: i64, _: i64) -> Result<String, String> {
        Err("no host context".into())
    }

    fn rds_last(&self, _: &str) -> Result<String, String> {
        Err("no host context".into())
    }

    fn rds_update_last(&self, _: &str, _: &str) -> Result<(), String> {
        Err("no host context".into())
    }

    fn notify(&self, _: &str, _: &str, _: &str) -> Result<(), String> {
        Err("no host context".into())
    }

    fn http_get(&self, _: &str) -> Result<String, String> {
        Err("no host context".into())
    }

    fn http_post(&self, _: &str, _: &str) -> Result<String, String> {
        Err("no host context".into())
    }

    fn ping(&self, _: &str, _: u64) -> bool {
        false
    }
}
