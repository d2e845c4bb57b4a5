//! 脚本宿主函数库。
//!
//! 纯函数模块（hex/binary/json/math/string/modbus/misc/jq）不触
//! 宿主状态；data/device/kv/rds/http/network/_G 经 `HostContext`
//! 访问引擎能力；time 模块持取消令牌实现可中断的 Sleep。

mod binlib;
mod hexlib;
mod hostlib;
mod jqlib;
mod jsonlib;
mod mathlib;
mod misclib;
mod modbuslib;
mod stringlib;
mod timelib;

pub use jsonlib::{dynamic_to_json, json_to_dynamic};

use crate::HostContext;
use rhai::{Engine, EvalAltResult, Position};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 把全部模块注册到一台 VM 上。
pub(crate) fn register_modules(
    engine: &mut Engine,
    ctx: Arc<dyn HostContext>,
    owner_uuid: &str,
    token: CancellationToken,
) {
    hostlib::register(engine, ctx, owner_uuid);
    timelib::register(engine, token);
    hexlib::register(engine);
    binlib::register(engine);
    jsonlib::register(engine);
    mathlib::register(engine);
    stringlib::register(engine);
    modbuslib::register(engine);
    misclib::register(engine);
    jqlib::register(engine);
}

/// 宿主函数抛给脚本的运行时异常。
pub(crate) fn rt_err(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        message.into().into(),
        Position::NONE,
    ))
}
