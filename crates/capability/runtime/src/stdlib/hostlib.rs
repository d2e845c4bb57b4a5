//! 依赖引擎上下文的模块：data/device/kv/rds/http/network/_G。

use super::rt_err;
use crate::HostContext;
use rhai::{Engine, Module};
use std::sync::Arc;
use tracing::info;

/// Out 队列投递的别名集合，目标类型由 uuid 指向的实体决定。
const DATA_FNS: &[&str] = &[
    "ToMqtt",
    "ToHttp",
    "ToUdp",
    "ToTcp",
    "ToTdEngine",
    "ToMongoDB",
    "ToSemtechUdp",
    "ToGreptimeDB",
    "ToUart",
];

pub(super) fn register(engine: &mut Engine, ctx: Arc<dyn HostContext>, owner_uuid: &str) {
    let mut data = Module::new();
    for name in DATA_FNS {
        let ctx = Arc::clone(&ctx);
        data.set_native_fn(*name, move |uuid: &str, payload: &str| {
            ctx.push_out(uuid, payload).map_err(rt_err)?;
            Ok(true)
        });
    }
    engine.register_static_module("data", data.into());

    let mut device = Module::new();
    {
        let ctx = Arc::clone(&ctx);
        device.set_native_fn("ReadDevice", move |uuid: &str, topic: &str, args: &str| {
            ctx.read_device(uuid, topic, args).map_err(rt_err)
        });
    }
    {
        let ctx = Arc::clone(&ctx);
        device.set_native_fn("WriteDevice", move |uuid: &str, topic: &str, args: &str| {
            ctx.write_device(uuid, topic, args).map_err(rt_err)
        });
    }
    {
        let ctx = Arc::clone(&ctx);
        device.set_native_fn("CtrlDevice", move |uuid: &str, topic: &str, args: &str| {
            ctx.ctrl_device(uuid, topic, args).map_err(rt_err)
        });
    }
    {
        let ctx = Arc::clone(&ctx);
        device.set_native_fn("ReadSource", move |uuid: &str| {
            ctx.read_source(uuid).map_err(rt_err)
        });
    }
    {
        let ctx = Arc::clone(&ctx);
        device.set_native_fn("WriteSource", move |uuid: &str, payload: &str| {
            ctx.write_source(uuid, payload).map_err(rt_err)?;
            Ok(true)
        });
    }
    engine.register_static_module("device", device.into());

    let mut kv = Module::new();
    {
        let ctx = Arc::clone(&ctx);
        kv.set_native_fn("Set", move |key: &str, value: &str| {
            ctx.kv_set(key, value).map_err(rt_err)?;
            Ok(true)
        });
    }
    {
        let ctx = Arc::clone(&ctx);
        kv.set_native_fn("Get", move |key: &str| {
            Ok(ctx.kv_get(key).map_err(rt_err)?.unwrap_or_default())
        });
    }
    {
        let ctx = Arc::clone(&ctx);
        kv.set_native_fn("Del", move |key: &str| {
            ctx.kv_del(key).map_err(rt_err)?;
            Ok(true)
        });
    }
    engine.register_static_module("kv", kv.into());

    let mut rds = Module::new();
    {
        let ctx = Arc::clone(&ctx);
        rds.set_native_fn("Save", move |schema: &str, record: &str| {
            ctx.rds_save(schema, record).map_err(rt_err)?;
            Ok(true)
        });
    }
    {
        let ctx = Arc::clone(&ctx);
        rds.set_native_fn("List", move |schema: &str, limit: i64, offset: i64| {
            ctx.rds_list(schema, limit, offset).map_err(rt_err)
        });
    }
    {
        let ctx = Arc::clone(&ctx);
        rds.set_native_fn("Last", move |schema: &str| {
            ctx.rds_last(schema).map_err(rt_err)
        });
    }
    {
        let ctx = Arc::clone(&ctx);
        rds.set_native_fn("UpdateLast", move |schema: &str, record: &str| {
            ctx.rds_update_last(schema, record).map_err(rt_err)?;
            Ok(true)
        });
    }
    engine.register_static_module("rds", rds.into());

    let mut http = Module::new();
    {
        let ctx = Arc::clone(&ctx);
        http.set_native_fn("Get", move |url: &str| ctx.http_get(url).map_err(rt_err));
    }
    {
        let ctx = Arc::clone(&ctx);
        http.set_native_fn("Post", move |url: &str, body: &str| {
            ctx.http_post(url, body).map_err(rt_err)
        });
    }
    engine.register_static_module("http", http.into());

    let mut network = Module::new();
    {
        let ctx = Arc::clone(&ctx);
        network.set_native_fn("Ping", move |host: &str| Ok(ctx.ping(host, 1000)));
    }
    engine.register_static_module("network", network.into());

    let mut global = Module::new();
    {
        let owner = owner_uuid.to_string();
        global.set_native_fn("Debug", move |message: &str| {
            info!(script_id = %owner, "{message}");
            Ok(true)
        });
    }
    {
        let owner = owner_uuid.to_string();
        global.set_native_fn("Debug", move |topic: &str, message: &str| {
            info!(script_id = %owner, topic = %topic, "{message}");
            Ok(true)
        });
    }
    global.set_native_fn("Throw", move |message: &str| -> Result<bool, _> {
        Err(rt_err(message))
    });
    {
        let ctx = Arc::clone(&ctx);
        global.set_native_fn("Notify", move |level: &str, event: &str, message: &str| {
            ctx.notify(level, event, message).map_err(rt_err)?;
            Ok(true)
        });
    }
    engine.register_static_module("_G", global.into());
}

#[cfg(test)]
mod tests {
    use crate::{NullContext, RuleScripts, RuleVm};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn run_action(body: &str) -> crate::vm::RuleOutcome {
        let vm = RuleVm::compile(
            "RULE1",
            &RuleScripts {
                actions: format!("[ |data| {{ {body} }} ]"),
                success: "fn success() { }".to_string(),
                failed: "fn failed(err) { }".to_string(),
            },
            Arc::new(NullContext),
            CancellationToken::new(),
        )
        .unwrap();
        vm.dispatch("{}").unwrap()
    }

    #[test]
    fn throw_routes_to_failed() {
        let outcome = run_action(r#"_G::Throw("stop here"); [true, data]"#);
        match outcome {
            crate::vm::RuleOutcome::Failed(value) => {
                assert!(value.into_string().unwrap().contains("stop here"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn debug_is_side_effect_only() {
        let outcome = run_action(r#"_G::Debug("hello"); [true, data]"#);
        assert!(matches!(outcome, crate::vm::RuleOutcome::Success(_)));
    }

    #[test]
    fn null_context_push_raises() {
        let outcome = run_action(r#"data::ToMqtt("OUT1", data); [true, data]"#);
        assert!(matches!(outcome, crate::vm::RuleOutcome::Failed(_)));
    }
}
