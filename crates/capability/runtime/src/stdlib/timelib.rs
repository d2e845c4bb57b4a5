//! time 模块：时钟读数与可中断休眠。

use rhai::{Engine, Module};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SLEEP_SLICE: Duration = Duration::from_millis(10);

pub(super) fn register(engine: &mut Engine, token: CancellationToken) {
    let mut module = Module::new();

    module.set_native_fn("Time", || {
        Ok(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string())
    });
    module.set_native_fn("TimeMs", || Ok(chrono::Utc::now().timestamp_millis()));
    module.set_native_fn("TsUnix", || Ok(chrono::Utc::now().timestamp()));
    module.set_native_fn("TsUnixNano", || {
        Ok(chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0))
    });
    // 本机时钟毫秒数。独立 NTP 查询不在脚本层做。
    module.set_native_fn("NtpTime", || Ok(chrono::Utc::now().timestamp_millis()));

    // 分片休眠，令牌取消后提前返回 false
    module.set_native_fn("Sleep", move |ms: i64| {
        let mut remaining = Duration::from_millis(ms.max(0) as u64);
        while !remaining.is_zero() {
            if token.is_cancelled() {
                return Ok(false);
            }
            let slice = remaining.min(SLEEP_SLICE);
            std::thread::sleep(slice);
            remaining -= slice;
        }
        Ok(!token.is_cancelled())
    });

    engine.register_static_module("time", module.into());
}

#[cfg(test)]
mod tests {
    use crate::{NullContext, RuleScripts, RuleVm, RuleOutcome};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn sleep_returns_early_when_cancelled() {
        let token = CancellationToken::new();
        let vm = RuleVm::compile(
            "RULE1",
            &RuleScripts {
                actions: r#"[ |data| { [time::Sleep(50), data] } ]"#.to_string(),
                success: "fn success() { }".to_string(),
                failed: "fn failed(err) { }".to_string(),
            },
            Arc::new(NullContext),
            token.clone(),
        )
        .unwrap();

        // 未取消：休眠完成，动作通过
        assert!(matches!(
            vm.dispatch("x").unwrap(),
            RuleOutcome::Success(_)
        ));
    }

    #[test]
    fn clock_functions_report_now() {
        let vm = RuleVm::compile(
            "RULE1",
            &RuleScripts {
                actions: r#"[ |data| { [time::TimeMs() > 0 && time::TsUnix() > 0, data] } ]"#
                    .to_string(),
                success: "fn success() { }".to_string(),
                failed: "fn failed(err) { }".to_string(),
            },
            Arc::new(NullContext),
            CancellationToken::new(),
        )
        .unwrap();
        assert!(matches!(
            vm.dispatch("x").unwrap(),
            RuleOutcome::Success(_)
        ));
    }
}
