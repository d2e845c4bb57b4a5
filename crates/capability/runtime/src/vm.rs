//! 规则与应用 VM。
//!
//! 装载时编译三段脚本并做形状校验：`actions` 必须求值为非空
//! 闭包数组，`success`/`failed` 必须定义对应签名的函数。派发
//! 时动作链逐个执行，前一动作的输出作为后一动作的输入。

use crate::stdlib;
use crate::{HostContext, RuntimeError};
use ox_telemetry::{record_rule_failed, record_rule_success};
use rhai::{AST, Array, Dynamic, Engine, FnPtr, Scope};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 规则三段脚本。
#[derive(Debug, Clone)]
pub struct RuleScripts {
    pub actions: String,
    pub success: String,
    pub failed: String,
}

/// 一次派发的结局。
#[derive(Debug)]
pub enum RuleOutcome {
    /// 动作链全部通过，携带末段输出。
    Success(Dynamic),
    /// 某段动作返回 false 或抛错，携带该段的值。
    Failed(Dynamic),
}

fn build_engine(
    ctx: Arc<dyn HostContext>,
    owner_uuid: &str,
    token: CancellationToken,
) -> Engine {
    let mut engine = Engine::new();
    stdlib::register_modules(&mut engine, ctx, owner_uuid, token.clone());
    // 取消令牌在下一个执行边界终止脚本
    engine.on_progress(move |_| {
        if token.is_cancelled() {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });
    engine
}

/// 规则 VM。单线程使用，不同规则各持一台并行运行。
pub struct RuleVm {
    uuid: String,
    engine: Engine,
    actions: AST,
    success: AST,
    failed: AST,
}

impl RuleVm {
    /// 编译并校验三段脚本。
    pub fn compile(
        uuid: &str,
        scripts: &RuleScripts,
        ctx: Arc<dyn HostContext>,
        token: CancellationToken,
    ) -> Result<Self, RuntimeError> {
        let engine = build_engine(ctx, uuid, token);
        let actions = engine
            .compile(&scripts.actions)
            .map_err(|e| RuntimeError::Compile(format!("actions: {e}")))?;
        let success = engine
            .compile(&scripts.success)
            .map_err(|e| RuntimeError::Compile(format!("success: {e}")))?;
        let failed = engine
            .compile(&scripts.failed)
            .map_err(|e| RuntimeError::Compile(format!("failed: {e}")))?;

        let vm = Self {
            uuid: uuid.to_string(),
            engine,
            actions,
            success,
            failed,
        };
        vm.validate()?;
        Ok(vm)
    }

    fn validate(&self) -> Result<(), RuntimeError> {
        let chain = self.eval_actions()?;
        if chain.is_empty() {
            return Err(RuntimeError::Validate("actions must not be empty".into()));
        }
        if !self
            .success
            .iter_functions()
            .any(|f| f.name == "success" && f.params.is_empty())
        {
            return Err(RuntimeError::Validate(
                "success script must define fn success()".into(),
            ));
        }
        if !self
            .failed
            .iter_functions()
            .any(|f| f.name == "failed" && f.params.len() == 1)
        {
            return Err(RuntimeError::Validate(
                "failed script must define fn failed(err)".into(),
            ));
        }
        Ok(())
    }

    /// 求值动作链，逐项下转为闭包。
    fn eval_actions(&self) -> Result<Vec<FnPtr>, RuntimeError> {
        let array: Array = self
            .engine
            .eval_ast(&self.actions)
            .map_err(|e| RuntimeError::Validate(format!("actions must be an array: {e}")))?;
        let mut chain = Vec::with_capacity(array.len());
        for item in array {
            let fn_ptr: FnPtr = item.try_cast().ok_or_else(|| {
                RuntimeError::Validate("actions array must hold closures".into())
            })?;
            chain.push(fn_ptr);
        }
        Ok(chain)
    }

    /// 派发一条记录进动作链。
    ///
    /// 任一动作返回 `[false, v]` 或抛错即短路进 `failed`，全部
    /// 通过后调用 `success`。脚本本身的运行时错误也走 `failed`。
    pub fn dispatch(&self, data: &str) -> Result<RuleOutcome, RuntimeError> {
        let chain = self.eval_actions()?;
        let mut value: Dynamic = Dynamic::from(data.to_string());

        for (index, action) in chain.iter().enumerate() {
            let result: Dynamic = match action.call(&self.engine, &self.actions, (value.clone(),))
            {
                Ok(result) => result,
                Err(err) => {
                    debug!(rule_id = %self.uuid, action = index, error = %err, "action raised");
                    return self.fail(Dynamic::from(err.to_string()));
                }
            };
            let mut pair: Array = match result.try_cast() {
                Some(pair) => pair,
                None => {
                    return self.fail(Dynamic::from(format!(
                        "action {index} must return [ok, value]"
                    )));
                }
            };
            if pair.len() != 2 {
                return self.fail(Dynamic::from(format!(
                    "action {index} must return [ok, value]"
                )));
            }
            let next = pair.remove(1);
            let ok = pair.remove(0).as_bool().unwrap_or(false);
            if !ok {
                return self.fail(next);
            }
            value = next;
        }

        self.engine
            .call_fn::<Dynamic>(&mut Scope::new(), &self.success, "success", ())
            .map_err(|e| RuntimeError::Eval(format!("success: {e}")))?;
        record_rule_success();
        Ok(RuleOutcome::Success(value))
    }

    fn fail(&self, err_value: Dynamic) -> Result<RuleOutcome, RuntimeError> {
        self.engine
            .call_fn::<Dynamic>(
                &mut Scope::new(),
                &self.failed,
                "failed",
                (err_value.clone(),),
            )
            .map_err(|e| RuntimeError::Eval(format!("failed: {e}")))?;
        record_rule_failed();
        Ok(RuleOutcome::Failed(err_value))
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

/// 应用 VM：单脚本，入口 `fn main(arg)`，长驻运行。
pub struct AppVm {
    uuid: String,
    engine: Engine,
    ast: AST,
}

impl AppVm {
    pub fn compile(
        uuid: &str,
        script: &str,
        ctx: Arc<dyn HostContext>,
        token: CancellationToken,
    ) -> Result<Self, RuntimeError> {
        let engine = build_engine(ctx, uuid, token);
        let ast = engine
            .compile(script)
            .map_err(|e| RuntimeError::Compile(e.to_string()))?;
        if !ast
            .iter_functions()
            .any(|f| f.name == "main" && f.params.len() == 1)
        {
            return Err(RuntimeError::Validate(
                "app script must define fn main(arg)".into(),
            ));
        }
        Ok(Self {
            uuid: uuid.to_string(),
            engine,
            ast,
        })
    }

    /// 运行入口函数。阻塞调用，放在阻塞线程上执行。
    pub fn run(&self, arg: &str) -> Result<Dynamic, RuntimeError> {
        self.engine
            .call_fn::<Dynamic>(
                &mut Scope::new(),
                &self.ast,
                "main",
                (arg.to_string(),),
            )
            .map_err(|e| RuntimeError::Eval(format!("main: {e}")))
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullContext;

    fn scripts(actions: &str) -> RuleScripts {
        RuleScripts {
            actions: actions.to_string(),
            success: "fn success() { }".to_string(),
            failed: "fn failed(err) { }".to_string(),
        }
    }

    fn vm(actions: &str) -> Result<RuleVm, RuntimeError> {
        RuleVm::compile(
            "RULE1",
            &scripts(actions),
            Arc::new(NullContext),
            CancellationToken::new(),
        )
    }

    #[test]
    fn action_chain_threads_value() {
        let vm = vm(r#"
            [
                |data| { [true, data + "-a"] },
                |data| { [true, data + "-b"] },
            ]
        "#)
        .unwrap();
        match vm.dispatch("x").unwrap() {
            RuleOutcome::Success(value) => {
                assert_eq!(value.into_string().unwrap(), "x-a-b");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn false_result_short_circuits() {
        let vm = vm(r#"
            [
                |data| { [true, data + "-a"] },
                |data| { [false, "rejected: " + data] },
                |data| { [true, data + "-never"] },
            ]
        "#)
        .unwrap();
        match vm.dispatch("x").unwrap() {
            RuleOutcome::Failed(value) => {
                // 第三段未执行
                assert_eq!(value.into_string().unwrap(), "rejected: x-a");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn action_error_routes_to_failed() {
        let vm = vm(r#"[ |data| { throw "boom" } ]"#).unwrap();
        match vm.dispatch("x").unwrap() {
            RuleOutcome::Failed(value) => {
                assert!(value.into_string().unwrap().contains("boom"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn bad_action_shape_routes_to_failed() {
        let vm = vm(r#"[ |data| { 42 } ]"#).unwrap();
        assert!(matches!(
            vm.dispatch("x").unwrap(),
            RuleOutcome::Failed(_)
        ));
    }

    #[test]
    fn empty_actions_rejected_at_load() {
        assert!(matches!(vm("[]"), Err(RuntimeError::Validate(_))));
    }

    #[test]
    fn non_array_actions_rejected_at_load() {
        assert!(matches!(vm(r#""nope""#), Err(RuntimeError::Validate(_))));
    }

    #[test]
    fn missing_failed_fn_rejected() {
        let result = RuleVm::compile(
            "RULE1",
            &RuleScripts {
                actions: r#"[ |data| { [true, data] } ]"#.to_string(),
                success: "fn success() { }".to_string(),
                failed: "fn wrong() { }".to_string(),
            },
            Arc::new(NullContext),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(RuntimeError::Validate(_))));
    }

    #[test]
    fn cancelled_token_stops_dispatch() {
        let token = CancellationToken::new();
        let vm = RuleVm::compile(
            "RULE1",
            &scripts(r#"[ |data| { [true, data] } ]"#),
            Arc::new(NullContext),
            token.clone(),
        )
        .unwrap();
        token.cancel();
        assert!(vm.dispatch("x").is_err());
    }

    #[test]
    fn app_vm_runs_main() {
        let vm = AppVm::compile(
            "APP1",
            r#"fn main(arg) { arg + "-ran" }"#,
            Arc::new(NullContext),
            CancellationToken::new(),
        )
        .unwrap();
        let out = vm.run("boot").unwrap();
        assert_eq!(out.into_string().unwrap(), "boot-ran");
    }

    #[test]
    fn app_without_main_rejected() {
        let result = AppVm::compile(
            "APP1",
            "fn helper() { 1 }",
            Arc::new(NullContext),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(RuntimeError::Validate(_))));
    }
}
