//! 告警表达式中心
//!
//! 每个告警规则绑定一条布尔表达式（`field op value` 经 `&&`/`||`
//! 组合），对入站记录求值。表达式装载时即编译，求值只做变量
//! 绑定与执行。

use crate::error::StorageError;
use rhai::{AST, Dynamic, Engine, Scope};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// 告警表达式中心。
pub struct AlarmCenter {
    engine: Engine,
    exprs: Mutex<HashMap<String, AST>>,
}

impl Default for AlarmCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmCenter {
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
            exprs: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AST>> {
        match self.exprs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 编译并装载表达式，同一 uuid 重复装载覆盖旧表达式。
    pub fn load_expr(&self, uuid: &str, expr: &str) -> Result<(), StorageError> {
        let ast = self
            .engine
            .compile_expression(expr)
            .map_err(|e| StorageError::new(format!("compile {uuid}: {e}")))?;
        self.lock().insert(uuid.to_string(), ast);
        Ok(())
    }

    /// 以字段绑定求值表达式。
    pub fn run_expr(
        &self,
        uuid: &str,
        bindings: &serde_json::Map<String, Value>,
    ) -> Result<bool, StorageError> {
        let ast = self
            .lock()
            .get(uuid)
            .cloned()
            .ok_or_else(|| StorageError::new(format!("expr not loaded: {uuid}")))?;
        let mut scope = Scope::new();
        for (name, value) in bindings {
            scope.push_dynamic(name.as_str(), json_to_dynamic(value));
        }
        self.engine
            .eval_ast_with_scope::<bool>(&mut scope, &ast)
            .map_err(|e| StorageError::new(format!("eval {uuid}: {e}")))
    }

    /// 卸载表达式。
    pub fn remove_expr(&self, uuid: &str) {
        self.lock().remove(uuid);
    }

    pub fn loaded(&self, uuid: &str) -> bool {
        self.lock().contains_key(uuid)
    }
}

fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else {
                Dynamic::from(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        other => Dynamic::from(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn compound_expression_evaluates() {
        let center = AlarmCenter::new();
        center
            .load_expr("RULE1", "temp > 30.0 && humi < 20")
            .unwrap();
        assert!(
            center
                .run_expr("RULE1", &bindings(json!({"temp": 35.5, "humi": 10})))
                .unwrap()
        );
        assert!(
            !center
                .run_expr("RULE1", &bindings(json!({"temp": 25.0, "humi": 10})))
                .unwrap()
        );
    }

    #[test]
    fn or_branch_evaluates() {
        let center = AlarmCenter::new();
        center.load_expr("RULE2", "volt > 240 || volt < 200").unwrap();
        assert!(
            center
                .run_expr("RULE2", &bindings(json!({"volt": 190})))
                .unwrap()
        );
    }

    #[test]
    fn removed_expression_is_gone() {
        let center = AlarmCenter::new();
        center.load_expr("RULE3", "x > 1").unwrap();
        center.remove_expr("RULE3");
        assert!(!center.loaded("RULE3"));
        assert!(
            center
                .run_expr("RULE3", &bindings(json!({"x": 2})))
                .is_err()
        );
    }

    #[test]
    fn bad_expression_rejected_at_load() {
        let center = AlarmCenter::new();
        assert!(center.load_expr("RULE4", "temp >").is_err());
        assert!(!center.loaded("RULE4"));
    }
}
