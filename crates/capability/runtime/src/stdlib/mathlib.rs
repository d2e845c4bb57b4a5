//! math 模块。

use rhai::{Engine, Module};

/// 保留 digits 位小数。
fn truncate_float(value: f64, digits: i64) -> f64 {
    let factor = 10f64.powi(digits.clamp(0, 15) as i32);
    (value * factor).round() / factor
}

pub(super) fn register(engine: &mut Engine) {
    let mut module = Module::new();

    module.set_native_fn("TFloat", |value: f64, digits: i64| {
        Ok(truncate_float(value, digits))
    });
    module.set_native_fn("RandomInt", |min: i64, max: i64| {
        if min >= max {
            return Ok(min);
        }
        Ok(rand::Rng::gen_range(&mut rand::thread_rng(), min..max))
    });
    module.set_native_fn("Abs", |value: i64| Ok(value.abs()));
    module.set_native_fn("Abs", |value: f64| Ok(value.abs()));
    module.set_native_fn("Ceil", |value: f64| Ok(value.ceil()));
    module.set_native_fn("Floor", |value: f64| Ok(value.floor()));
    module.set_native_fn("Round", |value: f64| Ok(value.round()));

    engine.register_static_module("math", module.into());
}
