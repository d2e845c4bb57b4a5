//! string 模块。

use rhai::{Dynamic, Engine, Module};

pub(super) fn register(engine: &mut Engine) {
    let mut module = Module::new();

    module.set_native_fn("T2Str", |value: Dynamic| Ok(value.to_string()));
    module.set_native_fn("Bin2Str", |blob: rhai::Blob| {
        Ok(String::from_utf8_lossy(&blob).into_owned())
    });
    module.set_native_fn("ToUpper", |s: &str| Ok(s.to_uppercase()));
    module.set_native_fn("ToLower", |s: &str| Ok(s.to_lowercase()));
    module.set_native_fn("Trim", |s: &str| Ok(s.trim().to_string()));
    module.set_native_fn("Replace", |s: &str, from: &str, to: &str| {
        Ok(s.replace(from, to))
    });
    module.set_native_fn("Repeat", |s: &str, n: i64| {
        Ok(s.repeat(n.max(0) as usize))
    });
    module.set_native_fn("Contains", |s: &str, sub: &str| Ok(s.contains(sub)));
    module.set_native_fn("HasPrefix", |s: &str, prefix: &str| {
        Ok(s.starts_with(prefix))
    });
    module.set_native_fn("HasSuffix", |s: &str, suffix: &str| {
        Ok(s.ends_with(suffix))
    });

    engine.register_static_module("string", module.into());
}
