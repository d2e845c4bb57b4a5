//! json 模块：脚本值与 JSON 文本互转。

use super::rt_err;
use rhai::{Dynamic, Engine, Module};
use serde_json::Value;

/// JSON 值转脚本值。对象转 Map，数组转 Array。
pub fn json_to_dynamic(value: &Value) -> Dynamic {
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
        Value::Array(items) => {
            let array: rhai::Array = items.iter().map(json_to_dynamic).collect();
            Dynamic::from(array)
        }
        Value::Object(fields) => {
            let mut map = rhai::Map::new();
            for (key, value) in fields {
                map.insert(key.as_str().into(), json_to_dynamic(value));
            }
            Dynamic::from(map)
        }
    }
}

/// 脚本值转 JSON 值。Blob 转为字节数组。
pub fn dynamic_to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Some(b) = value.clone().try_cast::<bool>() {
        return Value::Bool(b);
    }
    if let Some(i) = value.clone().try_cast::<i64>() {
        return Value::from(i);
    }
    if let Some(f) = value.clone().try_cast::<f64>() {
        return Value::from(f);
    }
    if let Some(s) = value.clone().try_cast::<String>() {
        return Value::String(s);
    }
    if let Some(blob) = value.clone().try_cast::<rhai::Blob>() {
        return Value::Array(blob.into_iter().map(Value::from).collect());
    }
    if let Some(array) = value.clone().try_cast::<rhai::Array>() {
        return Value::Array(array.iter().map(dynamic_to_json).collect());
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let mut fields = serde_json::Map::new();
        for (key, value) in map {
            fields.insert(key.to_string(), dynamic_to_json(&value));
        }
        return Value::Object(fields);
    }
    Value::String(value.to_string())
}

pub(super) fn register(engine: &mut Engine) {
    let mut module = Module::new();

    module.set_native_fn("T2J", |value: Dynamic| {
        serde_json::to_string(&dynamic_to_json(&value))
            .map_err(|e| rt_err(format!("encode: {e}")))
    });
    module.set_native_fn("J2T", |text: &str| {
        let value: Value =
            serde_json::from_str(text).map_err(|e| rt_err(format!("decode: {e}")))?;
        Ok(json_to_dynamic(&value))
    });

    engine.register_static_module("json", module.into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip() {
        let value = json!({"tag": "t1", "value": 2.5, "ok": true, "seq": [1, 2]});
        let dynamic = json_to_dynamic(&value);
        assert_eq!(dynamic_to_json(&dynamic), value);
    }

    #[test]
    fn null_becomes_unit() {
        assert!(json_to_dynamic(&Value::Null).is_unit());
        assert_eq!(dynamic_to_json(&Dynamic::UNIT), Value::Null);
    }

    #[test]
    fn blob_encodes_as_byte_array() {
        let blob = rhai::Blob::from(vec![1u8, 2, 255]);
        assert_eq!(dynamic_to_json(&Dynamic::from(blob)), json!([1, 2, 255]));
    }
}
