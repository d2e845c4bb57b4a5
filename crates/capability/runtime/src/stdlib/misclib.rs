//! misc 模块：杂项校验计算。

use ox_transport::crc16_modbus;
use rhai::{Blob, Engine, Module};

pub(super) fn register(engine: &mut Engine) {
    let mut module = Module::new();

    module.set_native_fn("XOR", |blob: Blob| {
        Ok(i64::from(blob.iter().fold(0u8, |acc, b| acc ^ b)))
    });
    module.set_native_fn("CRC16", |blob: Blob| Ok(i64::from(crc16_modbus(&blob))));

    engine.register_static_module("misc", module.into());
}
