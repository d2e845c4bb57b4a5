//! modbus 模块：脚本侧组 RTU 请求帧与寄存器拆字节。

use super::rt_err;
use ox_protocol::modbus_pdu;
use rhai::{Array, Blob, Engine, EvalAltResult, Module};

fn as_u8(value: i64, what: &str) -> Result<u8, Box<EvalAltResult>> {
    u8::try_from(value).map_err(|_| rt_err(format!("{what} out of range: {value}")))
}

fn as_u16(value: i64, what: &str) -> Result<u16, Box<EvalAltResult>> {
    u16::try_from(value).map_err(|_| rt_err(format!("{what} out of range: {value}")))
}

pub(super) fn register(engine: &mut Engine) {
    let mut module = Module::new();

    module.set_native_fn("F5", |slave: i64, address: i64, on: bool| {
        Ok(Blob::from(modbus_pdu::f5(
            as_u8(slave, "slave")?,
            as_u16(address, "address")?,
            on,
        )))
    });
    module.set_native_fn("F6", |slave: i64, address: i64, value: i64| {
        Ok(Blob::from(modbus_pdu::f6(
            as_u8(slave, "slave")?,
            as_u16(address, "address")?,
            as_u16(value, "value")?,
        )))
    });
    module.set_native_fn("F15", |slave: i64, address: i64, coils: Array| {
        let coils: Vec<bool> = coils
            .into_iter()
            .map(|item| item.as_bool().map_err(|_| rt_err("coils must be bools")))
            .collect::<Result<_, _>>()?;
        Ok(Blob::from(modbus_pdu::f15(
            as_u8(slave, "slave")?,
            as_u16(address, "address")?,
            &coils,
        )))
    });
    module.set_native_fn("F16", |slave: i64, address: i64, values: Array| {
        let values: Vec<u16> = values
            .into_iter()
            .map(|item| {
                item.as_int()
                    .map_err(|_| rt_err("values must be ints"))
                    .and_then(|v| as_u16(v, "value"))
            })
            .collect::<Result<_, _>>()?;
        Ok(Blob::from(modbus_pdu::f16(
            as_u8(slave, "slave")?,
            as_u16(address, "address")?,
            &values,
        )))
    });
    module.set_native_fn("ParseByte", |registers: Array| {
        let registers: Vec<u16> = registers
            .into_iter()
            .map(|item| {
                item.as_int()
                    .map_err(|_| rt_err("registers must be ints"))
                    .and_then(|v| as_u16(v, "register"))
            })
            .collect::<Result<_, _>>()?;
        Ok(Blob::from(modbus_pdu::parse_byte(&registers)))
    });

    engine.register_static_module("modbus", module.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_guards() {
        assert!(as_u8(256, "slave").is_err());
        assert!(as_u16(-1, "address").is_err());
        assert_eq!(as_u8(17, "slave").unwrap(), 17);
    }
}
