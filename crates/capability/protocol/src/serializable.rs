//! 通用可序列化帧：4 字节小端长度 + JSON 载荷 + 4 字节小端 CRC32。
//!
//! CRC32 覆盖长度字段与载荷；反序列化先验证 CRC，再解码载荷，
//! 最后调用业务校验钩子。

use crate::error::ProtocolError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// 业务校验钩子：编码前与解码后各调用一次。
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// 序列化为带长度前缀与 CRC32 的帧。
pub fn serialize<T: Serialize + Validate>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    value.validate().map_err(ProtocolError::Validate)?;
    let body = serde_json::to_vec(value).map_err(|e| ProtocolError::Payload(e.to_string()))?;
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    let crc = crc32_ieee(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// 反序列化并逐层校验。
pub fn deserialize<T: DeserializeOwned + Validate>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < 8 {
        return Err(ProtocolError::ShortBuffer {
            need: 8,
            got: data.len(),
        });
    }
    let tail = data.len() - 4;
    let got = u32::from_le_bytes([data[tail], data[tail + 1], data[tail + 2], data[tail + 3]]);
    let expected = crc32_ieee(&data[..tail]);
    if expected != got {
        return Err(ProtocolError::CrcError { expected, got });
    }
    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if 4 + length > tail {
        return Err(ProtocolError::LengthMismatch);
    }
    let value: T = serde_json::from_slice(&data[4..4 + length])
        .map_err(|e| ProtocolError::Payload(e.to_string()))?;
    value.validate().map_err(ProtocolError::Validate)?;
    Ok(value)
}

/// CRC32-IEEE（反射，多项式 0xEDB88320）。
fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in data {
        crc ^= u32::from(b);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}
