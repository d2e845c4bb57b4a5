//! 协议编解码错误。

use thiserror::Error;

/// 编解码过程中的错误。
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// 字节数不足以构成最小帧。
    #[error("buffer too short: need {need} bytes, got {got}")]
    ShortBuffer { need: usize, got: usize },

    /// 声明长度与实际载荷不一致。
    #[error("declared length does not match payload")]
    LengthMismatch,

    /// 校验值不匹配。
    #[error("checksum mismatch: expected {expected:#x}, got {got:#x}")]
    CrcError { expected: u32, got: u32 },

    /// 地址域长度非法。
    #[error("address length must be {need} bytes, got {got}")]
    AddressLengthInvalid { need: usize, got: usize },

    /// 帧起始/结束定界符非法。
    #[error("invalid frame delimiter")]
    BadDelimiter,

    /// BCD 数值解析失败。
    #[error("bcd decode failed: {0}")]
    Bcd(String),

    /// 载荷序列化/反序列化失败。
    #[error("payload codec failed: {0}")]
    Payload(String),

    /// 业务校验钩子拒绝了载荷。
    #[error("payload validation failed: {0}")]
    Validate(String),
}
