//! 传输层错误类型定义。
//!
//! Timeout/Closed 属瞬态类，CrcError/Framing 属协议类：
//! 前者由调用方重试，后者计数丢帧后重新同步。

/// 传输错误。
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// 读超时：期限内未收到完整帧。
    #[error("timeout after {0} ms")]
    Timeout(u64),

    /// CRC 校验失败。
    #[error("crc mismatch: expected {expected:#06x}, got {got:#06x}")]
    CrcError { expected: u16, got: u16 },

    /// 帧边界损坏。
    #[error("framing error: {0}")]
    Framing(String),

    /// 通道已关闭。
    #[error("transport closed")]
    Closed,

    /// IO 错误。
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
