//! 字节级传输与封包能力。
//!
//! 提供带超时的双工字节通道、从任意字节流中提取完整帧的封包器、
//! CRC 校验以及请求/应答与从机两种收发模式。

pub mod crc;
pub mod endpoint;
pub mod error;
pub mod framer;
pub mod master;
pub mod slave;

pub use crc::{crc8_sum, crc8_szy, crc16_modbus};
pub use endpoint::{Endpoint, LoopbackEndpoint, TcpEndpoint};
pub use error::TransportError;
pub use framer::{FrameMode, Framer};
pub use master::MasterPort;
pub use slave::SlaveLoop;
