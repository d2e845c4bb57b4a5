//! 协议编解码能力。
//!
//! 提供内部链路的应用层帧与通用可序列化帧，以及 DL/T645、
//! CJ/T188、SZY206 表计规约帧和 Modbus 写报文组装。

mod app_frame;
mod bcd;
pub mod cjt188;
pub mod dlt645;
mod error;
pub mod modbus_pdu;
mod serializable;
pub mod szy206;

pub use app_frame::ApplicationFrame;
pub use cjt188::Cjt188Frame;
pub use dlt645::Dlt645Frame;
pub use error::ProtocolError;
pub use serializable::{Validate, deserialize, serialize};
pub use szy206::Szy206Frame;
