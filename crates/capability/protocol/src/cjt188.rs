//! CJ/T188-2004 户用计量仪表规约读数据帧。
//!
//! 帧布局：0x68 仪表类型 地址(7) 控制码 数据长度 数据标识(2)
//! 数据域 序列号 和校验 0x16。数据长度覆盖数据标识、数据域与
//! 序列号。

use crate::bcd::decode_offset_bcd;
use crate::error::ProtocolError;
use ox_transport::crc8_sum;

/// 帧起始符。
pub const FRAME_START: u8 = 0x68;
/// 帧结束符。
pub const FRAME_END: u8 = 0x16;
/// 读计量数据控制码。
pub const CTRL_READ_DATA: u8 = 0x01;

/// CJ/T188 读数据帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cjt188Frame {
    pub meter_type: u8,
    pub address: [u8; 7],
    pub ctrl_code: u8,
    pub data_len: u8,
    pub data_id: [u8; 2],
    pub data_area: Vec<u8>,
    pub serial: u8,
}

impl Cjt188Frame {
    /// 构造一帧；地址必须恰好 7 字节。
    pub fn new(
        meter_type: u8,
        address: &[u8],
        ctrl_code: u8,
        data_id: [u8; 2],
        data_area: Vec<u8>,
        serial: u8,
    ) -> Result<Self, ProtocolError> {
        if address.len() != 7 {
            return Err(ProtocolError::AddressLengthInvalid {
                need: 7,
                got: address.len(),
            });
        }
        if 3 + data_area.len() > usize::from(u8::MAX) {
            return Err(ProtocolError::LengthMismatch);
        }
        let mut addr = [0u8; 7];
        addr.copy_from_slice(address);
        Ok(Self {
            meter_type,
            address: addr,
            ctrl_code,
            data_len: (3 + data_area.len()) as u8,
            data_id,
            data_area,
            serial,
        })
    }

    /// 编码为字节数组。
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if usize::from(self.data_len) != 3 + self.data_area.len() {
            return Err(ProtocolError::LengthMismatch);
        }
        let mut out = Vec::with_capacity(16 + self.data_area.len());
        out.push(FRAME_START);
        out.push(self.meter_type);
        out.extend_from_slice(&self.address);
        out.push(self.ctrl_code);
        out.push(self.data_len);
        out.extend_from_slice(&self.data_id);
        out.extend_from_slice(&self.data_area);
        out.push(self.serial);
        out.push(crc8_sum(&out));
        out.push(FRAME_END);
        Ok(out)
    }

    /// 解码并校验。
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 16 {
            return Err(ProtocolError::ShortBuffer {
                need: 16,
                got: data.len(),
            });
        }
        if data[0] != FRAME_START || data[data.len() - 1] != FRAME_END {
            return Err(ProtocolError::BadDelimiter);
        }
        let data_len = data[10];
        if data_len < 3 {
            return Err(ProtocolError::LengthMismatch);
        }
        let area_len = usize::from(data_len) - 3;
        if 13 + area_len + 3 > data.len() {
            return Err(ProtocolError::LengthMismatch);
        }
        let checksum = data[data.len() - 2];
        let expected = crc8_sum(&data[..data.len() - 2]);
        if expected != checksum {
            return Err(ProtocolError::CrcError {
                expected: u32::from(expected),
                got: u32::from(checksum),
            });
        }
        let mut address = [0u8; 7];
        address.copy_from_slice(&data[2..9]);
        Ok(Self {
            meter_type: data[1],
            address,
            ctrl_code: data[9],
            data_len,
            data_id: [data[11], data[12]],
            data_area: data[13..13 + area_len].to_vec(),
            serial: data[13 + area_len],
        })
    }

    /// 数据域 BCD 数值。
    pub fn data(&self) -> Result<i64, ProtocolError> {
        decode_offset_bcd(&self.data_area)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water_meter_request() -> Cjt188Frame {
        Cjt188Frame::new(
            0x10,
            &[0x01, 0x00, 0x00, 0x05, 0x08, 0x00, 0x00],
            CTRL_READ_DATA,
            [0x90, 0x1F],
            Vec::new(),
            0x00,
        )
        .unwrap()
    }

    #[test]
    fn encode_decode_round_trip() {
        let frame = water_meter_request();
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), 16);
        let back = Cjt188Frame::decode(&bytes).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn checksum_is_byte_sum() {
        let bytes = water_meter_request().encode().unwrap();
        let sum = bytes[..bytes.len() - 2]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(bytes[bytes.len() - 2], sum);
    }

    #[test]
    fn round_trips_with_data_area() {
        let frame = Cjt188Frame::new(
            0x10,
            &[0x01, 0x00, 0x00, 0x05, 0x08, 0x00, 0x00],
            0x81,
            [0x90, 0x1F],
            vec![0x66, 0x55, 0x33, 0x33],
            0x01,
        )
        .unwrap();
        let bytes = frame.encode().unwrap();
        let back = Cjt188Frame::decode(&bytes).unwrap();
        assert_eq!(back, frame);
        assert_eq!(back.data().unwrap(), 2233);
    }

    #[test]
    fn bad_address_length_rejected() {
        let err = Cjt188Frame::new(0x10, &[0x01], 0x01, [0x90, 0x1F], Vec::new(), 0).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::AddressLengthInvalid { need: 7, got: 1 }
        ));
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let mut bytes = water_meter_request().encode().unwrap();
        let at = bytes.len() - 2;
        bytes[at] ^= 0x10;
        assert!(matches!(
            Cjt188Frame::decode(&bytes),
            Err(ProtocolError::CrcError { .. })
        ));
    }
}
