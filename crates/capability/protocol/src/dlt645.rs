//! DL/T645-2007 电表规约读数据帧。
//!
//! 帧布局：0x68 地址(6) 0x68 控制码 数据长度 数据标识(4) 数据域
//! 和校验 0x16。数据标识与数据域按规约加 0x33 偏移传输，结构体
//! 保存线缆原始字节，数值经 `data()` / `data_type()` 还原。

use crate::bcd::decode_offset_bcd;
use crate::error::ProtocolError;
use ox_transport::crc8_sum;

/// 帧起始符。
pub const FRAME_START: u8 = 0x68;
/// 帧结束符。
pub const FRAME_END: u8 = 0x16;
/// 唤醒前导字节，解码时容忍任意个。
pub const WAKEUP: u8 = 0xFE;
/// 读数据控制码。
pub const CTRL_READ_DATA: u8 = 0x11;
/// 读数据正常应答控制码。
pub const CTRL_READ_REPLY: u8 = 0x91;

/// DL/T645 读数据帧。地址域持有独立数组，不借用解码缓冲。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dlt645Frame {
    pub address: [u8; 6],
    pub ctrl_code: u8,
    pub data_len: u8,
    pub data_id: [u8; 4],
    pub data_area: Vec<u8>,
}

impl Dlt645Frame {
    /// 构造一帧；地址必须恰好 6 字节。
    pub fn new(
        address: &[u8],
        ctrl_code: u8,
        data_id: [u8; 4],
        data_area: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        if address.len() != 6 {
            return Err(ProtocolError::AddressLengthInvalid {
                need: 6,
                got: address.len(),
            });
        }
        if 4 + data_area.len() > usize::from(u8::MAX) {
            return Err(ProtocolError::LengthMismatch);
        }
        let mut addr = [0u8; 6];
        addr.copy_from_slice(address);
        Ok(Self {
            address: addr,
            ctrl_code,
            data_len: (4 + data_area.len()) as u8,
            data_id,
            data_area,
        })
    }

    /// 构造读数据请求帧。
    pub fn read_request(address: &[u8], data_id: [u8; 4]) -> Result<Self, ProtocolError> {
        Self::new(address, CTRL_READ_DATA, data_id, Vec::new())
    }

    /// 编码为字节数组。
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if usize::from(self.data_len) != 4 + self.data_area.len() {
            return Err(ProtocolError::LengthMismatch);
        }
        let mut out = Vec::with_capacity(16 + self.data_area.len());
        out.push(FRAME_START);
        out.extend_from_slice(&self.address);
        out.push(FRAME_START);
        out.push(self.ctrl_code);
        out.push(self.data_len);
        out.extend_from_slice(&self.data_id);
        out.extend_from_slice(&self.data_area);
        out.push(crc8_sum(&out));
        out.push(FRAME_END);
        Ok(out)
    }

    /// 解码并校验；前导 0xFE 唤醒字节被跳过。
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let start = data.iter().position(|&b| b != WAKEUP).unwrap_or(data.len());
        let data = &data[start..];
        if data.len() < 16 {
            return Err(ProtocolError::ShortBuffer {
                need: 16,
                got: data.len(),
            });
        }
        if data[0] != FRAME_START || data[7] != FRAME_START || data[data.len() - 1] != FRAME_END {
            return Err(ProtocolError::BadDelimiter);
        }
        let data_len = data[9];
        if data_len < 4 {
            return Err(ProtocolError::LengthMismatch);
        }
        let area_len = usize::from(data_len) - 4;
        if 14 + area_len + 2 > data.len() {
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
        let mut address = [0u8; 6];
        address.copy_from_slice(&data[1..7]);
        let mut data_id = [0u8; 4];
        data_id.copy_from_slice(&data[10..14]);
        Ok(Self {
            address,
            ctrl_code: data[8],
            data_len,
            data_id,
            data_area: data[14..14 + area_len].to_vec(),
        })
    }

    /// 数据域 BCD 数值。
    pub fn data(&self) -> Result<i64, ProtocolError> {
        decode_offset_bcd(&self.data_area)
    }

    /// 数据标识 BCD 数值。
    pub fn data_type(&self) -> Result<i64, ProtocolError> {
        decode_offset_bcd(&self.data_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: [u8; 18] = [
        0x68, 0x45, 0x92, 0x66, 0x23, 0x00, 0x10, 0x68, 0x91, 0x06, 0x33, 0x34, 0x34, 0x35, 0x66,
        0x55, 0x62, 0x16,
    ];

    #[test]
    fn decodes_read_reply() {
        let frame = Dlt645Frame::decode(&REPLY).unwrap();
        assert_eq!(frame.address, [0x45, 0x92, 0x66, 0x23, 0x00, 0x10]);
        assert_eq!(frame.ctrl_code, CTRL_READ_REPLY);
        assert_eq!(frame.data_id, [0x33, 0x34, 0x34, 0x35]);
        assert_eq!(frame.data_area, vec![0x66, 0x55]);
        assert_eq!(frame.data().unwrap(), 2233);
        assert_eq!(frame.data_type().unwrap(), 2110);
    }

    #[test]
    fn tolerates_wakeup_padding() {
        let mut padded = vec![0xFE, 0xFE, 0xFE, 0xFE];
        padded.extend_from_slice(&REPLY);
        let frame = Dlt645Frame::decode(&padded).unwrap();
        assert_eq!(frame.data().unwrap(), 2233);
    }

    #[test]
    fn encode_decode_round_trip() {
        let frame = Dlt645Frame::decode(&REPLY).unwrap();
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.as_slice(), &REPLY);
    }

    #[test]
    fn read_request_layout() {
        let frame = Dlt645Frame::read_request(
            &[0x45, 0x92, 0x66, 0x23, 0x00, 0x10],
            [0x33, 0x34, 0x34, 0x35],
        )
        .unwrap();
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes[8], CTRL_READ_DATA);
        assert_eq!(bytes[9], 0x04);
        assert_eq!(bytes[bytes.len() - 1], FRAME_END);
        let back = Dlt645Frame::decode(&bytes).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn short_address_rejected() {
        let err = Dlt645Frame::read_request(&[0x01, 0x02], [0; 4]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::AddressLengthInvalid { need: 6, got: 2 }
        ));
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let mut bytes = REPLY;
        bytes[16] ^= 0x01;
        assert!(matches!(
            Dlt645Frame::decode(&bytes),
            Err(ProtocolError::CrcError { .. })
        ));
    }

    #[test]
    fn declared_length_beyond_buffer_rejected() {
        let mut bytes = REPLY;
        bytes[9] = 0x40;
        assert!(matches!(
            Dlt645Frame::decode(&bytes),
            Err(ProtocolError::LengthMismatch)
        ));
    }
}
