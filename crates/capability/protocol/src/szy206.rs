//! SZY206-2016 水资源监测数据传输规约帧。
//!
//! 帧布局：0x68 数据长度 0x68 控制码 地址(5) 数据域 校验 0x16。
//! 数据长度覆盖控制码、地址与数据域。控制码位域：DIR[7]
//! DIV[6] FCB[5..4] FUNC[3..0]。

use crate::error::ProtocolError;
use ox_transport::crc8_szy;

/// 帧起始符。
pub const FRAME_START: u8 = 0x68;
/// 帧结束符。
pub const FRAME_END: u8 = 0x16;

/// 功能码：命令。
pub const FC_COMMAND: u8 = 0x00;
/// 功能码：雨量参数。
pub const FC_RAINFALL: u8 = 0x01;
/// 功能码：水位参数。
pub const FC_WATER_LEVEL: u8 = 0x02;
/// 功能码：流量参数。
pub const FC_FLOW_RATE: u8 = 0x03;
/// 功能码：流速参数。
pub const FC_FLOW_SPEED: u8 = 0x04;
/// 功能码：闸位参数。
pub const FC_GATE_POSITION: u8 = 0x05;
/// 功能码：功率参数。
pub const FC_POWER: u8 = 0x06;
/// 功能码：气压参数。
pub const FC_AIR_PRESSURE: u8 = 0x07;
/// 功能码：风速参数。
pub const FC_WIND_SPEED: u8 = 0x08;
/// 功能码：水温参数。
pub const FC_WATER_TEMPERATURE: u8 = 0x09;
/// 功能码：水质参数。
pub const FC_WATER_QUALITY: u8 = 0x0A;
/// 功能码：土壤含水率参数。
pub const FC_SOIL_MOISTURE: u8 = 0x0B;
/// 功能码：蒸发量参数。
pub const FC_EVAPORATION: u8 = 0x0C;
/// 功能码：报警状态参数。
pub const FC_ALARM_STATUS: u8 = 0x0D;
/// 功能码：综合参数。
pub const FC_COMPREHENSIVE: u8 = 0x0E;
/// 功能码：水压参数。
pub const FC_WATER_PRESSURE: u8 = 0x0F;

/// 组装控制码。
pub fn make_ctrl(dir: u8, div: u8, fcb: u8, func: u8) -> u8 {
    ((dir & 0x01) << 7) | ((div & 0x01) << 6) | ((fcb & 0x03) << 4) | (func & 0x0F)
}

/// SZY206 帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Szy206Frame {
    pub data_len: u8,
    pub ctrl_code: u8,
    pub address: [u8; 5],
    pub data_area: Vec<u8>,
}

impl Szy206Frame {
    /// 构造一帧；地址必须恰好 5 字节。
    pub fn new(ctrl_code: u8, address: &[u8], data_area: Vec<u8>) -> Result<Self, ProtocolError> {
        if address.len() != 5 {
            return Err(ProtocolError::AddressLengthInvalid {
                need: 5,
                got: address.len(),
            });
        }
        if 6 + data_area.len() > usize::from(u8::MAX) {
            return Err(ProtocolError::LengthMismatch);
        }
        let mut addr = [0u8; 5];
        addr.copy_from_slice(address);
        Ok(Self {
            data_len: (6 + data_area.len()) as u8,
            ctrl_code,
            address: addr,
            data_area,
        })
    }

    /// 传输方向位 DIR。
    pub fn dir(&self) -> u8 {
        (self.ctrl_code >> 7) & 0x01
    }

    /// 分包标志位 DIV。
    pub fn div(&self) -> u8 {
        (self.ctrl_code >> 6) & 0x01
    }

    /// 帧计数位 FCB。
    pub fn fcb(&self) -> u8 {
        (self.ctrl_code >> 4) & 0x03
    }

    /// 功能码 FUNC。
    pub fn func(&self) -> u8 {
        self.ctrl_code & 0x0F
    }

    /// 编码为字节数组。
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if usize::from(self.data_len) != 6 + self.data_area.len() {
            return Err(ProtocolError::LengthMismatch);
        }
        let mut out = Vec::with_capacity(11 + self.data_area.len());
        out.push(FRAME_START);
        out.push(self.data_len);
        out.push(FRAME_START);
        out.push(self.ctrl_code);
        out.extend_from_slice(&self.address);
        out.extend_from_slice(&self.data_area);
        out.push(crc8_szy(&out));
        out.push(FRAME_END);
        Ok(out)
    }

    /// 解码并校验。
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 11 {
            return Err(ProtocolError::ShortBuffer {
                need: 11,
                got: data.len(),
            });
        }
        if data[0] != FRAME_START || data[2] != FRAME_START || data[data.len() - 1] != FRAME_END {
            return Err(ProtocolError::BadDelimiter);
        }
        let data_len = data[1];
        if data_len < 6 {
            return Err(ProtocolError::LengthMismatch);
        }
        let area_len = usize::from(data_len) - 6;
        if 9 + area_len + 2 > data.len() {
            return Err(ProtocolError::LengthMismatch);
        }
        let checksum = data[data.len() - 2];
        let expected = crc8_szy(&data[..data.len() - 2]);
        if expected != checksum {
            return Err(ProtocolError::CrcError {
                expected: u32::from(expected),
                got: u32::from(checksum),
            });
        }
        let mut address = [0u8; 5];
        address.copy_from_slice(&data[4..9]);
        Ok(Self {
            data_len,
            ctrl_code: data[3],
            address,
            data_area: data[9..9 + area_len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_code_bit_fields() {
        let ctrl = make_ctrl(1, 0, 0x03, FC_WATER_LEVEL);
        let frame = Szy206Frame::new(ctrl, &[0x01, 0x02, 0x03, 0x04, 0x05], Vec::new()).unwrap();
        assert_eq!(frame.dir(), 1);
        assert_eq!(frame.div(), 0);
        assert_eq!(frame.fcb(), 0x03);
        assert_eq!(frame.func(), FC_WATER_LEVEL);
    }

    #[test]
    fn encode_decode_round_trip() {
        let ctrl = make_ctrl(0, 0, 0x03, FC_RAINFALL);
        let frame = Szy206Frame::new(
            ctrl,
            &[0x10, 0x20, 0x30, 0x40, 0x50],
            vec![0x01, 0x02, 0x03],
        )
        .unwrap();
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes[1], 9);
        let back = Szy206Frame::decode(&bytes).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn bad_address_length_rejected() {
        let err = Szy206Frame::new(0x00, &[0x01, 0x02], Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::AddressLengthInvalid { need: 5, got: 2 }
        ));
    }

    #[test]
    fn corrupted_checksum_rejected() {
        let frame = Szy206Frame::new(0x02, &[1, 2, 3, 4, 5], Vec::new()).unwrap();
        let mut bytes = frame.encode().unwrap();
        let at = bytes.len() - 2;
        bytes[at] ^= 0x55;
        assert!(matches!(
            Szy206Frame::decode(&bytes),
            Err(ProtocolError::CrcError { .. })
        ));
    }
}
