//! 应用层帧：2 字节大端长度 + 载荷 + 2 字节大端 CRC16。

use crate::error::ProtocolError;
use ox_transport::crc16_modbus;

/// 应用层帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationFrame {
    pub length: u16,
    pub payload: Vec<u8>,
    pub crc16: u16,
}

impl ApplicationFrame {
    /// 从载荷构造，长度与校验自动填充。
    pub fn new(payload: Vec<u8>) -> Self {
        let crc16 = crc16_modbus(&payload);
        Self {
            length: payload.len() as u16,
            payload,
            crc16,
        }
    }

    /// 编码为字节数组。声明长度与载荷不一致时拒绝。
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.payload.len() != usize::from(self.length) {
            return Err(ProtocolError::LengthMismatch);
        }
        let mut out = Vec::with_capacity(4 + self.payload.len());
        out.extend_from_slice(&self.length.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.crc16.to_be_bytes());
        Ok(out)
    }

    /// 从字节数组解码并校验 CRC。
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 4 {
            return Err(ProtocolError::ShortBuffer {
                need: 4,
                got: data.len(),
            });
        }
        let length = u16::from_be_bytes([data[0], data[1]]);
        let total = usize::from(length) + 4;
        if data.len() < total {
            return Err(ProtocolError::LengthMismatch);
        }
        let payload = data[2..2 + usize::from(length)].to_vec();
        let crc16 = u16::from_be_bytes([data[total - 2], data[total - 1]]);
        let expected = crc16_modbus(&payload);
        if expected != crc16 {
            return Err(ProtocolError::CrcError {
                expected: u32::from(expected),
                got: u32::from(crc16),
            });
        }
        Ok(Self {
            length,
            payload,
            crc16,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let frame = ApplicationFrame::new(vec![0x01, 0x02, 0x03]);
        let bytes = frame.encode().unwrap();
        assert_eq!(&bytes[..2], &[0x00, 0x03]);
        let back = ApplicationFrame::decode(&bytes).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn length_mismatch_rejected_on_encode() {
        let mut frame = ApplicationFrame::new(vec![0x01]);
        frame.length = 9;
        assert!(matches!(
            frame.encode(),
            Err(ProtocolError::LengthMismatch)
        ));
    }

    #[test]
    fn corrupted_crc_rejected() {
        let mut bytes = ApplicationFrame::new(vec![0xAA, 0xBB]).encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            ApplicationFrame::decode(&bytes),
            Err(ProtocolError::CrcError { .. })
        ));
    }

    #[test]
    fn four_byte_frame_is_empty_payload() {
        // 空载荷帧恰好 4 字节，CRC 针对空载荷计算
        let bytes = ApplicationFrame::new(Vec::new()).encode().unwrap();
        assert_eq!(bytes.len(), 4);
        let frame = ApplicationFrame::decode(&bytes).unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(matches!(
            ApplicationFrame::decode(&[0x00, 0x01, 0xAB]),
            Err(ProtocolError::ShortBuffer { need: 4, got: 3 })
        ));
    }
}
