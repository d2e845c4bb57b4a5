//! Modbus RTU 写请求报文组装与寄存器拆字节。
//!
//! 覆盖脚本侧与驱动侧都会用到的四个写功能码：F5 写单线圈、
//! F6 写单寄存器、F15 写多线圈、F16 写多寄存器。CRC16 低字节
//! 在前。

use ox_transport::crc16_modbus;

/// 写单线圈功能码。
pub const FUNC_WRITE_COIL: u8 = 0x05;
/// 写单寄存器功能码。
pub const FUNC_WRITE_REGISTER: u8 = 0x06;
/// 写多线圈功能码。
pub const FUNC_WRITE_COILS: u8 = 0x0F;
/// 写多寄存器功能码。
pub const FUNC_WRITE_REGISTERS: u8 = 0x10;

fn finish(mut adu: Vec<u8>) -> Vec<u8> {
    let crc = crc16_modbus(&adu);
    adu.push((crc & 0xFF) as u8);
    adu.push((crc >> 8) as u8);
    adu
}

/// F5 写单线圈。
pub fn f5(slave: u8, address: u16, on: bool) -> Vec<u8> {
    let value: u16 = if on { 0xFF00 } else { 0x0000 };
    let mut adu = vec![slave, FUNC_WRITE_COIL];
    adu.extend_from_slice(&address.to_be_bytes());
    adu.extend_from_slice(&value.to_be_bytes());
    finish(adu)
}

/// F6 写单寄存器。
pub fn f6(slave: u8, address: u16, value: u16) -> Vec<u8> {
    let mut adu = vec![slave, FUNC_WRITE_REGISTER];
    adu.extend_from_slice(&address.to_be_bytes());
    adu.extend_from_slice(&value.to_be_bytes());
    finish(adu)
}

/// F15 写多线圈；线圈位按低位在先打包。
pub fn f15(slave: u8, address: u16, coils: &[bool]) -> Vec<u8> {
    let mut adu = vec![slave, FUNC_WRITE_COILS];
    adu.extend_from_slice(&address.to_be_bytes());
    adu.extend_from_slice(&(coils.len() as u16).to_be_bytes());
    let byte_count = coils.len().div_ceil(8);
    adu.push(byte_count as u8);
    let mut packed = vec![0u8; byte_count];
    for (i, &coil) in coils.iter().enumerate() {
        if coil {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    adu.extend_from_slice(&packed);
    finish(adu)
}

/// F16 写多寄存器；每个寄存器大端编码。
pub fn f16(slave: u8, address: u16, values: &[u16]) -> Vec<u8> {
    let mut adu = vec![slave, FUNC_WRITE_REGISTERS];
    adu.extend_from_slice(&address.to_be_bytes());
    adu.extend_from_slice(&(values.len() as u16).to_be_bytes());
    adu.push((values.len() * 2) as u8);
    for value in values {
        adu.extend_from_slice(&value.to_be_bytes());
    }
    finish(adu)
}

/// 寄存器序列拆成字节序列，高字节在前。
pub fn parse_byte(registers: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(registers.len() * 2);
    for r in registers {
        out.extend_from_slice(&r.to_be_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crc_ok(adu: &[u8]) -> bool {
        let body = &adu[..adu.len() - 2];
        let crc = crc16_modbus(body);
        adu[adu.len() - 2] == (crc & 0xFF) as u8 && adu[adu.len() - 1] == (crc >> 8) as u8
    }

    #[test]
    fn f5_layout() {
        let adu = f5(0x01, 0x00AC, true);
        assert_eq!(&adu[..6], &[0x01, 0x05, 0x00, 0xAC, 0xFF, 0x00]);
        assert!(crc_ok(&adu));
        let off = f5(0x01, 0x00AC, false);
        assert_eq!(&off[4..6], &[0x00, 0x00]);
    }

    #[test]
    fn f6_layout() {
        let adu = f6(0x11, 0x0001, 0x0003);
        assert_eq!(&adu[..6], &[0x11, 0x06, 0x00, 0x01, 0x00, 0x03]);
        assert!(crc_ok(&adu));
    }

    #[test]
    fn f15_packs_bits_lsb_first() {
        // Modbus 规范示例：从 0x0013 写 10 个线圈
        let coils = [
            true, false, true, true, false, false, true, true, true, false,
        ];
        let adu = f15(0x11, 0x0013, &coils);
        assert_eq!(
            &adu[..9],
            &[0x11, 0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );
        assert!(crc_ok(&adu));
    }

    #[test]
    fn f16_layout() {
        let adu = f16(0x11, 0x0001, &[0x000A, 0x0102]);
        assert_eq!(
            &adu[..11],
            &[0x11, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
        assert!(crc_ok(&adu));
    }

    #[test]
    fn parse_byte_splits_registers() {
        assert_eq!(parse_byte(&[0x0102, 0xAABB]), vec![0x01, 0x02, 0xAA, 0xBB]);
    }
}
