//! 线缆侧 CRC 校验。

/// CRC16-Modbus：初值 0xFFFF，右移，多项式 0xA001（反射）。
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in data {
        crc ^= u16::from(b);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// 和校验 CRC8：全部字节累加取模 256。DL/T645、CJ/T188 使用。
pub fn crc8_sum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// SZY206 反射 CRC8：右移，多项式 0xE1。
pub fn crc8_szy(data: &[u8]) -> u8 {
    let mut crc: u8 = 0x00;
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            if crc & 0x01 != 0 {
                crc = (crc >> 1) ^ 0xE1;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_known_vector() {
        // Modbus 标准测试向量：01 03 00 00 00 0A -> 0xCDC5
        let crc = crc16_modbus(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(crc, 0xCDC5);
    }

    #[test]
    fn crc16_empty_payload() {
        assert_eq!(crc16_modbus(&[]), 0xFFFF);
    }

    #[test]
    fn crc8_sum_wraps() {
        assert_eq!(crc8_sum(&[0xFF, 0x02]), 0x01);
        assert_eq!(crc8_sum(&[]), 0x00);
    }

    #[test]
    fn crc8_szy_changes_per_bit() {
        let a = crc8_szy(&[0x68, 0x06, 0x68]);
        let b = crc8_szy(&[0x68, 0x06, 0x69]);
        assert_ne!(a, b);
    }
}
