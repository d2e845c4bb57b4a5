//! 表计规约共用的 BCD 数值解码。

use crate::error::ProtocolError;

/// 线缆字节逐个减 0x33 偏移、整体反序后按 BCD 数字拼接解析。
///
/// 例：[0x66, 0x55] -> [0x33, 0x22] -> [0x22, 0x33] -> 2233。
pub(crate) fn decode_offset_bcd(wire: &[u8]) -> Result<i64, ProtocolError> {
    if wire.is_empty() {
        return Err(ProtocolError::Bcd("empty data area".into()));
    }
    let mut digits = String::new();
    for &b in wire.iter().rev() {
        digits.push_str(&format!("{:x}", b.wrapping_sub(0x33)));
    }
    digits
        .parse::<i64>()
        .map_err(|e| ProtocolError::Bcd(format!("{digits}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_byte_value() {
        assert_eq!(decode_offset_bcd(&[0x66, 0x55]).unwrap(), 2233);
    }

    #[test]
    fn single_digit_bytes_collapse() {
        // 低于 0x10 的差值只占一位数字
        assert_eq!(decode_offset_bcd(&[0x33, 0x34, 0x34, 0x35]).unwrap(), 2110);
    }

    #[test]
    fn empty_area_rejected() {
        assert!(decode_offset_bcd(&[]).is_err());
    }

    #[test]
    fn non_bcd_byte_rejected() {
        // 0xFF - 0x33 = 0xCC，十六进制数字 c 无法按十进制解析
        assert!(decode_offset_bcd(&[0xFF]).is_err());
    }
}
