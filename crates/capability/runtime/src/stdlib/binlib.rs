//! binary 模块：位级匹配与二进制数值还原。
//!
//! `MB` 按 `name:位宽` 的模式把输入切成字段，前导 `>`/`<` 指定
//! 字节序，小端输入先倒序再切分。字段值为位串文本，或按需还原
//! 为整数。

use super::rt_err;
use rhai::{Blob, Dynamic, Engine, EvalAltResult, Map, Module};

struct Field {
    name: String,
    bits: usize,
}

fn parse_pattern(pattern: &str) -> Result<(bool, Vec<Field>), Box<EvalAltResult>> {
    let pattern = pattern.trim();
    let (little_endian, body) = match pattern.as_bytes().first() {
        Some(b'<') => (true, &pattern[1..]),
        Some(b'>') => (false, &pattern[1..]),
        _ => (false, pattern),
    };
    let mut fields = Vec::new();
    for segment in body.split_whitespace() {
        let (name, bits) = segment
            .split_once(':')
            .ok_or_else(|| rt_err(format!("bad field: {segment}")))?;
        let bits: usize = bits
            .parse()
            .map_err(|_| rt_err(format!("bad field width: {segment}")))?;
        if bits == 0 || bits > 64 {
            return Err(rt_err(format!("field width out of range: {segment}")));
        }
        fields.push(Field {
            name: name.to_string(),
            bits,
        });
    }
    if fields.is_empty() {
        return Err(rt_err("empty pattern"));
    }
    Ok((little_endian, fields))
}

fn bit_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 8);
    for byte in bytes {
        for shift in (0..8).rev() {
            out.push(if byte >> shift & 1 == 1 { '1' } else { '0' });
        }
    }
    out
}

fn match_bits(
    pattern: &str,
    input: &[u8],
    to_int: bool,
) -> Result<Map, Box<EvalAltResult>> {
    let (little_endian, fields) = parse_pattern(pattern)?;
    let bytes: Vec<u8> = if little_endian {
        input.iter().rev().copied().collect()
    } else {
        input.to_vec()
    };
    let bits = bit_string(&bytes);
    let total: usize = fields.iter().map(|f| f.bits).sum();
    if total > bits.len() {
        return Err(rt_err(format!(
            "pattern needs {total} bits, input has {}",
            bits.len()
        )));
    }

    let mut out = Map::new();
    let mut cursor = 0usize;
    for field in fields {
        let slice = &bits[cursor..cursor + field.bits];
        cursor += field.bits;
        let value = if to_int {
            Dynamic::from(
                i64::from_str_radix(slice, 2).map_err(|e| rt_err(format!("bad bits: {e}")))?,
            )
        } else {
            Dynamic::from(slice.to_string())
        };
        out.insert(field.name.into(), value);
    }
    Ok(out)
}

fn bits_to_bytes(bits: &str) -> Result<Vec<u8>, Box<EvalAltResult>> {
    let bits = bits.trim();
    if bits.is_empty() || bits.len() % 8 != 0 {
        return Err(rt_err(format!("bit string length {} not byte-aligned", bits.len())));
    }
    let mut out = Vec::with_capacity(bits.len() / 8);
    for chunk in bits.as_bytes().chunks(8) {
        let text = std::str::from_utf8(chunk).map_err(|_| rt_err("bad bit string"))?;
        out.push(u8::from_str_radix(text, 2).map_err(|_| rt_err("bad bit string"))?);
    }
    Ok(out)
}

fn float_bytes<const N: usize>(blob: &[u8], big_endian: bool) -> Result<[u8; N], Box<EvalAltResult>> {
    let arr: [u8; N] = blob
        .try_into()
        .map_err(|_| rt_err(format!("need {N} bytes, got {}", blob.len())))?;
    if big_endian {
        Ok(arr)
    } else {
        let mut rev = arr;
        rev.reverse();
        Ok(rev)
    }
}

pub(super) fn register(engine: &mut Engine) {
    let mut module = Module::new();

    module.set_native_fn("MB", |pattern: &str, input: Blob, to_int: bool| {
        match_bits(pattern, &input, to_int)
    });
    module.set_native_fn("MBHex", |pattern: &str, hex_text: &str, to_int: bool| {
        let bytes = hex::decode(hex_text.trim()).map_err(|e| rt_err(format!("bad hex: {e}")))?;
        match_bits(pattern, &bytes, to_int)
    });

    module.set_native_fn("B2BS", |blob: Blob| Ok(bit_string(&blob)));
    module.set_native_fn("Bit", |blob: Blob, index: i64| {
        let index = index.max(0) as usize;
        let (byte, shift) = (index / 8, 7 - index % 8);
        let value = blob
            .get(byte)
            .ok_or_else(|| rt_err(format!("bit index {index} out of range")))?;
        Ok(i64::from(value >> shift & 1))
    });
    module.set_native_fn("B2I64", |blob: Blob| {
        if blob.len() > 8 {
            return Err(rt_err(format!("need at most 8 bytes, got {}", blob.len())));
        }
        Ok(blob.iter().fold(0i64, |acc, b| (acc << 8) | i64::from(*b)))
    });
    module.set_native_fn("BS2B", |bits: &str| Ok(Blob::from(bits_to_bytes(bits)?)));
    module.set_native_fn("B64S2B", |bits: &str| {
        let bytes = bits_to_bytes(bits)?;
        if bytes.len() != 8 {
            return Err(rt_err(format!("need 64 bits, got {}", bytes.len() * 8)));
        }
        Ok(Blob::from(bytes))
    });

    module.set_native_fn("Bin2F32Big", |blob: Blob| {
        Ok(f64::from(f32::from_be_bytes(float_bytes::<4>(&blob, true)?)))
    });
    module.set_native_fn("Bin2F32Little", |blob: Blob| {
        Ok(f64::from(f32::from_be_bytes(float_bytes::<4>(&blob, false)?)))
    });
    module.set_native_fn("Bin2F64Big", |blob: Blob| {
        Ok(f64::from_be_bytes(float_bytes::<8>(&blob, true)?))
    });
    module.set_native_fn("Bin2F64Little", |blob: Blob| {
        Ok(f64::from_be_bytes(float_bytes::<8>(&blob, false)?))
    });

    engine.register_static_module("binary", module.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_splits_bits() {
        let map = match_bits(">a:4 b:4 c:8", &[0xAB, 0xCD], false).unwrap();
        assert_eq!(map.get("a").unwrap().clone().into_string().unwrap(), "1010");
        assert_eq!(map.get("b").unwrap().clone().into_string().unwrap(), "1011");
        assert_eq!(
            map.get("c").unwrap().clone().into_string().unwrap(),
            "11001101"
        );
    }

    #[test]
    fn pattern_as_ints() {
        let map = match_bits(">a:4 b:12", &[0xAB, 0xCD], true).unwrap();
        assert_eq!(map.get("a").unwrap().as_int().unwrap(), 0xA);
        assert_eq!(map.get("b").unwrap().as_int().unwrap(), 0xBCD);
    }

    #[test]
    fn little_endian_reverses_input() {
        let map = match_bits("<a:16", &[0x01, 0x02], true).unwrap();
        assert_eq!(map.get("a").unwrap().as_int().unwrap(), 0x0201);
    }

    #[test]
    fn short_input_rejected() {
        assert!(match_bits(">a:32", &[0x01], false).is_err());
        assert!(match_bits("a:0", &[0x01], false).is_err());
        assert!(match_bits("", &[0x01], false).is_err());
    }

    #[test]
    fn bit_string_round_trip() {
        let bits = bit_string(&[0xA5]);
        assert_eq!(bits, "10100101");
        assert_eq!(bits_to_bytes(&bits).unwrap(), vec![0xA5]);
        assert!(bits_to_bytes("101").is_err());
    }

    #[test]
    fn float_decoding() {
        let be = 2.5f32.to_be_bytes();
        assert_eq!(
            f64::from(f32::from_be_bytes(float_bytes::<4>(&be, true).unwrap())),
            2.5
        );
        let mut le = be;
        le.reverse();
        assert_eq!(
            f64::from(f32::from_be_bytes(float_bytes::<4>(&le, false).unwrap())),
            2.5
        );
    }
}
