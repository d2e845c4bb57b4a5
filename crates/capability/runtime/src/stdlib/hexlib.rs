//! hex 模块：十六进制文本与数值、字节序整理。

use super::rt_err;
use rhai::{Blob, Dynamic, Engine, EvalAltResult, Map, Module};

fn decode(hex_text: &str) -> Result<Vec<u8>, Box<EvalAltResult>> {
    hex::decode(hex_text.trim()).map_err(|e| rt_err(format!("bad hex: {e}")))
}

fn to_u64(bytes: &[u8]) -> Result<u64, Box<EvalAltResult>> {
    if bytes.len() > 8 {
        return Err(rt_err(format!("hex too long: {} bytes", bytes.len())));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// 四字节重排：模式字母给出输出顺序，A 为首字节。
fn reorder4(hex_text: &str, order: [usize; 4]) -> Result<String, Box<EvalAltResult>> {
    let bytes = decode(hex_text)?;
    if bytes.len() != 4 {
        return Err(rt_err(format!("need 4 bytes, got {}", bytes.len())));
    }
    let out = [
        bytes[order[0]],
        bytes[order[1]],
        bytes[order[2]],
        bytes[order[3]],
    ];
    Ok(hex::encode(out))
}

/// 解析 `name:start-end` 段落并抽取字节区间为无符号整数。
fn match_ranges(pattern: &str, hex_text: &str) -> Result<Map, Box<EvalAltResult>> {
    let bytes = decode(hex_text)?;
    let mut out = Map::new();
    for segment in pattern.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (name, range) = segment
            .split_once(':')
            .ok_or_else(|| rt_err(format!("bad segment: {segment}")))?;
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| rt_err(format!("bad range: {segment}")))?;
        let start: usize = start
            .parse()
            .map_err(|_| rt_err(format!("bad range: {segment}")))?;
        let end: usize = end
            .parse()
            .map_err(|_| rt_err(format!("bad range: {segment}")))?;
        if start >= end || end > bytes.len() {
            return Err(rt_err(format!("range out of bounds: {segment}")));
        }
        let value = to_u64(&bytes[start..end])? as i64;
        out.insert(name.trim().into(), Dynamic::from(value));
    }
    Ok(out)
}

fn two_bytes(hex_text: &str, high_first: bool) -> Result<u16, Box<EvalAltResult>> {
    let bytes = decode(hex_text)?;
    if bytes.len() != 2 {
        return Err(rt_err(format!("need 2 bytes, got {}", bytes.len())));
    }
    Ok(if high_first {
        u16::from_be_bytes([bytes[0], bytes[1]])
    } else {
        u16::from_le_bytes([bytes[0], bytes[1]])
    })
}

pub(super) fn register(engine: &mut Engine) {
    let mut module = Module::new();

    module.set_native_fn("HToN", |hex_text: &str| {
        Ok(to_u64(&decode(hex_text)?)? as i64)
    });
    module.set_native_fn("HsubToN", |hex_text: &str, start: i64, end: i64| {
        let trimmed = hex_text.trim();
        let (start, end) = (start.max(0) as usize, end.max(0) as usize);
        if start >= end || end > trimmed.len() {
            return Err(rt_err(format!("bad substring {start}-{end}")));
        }
        let sub = &trimmed[start..end];
        i64::from_str_radix(sub, 16).map_err(|e| rt_err(format!("bad hex: {e}")))
    });
    module.set_native_fn("Bytes2Hexs", |blob: Blob| Ok(hex::encode(blob)));
    module.set_native_fn("Hexs2Bytes", |hex_text: &str| {
        Ok(Blob::from(decode(hex_text)?))
    });

    module.set_native_fn("ABCD", |hex_text: &str| reorder4(hex_text, [0, 1, 2, 3]));
    module.set_native_fn("DCBA", |hex_text: &str| reorder4(hex_text, [3, 2, 1, 0]));
    module.set_native_fn("BADC", |hex_text: &str| reorder4(hex_text, [1, 0, 3, 2]));
    module.set_native_fn("CDAB", |hex_text: &str| reorder4(hex_text, [2, 3, 0, 1]));

    module.set_native_fn("TwoBytesHOrL", |hex_text: &str, high_first: bool| {
        Ok(i64::from(two_bytes(hex_text, high_first)?))
    });
    module.set_native_fn("Int16HOrL", |hex_text: &str, high_first: bool| {
        Ok(i64::from(two_bytes(hex_text, high_first)? as i16))
    });

    module.set_native_fn("MatchHex", match_ranges);
    module.set_native_fn("MatchUInt", match_ranges);

    engine.register_static_module("hex", module.into());
}
