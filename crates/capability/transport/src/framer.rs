//! 封包边界检测。
//!
//! 从任意切分的字节流中提取完整帧。滑动窗口内寻找帧头，
//! 随后按帧尾序列、长度前缀或固定长度收束；超限即丢弃部分帧
//! 并重新同步，每次丢弃递增错误计数。

use ox_telemetry::record_frame_discard;

/// 默认单帧上限（字节）。
pub const DEFAULT_MAX_FRAME: usize = 256;
/// 默认滑动窗口（字节）。
pub const DEFAULT_SLIDE_WINDOW: usize = 1024;

/// 帧边界模式。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameMode {
    /// 帧头/帧尾标记对，如 0xEE 0xEF ... 0x0D 0x0A。
    HeadTail { head: Vec<u8>, tail: Vec<u8> },
    /// 2 字节大端长度前缀 + 载荷 + 2 字节 CRC（应用帧布局）。
    LengthPrefixed,
    /// 固定长度帧。
    Fixed(usize),
}

/// 流式封包器。
#[derive(Debug)]
pub struct Framer {
    mode: FrameMode,
    buf: Vec<u8>,
    max_frame: usize,
    window: usize,
    discards: u64,
}

impl Framer {
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            buf: Vec::new(),
            max_frame: DEFAULT_MAX_FRAME,
            window: DEFAULT_SLIDE_WINDOW,
            discards: 0,
        }
    }

    pub fn with_limits(mode: FrameMode, max_frame: usize, window: usize) -> Self {
        Self {
            mode,
            buf: Vec::new(),
            max_frame,
            window,
            discards: 0,
        }
    }

    /// 累计丢弃次数。
    pub fn discards(&self) -> u64 {
        self.discards
    }

    /// 喂入字节，返回其中完整的帧（含边界标记本身）。
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        loop {
            match self.try_extract() {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        // 窗口超限：残留字节视为垃圾，丢弃并重新同步
        if self.buf.len() > self.window {
            self.buf.clear();
            self.discard();
        }
        frames
    }

    fn discard(&mut self) {
        self.discards += 1;
        record_frame_discard();
    }

    fn try_extract(&mut self) -> Option<Vec<u8>> {
        match self.mode.clone() {
            FrameMode::HeadTail { head, tail } => self.extract_head_tail(&head, &tail),
            FrameMode::LengthPrefixed => self.extract_length_prefixed(),
            FrameMode::Fixed(n) => self.extract_fixed(n),
        }
    }

    fn extract_head_tail(&mut self, head: &[u8], tail: &[u8]) -> Option<Vec<u8>> {
        let start = find_subsequence(&self.buf, head)?;
        if start > 0 {
            // 帧头前的字节无法归属任何帧
            self.buf.drain(..start);
            self.discard();
        }
        let body_from = head.len();
        match find_subsequence(&self.buf[body_from..], tail) {
            Some(rel) => {
                let end = body_from + rel + tail.len();
                if end > self.max_frame {
                    self.buf.drain(..end);
                    self.discard();
                    return None;
                }
                let frame = self.buf.drain(..end).collect();
                Some(frame)
            }
            None => {
                // 尚未收到帧尾；进行中的帧超限则放弃这个帧头
                if self.buf.len() > self.max_frame {
                    self.buf.drain(..head.len());
                    self.discard();
                }
                None
            }
        }
    }

    fn extract_length_prefixed(&mut self) -> Option<Vec<u8>> {
        if self.buf.len() < 2 {
            return None;
        }
        let declared = usize::from(u16::from_be_bytes([self.buf[0], self.buf[1]]));
        let total = 2 + declared + 2;
        if declared > self.max_frame {
            // 长度字段不可信，滑动一个字节重新同步
            self.buf.drain(..1);
            self.discard();
            return self.extract_length_prefixed();
        }
        if self.buf.len() < total {
            return None;
        }
        Some(self.buf.drain(..total).collect())
    }

    fn extract_fixed(&mut self, n: usize) -> Option<Vec<u8>> {
        if n == 0 || self.buf.len() < n {
            return None;
        }
        Some(self.buf.drain(..n).collect())
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
