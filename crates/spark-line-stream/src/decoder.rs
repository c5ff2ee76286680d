use std::fmt;

use encoding_rs::{CoderResult, Decoder, DecoderResult, Encoding};

use crate::{
    chunk::Chunk,
    config::LineStreamConfig,
    error::{DecodeError, Result},
};

/// 将数据块增量解码为文本片段。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 字节源按任意边界切块，多字节序列（UTF-8 的 2~4 字节字符）可能被拆到两个块中；
///   解码器必须把未完成的序列留在内部，等下一块到达后再拼接解码，不能产生乱码或丢字。
///
/// ## 逻辑 (How)
/// - 内部持有 `encoding_rs::Decoder`，在第一个字节块到达时惰性创建；
/// - `Chunk::Bytes` 以 `last = false` 喂入，未完成的尾部字节由 `encoding_rs` 自行缓存；
/// - `Chunk::Text` 到达时先以 `last = true` 冲刷挂起的半个序列，再追加文本，
///   之后的字节块使用全新的解码器状态；
/// - `finish` 以 `last = true` 冲刷并丢弃解码器状态，多次调用只有第一次产生输出。
///
/// ## 契约 (What)
/// - `feed` 返回本次可确定的文本，可能为空串；
/// - 宽松模式下非法序列替换为 U+FFFD；严格模式下返回 [`DecodeError::Malformed`]，
///   此后解码器状态被丢弃；
/// - 只有流首（第一个非空块之前）创建的解码器才会按 `strip_bom` 剥离 BOM。
pub struct ChunkDecoder {
    encoding: &'static Encoding,
    strict: bool,
    strip_bom: bool,
    inner: Option<Decoder>,
    stream_started: bool,
    consumed: u64,
    finished: bool,
}

impl ChunkDecoder {
    /// 按配置构造解码器；编码标签非法时返回配置错误。
    pub fn new(config: &LineStreamConfig) -> Result<Self> {
        Ok(Self::with_encoding(config.resolve_encoding()?)
            .strict(config.strict())
            .strip_bom(config.strip_bom()))
    }

    /// 以指定编码构造宽松模式解码器。
    pub fn with_encoding(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            strict: false,
            strip_bom: false,
            inner: None,
            stream_started: false,
            consumed: 0,
            finished: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn strip_bom(mut self, strip_bom: bool) -> Self {
        self.strip_bom = strip_bom;
        self
    }

    /// 当前是否处于多字节序列解码过程中（即已创建解码器状态且尚未冲刷）。
    pub fn is_decoding(&self) -> bool {
        self.inner.is_some()
    }

    /// 喂入一个数据块，返回本次可确定的文本。
    pub fn feed(&mut self, chunk: &Chunk) -> Result<String> {
        match chunk {
            Chunk::Bytes(bytes) => {
                let encoding = self.encoding;
                let remove_bom = self.strip_bom && !self.stream_started;
                let decoder = self.inner.get_or_insert_with(|| {
                    if remove_bom {
                        encoding.new_decoder_with_bom_removal()
                    } else {
                        encoding.new_decoder_without_bom_handling()
                    }
                });
                if !bytes.is_empty() {
                    self.stream_started = true;
                }
                let decoded = decode(
                    decoder,
                    bytes,
                    false,
                    self.strict,
                    &mut self.consumed,
                    self.encoding,
                );
                if decoded.is_err() {
                    self.inner = None;
                }
                Ok(decoded?)
            }
            Chunk::Text(text) => {
                let at_stream_start = !self.stream_started;
                let mut out = self.flush()?;
                let text = if self.strip_bom && at_stream_start {
                    text.strip_prefix('\u{feff}').unwrap_or(text)
                } else {
                    text.as_str()
                };
                if !text.is_empty() {
                    self.stream_started = true;
                }
                out.push_str(text);
                Ok(out)
            }
        }
    }

    /// 标记输入结束并冲刷挂起的字节；仅第一次调用会产生输出。
    pub fn finish(&mut self) -> Result<String> {
        if self.finished {
            return Ok(String::new());
        }
        self.finished = true;
        self.flush()
    }

    fn flush(&mut self) -> Result<String> {
        match self.inner.take() {
            Some(mut decoder) => Ok(decode(
                &mut decoder,
                &[],
                true,
                self.strict,
                &mut self.consumed,
                self.encoding,
            )?),
            None => Ok(String::new()),
        }
    }
}

impl fmt::Debug for ChunkDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkDecoder")
            .field("encoding", &self.encoding.name())
            .field("strict", &self.strict)
            .field("decoding", &self.inner.is_some())
            .field("consumed", &self.consumed)
            .field("finished", &self.finished)
            .finish()
    }
}

fn decode(
    decoder: &mut Decoder,
    mut src: &[u8],
    last: bool,
    strict: bool,
    consumed: &mut u64,
    encoding: &'static Encoding,
) -> std::result::Result<String, DecodeError> {
    let mut out = String::new();
    loop {
        if strict {
            let needed = decoder
                .max_utf8_buffer_length_without_replacement(src.len())
                .unwrap_or(src.len());
            out.reserve(needed.max(16));
            let (result, read) = decoder.decode_to_string_without_replacement(src, &mut out, last);
            match result {
                DecoderResult::InputEmpty => {
                    *consumed += read as u64;
                    return Ok(out);
                }
                DecoderResult::OutputFull => {
                    *consumed += read as u64;
                    src = &src[read..];
                }
                DecoderResult::Malformed(bad, after) => {
                    // 非法序列可能始于更早的数据块，起点按全流累计偏移回退。
                    let offset = (*consumed + read as u64)
                        .saturating_sub(u64::from(bad) + u64::from(after));
                    return Err(DecodeError::Malformed {
                        encoding: encoding.name(),
                        offset,
                        len: bad,
                    });
                }
            }
        } else {
            let needed = decoder.max_utf8_buffer_length(src.len()).unwrap_or(src.len());
            out.reserve(needed.max(16));
            let (result, read, _replaced) = decoder.decode_to_string(src, &mut out, last);
            *consumed += read as u64;
            match result {
                CoderResult::InputEmpty => return Ok(out),
                CoderResult::OutputFull => src = &src[read..],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn bytes(data: &'static [u8]) -> Chunk {
        Chunk::Bytes(Bytes::from_static(data))
    }

    fn utf8() -> ChunkDecoder {
        ChunkDecoder::with_encoding(encoding_rs::UTF_8)
    }

    #[test]
    fn multibyte_sequence_split_across_chunks() {
        // "é" = C3 A9，"中" = E4 B8 AD，"😀" = F0 9F 98 80
        let mut decoder = utf8();
        let mut text = String::new();
        for part in [
            &b"caf\xC3"[..],
            b"\xA9 \xE4",
            b"\xB8",
            b"\xAD \xF0\x9F",
            b"\x98",
            b"\x80!",
        ] {
            text.push_str(&decoder.feed(&Chunk::from(part.to_vec())).expect("feed"));
        }
        text.push_str(&decoder.finish().expect("finish"));
        assert_eq!(text, "café 中 😀!");
    }

    #[test]
    fn pending_bytes_are_withheld_until_complete() {
        let mut decoder = utf8();
        assert_eq!(decoder.feed(&bytes(b"a\xE4\xB8")).expect("feed"), "a");
        assert!(decoder.is_decoding());
        assert_eq!(decoder.feed(&bytes(b"\xAD")).expect("feed"), "中");
    }

    #[test]
    fn text_chunk_flushes_partial_sequence_and_restarts() {
        let mut decoder = utf8();
        assert_eq!(decoder.feed(&bytes(b"x\xC3")).expect("feed"), "x");
        let out = decoder.feed(&Chunk::from("text")).expect("feed text");
        assert_eq!(out, "\u{fffd}text");
        assert!(!decoder.is_decoding());
        // 新状态下孤立的续字节同样被替换，而非与之前的 0xC3 拼接。
        assert_eq!(decoder.feed(&bytes(b"\xA9")).expect("feed"), "\u{fffd}");
    }

    #[test]
    fn finish_flushes_once() {
        let mut decoder = utf8();
        decoder.feed(&bytes(b"\xF0\x9F")).expect("feed");
        assert_eq!(decoder.finish().expect("finish"), "\u{fffd}");
        assert_eq!(decoder.finish().expect("second finish"), "");
    }

    #[test]
    fn latin_family_bytes_decode_through_configured_encoding() {
        let config = LineStreamConfig::new().with_encoding("iso-8859-1");
        let mut decoder = ChunkDecoder::new(&config).expect("decoder");
        assert_eq!(
            decoder.feed(&bytes(b"na\xEFve caf\xE9")).expect("feed"),
            "naïve café"
        );
    }

    #[test]
    fn strict_mode_reports_malformed_sequence_offset() {
        let mut decoder = utf8().strict(true);
        assert_eq!(decoder.feed(&bytes(b"ok\n")).expect("feed"), "ok\n");
        let err = decoder.feed(&bytes(b"ab\xFFcd")).expect_err("malformed");
        match err {
            crate::error::LineStreamError::Decode(DecodeError::Malformed {
                encoding,
                offset,
                len,
            }) => {
                assert_eq!(encoding, "UTF-8");
                assert_eq!(offset, 5);
                assert_eq!(len, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!decoder.is_decoding());
    }

    #[test]
    fn strict_offset_points_at_sequence_started_in_previous_chunk() {
        let mut decoder = utf8().strict(true);
        // 0xE4 开启一个三字节序列，下一块的 'A' 让它失效。
        assert_eq!(decoder.feed(&bytes(b"ab\xE4")).expect("feed"), "ab");
        let err = decoder.feed(&bytes(b"A")).expect_err("malformed");
        assert!(matches!(
            err,
            crate::error::LineStreamError::Decode(DecodeError::Malformed {
                offset: 2,
                len: 1,
                ..
            })
        ));
    }

    #[test]
    fn bom_is_stripped_only_at_stream_start() {
        let mut decoder = utf8().strip_bom(true);
        assert_eq!(decoder.feed(&bytes(b"\xEF\xBB\xBFa")).expect("feed"), "a");
        assert_eq!(
            decoder.feed(&bytes(b"\xEF\xBB\xBFb")).expect("feed"),
            "\u{feff}b"
        );

        let mut keep = utf8();
        assert_eq!(keep.feed(&bytes(b"\xEF\xBB\xBFa")).expect("feed"), "\u{feff}a");
    }
}
