use bytes::Bytes;

/// 字节源单次交付的数据单元。
///
/// # 契约说明（What）
/// - `Bytes`：原始字节，交由增量解码器按配置的编码解释；
/// - `Text`：上游已经解码好的文本片段，直接进入累加器；
/// - 数据块不可变，解码器只复制需要跨块保留的部分（未完成的多字节序列）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    Bytes(Bytes),
    Text(String),
}

impl Chunk {
    /// 数据块的原始长度（字节）。
    pub fn len(&self) -> usize {
        match self {
            Chunk::Bytes(bytes) => bytes.len(),
            Chunk::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Bytes> for Chunk {
    fn from(value: Bytes) -> Self {
        Chunk::Bytes(value)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(value: Vec<u8>) -> Self {
        Chunk::Bytes(Bytes::from(value))
    }
}

impl From<&'static [u8]> for Chunk {
    fn from(value: &'static [u8]) -> Self {
        Chunk::Bytes(Bytes::from_static(value))
    }
}

impl From<String> for Chunk {
    fn from(value: String) -> Self {
        Chunk::Text(value)
    }
}

impl From<&str> for Chunk {
    fn from(value: &str) -> Self {
        Chunk::Text(value.to_owned())
    }
}
