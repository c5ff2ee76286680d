use encoding_rs::Encoding;
use serde::Deserialize;

use crate::error::{LineStreamError, Result};

const DEFAULT_ENCODING: &str = "utf-8";
const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_HANDOFF_CAPACITY: usize = 1;

/// 行解码管线的配置。
///
/// # 契约说明（What）
/// - `encoding`：WHATWG 编码标签，例如 `utf-8`、`latin1`、`windows-1252`、`ascii`，默认 `utf-8`；
/// - `strict`：为 `true` 时非法字节序列视为致命解码错误，否则替换为 U+FFFD；
/// - `strip_bom`：是否剥离流首的 BOM；
/// - `read_buffer_size`：`ReaderSource` 单次读取的缓冲大小，必须大于 0；
/// - `handoff_capacity`：推送式转换器内部交接通道的容量，必须大于 0，默认 1（单槽交接）。
///
/// 可通过 `with_*` 链式构造，也可以从 TOML 片段反序列化，未出现的字段取默认值。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LineStreamConfig {
    encoding: String,
    strict: bool,
    strip_bom: bool,
    read_buffer_size: usize,
    handoff_capacity: usize,
}

impl Default for LineStreamConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LineStreamConfig {
    /// 创建默认配置。
    pub fn new() -> Self {
        Self {
            encoding: DEFAULT_ENCODING.to_owned(),
            strict: false,
            strip_bom: false,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            handoff_capacity: DEFAULT_HANDOFF_CAPACITY,
        }
    }

    /// 从 TOML 文本解析配置并校验。
    ///
    /// ```toml
    /// encoding = "latin1"
    /// strict = true
    /// handoff_capacity = 4
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|err| LineStreamError::Config(format!("failed to parse TOML: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_encoding(mut self, label: impl Into<String>) -> Self {
        self.encoding = label.into();
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_strip_bom(mut self, strip_bom: bool) -> Self {
        self.strip_bom = strip_bom;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_handoff_capacity(mut self, capacity: usize) -> Self {
        self.handoff_capacity = capacity;
        self
    }

    /// 配置的编码标签（原样返回，未做归一化）。
    pub fn encoding_label(&self) -> &str {
        &self.encoding
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    pub fn strip_bom(&self) -> bool {
        self.strip_bom
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn handoff_capacity(&self) -> usize {
        self.handoff_capacity
    }

    /// 将编码标签解析为 `encoding_rs` 的编码实例。
    pub fn resolve_encoding(&self) -> Result<&'static Encoding> {
        Encoding::for_label(self.encoding.trim().as_bytes()).ok_or_else(|| {
            LineStreamError::Config(format!("unknown encoding label `{}`", self.encoding))
        })
    }

    /// 校验所有字段，失败时返回 [`LineStreamError::Config`]。
    pub fn validate(&self) -> Result<()> {
        self.resolve_encoding()?;
        if self.read_buffer_size == 0 {
            return Err(LineStreamError::Config(
                "read_buffer_size must be greater than zero".to_owned(),
            ));
        }
        if self.handoff_capacity == 0 {
            return Err(LineStreamError::Config(
                "handoff_capacity must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}
