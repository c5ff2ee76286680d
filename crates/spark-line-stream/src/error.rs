//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义行解码管线对外暴露的错误语义：字节源失败、解码失败、下游拒收、写入已关闭的转换器、配置非法；
//! - 每个变体对应一个稳定错误码（`spark.line_stream.*`），便于日志与告警按码聚合。
//!
//! ## 设计要求（What）
//! - 所有错误实现 `thiserror::Error`，并且可 `Clone`：推送式转换器需要把同一个致命错误同时交给
//!   读取端与写入端，因此底层原因以 `Arc` 共享；
//! - 消费者自身的错误不会被包装，`LineStream::stop_with_error` 会原样交还。

use std::{error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

/// 任意可跨线程传播的错误的装箱形式。
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub(crate) const SOURCE_FAILED: &str = "spark.line_stream.source_failed";
pub(crate) const DECODE_FAILED: &str = "spark.line_stream.decode_failed";
pub(crate) const SINK_FAILED: &str = "spark.line_stream.sink_failed";
pub(crate) const CLOSED: &str = "spark.line_stream.closed";
pub(crate) const INVALID_CONFIG: &str = "spark.line_stream.invalid_config";

/// 以 `Arc` 共享的底层错误原因。
///
/// 字节源与下游 Sink 的错误类型由调用方决定，这里统一擦除为 trait object，
/// 同时保留 `downcast_ref` 能力，调用方仍可还原具体类型。
#[derive(Clone)]
pub struct SharedError(Arc<dyn StdError + Send + Sync + 'static>);

impl SharedError {
    /// 从任意错误构造共享原因。
    pub fn new<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self(Arc::from(error.into()))
    }

    /// 尝试还原为具体错误类型。
    pub fn downcast_ref<T>(&self) -> Option<&T>
    where
        T: StdError + 'static,
    {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for SharedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for SharedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

impl From<std::io::Error> for SharedError {
    fn from(value: std::io::Error) -> Self {
        Self::new(value)
    }
}

/// 增量解码阶段的错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 严格模式下遇到当前编码无法解释的字节序列。
    ///
    /// `offset` 为该序列在整个字节流中的起始偏移（按已喂入的字节累计），`len` 为非法序列长度。
    #[error("malformed {encoding} byte sequence of {len} byte(s) at stream offset {offset}")]
    Malformed {
        encoding: &'static str,
        offset: u64,
        len: u8,
    },
}

/// 行解码管线的统一错误域。
///
/// # 契约说明（What）
/// - `Source`：底层字节源失败，致命；触发字节源释放，且只向消费者交付一次；
/// - `Decode`：严格解码失败，致命，处理方式同 `Source`；
/// - `Sink`：推送式管线中下游 Sink 拒收某一行，转换器随即中止并释放上游；
/// - `Closed`：转换器已经停止或结束后仍尝试写入；
/// - `Config`：配置非法，例如未知编码标签、零容量或 TOML 解析失败。
#[derive(Clone, Debug, Error)]
pub enum LineStreamError {
    #[error("byte source failed: {0}")]
    Source(#[source] SharedError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("downstream sink rejected a line: {0}")]
    Sink(#[source] SharedError),

    #[error("line transform is closed")]
    Closed,

    #[error("invalid line stream configuration: {0}")]
    Config(String),
}

impl LineStreamError {
    /// 以任意错误构造字节源失败。
    pub fn from_source<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Source(SharedError::new(error))
    }

    /// 以任意错误构造下游拒收失败。
    pub fn from_sink<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Sink(SharedError::new(error))
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            LineStreamError::Source(_) => SOURCE_FAILED,
            LineStreamError::Decode(_) => DECODE_FAILED,
            LineStreamError::Sink(_) => SINK_FAILED,
            LineStreamError::Closed => CLOSED,
            LineStreamError::Config(_) => INVALID_CONFIG,
        }
    }

    /// 返回底层共享原因（仅 `Source`/`Sink` 携带）。
    pub fn cause(&self) -> Option<&SharedError> {
        match self {
            LineStreamError::Source(cause) | LineStreamError::Sink(cause) => Some(cause),
            _ => None,
        }
    }
}

pub type Result<T, E = LineStreamError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("Generate Error!")]
    struct GenerateError;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            LineStreamError::from_source(GenerateError).code(),
            "spark.line_stream.source_failed"
        );
        assert_eq!(
            LineStreamError::from_sink(GenerateError).code(),
            "spark.line_stream.sink_failed"
        );
        assert_eq!(LineStreamError::Closed.code(), "spark.line_stream.closed");
        assert_eq!(
            LineStreamError::Config("x".into()).code(),
            "spark.line_stream.invalid_config"
        );
        let decode = LineStreamError::from(DecodeError::Malformed {
            encoding: "UTF-8",
            offset: 3,
            len: 1,
        });
        assert_eq!(decode.code(), "spark.line_stream.decode_failed");
    }

    #[test]
    fn shared_cause_survives_clone_and_downcast() {
        let err = LineStreamError::from_source(GenerateError);
        let cloned = err.clone();
        let cause = cloned.cause().expect("source carries a cause");
        assert!(cause.downcast_ref::<GenerateError>().is_some());
        assert_eq!(err.to_string(), "byte source failed: Generate Error!");
    }
}
