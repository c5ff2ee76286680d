#![doc = r#"
# spark-line-stream

## 设计动机（Why）
- **定位**：把一个分片到达的字节流（文件、套接字、上游流、推送的报文体）增量解码为文本，
  再按 `\r\n`、`\n`、`\r` 三类终止符切成行，按原文顺序逐行交付；
- **架构角色**：纯算法（解码、切分、跨块累加）与驱动外壳（拉取式迭代器、推送式转换器）分层，
  算法部分不依赖任何运行时，外壳对接 `futures` 与 Tokio；
- **设计理念**：消费者决定节奏。只有在没有完整行可交付时才向字节源要下一个块，
  内存只与“当前未完成的行”成正比。

## 核心契约（What）
- **拉取式**：[`LineStream`] 同时提供 `next_line`/`stop`/`stop_with_error` 与
  `futures::Stream` 两种用法；无论以何种方式结束，字节源恰好释放一次；
- **推送式**：[`LineTransform::spawn`] 返回写入端与 [`LineReader`]，两侧均有背压；
  [`pipe_lines`] 把上游字节流经转换器送入任意 `futures::Sink<String>`；
- **错误**：[`LineStreamError`] 携带稳定错误码，字节源与解码错误是致命的，只交付一次；
- **切分规则**：至少产出一行；以终止符结尾的输入产出一个尾随空行；
  被拆成两块的 `\r\n` 只算一个终止符。

## 实现策略（How）
- [`ChunkDecoder`] 基于 `encoding_rs` 做流式解码，跨块的多字节序列被暂存直到完整；
- [`split_lines`] 是惰性的纯函数切分器，[`LineAccumulator`] 复用它并暂扣挂起片段末尾的 `\r`；
- 所有清理路径汇入 [`CloseOnce`]，异步捕获的字节源错误经 [`FailureNotifier`] 在下一次拉取时交付。

## 风险与考量（Trade-offs）
- **行长度**：不限制单行长度，超长行会完整缓存在挂起片段中；
- **Tokio 依赖**：`runtime-tokio` 特性关闭后仅保留纯算法与基于 `futures::Stream` 的拉取式迭代器。
"#]

mod accumulator;
mod chunk;
mod close;
mod config;
mod decoder;
mod error;
mod line_stream;
mod source;
mod splitter;
#[cfg(feature = "runtime-tokio")]
mod transform;

pub use accumulator::LineAccumulator;
pub use chunk::Chunk;
pub use close::{CloseOnce, FailureNotifier};
pub use config::LineStreamConfig;
pub use decoder::ChunkDecoder;
pub use error::{BoxError, DecodeError, LineStreamError, Result, SharedError};
#[cfg(feature = "runtime-tokio")]
pub use line_stream::lines_from_reader;
pub use line_stream::{LineStream, lines_from_stream};
#[cfg(feature = "runtime-tokio")]
pub use source::{ChannelSource, ReaderSource};
pub use source::{ByteSource, StreamSource};
pub use splitter::{SplitLines, split_lines};
#[cfg(feature = "runtime-tokio")]
pub use transform::{LineReader, LineTransform, pipe_lines};
