use std::{
    collections::VecDeque,
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Stream, future::poll_fn, ready, stream::FusedStream};
use tracing::{debug, trace, warn};

use crate::{
    accumulator::LineAccumulator,
    chunk::Chunk,
    close::{CloseOnce, FailureNotifier, FailureSlot},
    config::LineStreamConfig,
    decoder::ChunkDecoder,
    error::{BoxError, LineStreamError, Result},
    source::{ByteSource, StreamSource},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// 仍在从字节源拉取数据块。
    Streaming,
    /// 字节源已耗尽，只剩队列中的最后几行。
    Draining,
    /// 已结束：自然结束、提前停止或出错。
    Done,
}

/// 拉取式的行迭代器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 消费者按自己的节奏逐行拉取；只有当队列中没有完整行时才向字节源请求下一个块，
///   因此字节源至多领先消费者一个块；
/// - 迭代器是字节源唯一的所有者，无论自然结束、提前停止、消费者出错还是字节源出错，
///   字节源都恰好被释放一次。
///
/// ## 逻辑 (How)
/// - 数据路径：数据块 → [`ChunkDecoder`] → [`LineAccumulator`] → 就绪队列；
/// - 每次拉取先检查通过 [`FailureNotifier`] 异步捕获的错误，再出队就绪行，最后才轮询字节源；
/// - 字节源结束时立即释放它，冲刷解码器与累加器，把剩余行放入队列后进入 `Draining`；
/// - 所有清理路径都经过同一个 [`CloseOnce`]，重复清理为空操作。
///
/// ## 契约 (What)
/// - [`LineStream::next_line`]：获取下一行，`Ok(None)` 表示结束；
/// - [`LineStream::stop`]：提前停止；
/// - [`LineStream::stop_with_error`]：因消费者自身错误而停止，原样交还该错误；
/// - 同时实现 `futures::Stream<Item = Result<String, LineStreamError>>`；
///   致命错误只交付一次，之后流即终止；
/// - `Drop` 同样走清理路径，因此 `break`、`?` 或 `return` 离开消费循环都会释放字节源。
pub struct LineStream<S: ByteSource> {
    source: S,
    decoder: ChunkDecoder,
    accumulator: LineAccumulator,
    ready: VecDeque<String>,
    failure: FailureSlot,
    release: CloseOnce,
    phase: Phase,
    chunks_pulled: u64,
    lines_yielded: u64,
}

impl<S: ByteSource> LineStream<S> {
    /// 按配置构造迭代器；配置非法时返回 [`LineStreamError::Config`]。
    pub fn new(source: S, config: &LineStreamConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_decoder(source, ChunkDecoder::new(config)?))
    }

    /// 使用调用方准备好的解码器构造迭代器。
    pub fn with_decoder(source: S, decoder: ChunkDecoder) -> Self {
        Self {
            source,
            decoder,
            accumulator: LineAccumulator::new(),
            ready: VecDeque::new(),
            failure: FailureSlot::new(),
            release: CloseOnce::new(),
            phase: Phase::Streaming,
            chunks_pulled: 0,
            lines_yielded: 0,
        }
    }

    /// 返回异步报告字节源失败的句柄。
    pub fn failure_notifier(&self) -> FailureNotifier {
        self.failure.notifier()
    }

    /// 字节源是否已经被释放。
    pub fn is_released(&self) -> bool {
        self.release.is_closed()
    }

    /// 获取下一行；`Ok(None)` 表示已经结束。
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        poll_fn(|cx| self.poll_next_line(cx)).await.transpose()
    }

    /// 提前停止：不再拉取，释放字节源，丢弃尚未交付的行。
    pub fn stop(&mut self) {
        self.terminate("stopped by consumer");
    }

    /// 因消费者自身的错误而停止：执行与 [`LineStream::stop`] 相同的清理，并原样交还该错误。
    pub fn stop_with_error<E>(&mut self, error: E) -> E {
        self.terminate("stopped by consumer error");
        error
    }

    /// 轮询下一行。
    pub fn poll_next_line(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<String>>> {
        loop {
            if self.phase == Phase::Done {
                return Poll::Ready(None);
            }
            if self.phase == Phase::Streaming
                && let Some(error) = self.failure.poll_take(cx)
            {
                return Poll::Ready(Some(Err(self.fail(error))));
            }
            if let Some(line) = self.ready.pop_front() {
                self.lines_yielded += 1;
                return Poll::Ready(Some(Ok(line)));
            }
            if self.phase == Phase::Draining {
                self.phase = Phase::Done;
                return Poll::Ready(None);
            }

            match ready!(self.source.poll_chunk(cx)) {
                Some(Ok(chunk)) => {
                    self.chunks_pulled += 1;
                    if let Err(error) = self.absorb(&chunk) {
                        return Poll::Ready(Some(Err(self.fail(error))));
                    }
                }
                Some(Err(cause)) => {
                    return Poll::Ready(Some(Err(self.fail(LineStreamError::Source(cause)))));
                }
                None => {
                    self.release_source("end of input");
                    if let Err(error) = self.flush() {
                        return Poll::Ready(Some(Err(self.fail(error))));
                    }
                    self.phase = Phase::Draining;
                }
            }
        }
    }

    fn absorb(&mut self, chunk: &Chunk) -> Result<()> {
        let text = self.decoder.feed(chunk)?;
        let queued = self.ready.len();
        self.accumulator.push(&text, &mut self.ready);
        trace!(
            chunk_len = chunk.len(),
            lines = self.ready.len() - queued,
            "chunk absorbed"
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let tail = self.decoder.finish()?;
        if !tail.is_empty() {
            self.accumulator.push(&tail, &mut self.ready);
        }
        self.accumulator.finish(&mut self.ready);
        Ok(())
    }

    fn fail(&mut self, error: LineStreamError) -> LineStreamError {
        warn!(
            code = error.code(),
            error = %error,
            chunks = self.chunks_pulled,
            lines = self.lines_yielded,
            "line stream failed"
        );
        self.terminate("fatal error");
        error
    }

    fn terminate(&mut self, reason: &'static str) {
        self.phase = Phase::Done;
        self.ready.clear();
        self.release_source(reason);
    }

    fn release_source(&mut self, reason: &'static str) {
        if self.release.close() {
            self.source.release();
            debug!(
                reason,
                chunks = self.chunks_pulled,
                lines = self.lines_yielded,
                "byte source released"
            );
        }
    }
}

impl<S: ByteSource> Stream for LineStream<S> {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_next_line(cx)
    }
}

impl<S: ByteSource> FusedStream for LineStream<S> {
    fn is_terminated(&self) -> bool {
        self.phase == Phase::Done
    }
}

impl<S: ByteSource> Drop for LineStream<S> {
    fn drop(&mut self) {
        self.release_source("dropped");
    }
}

impl<S: ByteSource> fmt::Debug for LineStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineStream")
            .field("phase", &self.phase)
            .field("queued", &self.ready.len())
            .field("pending", &self.accumulator.pending())
            .field("released", &self.is_released())
            .finish()
    }
}

/// 以任意 `futures::Stream` 为字节源构造行迭代器。
pub fn lines_from_stream<St, C, E>(
    stream: St,
    config: &LineStreamConfig,
) -> Result<LineStream<StreamSource<St>>>
where
    St: Stream<Item = std::result::Result<C, E>> + Send,
    C: Into<Chunk>,
    E: Into<BoxError>,
{
    LineStream::new(StreamSource::new(stream), config)
}

/// 以 `tokio::io::AsyncRead`（文件、套接字等）为字节源构造行迭代器。
#[cfg(feature = "runtime-tokio")]
pub fn lines_from_reader<R>(
    reader: R,
    config: &LineStreamConfig,
) -> Result<LineStream<crate::source::ReaderSource<R>>>
where
    R: tokio::io::AsyncRead + Send + Unpin,
{
    LineStream::new(
        crate::source::ReaderSource::new(reader, config.read_buffer_size()),
        config,
    )
}
