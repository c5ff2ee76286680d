//! 集成测试共享的字节源与 Sink 替身。
//!
//! - `ScriptedSource`：按序号生成 `"line {i}\n"` 数据块，可设上限、可在指定序号失败，
//!   并记录被拉取的次数与 `release` 被调用的次数（不去重，用于断言“恰好一次”）；
//! - `StalledSource`：永远不交付数据，只用于验证异步报告的错误；
//! - `generated_chunks`/`failing_after`：供推送式管线使用的上游流；
//! - `TrackedStream`：包装上游流，被丢弃时计入 `Probe::releases`。

#![allow(dead_code)]

use std::{
    io,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{Stream, stream};
use spark_line_stream::{ByteSource, Chunk, SharedError};

pub const GENERATED_LINES: usize = 4096;
pub const SOURCE_ERROR: &str = "Generate Error!";
pub const SINK_ERROR: &str = "Sink Error!";

/// 字节源被观察到的行为。
#[derive(Clone, Debug, Default)]
pub struct Probe {
    pulls: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl Probe {
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ScriptedSource {
    next: usize,
    limit: Option<usize>,
    fail_at: Option<usize>,
    released: bool,
    probe: Probe,
}

impl ScriptedSource {
    /// 交付 `limit` 个数据块后自然结束。
    pub fn finite(limit: usize) -> (Self, Probe) {
        Self::build(Some(limit), None)
    }

    /// 永不结束。
    pub fn infinite() -> (Self, Probe) {
        Self::build(None, None)
    }

    /// 交付 `good` 个数据块后报告 [`SOURCE_ERROR`]。
    pub fn failing_after(good: usize) -> (Self, Probe) {
        Self::build(None, Some(good))
    }

    fn build(limit: Option<usize>, fail_at: Option<usize>) -> (Self, Probe) {
        let probe = Probe::default();
        let source = Self {
            next: 0,
            limit,
            fail_at,
            released: false,
            probe: probe.clone(),
        };
        (source, probe)
    }
}

impl ByteSource for ScriptedSource {
    fn poll_chunk(&mut self, _cx: &mut Context<'_>) -> Poll<Option<Result<Chunk, SharedError>>> {
        if self.released {
            return Poll::Ready(None);
        }
        self.probe.pulls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(self.next) {
            return Poll::Ready(Some(Err(SharedError::new(io::Error::other(SOURCE_ERROR)))));
        }
        if self.limit == Some(self.next) {
            return Poll::Ready(None);
        }
        let chunk = Chunk::Bytes(Bytes::from(format!("line {}\n", self.next)));
        self.next += 1;
        Poll::Ready(Some(Ok(chunk)))
    }

    fn release(&mut self) {
        self.released = true;
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// 先交付预置的数据块，随后永远挂起。
#[derive(Debug)]
pub struct StalledSource {
    chunks: Vec<Chunk>,
    probe: Probe,
}

impl StalledSource {
    pub fn new(chunks: Vec<Chunk>) -> (Self, Probe) {
        let probe = Probe::default();
        let mut chunks = chunks;
        chunks.reverse();
        (
            Self {
                chunks,
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl ByteSource for StalledSource {
    fn poll_chunk(&mut self, _cx: &mut Context<'_>) -> Poll<Option<Result<Chunk, SharedError>>> {
        self.probe.pulls.fetch_add(1, Ordering::SeqCst);
        match self.chunks.pop() {
            Some(chunk) => Poll::Ready(Some(Ok(chunk))),
            None => Poll::Pending,
        }
    }

    fn release(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// 记录上游流被拉取与被丢弃次数的包装器。
pub struct TrackedStream<S> {
    inner: Pin<Box<S>>,
    probe: Probe,
}

impl<S: Stream> TrackedStream<S> {
    pub fn new(stream: S) -> (Self, Probe) {
        let probe = Probe::default();
        (
            Self {
                inner: Box::pin(stream),
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl<S: Stream> Stream for TrackedStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = self.inner.as_mut().poll_next(cx);
        if item.is_ready() {
            self.probe.pulls.fetch_add(1, Ordering::SeqCst);
        }
        item
    }
}

impl<S> Drop for TrackedStream<S> {
    fn drop(&mut self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// 上游流：`count` 个 `"line {i}\n"` 字节块。
pub fn generated_chunks(count: usize) -> impl Stream<Item = io::Result<Bytes>> + Send {
    stream::iter((0..count).map(|i| Ok(Bytes::from(format!("line {i}\n")))))
}

/// 上游流：`good` 个字节块之后报告 [`SOURCE_ERROR`]。
pub fn failing_after(good: usize) -> impl Stream<Item = io::Result<Bytes>> + Send {
    stream::iter(
        (0..good)
            .map(|i| Ok(Bytes::from(format!("line {i}\n"))))
            .chain(std::iter::once(Err(io::Error::other(SOURCE_ERROR)))),
    )
}

/// 接收 `accept` 行之后以 [`SINK_ERROR`] 拒收的 Sink。
pub fn rejecting_sink(
    accept: usize,
) -> impl futures::Sink<String, Error = io::Error> {
    futures::sink::unfold(0usize, move |accepted, _line: String| async move {
        if accepted >= accept {
            Err(io::Error::other(SINK_ERROR))
        } else {
            Ok(accepted + 1)
        }
    })
}
