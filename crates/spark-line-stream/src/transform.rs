//! # transform 模块说明
//!
//! ## 角色定位（Why）
//! - 有些调用方手里没有“可拉取的字节源”，只能在数据到达时推送：例如协议处理器收到的报文体；
//! - 推送式转换器把 [`LineStream`] 包装成“写入字节、读出行”的双工对象，写入与读出两侧都有背压。
//!
//! ## 结构（How）
//! - 写入端 [`LineTransform`] 通过容量有界的 `mpsc` 通道把数据块交给内部的合成可读端 [`ChannelSource`]；
//! - 一个 Tokio 驱动任务在该可读端上运行 [`LineStream`]，并把每一行经第二条有界通道转交给 [`LineReader`]；
//! - 驱动任务的最终状态通过 `watch` 通道发布，写入端据此把致命错误返回给后续的 `write`/`finish`；
//! - 读取端被丢弃时转发静默停止，内部迭代器经 `stop()` 释放；`abort()` 与写入端的 `Drop` 走同一条取消路径。
//!
//! ## 并发模型（What）
//! - 每个转换器恰好一个驱动任务，单生产者单消费者，行按原文顺序交付；
//! - 两条通道的容量都取自 [`LineStreamConfig::handoff_capacity`]，默认 1：
//!   消费者不读时驱动任务停在转发上，写入随即在 `write` 处挂起。

use std::{
    pin::{Pin, pin},
    sync::Arc,
    task::{Context, Poll},
};

use futures::{Sink, SinkExt, Stream, StreamExt, stream::FusedStream};
use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, warn};

use crate::{
    chunk::Chunk,
    close::CloseOnce,
    config::LineStreamConfig,
    error::{BoxError, LineStreamError, Result},
    line_stream::LineStream,
    source::ChannelSource,
};

/// 驱动任务对外发布的状态。
#[derive(Clone, Debug)]
enum DriverStatus {
    Running,
    /// 输入结束且所有行都已转交。
    Finished,
    /// 读取端被丢弃或转换器被中止。
    Stopped,
    Failed(LineStreamError),
}

/// 推送式转换器的写入端。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 把“推送字节”的调用方接入拉取式的行迭代器，同时保持有界内存：
///   写入只在内部通道有空位时完成，读取端不消费时写入方自然被挂起。
///
/// ## 契约 (What)
/// - [`LineTransform::write`]：交付一个数据块；转换器已失败时返回该致命错误，
///   已结束、已中止或读取端已丢弃时返回 [`LineStreamError::Closed`]；
/// - [`LineTransform::finish`]：声明输入结束，等待驱动任务冲刷并转交剩余所有行后返回；
///   读取端必须被并发消费，否则在容量耗尽后 `finish` 会一直等待；
/// - [`LineTransform::abort`]：立即拆除转换器，读取端随后看到流结束；
/// - `Drop` 等价于 `abort`（已经 `finish` 时为空操作）。
#[derive(Debug)]
pub struct LineTransform {
    chunks: Option<mpsc::Sender<Chunk>>,
    status: watch::Receiver<DriverStatus>,
    cancel: Arc<Notify>,
    closed: CloseOnce,
}

impl LineTransform {
    /// 在当前 Tokio 运行时上启动驱动任务，返回写入端与读取端。
    ///
    /// 配置非法或当前线程不在 Tokio 运行时内时返回 [`LineStreamError::Config`]。
    pub fn spawn(config: &LineStreamConfig) -> Result<(LineTransform, LineReader)> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
            LineStreamError::Config(format!("line transform requires a tokio runtime: {err}"))
        })?;

        let capacity = config.handoff_capacity();
        let (chunk_tx, chunk_rx) = mpsc::channel(capacity);
        let (line_tx, line_rx) = mpsc::channel(capacity);
        let (status_tx, status_rx) = watch::channel(DriverStatus::Running);
        let cancel = Arc::new(Notify::new());

        let lines = LineStream::new(ChannelSource::new(chunk_rx), config)?;
        runtime.spawn(drive(lines, line_tx, status_tx, Arc::clone(&cancel)));
        debug!(capacity, "line transform spawned");

        Ok((
            LineTransform {
                chunks: Some(chunk_tx),
                status: status_rx,
                cancel,
                closed: CloseOnce::new(),
            },
            LineReader { lines: line_rx },
        ))
    }

    /// 写入一个数据块；内部通道已满时挂起直到有空位。
    pub async fn write(&mut self, chunk: impl Into<Chunk>) -> Result<()> {
        if let Some(error) = self.fatal() {
            return Err(error);
        }
        let Some(sender) = self.chunks.as_ref().filter(|_| !self.closed.is_closed()) else {
            return Err(LineStreamError::Closed);
        };
        if sender.send(chunk.into()).await.is_ok() {
            return Ok(());
        }
        // 可读端已释放：驱动任务正在收尾，等待其发布最终状态。
        match self.settled().await {
            DriverStatus::Failed(error) => Err(error),
            _ => Err(LineStreamError::Closed),
        }
    }

    /// 声明输入结束并等待所有剩余行转交完毕。
    pub async fn finish(&mut self) -> Result<()> {
        if let Some(error) = self.fatal() {
            return Err(error);
        }
        if !self.closed.close() {
            return Err(LineStreamError::Closed);
        }
        self.chunks = None;
        match self.settled().await {
            DriverStatus::Finished => Ok(()),
            DriverStatus::Failed(error) => Err(error),
            _ => Err(LineStreamError::Closed),
        }
    }

    /// 立即中止转换器；重复调用为空操作。
    ///
    /// 写入通道保持打开，驱动任务只会看到取消信号，挂起片段中未完成的行被丢弃。
    pub fn abort(&mut self) {
        if self.closed.close() {
            self.cancel.notify_one();
            debug!("line transform aborted");
        }
    }

    /// 驱动任务记录的致命错误（若有）。
    pub fn fatal(&self) -> Option<LineStreamError> {
        match &*self.status.borrow() {
            DriverStatus::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    async fn settled(&mut self) -> DriverStatus {
        match self
            .status
            .wait_for(|status| !matches!(status, DriverStatus::Running))
            .await
        {
            Ok(status) => (*status).clone(),
            // 驱动任务没有发布状态就退出了（运行时关闭）。
            Err(_) => DriverStatus::Stopped,
        }
    }
}

impl Drop for LineTransform {
    fn drop(&mut self) {
        self.abort();
    }
}

/// 推送式转换器的读取端，按原文顺序产出行。
///
/// 致命错误只交付一次，随后流结束。丢弃读取端会让驱动任务静默停止并释放内部迭代器。
#[derive(Debug)]
pub struct LineReader {
    lines: mpsc::Receiver<Result<String>>,
}

impl LineReader {
    /// 获取下一行；`Ok(None)` 表示结束。
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        self.lines.recv().await.transpose()
    }
}

impl Stream for LineReader {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().lines.poll_recv(cx)
    }
}

impl FusedStream for LineReader {
    fn is_terminated(&self) -> bool {
        self.lines.is_closed() && self.lines.is_empty()
    }
}

async fn drive(
    mut lines: LineStream<ChannelSource>,
    output: mpsc::Sender<Result<String>>,
    status: watch::Sender<DriverStatus>,
    cancel: Arc<Notify>,
) {
    let outcome = tokio::select! {
        biased;
        () = cancel.notified() => DriverStatus::Stopped,
        () = output.closed() => {
            debug!("line reader dropped, stopping transform");
            DriverStatus::Stopped
        }
        outcome = forward(&mut lines, &output, &status) => outcome,
    };
    lines.stop();
    debug!(?outcome, "line transform driver exited");
    status.send_if_modified(|current| {
        if matches!(current, DriverStatus::Running) {
            *current = outcome;
            true
        } else {
            false
        }
    });
}

async fn forward(
    lines: &mut LineStream<ChannelSource>,
    output: &mpsc::Sender<Result<String>>,
    status: &watch::Sender<DriverStatus>,
) -> DriverStatus {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if output.send(Ok(line)).await.is_err() {
                    return DriverStatus::Stopped;
                }
            }
            Ok(None) => return DriverStatus::Finished,
            Err(error) => {
                // 先发布，写入端才能在可读端释放后拿到同一个错误。
                status.send_replace(DriverStatus::Failed(error.clone()));
                let _ = output.send(Err(error.clone())).await;
                return DriverStatus::Failed(error);
            }
        }
    }
}

/// 把上游字节流经推送式转换器送入下游 Sink，返回成功写入 Sink 的行数。
///
/// # 契约说明（What）
/// - 上游失败：中止转换器，返回 [`LineStreamError::Source`]；
/// - 解码失败：返回 [`LineStreamError::Decode`]；
/// - Sink 拒收：中止转换器、丢弃上游，返回 [`LineStreamError::Sink`]；
/// - 正常结束时关闭 Sink。
pub async fn pipe_lines<St, C, E, Si>(
    source: St,
    config: &LineStreamConfig,
    sink: Si,
) -> Result<u64>
where
    St: Stream<Item = std::result::Result<C, E>>,
    C: Into<Chunk>,
    E: Into<BoxError>,
    Si: Sink<String>,
    Si::Error: Into<BoxError>,
{
    let (mut transform, mut reader) = LineTransform::spawn(config)?;
    let mut source = pin!(source);
    let mut sink = pin!(sink);

    let feed = async {
        while let Some(item) = source.next().await {
            match item {
                Ok(chunk) => transform.write(chunk).await?,
                Err(cause) => {
                    transform.abort();
                    return Err(LineStreamError::from_source(cause));
                }
            }
        }
        transform.finish().await
    };

    let drain = async {
        let mut delivered = 0u64;
        while let Some(line) = reader.next().await {
            sink.send(line?).await.map_err(LineStreamError::from_sink)?;
            delivered += 1;
        }
        sink.close().await.map_err(LineStreamError::from_sink)?;
        Ok::<_, LineStreamError>(delivered)
    };

    match futures::try_join!(feed, drain) {
        Ok(((), delivered)) => Ok(delivered),
        Err(error) => {
            warn!(code = error.code(), error = %error, "line pipeline failed");
            Err(error)
        }
    }
}
