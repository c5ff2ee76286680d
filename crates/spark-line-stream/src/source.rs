//! # source 模块说明
//!
//! ## 角色定位（Why）
//! - 行迭代器只依赖“可读字节源”这一能力：按序交付数据块、以 `None` 表示结束、以错误表示失败，
//!   并支持幂等的释放操作；文件、套接字、上游流都通过适配器接入；
//! - 迭代器是字节源唯一的所有者，由它在自然结束、提前停止或出错时调用一次 `release`。
//!
//! ## 提供的适配器（What）
//! - [`StreamSource`]：任意 `futures::Stream<Item = Result<impl Into<Chunk>, E>>`；
//! - [`ReaderSource`]：任意 `tokio::io::AsyncRead`（需启用 `runtime-tokio`）；
//! - [`ChannelSource`]：推送式转换器内部的合成可读端（需启用 `runtime-tokio`）。

use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Stream, ready};

use crate::{
    chunk::Chunk,
    error::{BoxError, SharedError},
};

/// 可读字节源。
///
/// # 契约说明（What）
/// - `poll_chunk`：返回下一个数据块；`Ready(None)` 表示自然结束，`Ready(Some(Err(_)))` 表示失败；
///   只在消费者需要更多数据时被调用，实现不应预读超过一个块；
/// - `release`：释放底层资源，必须幂等；释放后 `poll_chunk` 应返回 `Ready(None)`。
pub trait ByteSource: Send + Unpin {
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Chunk, SharedError>>>;

    fn release(&mut self);
}

impl<S> ByteSource for Box<S>
where
    S: ByteSource + ?Sized,
{
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Chunk, SharedError>>> {
        (**self).poll_chunk(cx)
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// 以 `futures::Stream` 为底层的字节源；释放即丢弃底层流。
pub struct StreamSource<S> {
    inner: Option<Pin<Box<S>>>,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: Some(Box::pin(stream)),
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }
}

impl<S> fmt::Debug for StreamSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("released", &self.is_released())
            .finish()
    }
}

impl<S, C, E> ByteSource for StreamSource<S>
where
    S: Stream<Item = Result<C, E>> + Send,
    C: Into<Chunk>,
    E: Into<BoxError>,
{
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Chunk, SharedError>>> {
        let Some(stream) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        let item = ready!(stream.as_mut().poll_next(cx));
        Poll::Ready(item.map(|result| result.map(Into::into).map_err(SharedError::new)))
    }

    fn release(&mut self) {
        self.inner = None;
    }
}

#[cfg(feature = "runtime-tokio")]
pub use self::tokio_sources::{ChannelSource, ReaderSource};

#[cfg(feature = "runtime-tokio")]
mod tokio_sources {
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };

    use bytes::BytesMut;
    use futures::ready;
    use tokio::{
        io::{AsyncRead, ReadBuf},
        sync::mpsc,
    };

    use super::ByteSource;
    use crate::{chunk::Chunk, error::SharedError};

    /// 以 `tokio::io::AsyncRead` 为底层的字节源，每次读取至多 `buffer_size` 字节。
    #[derive(Debug)]
    pub struct ReaderSource<R> {
        reader: Option<R>,
        buffer: BytesMut,
        buffer_size: usize,
    }

    impl<R> ReaderSource<R> {
        /// `buffer_size` 为 0 时按 1 处理。
        pub fn new(reader: R, buffer_size: usize) -> Self {
            let buffer_size = buffer_size.max(1);
            Self {
                reader: Some(reader),
                buffer: BytesMut::with_capacity(buffer_size),
                buffer_size,
            }
        }

        pub fn is_released(&self) -> bool {
            self.reader.is_none()
        }
    }

    impl<R> ByteSource for ReaderSource<R>
    where
        R: AsyncRead + Send + Unpin,
    {
        fn poll_chunk(
            &mut self,
            cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Chunk, SharedError>>> {
            let Some(reader) = self.reader.as_mut() else {
                return Poll::Ready(None);
            };
            self.buffer.clear();
            self.buffer.resize(self.buffer_size, 0);
            let mut read_buf = ReadBuf::new(&mut self.buffer[..]);
            if let Err(err) = ready!(Pin::new(reader).poll_read(cx, &mut read_buf)) {
                return Poll::Ready(Some(Err(SharedError::from(err))));
            }
            let filled = read_buf.filled().len();
            if filled == 0 {
                return Poll::Ready(None);
            }
            self.buffer.truncate(filled);
            Poll::Ready(Some(Ok(Chunk::Bytes(self.buffer.split().freeze()))))
        }

        fn release(&mut self) {
            self.reader = None;
        }
    }

    /// 推送式转换器内部的合成可读端：写入侧通过有界通道交付数据块。
    ///
    /// 释放时关闭通道，写入侧随后的发送立即失败，不会再有数据块被接收。
    #[derive(Debug)]
    pub struct ChannelSource {
        receiver: Option<mpsc::Receiver<Chunk>>,
    }

    impl ChannelSource {
        pub fn new(receiver: mpsc::Receiver<Chunk>) -> Self {
            Self {
                receiver: Some(receiver),
            }
        }
    }

    impl ByteSource for ChannelSource {
        fn poll_chunk(
            &mut self,
            cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Chunk, SharedError>>> {
            match self.receiver.as_mut() {
                Some(receiver) => receiver.poll_recv(cx).map(|chunk| chunk.map(Ok)),
                None => Poll::Ready(None),
            }
        }

        fn release(&mut self) {
            if let Some(mut receiver) = self.receiver.take() {
                receiver.close();
            }
        }
    }
}
