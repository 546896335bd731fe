//! The duplex byte channel carrying a streamed response body.
//!
//! One [`ByteStream`] is created per request attempt. The pipeline task holds
//! the write side and appends chunks as it produces them; the caller reads the
//! same bytes through [`ResponseBody`], which implements [`AsyncRead`]. Both
//! sides may run concurrently; the channel is unbounded and FIFO.
//!
//! Lifecycle:
//! - `write` makes bytes visible to a blocked reader. A zero-length write
//!   still fires the first-write hook but enqueues nothing.
//! - `close` marks the writer done; readers drain what is buffered and then
//!   observe EOF (a zero-byte read).
//! - `abort` discards everything buffered and fails every pending and future
//!   read with the abort cause. Abort wins over close.
//!
//! The first-write hook fires exactly once per channel, on the first `write`
//! (of any length) or `flush`. The request state uses it to freeze response
//! headers the moment body transmission begins.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::errors::TransportError;

pub(crate) type FirstWriteHook = Box<dyn Fn() + Send + Sync>;

struct ChannelState {
    /// Buffered chunks in write order. The front chunk is drained in place.
    queue: VecDeque<Bytes>,
    /// Writer side is done; readers drain and then see EOF.
    closed: bool,
    /// Abort cause. Once set, reads fail and buffered data is gone.
    aborted: Option<TransportError>,
    /// Waker of a reader parked on an empty queue.
    read_waker: Option<Waker>,
    /// Armed until the first write or flush.
    hook: Option<FirstWriteHook>,
}

/// Write half of the response body channel. Cloneable; all clones share the
/// same underlying buffer.
#[derive(Clone)]
pub struct ByteStream {
    inner: Arc<Mutex<ChannelState>>,
}

impl ByteStream {
    pub(crate) fn new(hook: FirstWriteHook) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelState {
                queue: VecDeque::new(),
                closed: false,
                aborted: None,
                read_waker: None,
                hook: Some(hook),
            })),
        }
    }

    /// Append `data` to the stream. An empty slice still fires the
    /// first-write hook. Fails once the channel is closed or aborted.
    pub fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let (hook, waker) = {
            let mut st = self.inner.lock().unwrap();
            if let Some(cause) = &st.aborted {
                return Err(cause.clone());
            }
            if st.closed {
                return Err(TransportError::BodyClosed);
            }
            let hook = st.hook.take();
            if !data.is_empty() {
                // Copy: the caller may reuse its buffer after we return.
                st.queue.push_back(Bytes::copy_from_slice(data));
            }
            (hook, st.read_waker.take())
        };
        // Hook and wake run outside the lock so neither can deadlock against
        // a reader or against response completion taking other locks.
        if let Some(hook) = hook {
            hook();
        }
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Fire the first-write hook if no write has happened yet. Data is never
    /// buffered by this channel beyond the queue, so there is nothing else to
    /// drain.
    pub fn flush(&self) -> Result<(), TransportError> {
        let hook = {
            let mut st = self.inner.lock().unwrap();
            if let Some(cause) = &st.aborted {
                return Err(cause.clone());
            }
            if st.closed {
                return Err(TransportError::BodyClosed);
            }
            st.hook.take()
        };
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }

    /// Disarm the first-write hook without firing it. Used when response
    /// completion happens through another path; guarantees the hook's side
    /// effect still occurs at most once.
    pub(crate) fn disarm_first_write_hook(&self) -> Option<FirstWriteHook> {
        self.inner.lock().unwrap().hook.take()
    }

    /// Mark the writer side done. Buffered data remains readable.
    pub(crate) fn close(&self) {
        let waker = {
            let mut st = self.inner.lock().unwrap();
            st.closed = true;
            st.read_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Abort the channel. Pending data is discarded; every pending and
    /// subsequent read fails with `cause`. The first abort cause sticks.
    pub(crate) fn abort(&self, cause: TransportError) {
        let waker = {
            let mut st = self.inner.lock().unwrap();
            if st.aborted.is_none() {
                st.aborted = Some(cause);
            }
            st.queue.clear();
            st.closed = true;
            st.read_waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn reader(&self) -> ResponseBody {
        ResponseBody { chan: self.clone() }
    }
}

/// Read half of the response body channel. Bytes may still be arriving from
/// the pipeline while this is being read.
pub struct ResponseBody {
    chan: ByteStream,
}

impl ResponseBody {
    /// Drain the whole body into one buffer. Suspends until the writer side
    /// closes the channel.
    pub async fn bytes(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Drain the whole body and interpret it as UTF-8.
    pub async fn text(self) -> io::Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl AsyncRead for ResponseBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut st = self.chan.inner.lock().unwrap();

        // Abort wins over buffered data and over a completed close.
        if let Some(cause) = &st.aborted {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                cause.clone(),
            )));
        }

        if st.queue.is_empty() {
            if st.closed {
                // Graceful EOF.
                return Poll::Ready(Ok(()));
            }
            // The waker is registered under the same lock writers take, so a
            // concurrently arriving write cannot slip past unnoticed.
            st.read_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        while buf.remaining() > 0 {
            let Some(front) = st.queue.front_mut() else {
                break;
            };
            let n = front.len().min(buf.remaining());
            buf.put_slice(&front[..n]);
            front.advance(n);
            if front.is_empty() {
                st.queue.pop_front();
            }
        }
        Poll::Ready(Ok(()))
    }
}
