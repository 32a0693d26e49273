//! Connection and body timeouts

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;
use sluice_core::BoxError;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

fn poll_timer(
    timer: &mut Option<Pin<Box<Sleep>>>,
    limit: Option<Duration>,
    cx: &mut Context<'_>,
    what: &'static str,
) -> io::Result<()> {
    let Some(limit) = limit else {
        return Ok(());
    };
    let timer = timer.get_or_insert_with(|| Box::pin(sleep(limit)));
    match timer.as_mut().poll(cx) {
        Poll::Ready(()) => Err(io::Error::new(io::ErrorKind::TimedOut, what)),
        Poll::Pending => Ok(()),
    }
}

/// Count of requests in flight on one connection
#[derive(Debug, Clone, Default)]
pub struct ActiveRequests {
    count: Arc<AtomicUsize>,
}

impl ActiveRequests {
    /// Create an idle counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a request active until the guard drops
    pub fn enter(&self) -> ActiveGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        ActiveGuard {
            count: Arc::clone(&self.count),
        }
    }

    /// True while any guard is alive
    pub fn is_active(&self) -> bool {
        self.count.load(Ordering::Acquire) > 0
    }
}

/// Keeps a request counted in [`ActiveRequests`]
#[derive(Debug)]
pub struct ActiveGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Response body holding its request's [`ActiveGuard`] until dropped
#[pin_project]
#[derive(Debug)]
pub struct TrackedBody<B> {
    #[pin]
    inner: B,
    _guard: ActiveGuard,
}

impl<B> TrackedBody<B> {
    /// Tie `guard` to the lifetime of `inner`
    pub fn new(inner: B, guard: ActiveGuard) -> Self {
        Self {
            inner,
            _guard: guard,
        }
    }
}

impl<B: Body> Body for TrackedBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<B::Data>, B::Error>>> {
        self.project().inner.poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Stream wrapper failing reads or writes that stay pending too long
///
/// A pending read covers the wait for the next request on a kept-alive
/// connection, so the read limit acts as the idle timeout. With
/// [`TimeoutIo::pause_reads_while`] the read limit is suspended while
/// requests are in flight.
#[derive(Debug)]
pub struct TimeoutIo<S> {
    inner: S,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    read_timer: Option<Pin<Box<Sleep>>>,
    write_timer: Option<Pin<Box<Sleep>>>,
    active: Option<ActiveRequests>,
}

impl<S> TimeoutIo<S> {
    /// Wrap `inner`; `None` disables a limit
    pub fn new(inner: S, read_timeout: Option<Duration>, write_timeout: Option<Duration>) -> Self {
        Self {
            inner,
            read_timeout,
            write_timeout,
            read_timer: None,
            write_timer: None,
            active: None,
        }
    }

    /// Suspend the read limit while `active` counts a request
    pub fn pause_reads_while(mut self, active: ActiveRequests) -> Self {
        self.active = Some(active);
        self
    }

    fn reads_paused(&self) -> bool {
        self.active.as_ref().is_some_and(ActiveRequests::is_active)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TimeoutIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending if this.reads_paused() => {
                this.read_timer = None;
                Poll::Pending
            }
            Poll::Pending => {
                poll_timer(&mut this.read_timer, this.read_timeout, cx, "connection idle timeout")?;
                Poll::Pending
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TimeoutIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.write_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => {
                poll_timer(&mut this.write_timer, this.write_timeout, cx, "write timeout")?;
                Poll::Pending
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => {
                this.write_timer = None;
                Poll::Ready(result)
            }
            Poll::Pending => {
                poll_timer(&mut this.write_timer, this.write_timeout, cx, "write timeout")?;
                Poll::Pending
            }
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Request body that fails once its read deadline passes
#[pin_project]
#[derive(Debug)]
pub struct ReadTimeoutBody<B> {
    #[pin]
    inner: B,
    #[pin]
    deadline: Option<Sleep>,
}

impl<B> ReadTimeoutBody<B> {
    /// Allow `timeout` from now to read the whole body; `None` disables it
    pub fn new(inner: B, timeout: Option<Duration>) -> Self {
        Self {
            inner,
            deadline: timeout.map(|t| tokio::time::sleep_until(Instant::now() + t)),
        }
    }
}

impl<B> Body for ReadTimeoutBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = self.project();
        if let Poll::Ready(frame) = this.inner.poll_frame(cx) {
            return Poll::Ready(frame.map(|f| f.map_err(Into::into)));
        }
        if let Some(deadline) = this.deadline.as_pin_mut() {
            ready!(deadline.poll(cx));
            let err = io::Error::new(io::ErrorKind::TimedOut, "request body read timed out");
            return Poll::Ready(Some(Err(err.into())));
        }
        Poll::Pending
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
