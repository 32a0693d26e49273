//! Replayable request/response bodies
//!
//! A [`ReplayableBody`] streams its source through untouched until someone
//! calls [`ReplayableBody::capture`]. Capturing drains the source into a pooled
//! buffer exactly once; from then on every read cycle replays the same bytes
//! from offset zero. Without a capture the body is single-shot: a second read
//! cycle yields nothing.

use crate::error::{BoxError, Error, Result};
use crate::pool::{BufferPool, PooledBuffer};
use bytes::{Buf, Bytes};
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use std::fmt;
use std::future::poll_fn;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

type Source = UnsyncBoxBody<Bytes, BoxError>;

/// Body that can be captured in memory and re-read
pub struct ReplayableBody {
    source: Option<Source>,
    pending: Bytes,
    captured: Option<PooledBuffer>,
    cursor: usize,
    closed: bool,
    len: Option<u64>,
}

impl ReplayableBody {
    /// Wrap a body with its declared length (`None` when unknown or chunked)
    pub fn new<B>(body: B, len: Option<u64>) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self {
            source: Some(body.map_err(Into::into).boxed_unsync()),
            pending: Bytes::new(),
            captured: None,
            cursor: 0,
            closed: false,
            len,
        }
    }

    /// Body with no content
    pub fn empty() -> Self {
        Self::new(Empty::<Bytes>::new(), Some(0))
    }

    /// Body over an in-memory chunk
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        Self::new(Full::new(bytes), Some(len))
    }

    /// Declared length, unchanged by reads or captures
    pub fn len(&self) -> Option<u64> {
        self.len
    }

    /// Whether the declared length is zero
    pub fn is_empty(&self) -> bool {
        self.len == Some(0)
    }

    /// Whether the content has been materialized
    pub fn is_captured(&self) -> bool {
        self.captured.is_some()
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Captured content, if any
    pub fn captured_bytes(&self) -> Option<&[u8]> {
        self.captured.as_deref().map(Vec::as_slice)
    }

    /// Drain the source into memory. Subsequent calls are no-ops.
    pub async fn capture(&mut self) -> Result<()> {
        if self.captured.is_some() {
            return Ok(());
        }
        let Some(mut source) = self.source.take() else {
            return Ok(());
        };

        let mut buf = BufferPool::global().acquire();
        buf.extend_from_slice(&self.pending);
        self.pending = Bytes::new();

        while let Some(frame) = source.frame().await {
            let frame = frame.map_err(|e| Error::Body(e.to_string()))?;
            if let Ok(data) = frame.into_data() {
                buf.extend_from_slice(&data);
            }
        }
        drop(source);

        self.captured = Some(buf);
        self.cursor = 0;
        Ok(())
    }

    /// Read into `dst`, returning the number of bytes copied. `Ok(0)` marks the
    /// end of a read cycle; a captured body rewinds for the next cycle.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        if let Some(buf) = &self.captured {
            let remaining = buf.len().saturating_sub(self.cursor);
            if remaining == 0 {
                self.cursor = 0;
                return Ok(0);
            }
            let n = remaining.min(dst.len());
            dst[..n].copy_from_slice(&buf[self.cursor..self.cursor + n]);
            self.cursor += n;
            return Ok(n);
        }

        if self.pending.is_empty() {
            match poll_fn(|cx| self.poll_source(cx)).await {
                Some(chunk) => self.pending = chunk.map_err(|e| Error::Body(e.to_string()))?,
                None => return Ok(0),
            }
        }

        let n = self.pending.len().min(dst.len());
        dst[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }

    /// Read one full cycle into a contiguous buffer
    pub async fn read_to_bytes(&mut self) -> Result<Bytes> {
        let mut out = Vec::new();
        while let Some(chunk) = poll_fn(|cx| self.poll_chunk(cx)).await {
            out.extend_from_slice(&chunk.map_err(|e| Error::Body(e.to_string()))?);
        }
        Ok(Bytes::from(out))
    }

    /// Close the source. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.source = None;
            self.pending = Bytes::new();
        }
        Ok(())
    }

    /// Body to hand to the next hop.
    ///
    /// A captured body gives out a replay of its content and stays readable.
    /// An uncaptured body gives out its source and is left exhausted.
    pub fn forward(&mut self) -> ReplayableBody {
        if let Some(buf) = &self.captured {
            return ReplayableBody::from_bytes(Bytes::copy_from_slice(buf));
        }

        let mut forwarded = ReplayableBody {
            source: self.source.take(),
            pending: std::mem::take(&mut self.pending),
            captured: None,
            cursor: 0,
            closed: false,
            len: self.len,
        };
        if forwarded.source.is_none() && forwarded.pending.is_empty() {
            forwarded.len = Some(0);
        }
        forwarded
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, BoxError>>> {
        if let Some(buf) = &self.captured {
            if self.cursor >= buf.len() {
                self.cursor = 0;
                return Poll::Ready(None);
            }
            let chunk = Bytes::copy_from_slice(&buf[self.cursor..]);
            self.cursor = buf.len();
            return Poll::Ready(Some(Ok(chunk)));
        }

        if !self.pending.is_empty() {
            return Poll::Ready(Some(Ok(std::mem::take(&mut self.pending))));
        }

        self.poll_source(cx)
    }

    fn poll_source(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, BoxError>>> {
        let Some(source) = self.source.as_mut() else {
            return Poll::Ready(None);
        };

        loop {
            match ready!(Pin::new(&mut *source).poll_frame(cx)) {
                None => {
                    self.source = None;
                    return Poll::Ready(None);
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            return Poll::Ready(Some(Ok(data)));
                        }
                    }
                }
            }
        }
    }
}

impl Default for ReplayableBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl Body for ReplayableBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        self.get_mut()
            .poll_chunk(cx)
            .map(|chunk| chunk.map(|res| res.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        match &self.captured {
            Some(buf) => buf.is_empty(),
            None => self.source.is_none() && self.pending.is_empty(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.captured {
            Some(buf) => SizeHint::with_exact(buf.len().saturating_sub(self.cursor) as u64),
            None => match self.len {
                Some(len) if self.pending.is_empty() => SizeHint::with_exact(len),
                _ => SizeHint::default(),
            },
        }
    }
}

impl fmt::Debug for ReplayableBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayableBody")
            .field("len", &self.len)
            .field("captured", &self.captured.as_ref().map(|b| b.len()))
            .field("closed", &self.closed)
            .finish()
    }
}
