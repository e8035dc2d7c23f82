//! Definitions for the Request and Response bodies.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_stream::stream;
use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use pin_project::pin_project;
use tokio::io::{AsyncRead, ReadBuf};

use crate::transport::pool::PoolPermit;

/// Request body. Either a buffer, which can be sent again when a request
/// has to be repeated, or a one-shot stream.
pub struct Body {
    pub(crate) inner: BodyType,
}

pub(crate) enum BodyType {
    Bytes(Option<Bytes>),
    Stream(BoxStream<'static, Result<Bytes, io::Error>>),
}

impl Body {
    /// Return an empty body.
    pub fn empty() -> Body {
        Body {
            inner: BodyType::Bytes(None),
        }
    }

    /// Create a body from a stream. Such a body cannot be replayed.
    pub fn stream(stream: impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static) -> Body {
        Body {
            inner: BodyType::Stream(Box::pin(stream)),
        }
    }

    /// Can this body be sent a second time.
    pub fn is_replayable(&self) -> bool {
        matches!(self.inner, BodyType::Bytes(_))
    }

    /// Length, if known up front.
    pub fn len(&self) -> Option<u64> {
        match &self.inner {
            BodyType::Bytes(b) => Some(b.as_ref().map(|b| b.len() as u64).unwrap_or(0)),
            BodyType::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// A copy of a buffered body.
    pub fn try_clone(&self) -> Option<Body> {
        match &self.inner {
            BodyType::Bytes(b) => Some(Body {
                inner: BodyType::Bytes(b.clone()),
            }),
            BodyType::Stream(_) => None,
        }
    }

    pub(crate) fn into_reqwest(self) -> reqwest::Body {
        match self.inner {
            BodyType::Bytes(Some(b)) => reqwest::Body::from(b),
            BodyType::Bytes(None) => reqwest::Body::from(Bytes::new()),
            BodyType::Stream(s) => reqwest::Body::wrap_stream(s),
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.inner {
            BodyType::Bytes(b) => write!(f, "Body({} bytes)", b.as_ref().map(|b| b.len()).unwrap_or(0)),
            BodyType::Stream(_) => f.write_str("Body(stream)"),
        }
    }
}

impl From<String> for Body {
    fn from(t: String) -> Body {
        Body {
            inner: BodyType::Bytes(Some(Bytes::from(t))),
        }
    }
}

impl From<&str> for Body {
    fn from(t: &str) -> Body {
        Body {
            inner: BodyType::Bytes(Some(Bytes::from(t.to_string()))),
        }
    }
}

impl From<Bytes> for Body {
    fn from(t: Bytes) -> Body {
        Body {
            inner: BodyType::Bytes(Some(t)),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(t: Vec<u8>) -> Body {
        Body {
            inner: BodyType::Bytes(Some(Bytes::from(t))),
        }
    }
}

/// Response body.
///
/// Stops after `Content-Length` bytes when the server sent one, and fails
/// with `UnexpectedEof` when the connection ends early. The pooled
/// connection is given back when the end is reached or the stream is dropped.
#[pin_project]
pub struct ResponseStream {
    #[pin]
    inner: BoxStream<'static, io::Result<Bytes>>,
    length: Option<u64>,
    chunk: Bytes,
}

impl ResponseStream {
    pub(crate) fn from_response(mut resp: reqwest::Response, permit: Option<PoolPermit>) -> ResponseStream {
        let length = resp.content_length();
        let inner = stream! {
            let _permit = permit;
            let mut remaining = length;
            loop {
                if remaining == Some(0) {
                    break;
                }
                match resp.chunk().await {
                    Ok(Some(mut chunk)) => {
                        if let Some(r) = remaining.as_mut() {
                            if chunk.len() as u64 > *r {
                                chunk.truncate(*r as usize);
                            }
                            *r -= chunk.len() as u64;
                        }
                        if !chunk.is_empty() {
                            yield Ok(chunk);
                        }
                    }
                    Ok(None) => {
                        if let Some(r) = remaining.filter(|r| *r > 0) {
                            yield Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!("connection closed with {r} bytes outstanding"),
                            ));
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(io::Error::new(io::ErrorKind::Other, e));
                        break;
                    }
                }
            }
        };
        ResponseStream {
            inner: inner.boxed(),
            length,
            chunk: Bytes::new(),
        }
    }

    /// A body that is already in memory.
    pub fn from_bytes(data: impl Into<Bytes>) -> ResponseStream {
        let data: Bytes = data.into();
        let length = Some(data.len() as u64);
        let chunks: Vec<io::Result<Bytes>> = if data.is_empty() {
            Vec::new()
        } else {
            vec![Ok(data)]
        };
        ResponseStream {
            inner: futures_util::stream::iter(chunks).boxed(),
            length,
            chunk: Bytes::new(),
        }
    }

    pub fn empty() -> ResponseStream {
        ResponseStream::from_bytes(Bytes::new())
    }

    /// The announced length of the body.
    pub fn content_length(&self) -> Option<u64> {
        self.length
    }

    /// Read the whole body.
    pub async fn bytes(mut self) -> io::Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&self.chunk);
        while let Some(chunk) = self.inner.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("length", &self.length)
            .finish()
    }
}

impl Stream for ResponseStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if !this.chunk.is_empty() {
            return Poll::Ready(Some(Ok(std::mem::take(this.chunk))));
        }
        this.inner.poll_next(cx)
    }
}

impl AsyncRead for ResponseStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut this = self.project();
        loop {
            if !this.chunk.is_empty() {
                let n = std::cmp::min(this.chunk.len(), buf.remaining());
                buf.put_slice(&this.chunk[..n]);
                this.chunk.advance(n);
                return Poll::Ready(Ok(()));
            }
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => *this.chunk = chunk,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
