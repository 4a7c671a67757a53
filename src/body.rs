//! The response body.
//!
//! A response is either buffered (empty, or an XML document built in
//! memory) or the content of a resource, streamed as it is read.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream};
use http::header::HeaderMap;
use http_body::{Body as HttpBody, SizeHint};

/// Body is returned by the webdav handler, and implements both `Stream`
/// and `http_body::Body`.
pub struct Body {
    inner: Inner,
}

enum Inner {
    Buffered(Option<Bytes>),
    Streamed(BoxStream<'static, io::Result<Bytes>>),
}

impl Body {
    /// Return an empty body.
    pub fn empty() -> Body {
        Body {
            inner: Inner::Buffered(None),
        }
    }

    /// Create a body from a stream.
    pub fn stream(stream: impl Stream<Item = io::Result<Bytes>> + Send + 'static) -> Body {
        Body {
            inner: Inner::Streamed(Box::pin(stream)),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Body {
        Body {
            inner: Inner::Buffered(Some(b).filter(|b| !b.is_empty())),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Body {
        Body::from(Bytes::from(v))
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match &mut self.inner {
            Inner::Buffered(b) => Poll::Ready(b.take().map(Ok)),
            Inner::Streamed(s) => s.as_mut().poll_next(cx),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_data(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<io::Result<Bytes>>> {
        self.poll_next(cx)
    }

    fn poll_trailers(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<io::Result<Option<HeaderMap>>> {
        Poll::Ready(Ok(None))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.inner, Inner::Buffered(None))
    }

    // exact for buffered bodies. A stream's length is only known from
    // the Content-Length header.
    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Inner::Buffered(b) => SizeHint::with_exact(b.as_ref().map_or(0, |b| b.len() as u64)),
            Inner::Streamed(_) => SizeHint::default(),
        }
    }
}
