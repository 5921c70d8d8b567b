//! Response wrapper handed back to jobs.
//!
//! # Responsibilities
//! - Expose status, status text and headers of a completed request
//! - Open the body lazily, at most once, and cache the stream
//! - Return the pooled connection on close, exactly once
//!
//! # Design Decisions
//! - Status and headers are copied out at construction; the body is not
//! - A response without a body yields an empty stream
//! - `close` is idempotent and runs on drop, so an abandoned response never
//!   holds a connection

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use url::Url;

use crate::error::FetchError;
use crate::http::pool::ConnectionLease;

static RESPONSE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Body of a response, read chunk by chunk.
pub struct BodyStream {
    url: String,
    inner: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
}

impl BodyStream {
    pub fn empty(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            inner: None,
        }
    }

    fn open(url: impl Into<String>, response: reqwest::Response) -> Self {
        Self {
            url: url.into(),
            inner: Some(response.bytes_stream().boxed()),
        }
    }

    /// Next chunk, or `None` at the end of the body.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, FetchError> {
        self.next().await.transpose()
    }

    /// Everything not read yet.
    pub async fn read_to_end(&mut self) -> Result<Bytes, FetchError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Stop reading. Returns true if an open stream was discarded.
    fn close(&mut self) -> bool {
        self.inner.take().is_some()
    }
}

impl Stream for BodyStream {
    type Item = Result<Bytes, FetchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(FetchError::transport(this.url.as_str(), e)))),
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyStream")
            .field("url", &self.url)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

/// hyper only records the phrase when it differs from the canonical one.
fn reason_phrase(response: &reqwest::Response) -> String {
    match response.extensions().get::<hyper::ext::ReasonPhrase>() {
        Some(phrase) => String::from_utf8_lossy(phrase.as_bytes()).into_owned(),
        None => response.status().canonical_reason().unwrap_or("").to_string(),
    }
}

/// A completed outbound request.
#[derive(Debug)]
pub struct FetchResponse {
    id: u64,
    url: Url,
    status: StatusCode,
    status_text: String,
    headers: HeaderMap,
    inner: Option<reqwest::Response>,
    body: Option<BodyStream>,
    lease: Option<ConnectionLease>,
}

impl FetchResponse {
    pub(crate) fn new(response: reqwest::Response, lease: ConnectionLease) -> Self {
        let id = RESPONSE_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(response = id, "Creating response");
        Self {
            id,
            url: response.url().clone(),
            status: response.status(),
            status_text: reason_phrase(&response),
            headers: response.headers().clone(),
            inner: Some(response),
            body: None,
            lease: Some(lease),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase sent by the server, or the canonical one for the code.
    /// Empty when neither is known.
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Case-insensitive, multi-valued, insertion order kept per name.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The body stream. Opened on first call; later calls return the same stream.
    pub fn body(&mut self) -> &mut BodyStream {
        let url = self.url.as_str();
        let inner = &mut self.inner;
        self.body.get_or_insert_with(|| match inner.take() {
            Some(response) => BodyStream::open(url, response),
            None => BodyStream::empty(url),
        })
    }

    /// Read the remaining body into memory.
    pub async fn bytes(&mut self) -> Result<Bytes, FetchError> {
        self.body().read_to_end().await
    }

    pub fn is_closed(&self) -> bool {
        self.lease.is_none()
    }

    /// Release the connection. Safe to call any number of times.
    pub fn close(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        if self.body().close() {
            tracing::trace!(response = self.id, "Discarding unread body");
        }
        self.inner = None;
        tracing::trace!(response = self.id, lease = lease.id(), "Closed response");
        drop(lease);
    }
}

impl Drop for FetchResponse {
    fn drop(&mut self) {
        self.close();
    }
}
