//! Injectable network call
//!
//! The downloader never talks to the network directly. It builds
//! [`FetchRequest`]s and hands them to a [`Fetcher`], which returns the
//! status and a streaming body. [`HttpFetcher`] is the `reqwest`-backed
//! implementation; tests substitute their own.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};

use crate::error::{Error, Result};

/// HTTP method of a fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// GET request (single-object fetches)
    Get,
    /// POST request (batch fetches)
    Post,
}

/// One outgoing request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: String,
    /// Headers in insertion order
    pub headers: Vec<(String, String)>,
    /// Request body, if any
    pub body: Option<String>,
}

impl FetchRequest {
    /// Value of the first header named `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Streaming body of a response
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// Response to a [`FetchRequest`]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Body chunks as they arrive
    pub body: BodyStream,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl FetchResponse {
    /// Build a response from an in-memory body split into `chunks`
    pub fn from_chunks<I, C>(status: u16, chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        let chunks: Vec<Result<Bytes>> = chunks.into_iter().map(|c| Ok(c.into())).collect();
        Self {
            status,
            body: futures::stream::iter(chunks).boxed(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with the matching transport error unless the status is 2xx
    ///
    /// # Errors
    ///
    /// [`Error::AccessDenied`] for 401/403, [`Error::HttpStatus`] otherwise.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        if matches!(self.status, 401 | 403) {
            return Err(Error::AccessDenied {
                status: self.status,
            });
        }
        let reason = reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Err(Error::HttpStatus {
            status: self.status,
            reason,
        })
    }

    /// Collect the whole body
    ///
    /// # Errors
    ///
    /// Propagates body stream errors.
    pub async fn bytes(self) -> Result<Vec<u8>> {
        self.body
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
    }
}

/// Performs network calls on behalf of the loader
///
/// Implementations must be cheap to share; the downloader holds one behind
/// an `Arc` and calls it from several tasks at once.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Send `request` and return the status with a streaming body
    ///
    /// A non-success status is not an error at this layer; callers decide.
    ///
    /// # Errors
    ///
    /// Returns an error when the request could not be sent at all.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse>;
}

/// `reqwest`-backed [`Fetcher`]
#[derive(Clone, Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with a fresh connection pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetcher around an existing client (shared pools, proxies, TLS settings)
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let FetchRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        tracing::debug!(url = %url, status, "fetch response received");

        Ok(FetchResponse {
            status,
            body: response.bytes_stream().map_err(Error::from).boxed(),
        })
    }
}
