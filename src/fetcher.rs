//! Admission-controlled byte fetching.
//!
//! A fixed pool of fetch workers pulls identifiers from a bounded queue, so
//! at most `concurrency` requests are ever in flight; there is no smoothing,
//! just the hard ceiling. Every input identifier produces exactly one
//! [`FetchResult`], delivered in completion order, including identifiers that
//! never reached the network.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};

/// User agent sent by all pipeline HTTP clients.
pub const USER_AGENT: &str = "pixatlas/0.1 (+https://github.com/pixatlas/pixatlas)";

/// Outcome of fetching one identifier.
#[derive(Debug)]
pub struct FetchResult {
    /// The identifier this result belongs to.
    pub id: String,
    /// The fetched bytes, or why they could not be fetched.
    pub payload: Result<Bytes, FetchError>,
}

/// Why a fetch produced no payload.
#[derive(Debug)]
pub enum FetchError {
    /// The identifier was empty or a null placeholder; no request was made.
    InvalidIdentifier,
    /// The request exceeded its per-fetch timeout.
    Timeout,
    /// The server answered with a non-success status.
    Http(StatusCode),
    /// The request failed below the HTTP layer.
    Transport(reqwest::Error),
    /// The run was cancelled before this identifier was dispatched.
    Cancelled,
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidIdentifier => write!(f, "identifier is empty or null"),
            Self::Timeout => write!(f, "fetch timed out"),
            Self::Http(status) => write!(f, "fetch returned {status}"),
            Self::Transport(err) => write!(f, "fetch failed: {err}"),
            Self::Cancelled => write!(f, "run cancelled before fetch"),
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// Shared flag a driver can trigger to stop admitting new fetches.
///
/// Triggering never loses results: identifiers not yet dispatched surface as
/// [`FetchError::Cancelled`] so the result stream stays total, and fetches
/// already in flight run to completion.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Whether an identifier may be dispatched at all.
///
/// Empty cells and the `"nan"` placeholder that null identifiers stringify to
/// upstream are rejected before any request is attempted.
pub fn is_valid_identifier(id: &str) -> bool {
    !id.trim().is_empty() && id != "nan"
}

/// A source of raw bytes addressed by identifier.
#[async_trait]
pub trait ByteSource: Send + Sync + 'static {
    /// Fetches the bytes for one identifier.
    async fn fetch(&self, id: &str) -> Result<Bytes, FetchError>;
}

/// HTTP byte source resolving identifiers through a URL template.
pub struct HttpByteSource {
    client: Client,
    template: String,
}

impl HttpByteSource {
    /// Builds a source with its own client; `timeout` applies independently
    /// to every request. The template's `{id}` placeholder is substituted
    /// with the identifier.
    pub fn new(template: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::limited(5))
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, template))
    }

    /// Builds a source around an existing client.
    pub fn with_client(client: Client, template: impl Into<String>) -> Self {
        Self {
            client,
            template: template.into(),
        }
    }

    fn url_for(&self, id: &str) -> String {
        self.template.replace("{id}", id)
    }
}

#[async_trait]
impl ByteSource for HttpByteSource {
    async fn fetch(&self, id: &str) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(self.url_for(id))
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status));
        }
        response.bytes().await.map_err(FetchError::from_reqwest)
    }
}

/// Admission-controlled fetch pool over a [`ByteSource`].
pub struct BoundedFetcher<S> {
    source: Arc<S>,
    concurrency: usize,
}

impl<S: ByteSource> BoundedFetcher<S> {
    /// Creates a pool with a hard ceiling of `concurrency` in-flight fetches.
    pub fn new(source: S, concurrency: usize) -> Self {
        Self {
            source: Arc::new(source),
            concurrency: concurrency.max(1),
        }
    }

    /// Fetches every identifier, returning a channel that yields exactly
    /// `ids.len()` results in completion order and then closes.
    ///
    /// Must be called within a tokio runtime: the pool workers and the feeder
    /// are spawned onto it. Invalid identifiers are answered directly by the
    /// feeder so they never occupy a worker slot; one identifier's failure
    /// never cancels its siblings.
    pub fn fetch_all(&self, ids: Vec<String>, cancel: CancelToken) -> flume::Receiver<FetchResult> {
        let (result_tx, result_rx) = flume::bounded(self.concurrency * 2);
        let (id_tx, id_rx) = flume::bounded::<String>(self.concurrency * 2);

        for _ in 0..self.concurrency {
            let source = Arc::clone(&self.source);
            let id_rx = id_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while let Ok(id) = id_rx.recv_async().await {
                    let payload = if cancel.is_triggered() {
                        Err(FetchError::Cancelled)
                    } else {
                        source.fetch(&id).await
                    };
                    if result_tx
                        .send_async(FetchResult { id, payload })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
        drop(id_rx);

        tokio::spawn(async move {
            for id in ids {
                let early = if cancel.is_triggered() {
                    Some(FetchError::Cancelled)
                } else if !is_valid_identifier(&id) {
                    Some(FetchError::InvalidIdentifier)
                } else {
                    None
                };
                match early {
                    Some(error) => {
                        let result = FetchResult {
                            id,
                            payload: Err(error),
                        };
                        if result_tx.send_async(result).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        if id_tx.send_async(id).await.is_err() {
                            return;
                        }
                    }
                }
            }
            // Dropping id_tx lets the workers drain and exit; dropping the
            // last result sender closes the result stream.
        });

        result_rx
    }
}
