//! Network transport used by the login strategies and site fetches.
//!
//! Every request is issued as a tokio task and handed back as a
//! [`PendingReply`] without blocking the caller. Session artifacts (cookies and
//! bearer tokens) belong to the transport, never to the caller.

mod client;
#[cfg(test)]
pub(crate) mod testing;

pub use client::{NetworkConfig, ReqwestTransport, TransportStats};

use std::future::Future;

use reqwest::Url;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

/// Errors surfaced through a pending reply
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request task failed: {0}")]
    Task(String),
}

/// Result type delivered by a pending reply
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Ordered key/value pairs, used both for query strings and form bodies.
pub type FormFields = Vec<(String, String)>;

/// HTTP method of an issued request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// An outgoing request: a fully resolved URL plus extra headers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }
}

/// A completed response. Header names are lower-cased.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: Url,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(url: Url, status: u16) -> Self {
        Self {
            url,
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_auth_rejection(&self) -> bool {
        self.status == 401 || self.status == 403
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Names of every cookie set by this response.
    pub fn set_cookie_names(&self) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k == "set-cookie")
            .filter_map(|(_, v)| v.split(';').next())
            .filter_map(|pair| pair.split('=').next())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect()
    }
}

enum ReplyState {
    Ready(NetworkResult<HttpResponse>),
    Running(JoinHandle<NetworkResult<HttpResponse>>),
}

/// Handle to a request in flight.
///
/// Either awaited with [`PendingReply::wait`] or observed through
/// [`PendingReply::on_complete`]. Cancelling aborts the underlying task and
/// suppresses the callback.
pub struct PendingReply {
    state: ReplyState,
}

impl PendingReply {
    /// Run `future` on the current tokio runtime. Must be called from within a
    /// runtime context.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = NetworkResult<HttpResponse>> + Send + 'static,
    {
        Self {
            state: ReplyState::Running(tokio::spawn(future)),
        }
    }

    /// A reply whose outcome is already known.
    pub fn ready(result: NetworkResult<HttpResponse>) -> Self {
        Self {
            state: ReplyState::Ready(result),
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            ReplyState::Ready(_) => true,
            ReplyState::Running(handle) => handle.is_finished(),
        }
    }

    /// Abort the request. Awaiting afterwards yields [`NetworkError::Cancelled`].
    pub fn cancel(&self) {
        if let ReplyState::Running(handle) = &self.state {
            handle.abort();
        }
    }

    pub fn abort_handle(&self) -> Option<AbortHandle> {
        match &self.state {
            ReplyState::Ready(_) => None,
            ReplyState::Running(handle) => Some(handle.abort_handle()),
        }
    }

    pub async fn wait(self) -> NetworkResult<HttpResponse> {
        match self.state {
            ReplyState::Ready(result) => result,
            ReplyState::Running(handle) => match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(NetworkError::Cancelled),
                Err(e) => Err(NetworkError::Task(e.to_string())),
            },
        }
    }

    /// Deliver the outcome to `callback` once the request completes.
    ///
    /// A ready reply invokes the callback immediately on the calling thread.
    /// A running reply invokes it from a tokio task, unless the returned guard
    /// is cancelled first.
    pub fn on_complete<F>(self, callback: F) -> ReplyGuard
    where
        F: FnOnce(NetworkResult<HttpResponse>) + Send + 'static,
    {
        match self.state {
            ReplyState::Ready(result) => {
                callback(result);
                ReplyGuard { abort: None }
            }
            ReplyState::Running(handle) => {
                let abort = handle.abort_handle();
                tokio::spawn(async move {
                    match handle.await {
                        Ok(result) => callback(result),
                        Err(e) if e.is_cancelled() => {
                            debug!("Pending reply cancelled, callback dropped");
                        }
                        Err(e) => callback(Err(NetworkError::Task(e.to_string()))),
                    }
                });
                ReplyGuard { abort: Some(abort) }
            }
        }
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Returned by [`PendingReply::on_complete`]; cancels the request on demand.
#[derive(Debug)]
pub struct ReplyGuard {
    abort: Option<AbortHandle>,
}

impl ReplyGuard {
    pub fn cancel(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }
}

/// Aborts the wrapped task when dropped.
///
/// Owned by a future that awaits another spawned request, so aborting the
/// outer task also aborts the inner one.
#[derive(Debug)]
pub struct AbortOnDrop {
    abort: Option<AbortHandle>,
}

impl AbortOnDrop {
    pub fn new(reply: &PendingReply) -> Self {
        Self {
            abort: reply.abort_handle(),
        }
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}

/// The network transport shared by every site of a profile.
pub trait Transport: Send + Sync {
    fn get(&self, request: HttpRequest) -> PendingReply;
    fn post(&self, request: HttpRequest, form: FormFields) -> PendingReply;

    /// Cached bearer token for `host`, if a token login already happened.
    fn bearer_token(&self, host: &str) -> Option<String>;
    fn set_bearer_token(&self, host: &str, token: String);
    fn clear_bearer_token(&self, host: &str);
}
