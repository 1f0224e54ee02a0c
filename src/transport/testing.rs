//! Recording transport for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{FormFields, HttpRequest, HttpResponse, Method, NetworkError, PendingReply, Transport};

/// One request seen by the [`RecordingTransport`].
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub request: HttpRequest,
    pub form: FormFields,
}

enum Scripted {
    Status(u16, Vec<(String, String)>, String),
    Fail(String),
}

/// Records every request and answers with scripted responses (200 with an
/// empty body once the script runs out).
///
/// Replies are ready immediately unless [`RecordingTransport::defer`] was
/// called, in which case each one is a spawned task that sleeps first.
#[derive(Clone, Default)]
pub(crate) struct RecordingTransport {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    script: Arc<Mutex<VecDeque<Scripted>>>,
    tokens: Arc<DashMap<String, String>>,
    delay: Arc<Mutex<Option<Duration>>>,
    completed: Arc<AtomicUsize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status: u16, body: &str) -> &Self {
        self.script
            .lock()
            .push_back(Scripted::Status(status, Vec::new(), body.to_string()));
        self
    }

    pub fn respond_with_headers(&self, status: u16, headers: &[(&str, &str)]) -> &Self {
        let headers = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        self.script
            .lock()
            .push_back(Scripted::Status(status, headers, String::new()));
        self
    }

    pub fn fail(&self, message: &str) -> &Self {
        self.script.lock().push_back(Scripted::Fail(message.to_string()));
        self
    }

    /// Answer every following request from a task that sleeps for `delay`.
    pub fn defer(&self, delay: Duration) -> &Self {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Number of replies that actually produced their result.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn record(&self, method: Method, request: HttpRequest, form: FormFields) -> PendingReply {
        let url = request.url.clone();
        self.requests.lock().push(RecordedRequest {
            method,
            request,
            form,
        });

        let result = match self.script.lock().pop_front() {
            Some(Scripted::Status(status, headers, body)) => Ok(HttpResponse {
                url,
                status,
                headers,
                body,
            }),
            Some(Scripted::Fail(message)) => Err(NetworkError::InvalidResponse(message)),
            None => Ok(HttpResponse::new(url, 200)),
        };

        let completed = self.completed.clone();
        match *self.delay.lock() {
            Some(delay) => PendingReply::spawn(async move {
                tokio::time::sleep(delay).await;
                completed.fetch_add(1, Ordering::SeqCst);
                result
            }),
            None => {
                completed.fetch_add(1, Ordering::SeqCst);
                PendingReply::ready(result)
            }
        }
    }
}

impl Transport for RecordingTransport {
    fn get(&self, request: HttpRequest) -> PendingReply {
        self.record(Method::Get, request, Vec::new())
    }

    fn post(&self, request: HttpRequest, form: FormFields) -> PendingReply {
        self.record(Method::Post, request, form)
    }

    fn bearer_token(&self, host: &str) -> Option<String> {
        self.tokens.get(host).map(|t| t.value().clone())
    }

    fn set_bearer_token(&self, host: &str, token: String) {
        self.tokens.insert(host.to_string(), token);
    }

    fn clear_bearer_token(&self, host: &str) {
        self.tokens.remove(host);
    }
}
