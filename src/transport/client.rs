use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder};
use tokio::time::Instant;

use super::{FormFields, HttpRequest, HttpResponse, Method, NetworkError, PendingReply, Transport};

static DEFAULT_USER_AGENT: Lazy<String> = Lazy::new(|| {
    format!(
        "{}/{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
});

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Maximum number of idle connections per host
    pub max_idle_per_host: usize,
    /// How long to keep idle connections alive
    pub idle_timeout: Duration,
    /// Connection timeout for new connections
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
    /// Enable compression
    pub compression: bool,
    /// User agent string
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 8,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            compression: true,
            user_agent: DEFAULT_USER_AGENT.clone(),
        }
    }
}

/// Request counters, global and per host
#[derive(Debug, Default, Clone)]
pub struct TransportStats {
    /// Total number of requests issued
    pub total_requests: u64,
    /// Requests that produced a response (any status)
    pub completed_requests: u64,
    /// Requests that failed at the transport level
    pub failed_requests: u64,
    /// Requests that timed out
    pub timeouts: u64,
    /// Total response bytes read
    pub total_bytes: u64,
    /// Average request duration
    pub average_request_duration: Duration,
}

#[derive(Debug, Clone)]
struct HostActivity {
    in_flight: u64,
    total_requests: u64,
    last_activity: Instant,
}

impl Default for HostActivity {
    fn default() -> Self {
        Self {
            in_flight: 0,
            total_requests: 0,
            last_activity: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
struct Tracker {
    stats: RwLock<TransportStats>,
    hosts: DashMap<String, HostActivity>,
}

impl Tracker {
    /// Count a new request to `host`. It stays in flight until the returned
    /// guard is dropped, including when the request task is aborted.
    fn start(self: &Arc<Self>, host: &str) -> InFlight {
        let mut activity = self.hosts.entry(host.to_string()).or_default();
        activity.in_flight += 1;
        activity.total_requests += 1;
        activity.last_activity = Instant::now();
        drop(activity);

        self.stats.write().total_requests += 1;
        InFlight {
            tracker: self.clone(),
            host: host.to_string(),
        }
    }

    fn release(&self, host: &str) {
        if let Some(mut activity) = self.hosts.get_mut(host) {
            activity.in_flight = activity.in_flight.saturating_sub(1);
            activity.last_activity = Instant::now();
        }
    }

    fn in_flight(&self, host: &str) -> u64 {
        self.hosts.get(host).map(|entry| entry.in_flight).unwrap_or(0)
    }

    fn finish(&self, duration: Duration, bytes: Option<u64>, error: Option<&reqwest::Error>) {
        let mut stats = self.stats.write();
        match error {
            None => {
                stats.completed_requests += 1;
                stats.total_bytes += bytes.unwrap_or(0);
            }
            Some(e) => {
                stats.failed_requests += 1;
                if e.is_timeout() {
                    stats.timeouts += 1;
                }
            }
        }

        let finished = stats.completed_requests + stats.failed_requests;
        if finished > 0 {
            let total = stats.average_request_duration.as_millis() as u64 * (finished - 1)
                + duration.as_millis() as u64;
            stats.average_request_duration = Duration::from_millis(total / finished);
        }
    }
}

struct InFlight {
    tracker: Arc<Tracker>,
    host: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.tracker.release(&self.host);
    }
}

/// [`Transport`] implementation over a shared `reqwest` client with a cookie
/// store. Bearer tokens are cached per host and attached to every request to
/// that host.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    config: NetworkConfig,
    tokens: Arc<DashMap<String, String>>,
    tracker: Arc<Tracker>,
}

impl ReqwestTransport {
    /// Create a transport with default configuration
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(NetworkConfig::default())
    }

    /// Create a transport with custom configuration
    pub fn with_config(config: NetworkConfig) -> Result<Self, reqwest::Error> {
        let client = Self::build_client(&config)?;
        info!("HTTP transport ready (user agent: {})", config.user_agent);

        Ok(Self {
            client,
            config,
            tokens: Arc::new(DashMap::new()),
            tracker: Arc::new(Tracker::default()),
        })
    }

    fn build_client(config: &NetworkConfig) -> Result<Client, reqwest::Error> {
        let mut client_builder = Client::builder()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Some(config.idle_timeout))
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .cookie_store(true)
            .user_agent(&config.user_agent);

        if config.compression {
            client_builder = client_builder.gzip(true).deflate(true).brotli(true);
        }

        client_builder = client_builder.use_rustls_tls();

        client_builder.build()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Current request statistics
    pub fn stats(&self) -> TransportStats {
        self.tracker.stats.read().clone()
    }

    /// Number of requests ever sent to `host`
    pub fn host_requests(&self, host: &str) -> u64 {
        self.tracker
            .hosts
            .get(host)
            .map(|entry| entry.total_requests)
            .unwrap_or(0)
    }

    /// Requests to `host` still awaiting a response
    pub fn host_in_flight(&self, host: &str) -> u64 {
        self.tracker.in_flight(host)
    }

    /// Forget hosts that have been idle longer than the idle timeout
    pub fn cleanup_idle_hosts(&self) {
        let idle_timeout = self.config.idle_timeout;
        let before = self.tracker.hosts.len();
        self.tracker
            .hosts
            .retain(|_, activity| activity.in_flight > 0 || activity.last_activity.elapsed() <= idle_timeout);
        let removed = before.saturating_sub(self.tracker.hosts.len());
        if removed > 0 {
            debug!("Forgot {} idle hosts", removed);
        }
    }

    fn prepare(&self, method: Method, request: &HttpRequest) -> RequestBuilder {
        let mut builder = match method {
            Method::Get => self.client.get(request.url.clone()),
            Method::Post => self.client.post(request.url.clone()),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(token) = request.host().and_then(|host| self.bearer_token(host)) {
            builder = builder.bearer_auth(token);
        }

        builder
    }

    fn send(&self, method: Method, request: HttpRequest, builder: RequestBuilder) -> PendingReply {
        self.cleanup_idle_hosts();

        let tracker = self.tracker.clone();
        let host = request.host().unwrap_or("unknown").to_string();
        let url = request.url.clone();
        let in_flight = tracker.start(&host);

        PendingReply::spawn(async move {
            let _in_flight = in_flight;
            let start_time = Instant::now();
            let result = async move {
                let response = builder.send().await?;
                let final_url = response.url().clone();
                let status = response.status().as_u16();
                let headers = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                    })
                    .collect();
                let body = response.text().await?;
                Ok::<_, reqwest::Error>(HttpResponse {
                    url: final_url,
                    status,
                    headers,
                    body,
                })
            }
            .await;

            let duration = start_time.elapsed();
            match &result {
                Ok(response) => {
                    tracker.finish(duration, Some(response.body.len() as u64), None);
                    debug!("{} {} -> {} in {:?}", method, url, response.status, duration);
                }
                Err(e) => {
                    tracker.finish(duration, None, Some(e));
                    warn!("{} {} failed in {:?}: {}", method, url, duration, e);
                }
            }

            result.map_err(NetworkError::from)
        })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, request: HttpRequest) -> PendingReply {
        let builder = self.prepare(Method::Get, &request);
        self.send(Method::Get, request, builder)
    }

    fn post(&self, request: HttpRequest, form: FormFields) -> PendingReply {
        let builder = self.prepare(Method::Post, &request).form(&form);
        self.send(Method::Post, request, builder)
    }

    fn bearer_token(&self, host: &str) -> Option<String> {
        self.tokens.get(host).map(|token| token.value().clone())
    }

    fn set_bearer_token(&self, host: &str, token: String) {
        debug!("Caching bearer token for {}", host);
        self.tokens.insert(host.to_string(), token);
    }

    fn clear_bearer_token(&self, host: &str) {
        self.tokens.remove(host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    #[tokio::test]
    async fn test_transport_creation() {
        let transport = match ReqwestTransport::new() {
            Ok(t) => t,
            Err(e) => panic!("Failed to create transport: {}", e),
        };
        let stats = transport.stats();

        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.completed_requests, 0);
        assert!(transport.config().user_agent.starts_with("board_profile/"));
    }

    #[tokio::test]
    async fn test_stats_tracking() {
        let transport = ReqwestTransport::new().unwrap();

        let in_flight = transport.tracker.start("example.com");
        assert_eq!(transport.tracker.in_flight("example.com"), 1);
        transport
            .tracker
            .finish(Duration::from_millis(100), Some(1024), None);
        drop(in_flight);

        let stats = transport.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.completed_requests, 1);
        assert_eq!(stats.total_bytes, 1024);
        assert_eq!(transport.tracker.in_flight("example.com"), 0);
        assert_eq!(transport.host_requests("example.com"), 1);
        assert_eq!(transport.host_requests("other.com"), 0);
    }

    #[tokio::test]
    async fn test_aborted_request_leaves_flight() {
        let transport = ReqwestTransport::new().unwrap();
        let tracker = transport.tracker.clone();

        let in_flight = tracker.start("example.com");
        let reply = PendingReply::spawn(async move {
            let _in_flight = in_flight;
            tokio::time::sleep(Duration::from_secs(10)).await;
            Err(NetworkError::Cancelled)
        });
        assert_eq!(tracker.in_flight("example.com"), 1);

        reply.cancel();
        assert!(matches!(reply.wait().await, Err(NetworkError::Cancelled)));
        assert_eq!(tracker.in_flight("example.com"), 0);
    }

    #[tokio::test]
    async fn test_cleanup_idle_hosts() {
        let transport = ReqwestTransport::with_config(NetworkConfig {
            idle_timeout: Duration::from_millis(20),
            ..NetworkConfig::default()
        })
        .unwrap();

        drop(transport.tracker.start("idle.example.com"));
        let busy = transport.tracker.start("busy.example.com");
        tokio::time::sleep(Duration::from_millis(50)).await;

        transport.cleanup_idle_hosts();
        assert_eq!(transport.host_requests("idle.example.com"), 0);
        assert_eq!(transport.host_requests("busy.example.com"), 1);

        drop(busy);
        transport.cleanup_idle_hosts();
        assert_eq!(transport.host_requests("busy.example.com"), 1);
    }

    #[tokio::test]
    async fn test_bearer_token_cache() {
        let transport = ReqwestTransport::new().unwrap();
        assert!(transport.bearer_token("api.example.com").is_none());

        transport.set_bearer_token("api.example.com", "tok".to_string());
        assert_eq!(transport.bearer_token("api.example.com").as_deref(), Some("tok"));

        // Token is attached to requests for that host only.
        let request = HttpRequest::new(Url::parse("https://api.example.com/posts").unwrap());
        let built = transport.prepare(Method::Get, &request).build().unwrap();
        assert_eq!(
            built.headers().get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer tok")
        );

        let other = HttpRequest::new(Url::parse("https://example.com/").unwrap());
        let built = transport.prepare(Method::Get, &other).build().unwrap();
        assert!(built.headers().get("authorization").is_none());

        transport.clear_bearer_token("api.example.com");
        assert!(transport.bearer_token("api.example.com").is_none());
    }
}
