//! Login strategies.
//!
//! Each site logs in through one [`HttpLogin`] implementation chosen by its
//! [`LoginKind`]. A strategy only builds and issues the request; the
//! resulting cookies or bearer token are kept by the transport.

mod http_get;
mod http_post;
mod token;

pub use http_get::HttpGetLogin;
pub use http_post::HttpPostLogin;
pub use token::TokenLogin;

use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::settings::SettingsStore;
use crate::sites::Site;
use crate::transport::{
    FormFields, HttpResponse, NetworkError, PendingReply, ReplyGuard, Transport,
};

/// Error types for login attempts
#[derive(Error, Debug)]
pub enum LoginError {
    #[error("Invalid login URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Site '{0}' has no login configured")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}

/// Result type for login operations
pub type LoginResult<T> = Result<T, LoginError>;

/// Which strategy a site uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginKind {
    #[default]
    None,
    Get,
    Post,
    Token,
}

impl std::fmt::Display for LoginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginKind::None => write!(f, "none"),
            LoginKind::Get => write!(f, "get"),
            LoginKind::Post => write!(f, "post"),
            LoginKind::Token => write!(f, "token"),
        }
    }
}

/// Maps one request parameter to the credential setting holding its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginField {
    pub key: String,
    pub setting: String,
}

impl LoginField {
    pub fn new(key: &str, setting: &str) -> Self {
        Self {
            key: key.to_string(),
            setting: setting.to_string(),
        }
    }
}

/// How a login response is judged successful
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum LoginCheck {
    /// Any 2xx or 3xx status
    #[default]
    Status,
    /// The response sets this cookie
    Cookie(String),
    /// The final URL contains this fragment
    Redirect(String),
}

fn default_token_field() -> String {
    "access_token".to_string()
}

/// Login configuration of a source or site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub kind: LoginKind,
    pub url: String,
    pub fields: Vec<LoginField>,
    pub check: LoginCheck,
    #[serde(default = "default_token_field")]
    pub token_field: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            kind: LoginKind::None,
            url: String::new(),
            fields: Vec::new(),
            check: LoginCheck::Status,
            token_field: default_token_field(),
        }
    }
}

impl LoginConfig {
    pub fn new(kind: LoginKind, url: &str) -> Self {
        Self {
            kind,
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, key: &str, setting: &str) -> Self {
        self.fields.push(LoginField::new(key, setting));
        self
    }

    pub fn with_check(mut self, check: LoginCheck) -> Self {
        self.check = check;
        self
    }

    /// Configured fields, or `login`/`password` read from the default
    /// credential settings.
    pub fn effective_fields(&self) -> Vec<LoginField> {
        if self.fields.is_empty() {
            vec![
                LoginField::new("login", "auth/pseudo"),
                LoginField::new("password", "auth/password"),
            ]
        } else {
            self.fields.clone()
        }
    }
}

/// Result of a completed login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated,
    /// The site refused the credentials. Retrying with other credentials may succeed.
    Rejected { status: u16 },
}

impl LoginOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, LoginOutcome::Authenticated)
    }
}

/// Judge a login response against `check`.
pub fn evaluate_response(check: &LoginCheck, response: &HttpResponse) -> LoginOutcome {
    if response.is_auth_rejection() {
        return LoginOutcome::Rejected {
            status: response.status,
        };
    }

    let accepted = match check {
        LoginCheck::Status => (200..400).contains(&response.status),
        LoginCheck::Cookie(name) => response.set_cookie_names().iter().any(|c| *c == name.as_str()),
        LoginCheck::Redirect(fragment) => response.url.as_str().contains(fragment.as_str()),
    };

    if accepted {
        LoginOutcome::Authenticated
    } else {
        LoginOutcome::Rejected {
            status: response.status,
        }
    }
}

/// A login attempt in flight.
#[derive(Debug)]
pub struct PendingLogin {
    reply: PendingReply,
    check: LoginCheck,
}

impl PendingLogin {
    pub fn new(reply: PendingReply, check: LoginCheck) -> Self {
        Self { reply, check }
    }

    pub fn is_finished(&self) -> bool {
        self.reply.is_finished()
    }

    pub fn cancel(&self) {
        self.reply.cancel();
    }

    pub async fn wait(self) -> LoginResult<LoginOutcome> {
        let response = self.reply.wait().await?;
        Ok(evaluate_response(&self.check, &response))
    }

    pub fn on_complete<F>(self, callback: F) -> ReplyGuard
    where
        F: FnOnce(LoginResult<LoginOutcome>) + Send + 'static,
    {
        let check = self.check;
        self.reply.on_complete(move |result| {
            callback(
                result
                    .map(|response| evaluate_response(&check, &response))
                    .map_err(LoginError::from),
            )
        })
    }
}

/// Resolve a login URL against the site's base URL.
///
/// Absolute URLs are used as-is. A base URL without a scheme is assumed to
/// be `https`.
pub fn fix_url(base_url: &str, url: &str) -> LoginResult<Url> {
    if let Ok(absolute) = Url::parse(url) {
        if matches!(absolute.scheme(), "http" | "https") {
            return Ok(absolute);
        }
    }

    let base = if base_url.contains("://") {
        base_url.to_string()
    } else {
        format!("https://{}", base_url)
    };
    let base = Url::parse(&base).map_err(|e| LoginError::InvalidUrl {
        url: base_url.to_string(),
        reason: e.to_string(),
    })?;
    if base.cannot_be_a_base() || base.host_str().is_none() {
        return Err(LoginError::InvalidUrl {
            url: base_url.to_string(),
            reason: "not a base URL".to_string(),
        });
    }

    base.join(url).map_err(|e| LoginError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// A login strategy bound to one site.
pub trait HttpLogin: Send + Sync {
    fn kind(&self) -> LoginKind;
    fn site(&self) -> &Arc<Site>;
    fn settings(&self) -> &Arc<dyn SettingsStore>;

    /// Issue the login request. Never blocks; errors here mean nothing was sent.
    fn get_reply(&self, login_url: &str, query: FormFields) -> LoginResult<PendingReply>;

    /// Login parameters read from the credential store. Missing credentials
    /// are sent as empty values.
    fn query(&self) -> FormFields {
        self.site()
            .login()
            .effective_fields()
            .into_iter()
            .map(|field| {
                let value = self.settings().get_string(&field.setting).unwrap_or_else(|| {
                    warn!(
                        site = %self.site().id(),
                        setting = %field.setting,
                        "Missing login credential"
                    );
                    String::new()
                });
                (field.key, value)
            })
            .collect()
    }

    /// Run a full login attempt.
    fn login(&self) -> LoginResult<PendingLogin> {
        let config = self.site().login();
        debug!(site = %self.site().id(), kind = %self.kind(), "Starting login");
        let reply = self.get_reply(&config.url, self.query())?;
        Ok(PendingLogin::new(reply, config.check.clone()))
    }
}

/// Build the strategy configured for `site`, or `None` when the site does not log in.
pub fn create_login(
    site: Arc<Site>,
    transport: Arc<dyn Transport>,
    settings: Arc<dyn SettingsStore>,
) -> Option<Box<dyn HttpLogin>> {
    match site.login().kind {
        LoginKind::None => None,
        LoginKind::Get => Some(Box::new(HttpGetLogin::new(site, transport, settings))),
        LoginKind::Post => Some(Box::new(HttpPostLogin::new(site, transport, settings))),
        LoginKind::Token => Some(Box::new(TokenLogin::new(site, transport, settings))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use toml::Value;

    use super::LoginConfig;
    use crate::settings::{SettingsStore, TomlSettings};
    use crate::sites::{Site, SourceId};

    pub fn site(base_url: &str, login: LoginConfig) -> Arc<Site> {
        Arc::new(Site::new(
            "test",
            base_url,
            SourceId::from("source"),
            login,
            Arc::new(TomlSettings::in_memory()),
        ))
    }

    pub fn credentials(pairs: &[(&str, &str)]) -> Arc<dyn SettingsStore> {
        let settings = TomlSettings::in_memory();
        for (key, value) in pairs {
            settings.set(key, Value::String(value.to_string()));
        }
        Arc::new(settings)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::test_support::{credentials, site};
    use super::*;
    use crate::transport::testing::RecordingTransport;

    fn response(url: &str, status: u16) -> HttpResponse {
        HttpResponse::new(Url::parse(url).unwrap(), status)
    }

    #[test]
    fn test_fix_url() {
        assert_eq!(
            fix_url("https://example.com", "/login").unwrap().as_str(),
            "https://example.com/login"
        );
        assert_eq!(
            fix_url("example.com", "session/new").unwrap().as_str(),
            "https://example.com/session/new"
        );
        assert_eq!(
            fix_url("https://example.com", "https://auth.example.org/x")
                .unwrap()
                .as_str(),
            "https://auth.example.org/x"
        );
        assert!(matches!(
            fix_url("http://", "/login"),
            Err(LoginError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_evaluate_response() {
        let ok = response("https://example.com/", 302);
        assert_eq!(evaluate_response(&LoginCheck::Status, &ok), LoginOutcome::Authenticated);

        let denied = response("https://example.com/", 401);
        assert_eq!(
            evaluate_response(&LoginCheck::Status, &denied),
            LoginOutcome::Rejected { status: 401 }
        );

        let cookie = response("https://example.com/", 200).with_header("Set-Cookie", "sid=1; Path=/");
        assert!(evaluate_response(&LoginCheck::Cookie("sid".into()), &cookie).is_authenticated());
        assert!(!evaluate_response(&LoginCheck::Cookie("other".into()), &cookie).is_authenticated());

        let landed = response("https://example.com/account/home", 200);
        assert!(evaluate_response(&LoginCheck::Redirect("/account".into()), &landed).is_authenticated());
        assert!(!evaluate_response(&LoginCheck::Redirect("/welcome".into()), &landed).is_authenticated());
    }

    #[test]
    fn test_login_config_toml() {
        let raw = r#"
            kind = "get"
            url = "/session"
            check = { type = "cookie", value = "sid" }

            [[fields]]
            key = "user"
            setting = "auth/pseudo"
        "#;
        let config: LoginConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.kind, LoginKind::Get);
        assert_eq!(config.check, LoginCheck::Cookie("sid".to_string()));
        assert_eq!(config.token_field, "access_token");
        assert_eq!(config.fields, vec![LoginField::new("user", "auth/pseudo")]);
    }

    #[test]
    fn test_default_fields() {
        let config = LoginConfig::new(LoginKind::Post, "/login");
        let keys: Vec<String> = config.effective_fields().into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["login", "password"]);
    }

    #[test]
    fn test_create_login_dispatch() {
        let transport: Arc<dyn Transport> = Arc::new(RecordingTransport::new());
        let settings = credentials(&[]);

        for (kind, expected) in [
            (LoginKind::Get, Some(LoginKind::Get)),
            (LoginKind::Post, Some(LoginKind::Post)),
            (LoginKind::Token, Some(LoginKind::Token)),
            (LoginKind::None, None),
        ] {
            let site = site("https://example.com", LoginConfig::new(kind, "/login"));
            let login = create_login(site, transport.clone(), settings.clone());
            assert_eq!(login.map(|l| l.kind()), expected);
        }
    }

    #[test]
    fn test_query_reads_credentials() {
        let site = site(
            "https://example.com",
            LoginConfig::new(LoginKind::Get, "/login")
                .with_field("user", "auth/pseudo")
                .with_field("api_key", "auth/api_key"),
        );
        let login = HttpGetLogin::new(
            site,
            Arc::new(RecordingTransport::new()),
            credentials(&[("auth/pseudo", "alice")]),
        );
        assert_eq!(
            login.query(),
            vec![
                ("user".to_string(), "alice".to_string()),
                ("api_key".to_string(), String::new()),
            ]
        );
    }

    fn deferred_login(kind: LoginKind) -> (RecordingTransport, Box<dyn HttpLogin>) {
        let transport = RecordingTransport::new();
        transport
            .defer(Duration::from_millis(100))
            .respond(200, r#"{"access_token":"tok"}"#);
        let site = site("https://example.com", LoginConfig::new(kind, "/login"));
        let login = create_login(site, Arc::new(transport.clone()), credentials(&[])).unwrap();
        (transport, login)
    }

    #[tokio::test]
    async fn test_cancel_stops_every_strategy() {
        for kind in [LoginKind::Get, LoginKind::Post, LoginKind::Token] {
            let (transport, login) = deferred_login(kind);

            let pending = login.login().unwrap();
            assert!(!pending.is_finished());
            tokio::time::sleep(Duration::from_millis(10)).await;
            pending.cancel();
            tokio::time::sleep(Duration::from_millis(250)).await;

            assert_eq!(transport.requests().len(), 1, "{kind} request not issued");
            assert_eq!(transport.completed(), 0, "{kind} request outlived cancel");
            assert!(matches!(
                pending.wait().await,
                Err(LoginError::Network(NetworkError::Cancelled))
            ));
        }
    }

    #[tokio::test]
    async fn test_on_complete_delivers_outcome() {
        for kind in [LoginKind::Get, LoginKind::Post, LoginKind::Token] {
            let (transport, login) = deferred_login(kind);
            let (tx, rx) = oneshot::channel();

            let _guard = login.login().unwrap().on_complete(move |result| {
                let _ = tx.send(result);
            });

            let outcome = rx.await.unwrap().unwrap();
            assert_eq!(outcome, LoginOutcome::Authenticated, "{kind}");
            assert_eq!(transport.completed(), 1);
        }
    }

    #[tokio::test]
    async fn test_on_complete_cancelled_drops_callback() {
        for kind in [LoginKind::Get, LoginKind::Post, LoginKind::Token] {
            let (transport, login) = deferred_login(kind);
            let called = Arc::new(AtomicBool::new(false));

            let flag = called.clone();
            let guard = login.login().unwrap().on_complete(move |_| {
                flag.store(true, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
            guard.cancel();
            tokio::time::sleep(Duration::from_millis(250)).await;

            assert!(!called.load(Ordering::SeqCst), "{kind} callback ran after cancel");
            assert_eq!(transport.completed(), 0, "{kind} request outlived cancel");
        }
    }
}
