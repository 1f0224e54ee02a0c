use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{HttpLogin, LoginCheck, LoginKind, LoginResult, PendingLogin, fix_url};
use crate::settings::SettingsStore;
use crate::sites::Site;
use crate::transport::{
    AbortOnDrop, FormFields, HttpRequest, HttpResponse, NetworkError, PendingReply, Transport,
};

/// Exchanges the stored credentials for a bearer token once per host.
///
/// The token is cached by the transport, which attaches it as
/// `Authorization: Bearer` to every later request for that host.
pub struct TokenLogin {
    site: Arc<Site>,
    transport: Arc<dyn Transport>,
    settings: Arc<dyn SettingsStore>,
}

impl TokenLogin {
    pub fn new(
        site: Arc<Site>,
        transport: Arc<dyn Transport>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            site,
            transport,
            settings,
        }
    }

    /// Forget the cached token so the next login exchanges credentials again.
    pub fn logout(&self) -> LoginResult<()> {
        let url = fix_url(self.site.base_url(), &self.site.login().url)?;
        if let Some(host) = url.host_str() {
            self.transport.clear_bearer_token(host);
        }
        Ok(())
    }
}

fn extract_token(response: &HttpResponse, field: &str) -> Result<String, NetworkError> {
    let json: serde_json::Value = serde_json::from_str(&response.body)
        .map_err(|e| NetworkError::InvalidResponse(format!("token response is not JSON: {}", e)))?;
    json.get(field)
        .and_then(|v| v.as_str())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| NetworkError::InvalidResponse(format!("token field '{}' missing", field)))
}

impl HttpLogin for TokenLogin {
    fn kind(&self) -> LoginKind {
        LoginKind::Token
    }

    fn site(&self) -> &Arc<Site> {
        &self.site
    }

    fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    fn get_reply(&self, login_url: &str, query: FormFields) -> LoginResult<PendingReply> {
        let url = fix_url(self.site.base_url(), login_url)?;
        let host = url.host_str().unwrap_or_default().to_string();

        if self.transport.bearer_token(&host).is_some() {
            debug!(site = %self.site.id(), host = %host, "Reusing cached bearer token");
            return Ok(PendingReply::ready(Ok(HttpResponse::new(url, 200))));
        }

        let exchange = self.transport.post(HttpRequest::new(url), query);
        let exchange_guard = AbortOnDrop::new(&exchange);
        let transport = self.transport.clone();
        let field = self.site.login().token_field.clone();
        let site_id = self.site.id().to_string();

        Ok(PendingReply::spawn(async move {
            // Cancelling the login drops this future and with it the exchange.
            let _exchange_guard = exchange_guard;
            let response = exchange.wait().await?;
            if !response.is_success() {
                warn!(site = %site_id, status = response.status, "Token exchange refused");
                return Ok(response);
            }
            let token = extract_token(&response, &field)?;
            transport.set_bearer_token(&host, token);
            info!(site = %site_id, host = %host, "Bearer token cached");
            Ok(response)
        }))
    }

    /// The exchange itself decides success, so only the status is checked.
    fn login(&self) -> LoginResult<PendingLogin> {
        let config = self.site.login();
        let reply = self.get_reply(&config.url, self.query())?;
        Ok(PendingLogin::new(reply, LoginCheck::Status))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::login::test_support::{credentials, site};
    use crate::login::{LoginConfig, LoginError, LoginOutcome};
    use crate::transport::testing::RecordingTransport;

    fn token_site() -> Arc<Site> {
        site(
            "https://api.example.com",
            LoginConfig::new(LoginKind::Token, "/oauth/token")
                .with_field("username", "auth/pseudo")
                .with_field("password", "auth/password"),
        )
    }

    #[tokio::test]
    async fn test_exchanges_and_caches_token() {
        let transport = RecordingTransport::new();
        transport.respond(200, r#"{"access_token":"tok-1","expires_in":3600}"#);
        let login = TokenLogin::new(
            token_site(),
            Arc::new(transport.clone()),
            credentials(&[("auth/pseudo", "a"), ("auth/password", "b")]),
        );

        let outcome = login.login().unwrap().wait().await.unwrap();
        assert_eq!(outcome, LoginOutcome::Authenticated);
        assert_eq!(transport.bearer_token("api.example.com").as_deref(), Some("tok-1"));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cached_token_skips_exchange() {
        let transport = RecordingTransport::new();
        transport.set_bearer_token("api.example.com", "already".to_string());
        let login = TokenLogin::new(token_site(), Arc::new(transport.clone()), credentials(&[]));

        let outcome = login.login().unwrap().wait().await.unwrap();
        assert!(outcome.is_authenticated());
        assert!(transport.requests().is_empty());

        login.logout().unwrap();
        assert!(transport.bearer_token("api.example.com").is_none());
    }

    #[tokio::test]
    async fn test_refused_exchange_is_rejected() {
        let transport = RecordingTransport::new();
        transport.respond(401, r#"{"error":"invalid_grant"}"#);
        let login = TokenLogin::new(token_site(), Arc::new(transport.clone()), credentials(&[]));

        let outcome = login.login().unwrap().wait().await.unwrap();
        assert_eq!(outcome, LoginOutcome::Rejected { status: 401 });
        assert!(transport.bearer_token("api.example.com").is_none());
    }

    #[tokio::test]
    async fn test_missing_token_field_is_an_error() {
        let transport = RecordingTransport::new();
        transport.respond(200, r#"{"token":"wrong-field"}"#);
        let login = TokenLogin::new(token_site(), Arc::new(transport.clone()), credentials(&[]));

        let result = login.login().unwrap().wait().await;
        assert!(matches!(
            result,
            Err(LoginError::Network(NetworkError::InvalidResponse(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancel_aborts_token_exchange() {
        let transport = RecordingTransport::new();
        transport
            .defer(Duration::from_millis(100))
            .respond(200, r#"{"access_token":"late"}"#);
        let login = TokenLogin::new(token_site(), Arc::new(transport.clone()), credentials(&[]));

        let pending = login.login().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        pending.cancel();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(transport.requests().len(), 1);
        assert_eq!(transport.completed(), 0);
        assert!(transport.bearer_token("api.example.com").is_none());
        assert!(matches!(
            pending.wait().await,
            Err(LoginError::Network(NetworkError::Cancelled))
        ));
    }
}
