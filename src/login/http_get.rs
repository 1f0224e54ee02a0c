use std::sync::Arc;

use tracing::debug;

use super::{HttpLogin, LoginKind, LoginResult, fix_url};
use crate::settings::SettingsStore;
use crate::sites::Site;
use crate::transport::{FormFields, HttpRequest, PendingReply, Transport};

/// Sends the credentials as the query string of a GET request.
pub struct HttpGetLogin {
    site: Arc<Site>,
    transport: Arc<dyn Transport>,
    settings: Arc<dyn SettingsStore>,
}

impl HttpGetLogin {
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
}

impl HttpLogin for HttpGetLogin {
    fn kind(&self) -> LoginKind {
        LoginKind::Get
    }

    fn site(&self) -> &Arc<Site> {
        &self.site
    }

    fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    fn get_reply(&self, login_url: &str, query: FormFields) -> LoginResult<PendingReply> {
        let mut url = fix_url(self.site.base_url(), login_url)?;
        url.set_query(None);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }

        debug!(site = %self.site.id(), url = %url.path(), "GET login");
        Ok(self.transport.get(HttpRequest::new(url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::login::test_support::{credentials, site};
    use crate::login::{LoginConfig, LoginError, LoginOutcome};
    use crate::transport::Method;
    use crate::transport::testing::RecordingTransport;

    fn user_pass_site(base_url: &str) -> Arc<Site> {
        site(
            base_url,
            LoginConfig::new(LoginKind::Get, "/login")
                .with_field("user", "auth/pseudo")
                .with_field("pass", "auth/password"),
        )
    }

    #[tokio::test]
    async fn test_issues_single_get_with_query() {
        let transport = RecordingTransport::new();
        let login = HttpGetLogin::new(
            user_pass_site("https://example.com"),
            Arc::new(transport.clone()),
            credentials(&[("auth/pseudo", "a"), ("auth/password", "b")]),
        );

        let outcome = login.login().unwrap().wait().await.unwrap();
        assert_eq!(outcome, LoginOutcome::Authenticated);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].request.url.query(), Some("user=a&pass=b"));
        assert_eq!(requests[0].request.url.path(), "/login");
        assert!(requests[0].form.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let transport = RecordingTransport::new();
        transport.respond(403, "");
        let login = HttpGetLogin::new(
            user_pass_site("https://example.com"),
            Arc::new(transport.clone()),
            credentials(&[("auth/pseudo", "a"), ("auth/password", "wrong")]),
        );

        let outcome = login.login().unwrap().wait().await.unwrap();
        assert_eq!(outcome, LoginOutcome::Rejected { status: 403 });
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_async() {
        let transport = RecordingTransport::new();
        transport.fail("connection reset");
        let login = HttpGetLogin::new(
            user_pass_site("https://example.com"),
            Arc::new(transport.clone()),
            credentials(&[]),
        );

        let pending = login.login().unwrap();
        assert!(matches!(pending.wait().await, Err(LoginError::Network(_))));
    }

    #[test]
    fn test_malformed_base_url_fails_fast() {
        let transport = RecordingTransport::new();
        let login = HttpGetLogin::new(
            user_pass_site("http://"),
            Arc::new(transport.clone()),
            credentials(&[]),
        );

        assert!(matches!(login.login(), Err(LoginError::InvalidUrl { .. })));
        assert!(transport.requests().is_empty());
    }
}
