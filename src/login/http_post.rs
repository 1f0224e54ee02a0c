use std::sync::Arc;

use tracing::debug;

use super::{HttpLogin, LoginKind, LoginResult, fix_url};
use crate::settings::SettingsStore;
use crate::sites::Site;
use crate::transport::{FormFields, HttpRequest, PendingReply, Transport};

/// Sends the credentials as an url-encoded form body.
pub struct HttpPostLogin {
    site: Arc<Site>,
    transport: Arc<dyn Transport>,
    settings: Arc<dyn SettingsStore>,
}

impl HttpPostLogin {
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

impl HttpLogin for HttpPostLogin {
    fn kind(&self) -> LoginKind {
        LoginKind::Post
    }

    fn site(&self) -> &Arc<Site> {
        &self.site
    }

    fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    fn get_reply(&self, login_url: &str, query: FormFields) -> LoginResult<PendingReply> {
        let url = fix_url(self.site.base_url(), login_url)?;
        debug!(site = %self.site.id(), url = %url.path(), fields = query.len(), "POST login");
        Ok(self.transport.post(HttpRequest::new(url), query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::login::test_support::{credentials, site};
    use crate::login::{LoginCheck, LoginConfig, LoginOutcome};
    use crate::transport::Method;
    use crate::transport::testing::RecordingTransport;

    #[tokio::test]
    async fn test_posts_form_body() {
        let transport = RecordingTransport::new();
        transport.respond_with_headers(200, &[("Set-Cookie", "session_id=xyz; HttpOnly")]);

        let login = HttpPostLogin::new(
            site(
                "https://board.example.net/",
                LoginConfig::new(LoginKind::Post, "session")
                    .with_check(LoginCheck::Cookie("session_id".to_string())),
            ),
            Arc::new(transport.clone()),
            credentials(&[("auth/pseudo", "alice"), ("auth/password", "hunter2")]),
        );

        let outcome = login.login().unwrap().wait().await.unwrap();
        assert_eq!(outcome, LoginOutcome::Authenticated);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[0].request.url.as_str(), "https://board.example.net/session");
        assert_eq!(requests[0].request.url.query(), None);
        assert_eq!(
            requests[0].form,
            vec![
                ("login".to_string(), "alice".to_string()),
                ("password".to_string(), "hunter2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_cookie_is_rejected() {
        let transport = RecordingTransport::new();
        transport.respond(200, "<html>bad password</html>");

        let login = HttpPostLogin::new(
            site(
                "https://board.example.net",
                LoginConfig::new(LoginKind::Post, "/session")
                    .with_check(LoginCheck::Cookie("session_id".to_string())),
            ),
            Arc::new(transport),
            credentials(&[]),
        );

        let outcome = login.login().unwrap().wait().await.unwrap();
        assert_eq!(outcome, LoginOutcome::Rejected { status: 200 });
    }
}
