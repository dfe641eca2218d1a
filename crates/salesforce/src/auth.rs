//! OAuth2 authentication against a Salesforce org.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use forcebridge_common::{BridgeError, BridgeResult};

const PRODUCTION_LOGIN_URL: &str = "https://login.salesforce.com";
const SANDBOX_LOGIN_URL: &str = "https://test.salesforce.com";

/// The credentials downstream clients attach to requests: the value of the
/// `Authorization` header and the org's instance URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub authorization: String,
    pub instance_url: String,
}

/// Provides access tokens to the REST client and the Bayeux transport.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// The current credentials, authenticating first when none are cached.
    async fn snapshot(&self) -> BridgeResult<AuthSnapshot>;

    /// Discard cached credentials and acquire fresh ones. Called after a
    /// downstream 401.
    async fn refresh(&self) -> BridgeResult<AuthSnapshot>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
    token_type: String,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// OAuth2 password-grant authenticator, one per org. The token is shared by
/// the REST client (resource provisioning) and the CometD transport.
pub struct PasswordAuthenticator {
    consumer_key: String,
    consumer_secret: String,
    username: String,
    password: String,
    sandbox: bool,
    http: reqwest::Client,
    state: RwLock<Option<AuthSnapshot>>,
}

impl PasswordAuthenticator {
    pub fn new(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        sandbox: bool,
    ) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            username: username.into(),
            password: password.into(),
            sandbox,
            http: reqwest::Client::new(),
            state: RwLock::new(None),
        }
    }

    pub fn login_url(&self) -> &'static str {
        if self.sandbox {
            SANDBOX_LOGIN_URL
        } else {
            PRODUCTION_LOGIN_URL
        }
    }

    async fn authenticate(&self) -> BridgeResult<AuthSnapshot> {
        let url = format!("{}/services/oauth2/token", self.login_url());
        debug!(username = %self.username, url = %url, "requesting access token");

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", self.consumer_key.as_str()),
                ("client_secret", self.consumer_secret.as_str()),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BridgeError::Auth(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let rejection = response
                .json::<TokenErrorResponse>()
                .await
                .map(|body| format!("{}: {}", body.error, body.error_description))
                .unwrap_or_else(|_| format!("status {status}"));
            return Err(BridgeError::Auth(format!(
                "token request for {:?} rejected: {rejection}",
                self.username
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Auth(format!("malformed token response: {e}")))?;

        info!(
            username = %self.username,
            instance_url = %token.instance_url,
            "authenticated with Salesforce"
        );
        Ok(AuthSnapshot {
            authorization: format!("{} {}", token.token_type, token.access_token),
            instance_url: token.instance_url,
        })
    }
}

#[async_trait]
impl Authenticator for PasswordAuthenticator {
    async fn snapshot(&self) -> BridgeResult<AuthSnapshot> {
        if let Some(snapshot) = self.state.read().await.as_ref() {
            return Ok(snapshot.clone());
        }
        let mut state = self.state.write().await;
        // another task may have authenticated while we waited for the lock
        if let Some(snapshot) = state.as_ref() {
            return Ok(snapshot.clone());
        }
        let snapshot = self.authenticate().await?;
        *state = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn refresh(&self) -> BridgeResult<AuthSnapshot> {
        let mut state = self.state.write().await;
        let snapshot = self.authenticate().await?;
        *state = Some(snapshot.clone());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_url_selection() {
        let production = PasswordAuthenticator::new("key", "secret", "user", "pass", false);
        assert_eq!(production.login_url(), "https://login.salesforce.com");

        let sandbox = PasswordAuthenticator::new("key", "secret", "user", "pass", true);
        assert_eq!(sandbox.login_url(), "https://test.salesforce.com");
    }

    #[test]
    fn test_token_response_parsing() {
        let raw = r#"{
            "access_token": "00Dxx!abc",
            "instance_url": "https://my-org.my.salesforce.com",
            "id": "https://login.salesforce.com/id/00D/005",
            "token_type": "Bearer",
            "issued_at": "1521280800000",
            "signature": "sig"
        }"#;
        let token: TokenResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.access_token, "00Dxx!abc");
        assert_eq!(token.instance_url, "https://my-org.my.salesforce.com");
    }

    #[test]
    fn test_token_error_parsing() {
        let raw = r#"{"error":"invalid_grant","error_description":"authentication failure"}"#;
        let error: TokenErrorResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(error.error, "invalid_grant");
        assert_eq!(error.error_description, "authentication failure");
    }
}
