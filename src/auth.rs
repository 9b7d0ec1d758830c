use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::TrinoError;

/// A credential that authenticates outgoing requests.
#[async_trait]
pub trait Credential: Send + Sync + fmt::Debug {
    /// Checks the credential is usable before the first request is sent.
    async fn validate(&self) -> Result<(), TrinoError>;

    /// Adds the credential to an outgoing request.
    async fn attach(&self, request: RequestBuilder) -> Result<RequestBuilder, TrinoError>;
}

/// HTTP basic authentication. The password is optional.
#[derive(Clone)]
pub struct BasicAuth {
    user: String,
    password: Option<String>,
}

impl BasicAuth {
    pub fn new(user: impl Into<String>, password: Option<String>) -> Self {
        Self {
            user: user.into(),
            password,
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl Credential for BasicAuth {
    async fn validate(&self) -> Result<(), TrinoError> {
        if self.user.trim().is_empty() {
            return Err(TrinoError::Auth(
                "basic authentication requires a user".to_owned(),
            ));
        }
        Ok(())
    }

    async fn attach(&self, request: RequestBuilder) -> Result<RequestBuilder, TrinoError> {
        Ok(request.basic_auth(&self.user, self.password.as_deref()))
    }
}

/// LDAP password authentication, sent as HTTP basic credentials.
///
/// Both user and password are mandatory.
#[derive(Clone)]
pub struct LdapAuth {
    user: String,
    password: String,
}

impl LdapAuth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LdapAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapAuth")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Credential for LdapAuth {
    async fn validate(&self) -> Result<(), TrinoError> {
        if self.user.trim().is_empty() {
            return Err(TrinoError::Auth("LDAP authentication requires a user".to_owned()));
        }
        if self.password.is_empty() {
            return Err(TrinoError::Auth(
                "LDAP authentication requires a password".to_owned(),
            ));
        }
        Ok(())
    }

    async fn attach(&self, request: RequestBuilder) -> Result<RequestBuilder, TrinoError> {
        Ok(request.basic_auth(&self.user, Some(&self.password)))
    }
}

/// A pre-issued bearer token such as a JWT.
#[derive(Clone)]
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    /// Accepts the token with or without its `Bearer ` prefix.
    pub fn new(token: impl AsRef<str>) -> Self {
        let trimmed = token.as_ref().trim();
        let token = match trimmed.get(..7) {
            Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim(),
            _ => trimmed,
        };
        Self {
            token: token.to_owned(),
        }
    }
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Credential for BearerAuth {
    async fn validate(&self) -> Result<(), TrinoError> {
        if self.token.is_empty() {
            return Err(TrinoError::Auth("bearer token is empty".to_owned()));
        }
        Ok(())
    }

    async fn attach(&self, request: RequestBuilder) -> Result<RequestBuilder, TrinoError> {
        Ok(request.bearer_auth(&self.token))
    }
}

/// Source of short-lived access tokens, such as a cloud default credential chain.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, TrinoError>;
}

/// Bearer authentication with a token fetched from a [`TokenSource`] on every request.
#[derive(Clone)]
pub struct TokenProviderAuth {
    source: Arc<dyn TokenSource>,
}

impl TokenProviderAuth {
    pub fn new(source: impl TokenSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
        }
    }
}

impl fmt::Debug for TokenProviderAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProviderAuth").finish_non_exhaustive()
    }
}

#[async_trait]
impl Credential for TokenProviderAuth {
    async fn validate(&self) -> Result<(), TrinoError> {
        Ok(())
    }

    async fn attach(&self, request: RequestBuilder) -> Result<RequestBuilder, TrinoError> {
        let token = self.source.token().await?;
        Ok(request.bearer_auth(token))
    }
}

/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Option<Instant>,
}

/// OAuth 2.0 client-credentials grant. Tokens are cached until shortly before expiry.
pub struct OAuthClientCredentials {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthClientCredentials {
    pub fn new(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
            cached: Mutex::new(None),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Returns a cached token, requesting a fresh one when missing or expiring.
    pub async fn access_token(&self) -> Result<String, TrinoError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            let fresh = token
                .expires_at
                .map_or(true, |expires_at| Instant::now() + TOKEN_EXPIRY_SKEW < expires_at);
            if fresh {
                return Ok(token.token.clone());
            }
        }

        let token = self.request_token().await?;
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn request_token(&self) -> Result<CachedToken, TrinoError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TrinoError::Auth(format!(
                "token endpoint returned {}: {body}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| TrinoError::Auth(format!("invalid token response: {err}")))?;
        tracing::debug!(expires_in = ?token.expires_in, "acquired client-credentials token");
        Ok(CachedToken {
            token: token.access_token,
            expires_at: token
                .expires_in
                .map(|seconds| Instant::now() + Duration::from_secs(seconds)),
        })
    }
}

impl fmt::Debug for OAuthClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClientCredentials")
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

#[async_trait]
impl Credential for OAuthClientCredentials {
    async fn validate(&self) -> Result<(), TrinoError> {
        if self.client_id.trim().is_empty() || self.client_secret.is_empty() {
            return Err(TrinoError::Auth(
                "client credentials require a client id and secret".to_owned(),
            ));
        }
        reqwest::Url::parse(&self.token_endpoint).map_err(|err| {
            TrinoError::Auth(format!("invalid token endpoint '{}': {err}", self.token_endpoint))
        })?;
        Ok(())
    }

    async fn attach(&self, request: RequestBuilder) -> Result<RequestBuilder, TrinoError> {
        let token = self.access_token().await?;
        Ok(request.bearer_auth(token))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use reqwest::header::AUTHORIZATION;

    use crate::{
        auth::{BasicAuth, BearerAuth, Credential, LdapAuth, TokenProviderAuth, TokenSource},
        TrinoError,
    };

    async fn authorization(credential: &dyn Credential) -> String {
        let request = reqwest::Client::new().get("http://localhost:8080/v1/statement");
        let request = credential
            .attach(request)
            .await
            .expect("must attach")
            .build()
            .expect("must build");
        request.headers()[AUTHORIZATION]
            .to_str()
            .expect("ascii header")
            .to_owned()
    }

    #[tokio::test]
    async fn basic_auth_encodes_user_and_password() {
        let credential = BasicAuth::new("alice", Some("secret".to_owned()));
        credential.validate().await.expect("valid");
        assert_eq!(authorization(&credential).await, "Basic YWxpY2U6c2VjcmV0");

        let user_only = BasicAuth::new("alice", None);
        assert_eq!(authorization(&user_only).await, "Basic YWxpY2U6");
    }

    #[tokio::test]
    async fn credentials_validate_required_fields() {
        assert!(matches!(
            BasicAuth::new(" ", None).validate().await,
            Err(TrinoError::Auth(_))
        ));
        assert!(LdapAuth::new("alice", "").validate().await.is_err());
        assert!(LdapAuth::new("alice", "pw").validate().await.is_ok());
        assert!(BearerAuth::new("").validate().await.is_err());
    }

    #[tokio::test]
    async fn bearer_prefix_is_normalized() {
        assert_eq!(authorization(&BearerAuth::new("abc")).await, "Bearer abc");
        assert_eq!(authorization(&BearerAuth::new("bEaReR abc")).await, "Bearer abc");
    }

    #[tokio::test]
    async fn token_provider_is_asked_on_every_request() {
        struct Fixed;

        #[async_trait]
        impl TokenSource for Fixed {
            async fn token(&self) -> Result<String, TrinoError> {
                Ok("from-provider".to_owned())
            }
        }

        let credential = TokenProviderAuth::new(Fixed);
        assert_eq!(authorization(&credential).await, "Bearer from-provider");
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let debug = format!(
            "{:?} {:?} {:?}",
            BasicAuth::new("alice", Some("pw-basic".to_owned())),
            LdapAuth::new("alice", "pw-ldap"),
            BearerAuth::new("tok-bearer")
        );
        assert!(!debug.contains("pw-basic"));
        assert!(!debug.contains("pw-ldap"));
        assert!(!debug.contains("tok-bearer"));
        assert!(debug.contains("alice"));
    }
}
