use std::{fmt, sync::Arc};

use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{BearerAuth, Credential},
    buffer::ReadAheadBuffer,
    pages::Pages,
    records::Records,
    session::{ClientSession, SessionProperties},
    types::{QueryStatus, ServerInfo},
    ClientOptions, Result, Statement, StatementClient, TrinoError,
};

/// Entry point for running statements against a coordinator.
///
/// Cloning is cheap: clones share the HTTP connection pool and the session,
/// so catalog or schema changes made by one query are seen by the next.
#[derive(Clone)]
pub struct TrinoClient {
    http: reqwest::Client,
    session: Arc<ClientSession>,
    credential: Option<Arc<dyn Credential>>,
    options: Arc<ClientOptions>,
}

impl fmt::Debug for TrinoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrinoClient")
            .field("session", &self.session.properties())
            .field("credential", &self.credential)
            .field("options", &self.options)
            .finish()
    }
}

impl TrinoClient {
    /// Creates a client with default options.
    pub fn new(properties: SessionProperties) -> Result<Self> {
        Self::with_options(properties, ClientOptions::default())
    }

    /// Creates a client with explicit options.
    pub fn with_options(properties: SessionProperties, options: ClientOptions) -> Result<Self> {
        options.validate()?;
        properties.protocol_headers()?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("trino-http/", env!("CARGO_PKG_VERSION")))
            .gzip(options.compression)
            .brotli(options.compression)
            .build()?;
        Ok(Self {
            http,
            session: Arc::new(ClientSession::new(properties)),
            credential: None,
            options: Arc::new(options),
        })
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `TRINO_SERVER`: coordinator URL, e.g. `http://localhost:8080`
    /// - `TRINO_USER`: user name (optional)
    /// - `TRINO_CATALOG`, `TRINO_SCHEMA`: session defaults (optional)
    /// - `TRINO_ACCESS_TOKEN`: bearer token (optional)
    ///
    /// ```no_run
    /// use trino_http::TrinoClient;
    ///
    /// let client = TrinoClient::from_env().expect("missing TRINO_SERVER");
    /// ```
    pub fn from_env() -> Result<Self> {
        let server = env_var("TRINO_SERVER")
            .ok_or_else(|| TrinoError::Config("missing TRINO_SERVER environment variable".to_owned()))?;
        let mut properties = SessionProperties::new(&server)?;
        if let Some(user) = env_var("TRINO_USER") {
            properties = properties.with_user(user);
        }
        if let Some(catalog) = env_var("TRINO_CATALOG") {
            properties = properties.with_catalog(catalog);
        }
        if let Some(schema) = env_var("TRINO_SCHEMA") {
            properties = properties.with_schema(schema);
        }

        let client = Self::new(properties)?;
        Ok(match env_var("TRINO_ACCESS_TOKEN") {
            Some(token) => client.with_credential(BearerAuth::new(token)),
            None => client,
        })
    }

    /// Authenticates every request with `credential`.
    pub fn with_credential(mut self, credential: impl Credential + 'static) -> Self {
        self.credential = Some(Arc::new(credential));
        self
    }

    /// The session shared by queries started from this client.
    pub fn session(&self) -> &Arc<ClientSession> {
        &self.session
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Runs a statement and returns its rows.
    pub async fn query(&self, statement: impl Into<Statement>) -> Result<Records> {
        Ok(Records::new(self.start(statement.into()).await?))
    }

    /// Runs a statement and returns its result pages.
    pub async fn pages(&self, statement: impl Into<Statement>) -> Result<Pages> {
        self.start(statement.into()).await
    }

    /// Runs a statement to completion, discarding rows, and returns the final
    /// status with its update type and count.
    pub async fn execute(&self, statement: impl Into<Statement>) -> Result<QueryStatus> {
        let mut statement = statement.into();
        statement.want_rows = false;
        let pages = self.start(statement).await?;
        pages.read_to_end().await?;
        pages
            .last_status()
            .or_else(|| pages.statement_client().status())
            .ok_or_else(|| TrinoError::Contract("statement finished without a status".to_owned()))
    }

    /// Submits a statement and returns a stream over its pages.
    pub async fn start(&self, statement: Statement) -> Result<Pages> {
        if let Some(credential) = &self.credential {
            credential.validate().await?;
        }
        let cancellation = statement
            .cancellation
            .clone()
            .unwrap_or_else(CancellationToken::new);
        let client = Arc::new(StatementClient::new(
            self.http.clone(),
            self.session.clone(),
            self.credential.clone(),
            self.options.clone(),
            cancellation,
        )?);

        let first = match client.submit(&statement).await {
            Ok(page) => page,
            Err(err) => {
                if let Some(query_error) = err.query_error() {
                    let stats = client.status().map(|status| status.stats).unwrap_or_default();
                    for listener in &statement.listeners {
                        listener(&stats, Some(query_error));
                    }
                }
                return Err(err);
            }
        };

        let buffer = ReadAheadBuffer::new(client, first, statement.want_rows, statement.listeners);
        Ok(Pages::new(buffer))
    }

    /// Fetches the coordinator's version and state from `/v1/info`.
    pub async fn server_info(&self) -> Result<ServerInfo> {
        let properties = self.session.properties();
        let url = properties
            .server
            .join("v1/info")
            .map_err(|err| TrinoError::Config(format!("invalid info URL: {err}")))?;

        let mut request = self.http.get(url).timeout(self.options.request_timeout);
        if let Some(credential) = &self.credential {
            request = credential.attach(request).await?;
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(TrinoError::Http {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body)
            .map_err(|err| TrinoError::Decode(format!("invalid server info JSON: {err}; body: {body}")))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use crate::{auth::BasicAuth, ClientOptions, SessionProperties, TrinoClient, TrinoError};

    fn properties() -> SessionProperties {
        SessionProperties::new("http://localhost:8080").expect("valid server")
    }

    #[test]
    fn debug_redacts_credentials() {
        let client = TrinoClient::new(properties().with_extra_credential("k", "extra-secret"))
            .expect("must build")
            .with_credential(BasicAuth::new("alice", Some("hunter2".to_owned())));
        let debug = format!("{client:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("extra-secret"));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let options = ClientOptions {
            buffer_size_bytes: 0,
            ..ClientOptions::default()
        };
        let err = TrinoClient::with_options(properties(), options).expect_err("must fail");
        assert!(matches!(err, TrinoError::Config(_)));
    }

    #[test]
    fn invalid_protocol_name_is_rejected() {
        let err = TrinoClient::new(properties().with_protocol_name("Tri no"))
            .expect_err("must fail");
        assert!(matches!(err, TrinoError::Config(_)));
    }
}
