use std::{
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use reqwest::{header::HeaderMap, Method, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    auth::Credential,
    headers::ProtocolHeaders,
    session::{ClientSession, SessionProperties, SessionUpdate},
    state::{AtomicQueryState, QueryState},
    sync::lock,
    types::{Page, QueryStatus},
    wire, ClientOptions, Result, Statement, TrinoError,
};

/// Statuses the coordinator uses to shed load. These are retried immediately.
const RETRYABLE_STATUSES: [StatusCode; 3] = [
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Drives the HTTP lifecycle of one query: submission, page advancement,
/// cancellation and timeout.
///
/// Session changes announced in response headers are collected on every
/// response and applied to the shared [`ClientSession`] once, when the last
/// page has been read.
pub struct StatementClient {
    http: reqwest::Client,
    session: Arc<ClientSession>,
    properties: Arc<SessionProperties>,
    names: ProtocolHeaders,
    credential: Option<Arc<dyn Credential>>,
    options: Arc<ClientOptions>,
    cancellation: CancellationToken,
    state: AtomicQueryState,
    started: Instant,
    status: Mutex<Option<QueryStatus>>,
    backoff: Mutex<Backoff>,
    pending: Mutex<SessionUpdate>,
}

impl fmt::Debug for StatementClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementClient")
            .field("query_id", &self.query_id())
            .field("state", &self.state())
            .field("server", &self.properties.server.as_str())
            .field("elapsed", &self.started.elapsed())
            .finish_non_exhaustive()
    }
}

impl StatementClient {
    pub(crate) fn new(
        http: reqwest::Client,
        session: Arc<ClientSession>,
        credential: Option<Arc<dyn Credential>>,
        options: Arc<ClientOptions>,
        cancellation: CancellationToken,
    ) -> Result<Self> {
        let properties = session.properties();
        let names = properties.protocol_headers()?;
        Ok(Self {
            http,
            session,
            properties,
            names,
            credential,
            backoff: Mutex::new(Backoff::new(&options)),
            options,
            cancellation,
            state: AtomicQueryState::new(),
            started: Instant::now(),
            status: Mutex::new(None),
            pending: Mutex::new(SessionUpdate::default()),
        })
    }

    /// Submits the statement and returns the first response as a page.
    ///
    /// Parameterized statements are sent as `EXECUTE <name> USING ...` with the
    /// original text registered as a prepared statement for this request only.
    pub async fn submit(&self, statement: &Statement) -> Result<Page> {
        let (sql, transient) = statement.submission(self.names.name());
        let url = self
            .properties
            .server
            .join("v1/statement")
            .map_err(|err| TrinoError::Config(format!("invalid statement URL: {err}")))?;
        let headers = self.properties.statement_headers(
            &self.names,
            transient
                .as_ref()
                .map(|(name, sql)| (name.as_str(), sql.as_str())),
        )?;

        if let Some((name, _)) = &transient {
            tracing::debug!(prepared = %name, "submitting parameterized statement");
        }
        let body = self
            .send(Method::POST, url, Some((headers, sql)), &[StatusCode::OK])
            .await?;
        let page = wire::decode_page(&body)?;
        tracing::info!(
            query_id = %page.status.id,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "query created"
        );

        if let Some(error) = &page.status.error {
            self.state.transition(QueryState::ClientError);
            self.store(&page.status);
            return Err(TrinoError::Query(Box::new(error.clone())));
        }
        self.store(&page.status);
        if page.status.is_last_page() {
            self.finish();
        }
        Ok(page)
    }

    /// Fetches the next page.
    ///
    /// Fails with [`TrinoError::Query`] when the server reports an error,
    /// [`TrinoError::Cancelled`] when the cancellation token is set and
    /// [`TrinoError::Timeout`] when the query outlived its time limit. The
    /// last two cancel the query on the server first.
    pub async fn advance(&self) -> Result<Page> {
        if self.state() == QueryState::ClientAborted {
            return Err(TrinoError::Cancelled);
        }
        let next = self
            .next_uri()
            .ok_or_else(|| TrinoError::Contract("query has no next page to advance to".to_owned()))?;
        let url = target_size_url(&next, self.options.target_result_size_mb)?;

        tracing::debug!(next_uri = %url, "advancing query");
        let body = self.send(Method::GET, url, None, &[StatusCode::OK]).await?;
        let page = wire::decode_page(&body)?;

        if let Some(error) = &page.status.error {
            self.state.transition(QueryState::ClientError);
            self.store(&page.status);
            tracing::warn!(
                query_id = %page.status.id,
                error = %error.message,
                error_name = error.error_name.as_deref().unwrap_or_default(),
                "query failed"
            );
            return Err(TrinoError::Query(Box::new(error.clone())));
        }

        if self.cancellation.is_cancelled() {
            if let Err(err) = self.cancel().await {
                tracing::warn!(error = %err, "cancel request failed");
            }
            return Err(TrinoError::Cancelled);
        }

        self.store(&page.status);

        if page.status.is_last_page() {
            self.finish();
        } else if let Some((elapsed, limit)) = self.timeout_exceeded() {
            tracing::info!(
                query_id = %page.status.id,
                elapsed_ms = elapsed.as_millis() as u64,
                limit_ms = limit.as_millis() as u64,
                "query timed out"
            );
            if let Err(err) = self.cancel().await {
                tracing::warn!(error = %err, "cancel request failed");
            }
            return Err(TrinoError::Timeout { elapsed, limit });
        }

        let finished = self.state() == QueryState::Finished;
        let delay = lock(&self.backoff).next_delay(!page.has_rows() && !finished, &self.options);
        if let Some(delay) = delay {
            tracing::debug!(
                query_id = %page.status.id,
                delay_ms = delay.as_millis() as u64,
                "no data yet, backing off"
            );
            tokio::time::sleep(delay).await;
        }

        Ok(page)
    }

    /// Cancels the query on the server.
    ///
    /// Only the first caller moves the query to `ClientAborted` and sends the
    /// `DELETE`; later calls have no effect. Returns whether the query is now
    /// client-aborted.
    pub async fn cancel(&self) -> Result<bool> {
        if !self.state.transition(QueryState::ClientAborted) {
            tracing::debug!(
                query_id = ?self.query_id(),
                state = %self.state(),
                "query already left the running state, not cancelling"
            );
            return Ok(self.state() == QueryState::ClientAborted);
        }

        let Some(next) = self.next_uri() else {
            return Ok(true);
        };
        tracing::info!(query_id = ?self.query_id(), "cancelling query");
        let url = Url::parse(&next)
            .map_err(|err| TrinoError::Decode(format!("invalid next URI '{next}': {err}")))?;
        self.send(
            Method::DELETE,
            url,
            None,
            &[StatusCode::OK, StatusCode::NO_CONTENT],
        )
        .await?;
        Ok(true)
    }

    pub fn state(&self) -> QueryState {
        self.state.get()
    }

    /// Metadata of the most recent response.
    pub fn status(&self) -> Option<QueryStatus> {
        lock(&self.status).clone()
    }

    pub fn query_id(&self) -> Option<String> {
        lock(&self.status).as_ref().map(|status| status.id.clone())
    }

    /// Whether the query is still running past its time limit.
    pub fn is_timeout(&self) -> bool {
        self.timeout_exceeded().is_some()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Session changes collected so far and not yet applied.
    pub fn pending_session_update(&self) -> SessionUpdate {
        lock(&self.pending).clone()
    }

    fn next_uri(&self) -> Option<String> {
        lock(&self.status)
            .as_ref()
            .and_then(|status| status.next_uri.clone())
            .filter(|next| !next.is_empty())
    }

    fn store(&self, status: &QueryStatus) {
        *lock(&self.status) = Some(status.clone());
    }

    fn finish(&self) {
        if self.state.transition(QueryState::Finished) {
            let update = lock(&self.pending).clone();
            if !update.is_empty() {
                self.session.apply(&update);
            }
            tracing::info!(
                query_id = ?self.query_id(),
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "query finished"
            );
        }
    }

    pub(crate) fn timeout_exceeded(&self) -> Option<(Duration, Duration)> {
        let limit = self.options.query_timeout.filter(|limit| !limit.is_zero())?;
        let elapsed = self.started.elapsed();
        (self.state() == QueryState::Running && elapsed > limit).then_some((elapsed, limit))
    }

    /// Sends one exchange, retrying load-shedding statuses, and returns the body.
    async fn send(
        &self,
        method: Method,
        url: Url,
        statement: Option<(HeaderMap, String)>,
        expected: &[StatusCode],
    ) -> Result<String> {
        let mut attempt = 0usize;
        loop {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .timeout(self.options.request_timeout);
            if let Some(user) = self.request_user() {
                request = request.header(self.names.user(), user);
            }
            for (name, value) in &self.properties.additional_headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some((headers, sql)) = &statement {
                request = request.headers(headers.clone()).body(sql.clone());
            }
            if let Some(credential) = &self.credential {
                request = credential.attach(request).await?;
            }

            let response = request.send().await?;
            let status = response.status();
            let may_retry = self.options.max_retries.map_or(true, |max| attempt < max);
            if RETRYABLE_STATUSES.contains(&status) && may_retry {
                attempt += 1;
                tracing::debug!(
                    status = status.as_u16(),
                    attempt,
                    method = %method,
                    "retrying request"
                );
                continue;
            }

            let headers = response.headers().clone();
            let body = response.text().await?;
            if !expected.contains(&status) {
                return Err(TrinoError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            lock(&self.pending).absorb(&self.names, &headers);
            return Ok(body);
        }
    }

    /// The user header value: the session user, or the source when neither a
    /// user nor a credential identifies the caller.
    fn request_user(&self) -> Option<&str> {
        match (&self.properties.user, &self.credential) {
            (Some(user), _) => Some(user.as_str()),
            (None, None) => Some(self.properties.source.as_str()),
            (None, Some(_)) => None,
        }
    }
}

/// Poll delay applied after empty pages.
#[derive(Debug)]
struct Backoff {
    delay: Duration,
    read_count: u32,
}

impl Backoff {
    fn new(options: &ClientOptions) -> Self {
        Self {
            delay: options.initial_read_delay,
            read_count: 0,
        }
    }

    /// Records one read and returns the delay to wait before returning it, if any.
    ///
    /// The delay never shrinks during the life of a query.
    fn next_delay(&mut self, empty: bool, options: &ClientOptions) -> Option<Duration> {
        let delay = (empty && self.read_count >= options.empty_reads_before_backoff)
            .then_some(self.delay);
        if delay.is_some() && self.delay < options.max_read_delay {
            let grown = (self.delay.as_nanos() as f64 * options.read_delay_backoff).round();
            self.delay = Duration::from_nanos(grown as u64).min(options.max_read_delay);
        }
        self.read_count = self.read_count.saturating_add(1);
        delay
    }
}

/// Adds the `targetResultSize` hint to locations of the executing phase.
fn target_size_url(next: &str, target_mb: u64) -> Result<Url> {
    let mut url = Url::parse(next)
        .map_err(|err| TrinoError::Decode(format!("invalid next URI '{next}': {err}")))?;
    if url.path().contains("/executing") {
        url.query_pairs_mut()
            .append_pair("targetResultSize", &format!("{target_mb}MB"));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{target_size_url, Backoff};
    use crate::ClientOptions;

    #[test]
    fn executing_locations_get_size_hint() {
        let url = target_size_url("http://coordinator:8080/v1/statement/executing/q1/y2/3", 5)
            .expect("valid");
        assert_eq!(
            url.as_str(),
            "http://coordinator:8080/v1/statement/executing/q1/y2/3?targetResultSize=5MB"
        );

        let url = target_size_url("http://c/v1/statement/executing/q1/y2/3?slug=x", 5).expect("valid");
        assert_eq!(url.query(), Some("slug=x&targetResultSize=5MB"));

        let url = target_size_url("http://c/v1/statement/queued/q1/y2/1", 5).expect("valid");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn backoff_starts_after_four_reads_and_is_capped() {
        let options = ClientOptions {
            max_read_delay: Duration::from_millis(70),
            ..ClientOptions::default()
        };
        let mut backoff = Backoff::new(&options);

        for _ in 0..4 {
            assert_eq!(backoff.next_delay(true, &options), None);
        }
        assert_eq!(backoff.next_delay(false, &options), None);
        assert_eq!(backoff.next_delay(true, &options), Some(Duration::from_millis(50)));
        assert_eq!(backoff.next_delay(true, &options), Some(Duration::from_millis(60)));
        assert_eq!(backoff.next_delay(true, &options), Some(Duration::from_millis(70)));
        assert_eq!(backoff.next_delay(true, &options), Some(Duration::from_millis(70)));
    }
}
