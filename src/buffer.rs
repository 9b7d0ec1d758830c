//! Read-ahead pipeline: a background pump advances the query and queues
//! pages for the consumer, bounded by a soft byte budget.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    time::Duration,
};

use tokio::task::JoinHandle;

use crate::{
    params::StatusListener,
    protocol::StatementClient,
    state::QueryState,
    sync::{lock, Signal},
    types::{Column, Page, QueryError, QueryStatus},
    Result, TrinoError,
};

pub(crate) struct ReadAheadBuffer {
    shared: Arc<Shared>,
}

struct Shared {
    client: Arc<StatementClient>,
    /// Whether the caller reads rows. Other statements are drained without a budget.
    is_query: bool,
    budget: u64,
    queue: Mutex<VecDeque<Page>>,
    errors: Mutex<Vec<TrinoError>>,
    columns: OnceLock<Vec<Column>>,
    last: Mutex<Option<QueryStatus>>,
    has_results: AtomicBool,
    published: AtomicBool,
    queue_updated: Signal,
    found_result: Signal,
    columns_read: Signal,
    pump: Mutex<Option<JoinHandle<()>>>,
    queue_wait: Mutex<Duration>,
    listeners: Vec<StatusListener>,
}

impl ReadAheadBuffer {
    /// Creates the buffer around a submitted query and its first page.
    pub(crate) fn new(
        client: Arc<StatementClient>,
        first: Page,
        is_query: bool,
        listeners: Vec<StatusListener>,
    ) -> Self {
        let budget = client.options().buffer_size_bytes;
        let queue_wait = client.options().queue_wait_initial;
        let shared = Arc::new(Shared {
            client,
            is_query,
            budget,
            queue: Mutex::new(VecDeque::new()),
            errors: Mutex::new(Vec::new()),
            columns: OnceLock::new(),
            last: Mutex::new(None),
            has_results: AtomicBool::new(false),
            published: AtomicBool::new(false),
            queue_updated: Signal::counting(),
            found_result: Signal::once(),
            columns_read: Signal::once(),
            pump: Mutex::new(None),
            queue_wait: Mutex::new(queue_wait),
            listeners,
        });
        shared.accept(first);
        if shared.client.state() == QueryState::Finished {
            shared.publish_final();
        }
        Self { shared }
    }

    pub(crate) fn client(&self) -> &Arc<StatementClient> {
        &self.shared.client
    }

    pub(crate) fn is_query(&self) -> bool {
        self.shared.is_query
    }

    /// Starts the pump unless one is already running or nothing is left to read.
    pub(crate) fn start_read_ahead(&self) {
        if !self.shared.should_read_ahead() {
            return;
        }
        let mut pump = lock(&self.shared.pump);
        if pump.as_ref().map_or(true, JoinHandle::is_finished) {
            tracing::debug!(query_id = ?self.shared.client.query_id(), "starting read-ahead");
            *pump = Some(tokio::spawn(Shared::run(self.shared.clone())));
        }
    }

    /// Whether a pump task is still running.
    pub(crate) fn is_pumping(&self) -> bool {
        lock(&self.shared.pump)
            .as_ref()
            .is_some_and(|pump| !pump.is_finished())
    }

    /// Whether the query left `Running` without finishing and no pump will
    /// produce anything more.
    pub(crate) fn is_stopped(&self) -> bool {
        matches!(
            self.shared.client.state(),
            QueryState::ClientAborted | QueryState::ClientError
        ) && !self.is_pumping()
    }

    pub(crate) fn try_dequeue(&self) -> Option<Page> {
        self.shared.pop()
    }

    /// Pops the next page, waiting a bounded time for the pump when the queue is empty.
    pub(crate) async fn dequeue(&self) -> Option<Page> {
        if let Some(page) = self.shared.pop() {
            return Some(page);
        }

        let wait = *lock(&self.shared.queue_wait);
        if !self.shared.queue_updated.wait(wait).await {
            let options = self.shared.client.options();
            let mut queue_wait = lock(&self.shared.queue_wait);
            *queue_wait = (*queue_wait + options.queue_wait_step).min(options.queue_wait_max);
        }
        self.shared.pop()
    }

    /// Fails with the recorded pump errors, aggregated when there are several.
    pub(crate) fn throw_if_errors(&self) -> Result<()> {
        let errors = lock(&self.shared.errors);
        match errors.as_slice() {
            [] => Ok(()),
            [single] => Err(single.clone()),
            many => Err(TrinoError::Aggregate(many.to_vec())),
        }
    }

    /// Whether every page has been produced and consumed.
    pub(crate) fn is_finished(&self) -> bool {
        let finished = self.shared.client.state() == QueryState::Finished;
        if !self.shared.is_query {
            return finished;
        }
        // The pump queues a page before recording its status, so the last-page
        // check must come first.
        finished && self.shared.is_last_page() && lock(&self.shared.queue).is_empty()
    }

    pub(crate) fn is_empty(&self) -> bool {
        lock(&self.shared.queue).is_empty()
    }

    pub(crate) fn columns(&self) -> Option<&[Column]> {
        self.shared.columns.get().map(Vec::as_slice)
    }

    pub(crate) fn last_status(&self) -> Option<QueryStatus> {
        lock(&self.shared.last).clone()
    }

    /// Waits until a page has provided the column schema.
    ///
    /// Returns `None` if the query ended or was cancelled without announcing
    /// columns.
    pub(crate) async fn wait_for_columns(&self) -> Result<Option<Vec<Column>>> {
        if self.shared.columns.get().is_none() {
            self.start_read_ahead();
            let step = self.shared.client.options().queue_wait_step;
            while self.shared.columns.get().is_none()
                && !self.shared.is_last_page()
                && !self.shared.should_stop()
                && !self.is_stopped()
            {
                self.shared.columns_read.wait(step).await;
                self.throw_if_errors()?;
                self.start_read_ahead();
            }
        }
        self.throw_if_errors()?;
        Ok(self.shared.columns.get().cloned())
    }

    /// Whether the query produced any rows, waiting for the first one if needed.
    pub(crate) async fn has_data(&self) -> Result<bool> {
        if !self.shared.is_query {
            return Ok(false);
        }
        if !self.shared.has_results.load(Ordering::Acquire) {
            self.start_read_ahead();
            let step = self.shared.client.options().queue_wait_step;
            while !self.shared.has_results.load(Ordering::Acquire)
                && !self.shared.is_last_page()
                && !self.shared.should_stop()
                && !self.is_stopped()
            {
                self.shared.found_result.wait(step).await;
                self.throw_if_errors()?;
                self.start_read_ahead();
            }
        }
        self.throw_if_errors()?;
        Ok(self.shared.has_results.load(Ordering::Acquire))
    }

    /// Total serialized size of the queued pages.
    pub(crate) fn buffered_bytes(&self) -> u64 {
        self.shared.buffered_bytes()
    }
}

impl Shared {
    async fn run(shared: Arc<Shared>) {
        let outcome = loop {
            if !shared.should_read_ahead() || shared.should_stop() {
                break Ok(());
            }
            match shared.client.advance().await {
                Ok(page) => shared.accept(page),
                Err(err) => break Err(err),
            }
        };

        match outcome {
            Ok(()) => {
                let client = &shared.client;
                if client.state() == QueryState::Finished {
                    shared.publish_final();
                } else if client.state() == QueryState::Running
                    && (client.cancellation_token().is_cancelled() || client.is_timeout())
                {
                    if let Err(err) = client.cancel().await {
                        tracing::warn!(error = %err, "cancel request failed");
                    }
                }
            }
            Err(err) => {
                tracing::error!(query_id = ?shared.client.query_id(), error = %err, "read-ahead failed");
                if let Some(query_error) = err.query_error() {
                    if let Some(status) = shared.client.status() {
                        *lock(&shared.last) = Some(status);
                    }
                    shared.publish(Some(query_error));
                }
                lock(&shared.errors).push(err);
            }
        }

        tracing::debug!(
            query_id = ?shared.client.query_id(),
            buffered_bytes = shared.buffered_bytes(),
            "read-ahead stopped"
        );
        // Wake a consumer blocked on an empty queue so it re-checks completion.
        shared.queue_updated.release();
    }

    fn accept(&self, page: Page) {
        if let Some(columns) = &page.columns {
            if self.columns.set(columns.clone()).is_ok() {
                self.columns_read.release();
            }
        }

        let status = page.status.clone();
        if self.is_query && page.has_rows() {
            lock(&self.queue).push_back(page);
            self.has_results.store(true, Ordering::Release);
            self.found_result.release();
            *lock(&self.last) = Some(status);
            self.queue_updated.release();
        } else {
            *lock(&self.last) = Some(status);
        }
    }

    fn pop(&self) -> Option<Page> {
        lock(&self.queue).pop_front()
    }

    fn buffered_bytes(&self) -> u64 {
        lock(&self.queue)
            .iter()
            .map(|page| page.size_bytes as u64)
            .sum()
    }

    fn is_last_page(&self) -> bool {
        lock(&self.last)
            .as_ref()
            .is_some_and(QueryStatus::is_last_page)
    }

    fn should_read_ahead(&self) -> bool {
        if self.is_last_page()
            || matches!(
                self.client.state(),
                QueryState::ClientAborted | QueryState::ClientError
            )
        {
            return false;
        }
        !self.is_query || self.buffered_bytes() < self.budget
    }

    /// Records the reason and returns `true` if reading must stop.
    fn should_stop(&self) -> bool {
        let reason = if self.client.cancellation_token().is_cancelled() {
            Some(TrinoError::Cancelled)
        } else if let Some((elapsed, limit)) = self.client.timeout_exceeded() {
            Some(TrinoError::Timeout { elapsed, limit })
        } else {
            None
        };

        let mut errors = lock(&self.errors);
        match reason {
            Some(reason) => {
                if errors.is_empty() {
                    tracing::debug!(reason = %reason, "stopping read-ahead");
                    errors.push(reason);
                }
                true
            }
            None => !errors.is_empty(),
        }
    }

    fn publish_final(&self) {
        let error = lock(&self.last)
            .as_ref()
            .and_then(|status| status.error.clone());
        self.publish(error.as_ref());
    }

    /// Notifies the status listeners. Only the first call has an effect.
    fn publish(&self, error: Option<&QueryError>) {
        if self.listeners.is_empty() || self.published.swap(true, Ordering::AcqRel) {
            return;
        }
        let stats = lock(&self.last)
            .as_ref()
            .map(|status| status.stats.clone())
            .unwrap_or_default();
        for listener in &self.listeners {
            listener(&stats, error);
        }
    }
}
