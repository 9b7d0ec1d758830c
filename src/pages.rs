use std::fmt;

use tokio::sync::Semaphore;

use crate::{
    buffer::ReadAheadBuffer,
    state::QueryState,
    types::{Column, Page, QueryStatus},
    Result, StatementClient, TrinoError,
};

/// Stream of result pages for one query.
///
/// Pages are fetched ahead of the caller by a background task. Only one
/// caller may advance the stream at a time; a concurrent call fails with
/// [`TrinoError::Contract`] instead of waiting.
///
/// Dropping an unfinished stream cancels the query on the server.
pub struct Pages {
    buffer: ReadAheadBuffer,
    reader: Semaphore,
}

impl fmt::Debug for Pages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pages")
            .field("client", self.buffer.client())
            .field("is_query", &self.buffer.is_query())
            .field("buffered_bytes", &self.buffer.buffered_bytes())
            .finish()
    }
}

impl Pages {
    pub(crate) fn new(buffer: ReadAheadBuffer) -> Self {
        Self {
            buffer,
            reader: Semaphore::new(1),
        }
    }

    /// Returns the next page with rows, or `None` once the query is finished.
    ///
    /// Statements submitted with [`crate::Statement::execute`] never yield
    /// pages; this call drains them and returns `None`.
    pub async fn next_page(&self) -> Result<Option<Page>> {
        let _reader = self.reader.try_acquire().map_err(|_| {
            TrinoError::Contract("only one reader can advance pages at a time".to_owned())
        })?;

        loop {
            if let Some(page) = self.buffer.try_dequeue() {
                return Ok(Some(page));
            }
            self.buffer.throw_if_errors()?;
            if self.buffer.is_finished() {
                return Ok(None);
            }
            if self.buffer.client().state() == QueryState::ClientAborted
                && self.buffer.is_stopped()
            {
                return Err(TrinoError::Cancelled);
            }

            self.buffer.start_read_ahead();
            if let Some(page) = self.buffer.dequeue().await {
                return Ok(Some(page));
            }
        }
    }

    /// Reads every remaining page.
    pub async fn read_to_end(&self) -> Result<Vec<Page>> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page().await? {
            pages.push(page);
        }
        Ok(pages)
    }

    /// The result schema, waiting for the server to announce it.
    ///
    /// Returns `None` for statements that finished without a schema.
    pub async fn columns(&self) -> Result<Option<Vec<Column>>> {
        self.buffer.wait_for_columns().await
    }

    /// Whether the query produced at least one row, waiting for the first one.
    pub async fn has_data(&self) -> Result<bool> {
        self.buffer.has_data().await
    }

    pub fn state(&self) -> QueryState {
        self.buffer.client().state()
    }

    pub fn query_id(&self) -> Option<String> {
        self.buffer.client().query_id()
    }

    /// Metadata of the latest response seen by the stream.
    pub fn last_status(&self) -> Option<QueryStatus> {
        self.buffer.last_status()
    }

    /// The protocol client driving this query.
    pub fn statement_client(&self) -> &StatementClient {
        self.buffer.client()
    }

    /// Cancels the query. Returns whether the query is now client-aborted.
    pub async fn cancel(&self) -> Result<bool> {
        self.buffer.client().cancel().await
    }

    pub(crate) fn known_columns(&self) -> Option<&[Column]> {
        self.buffer.columns()
    }
}

impl Drop for Pages {
    fn drop(&mut self) {
        let client = self.buffer.client();
        if client.state() != QueryState::Running {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = client.clone();
        handle.spawn(async move {
            if let Err(err) = client.cancel().await {
                tracing::debug!(error = %err, "cancel on drop failed");
            }
        });
    }
}
