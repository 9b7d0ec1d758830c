use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

/// Lifecycle of one query as seen by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryState {
    /// The query is active on the server.
    Running,
    /// The server reported an error or the client failed to talk to it.
    ClientError,
    /// The client cancelled the query.
    ClientAborted,
    /// The last page was consumed.
    Finished,
}

impl QueryState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, QueryState::Running)
    }

    fn as_u8(self) -> u8 {
        match self {
            QueryState::Running => 0,
            QueryState::ClientError => 1,
            QueryState::ClientAborted => 2,
            QueryState::Finished => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => QueryState::ClientError,
            2 => QueryState::ClientAborted,
            3 => QueryState::Finished,
            _ => QueryState::Running,
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryState::Running => "RUNNING",
            QueryState::ClientError => "CLIENT_ERROR",
            QueryState::ClientAborted => "CLIENT_ABORTED",
            QueryState::Finished => "FINISHED",
        })
    }
}

/// Atomically updated [`QueryState`]. Only `Running` may be left, and only once.
#[derive(Debug)]
pub(crate) struct AtomicQueryState(AtomicU8);

impl AtomicQueryState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(QueryState::Running.as_u8()))
    }

    pub(crate) fn get(&self) -> QueryState {
        QueryState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from `Running` to `next`. Returns `true` for the single caller that won.
    pub(crate) fn transition(&self, next: QueryState) -> bool {
        self.0
            .compare_exchange(
                QueryState::Running.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::state::{AtomicQueryState, QueryState};

    #[test]
    fn terminal_states_are_sticky() {
        let state = AtomicQueryState::new();
        assert_eq!(state.get(), QueryState::Running);
        assert!(state.transition(QueryState::Finished));
        assert!(!state.transition(QueryState::ClientAborted));
        assert_eq!(state.get(), QueryState::Finished);
    }

    #[test]
    fn exactly_one_racer_wins() {
        let state = Arc::new(AtomicQueryState::new());
        let winners: usize = (0..8)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || state.transition(QueryState::ClientAborted))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| usize::from(handle.join().expect("thread must not panic")))
            .sum();
        assert_eq!(winners, 1);
        assert_eq!(state.get().to_string(), "CLIENT_ABORTED");
    }
}
