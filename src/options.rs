use std::time::Duration;

use crate::TrinoError;

/// Largest result page the coordinator is asked to produce, in megabytes.
pub const DEFAULT_TARGET_RESULT_SIZE_MB: u64 = 5;

/// Default read-ahead budget: ten target-sized pages.
pub const DEFAULT_BUFFER_SIZE_BYTES: u64 = DEFAULT_TARGET_RESULT_SIZE_MB * 10 * 1024 * 1024;

/// Tuning for the protocol client and the read-ahead buffer.
///
/// One value is shared by every query started from a [`crate::TrinoClient`].
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// Timeout applied to every individual HTTP request.
    pub request_timeout: Duration,
    /// Wall-clock limit for a whole query, measured from submission.
    pub query_timeout: Option<Duration>,
    /// Soft limit on the serialized size of buffered pages.
    pub buffer_size_bytes: u64,
    /// Hint appended to `executing` page requests as `targetResultSize`.
    pub target_result_size_mb: u64,
    /// First delay applied after an empty page.
    pub initial_read_delay: Duration,
    /// Multiplier applied to the delay after each empty page.
    pub read_delay_backoff: f64,
    /// Delay stops growing once it reaches this value.
    pub max_read_delay: Duration,
    /// Pages read before empty pages start to back off.
    pub empty_reads_before_backoff: u32,
    /// First wait on an empty read-ahead queue.
    pub queue_wait_initial: Duration,
    /// Growth of the queue wait after each unsignalled wait.
    pub queue_wait_step: Duration,
    pub queue_wait_max: Duration,
    /// Maximum retries of 502/503/504 responses. `None` retries forever.
    pub max_retries: Option<usize>,
    /// Request gzip/brotli encoded responses.
    pub compression: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(100),
            query_timeout: None,
            buffer_size_bytes: DEFAULT_BUFFER_SIZE_BYTES,
            target_result_size_mb: DEFAULT_TARGET_RESULT_SIZE_MB,
            initial_read_delay: Duration::from_millis(50),
            read_delay_backoff: 1.2,
            max_read_delay: Duration::from_millis(5_000),
            empty_reads_before_backoff: 4,
            queue_wait_initial: Duration::from_millis(50),
            queue_wait_step: Duration::from_millis(100),
            queue_wait_max: Duration::from_millis(10_000),
            max_retries: None,
            compression: true,
        }
    }
}

impl ClientOptions {
    /// Sets the wall-clock limit for each query.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Sets the read-ahead budget in bytes.
    pub fn with_buffer_size(mut self, bytes: u64) -> Self {
        self.buffer_size_bytes = bytes;
        self
    }

    /// Caps how often a load-shedding status (502/503/504) is retried.
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Rejects settings under which no rows could ever be read.
    pub fn validate(&self) -> Result<(), TrinoError> {
        if self.buffer_size_bytes == 0 {
            return Err(TrinoError::Config(
                "buffer size of zero is not allowed as no rows can be read".to_owned(),
            ));
        }
        if self.read_delay_backoff.is_nan() || self.read_delay_backoff < 1.0 {
            return Err(TrinoError::Config(format!(
                "read delay backoff must be at least 1.0, got {}",
                self.read_delay_backoff
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{ClientOptions, TrinoError};

    #[test]
    fn defaults_match_protocol_tuning() {
        let options = ClientOptions::default();
        assert_eq!(options.buffer_size_bytes, 50 * 1024 * 1024);
        assert_eq!(options.initial_read_delay, Duration::from_millis(50));
        assert_eq!(options.max_read_delay, Duration::from_secs(5));
        assert_eq!(options.max_retries, None);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let err = ClientOptions::default()
            .with_buffer_size(0)
            .validate()
            .expect_err("must fail");
        assert!(matches!(err, TrinoError::Config(_)));
    }
}
