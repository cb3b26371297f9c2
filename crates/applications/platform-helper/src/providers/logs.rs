//! CloudWatch Logs stream checks and incremental event reads

use super::Page;
use crate::error::{PlatformError, Result};
use crate::poll::{PollOutcome, PollSchedule, Step, poll_until};
use async_trait::async_trait;
use tracing::debug;

/// AWS error code for a log group or stream that does not exist yet
pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";

/// How long to wait for expected log streams to appear
pub const LOG_STREAMS_TIMEOUT_SECS: u64 = 300;

/// A single log event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub log_stream_name: String,
    /// Milliseconds since the epoch
    pub timestamp: i64,
    pub message: String,
}

/// Raw CloudWatch Logs operations
#[async_trait]
pub trait LogsApi: Send + Sync {
    /// Names of streams in `log_group` starting with `prefix`
    async fn describe_log_streams(&self, log_group: &str, prefix: &str, limit: i32) -> Result<Vec<String>>;

    /// One page of events at or after `start_time` (ms)
    async fn filter_log_events(
        &self,
        log_group: &str,
        log_streams: &[String],
        start_time: i64,
        next_token: Option<String>,
    ) -> Result<Page<LogEvent>>;
}

/// CloudWatch Logs provider
pub struct LogsProvider<L> {
    client: L,
    stream_schedule: PollSchedule,
}

impl<L: LogsApi> LogsProvider<L> {
    pub fn new(client: L) -> Self {
        Self {
            client,
            stream_schedule: PollSchedule::with_timeout(LOG_STREAMS_TIMEOUT_SECS),
        }
    }

    #[cfg(test)]
    pub(crate) fn client_ref(&self) -> &L {
        &self.client
    }

    /// Events at or after `start_time` across `log_streams`, oldest first
    pub async fn filter_log_events(
        &self,
        log_group: &str,
        log_streams: &[String],
        start_time: i64,
    ) -> Result<Vec<LogEvent>> {
        let mut events = Vec::new();
        let mut token = None;
        loop {
            let page = self
                .client
                .filter_log_events(log_group, log_streams, start_time, token)
                .await?;
            events.extend(page.items);
            token = page.next_marker;
            if token.is_none() {
                break;
            }
        }
        events.retain(|e| e.timestamp >= start_time);
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    /// Wait until every expected stream exists in `log_group`
    ///
    /// Each pass only queries the streams still missing. A missing log group
    /// counts as "not there yet"; any other AWS error aborts immediately.
    pub async fn check_log_streams_present(&self, log_group: &str, expected_log_streams: &[String]) -> Result<()> {
        let client = &self.client;
        let mut initial: Vec<String> = expected_log_streams.to_vec();
        initial.sort();
        initial.dedup();

        let outcome = poll_until(self.stream_schedule, initial, move |missing: Vec<String>| async move {
            if missing.is_empty() {
                return Ok(Step::Done(()));
            }

            let mut still_missing = Vec::with_capacity(missing.len());
            for stream in missing {
                match client.describe_log_streams(log_group, &stream, 1).await {
                    Ok(found) if found.iter().any(|name| *name == stream) => {
                        debug!(log_stream = %stream, "Log stream present");
                    }
                    Ok(_) => still_missing.push(stream),
                    Err(e) if e.aws_code() == Some(RESOURCE_NOT_FOUND) => still_missing.push(stream),
                    Err(e) => return Err(e),
                }
            }

            Ok(if still_missing.is_empty() {
                Step::Done(())
            } else {
                Step::Continue(still_missing)
            })
        })
        .await?;

        match outcome {
            PollOutcome::Done(()) => Ok(()),
            PollOutcome::TimedOut { state, elapsed } => Err(PlatformError::LogStreamsTimeout {
                log_group: log_group.to_string(),
                missing: state,
                waited: elapsed,
            }),
        }
    }
}
