//! CloudWatch Logs client

use super::sdk_error;
use crate::error::Result;
use crate::providers::Page;
use crate::providers::logs::{LogEvent, LogsApi};
use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::Client;

pub struct LogsClient {
    client: Client,
}

impl LogsClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogsApi for LogsClient {
    async fn describe_log_streams(&self, log_group: &str, prefix: &str, limit: i32) -> Result<Vec<String>> {
        let response = self
            .client
            .describe_log_streams()
            .log_group_name(log_group)
            .log_stream_name_prefix(prefix)
            .limit(limit)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeLogStreams", e))?;

        Ok(response
            .log_streams()
            .iter()
            .filter_map(|s| s.log_stream_name().map(str::to_string))
            .collect())
    }

    async fn filter_log_events(
        &self,
        log_group: &str,
        log_streams: &[String],
        start_time: i64,
        next_token: Option<String>,
    ) -> Result<Page<LogEvent>> {
        let response = self
            .client
            .filter_log_events()
            .log_group_name(log_group)
            .set_log_stream_names(Some(log_streams.to_vec()))
            .start_time(start_time)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sdk_error("FilterLogEvents", e))?;

        Ok(Page {
            items: response
                .events()
                .iter()
                .map(|e| LogEvent {
                    log_stream_name: e.log_stream_name().unwrap_or_default().to_string(),
                    timestamp: e.timestamp().unwrap_or_default(),
                    message: e.message().unwrap_or_default().to_string(),
                })
                .collect(),
            next_marker: response.next_token().map(str::to_string),
        })
    }
}
