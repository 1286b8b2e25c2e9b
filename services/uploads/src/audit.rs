//! Best-effort audit trail of API calls.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One `api_usage_records` row; `called_at` is assigned by the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub called_by: String,
    pub api_name: String,
}

impl AuditEntry {
    pub fn new(called_by: impl Into<String>, api_name: impl Into<String>) -> Self {
        Self {
            called_by: called_by.into(),
            api_name: api_name.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<()>;
}

/// Wraps an [`AuditSink`] so that writes can never affect the caller.
///
/// [`record_best_effort`](Self::record_best_effort) returns `()`: failures and
/// timeouts are logged and counted, nothing else.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    pub async fn record_best_effort(&self, entry: AuditEntry) {
        match tokio::time::timeout(self.timeout, self.sink.record(&entry)).await {
            Ok(Ok(())) => {
                debug!(called_by = %entry.called_by, api_name = %entry.api_name, "API call recorded");
            }
            Ok(Err(e)) => {
                warn!(
                    error = %e,
                    called_by = %entry.called_by,
                    api_name = %entry.api_name,
                    "Failed to record API call"
                );
                metrics::counter!("uploads.audit.failed").increment(1);
            }
            Err(_) => {
                warn!(
                    called_by = %entry.called_by,
                    api_name = %entry.api_name,
                    timeout = ?self.timeout,
                    "Recording API call timed out"
                );
                metrics::counter!("uploads.audit.failed").increment(1);
            }
        }
    }
}
