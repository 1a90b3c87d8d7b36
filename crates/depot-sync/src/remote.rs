//! # Remote API Adapter
//!
//! The boundary between the drain worker and the remote business service.
//! The host application implements [`RemoteApi`] (HTTP, gRPC, ...); this
//! crate only decides what to do with the outcome.
//!
//! ## Outcome Classification
//! ```text
//! ┌──────────────────────────────┬──────────────┬────────────────────────┐
//! │ Outcome                      │ retryable    │ Drain worker action    │
//! ├──────────────────────────────┼──────────────┼────────────────────────┤
//! │ Ok(RemoteAck)                │      -       │ mark_succeeded         │
//! │ network error / no response  │     yes      │ reschedule w/ backoff  │
//! │ request timeout              │     yes      │ reschedule w/ backoff  │
//! │ HTTP 5xx                     │     yes      │ reschedule w/ backoff  │
//! │ HTTP 4xx (and other codes)   │     no       │ dead letter            │
//! └──────────────────────────────┴──────────────┴────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use depot_core::SyncTask;

/// Acknowledgement returned by the remote for an applied task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAck {
    /// Identifier the remote assigned, if it reports one.
    pub remote_id: Option<String>,
}

/// Failure reported by a [`RemoteApi`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Whether a later attempt may succeed.
    pub retryable: bool,
    /// HTTP-style status code, if the remote answered at all.
    pub status_code: Option<u16>,
    pub message: String,
}

impl RemoteError {
    /// Classifies a response status: 5xx is transient, everything else is
    /// terminal.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        RemoteError {
            retryable: (500..600).contains(&status_code),
            status_code: Some(status_code),
            message: message.into(),
        }
    }

    /// The remote could not be reached.
    pub fn network(message: impl Into<String>) -> Self {
        RemoteError {
            retryable: true,
            status_code: None,
            message: message.into(),
        }
    }

    /// The request didn't complete within `after`.
    pub fn timeout(after: Duration) -> Self {
        RemoteError {
            retryable: true,
            status_code: None,
            message: format!("request timed out after {}ms", after.as_millis()),
        }
    }

    /// A failure that will never succeed on retry, without a status code.
    pub fn terminal(message: impl Into<String>) -> Self {
        RemoteError {
            retryable: false,
            status_code: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "HTTP {}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Remote business API, per-table create/update/delete.
///
/// `idempotency_key` is stable across redeliveries of the same task, so the
/// remote can discard duplicates caused by at-least-once delivery.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Replays one task (dispatch on `task.table` and `task.action`).
    async fn apply(&self, task: &SyncTask, idempotency_key: &str)
        -> Result<RemoteAck, RemoteError>;

    /// Cheap reachability check used by the connectivity monitor.
    async fn health_probe(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(RemoteError::from_status(503, "unavailable").retryable);
        assert!(RemoteError::from_status(500, "boom").retryable);
        assert!(!RemoteError::from_status(400, "bad request").retryable);
        assert!(!RemoteError::from_status(422, "invalid").retryable);
        assert!(!RemoteError::from_status(301, "moved").retryable);
    }

    #[test]
    fn test_transport_failures_are_retryable() {
        assert!(RemoteError::network("connection refused").retryable);
        let err = RemoteError::timeout(Duration::from_secs(10));
        assert!(err.retryable);
        assert_eq!(err.to_string(), "request timed out after 10000ms");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RemoteError::from_status(503, "Service Unavailable").to_string(),
            "HTTP 503: Service Unavailable"
        );
    }
}
