//! Connects to a live database and reconstructs its current Schema
//! Model. One module per dialect, each behind its own cargo feature and
//! built on that dialect's real driver crate; a shared retry/timeout
//! harness and the [`Introspector`] trait keep the shape identical
//! across all five.

use async_trait::async_trait;
use schemist_dialect::Dialect;
use schemist_schema_model::Schema;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[cfg(feature = "postgresql")]
pub mod postgres;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "oracle-native")]
pub mod oracle_native;

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub dialect: Dialect,
    pub server: String,
    pub database: String,
    pub port: Option<u16>,
    pub schema: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connection_string: Option<String>,
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
    pub retry_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Postgres,
            server: String::new(),
            database: String::new(),
            port: None,
            schema: None,
            username: None,
            password: None,
            connection_string: None,
            connection_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(300),
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum IntrospectError {
    #[error("failed to connect to {dialect} database after {attempts} attempts: {message}")]
    ConnectionFailed { dialect: Dialect, attempts: u32, message: String },
    #[error("catalog query failed: {0}")]
    QueryFailed(String),
    #[error("introspection was cancelled")]
    Cancelled,
}

/// Tracks a single connection attempt's retry state: idle, mid-attempt,
/// or backing off before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Idle,
    Attempt(u32),
    Backoff(Duration),
}

/// Runs `connect` with linear-by-attempt backoff up to `config.retry_attempts`,
/// aborting immediately if `cancel` fires.
pub async fn with_retry<F, Fut, T>(
    config: &ConnectionConfig,
    cancel: &CancellationToken,
    mut connect: F,
) -> Result<T, IntrospectError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, String>>,
{
    let mut state = RetryState::Idle;
    let mut last_error = String::new();

    for attempt in 1..=config.retry_attempts.max(1) {
        state = RetryState::Attempt(attempt);
        if cancel.is_cancelled() {
            return Err(IntrospectError::Cancelled);
        }

        let attempt_fut = connect();
        let outcome = tokio::select! {
            res = tokio::time::timeout(config.connection_timeout, attempt_fut) => res,
            _ = cancel.cancelled() => return Err(IntrospectError::Cancelled),
        };

        match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(message)) => {
                last_error = message;
                warn!(attempt, dialect = %config.dialect, error = %last_error, "connection attempt failed");
            }
            Err(_) => {
                last_error = "connection attempt timed out".to_string();
                warn!(attempt, dialect = %config.dialect, "connection attempt timed out");
            }
        }

        if attempt < config.retry_attempts {
            let backoff = Duration::from_millis(200 * attempt as u64);
            state = RetryState::Backoff(backoff);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => return Err(IntrospectError::Cancelled),
            }
        }
    }

    let _ = state;
    Err(IntrospectError::ConnectionFailed {
        dialect: config.dialect,
        attempts: config.retry_attempts,
        message: last_error,
    })
}

/// Implemented by each dialect's introspector: a scoped connection is
/// acquired, catalog queries for tables/constraints/indexes/views/
/// procedures/functions run (concurrently where the driver allows it),
/// the merged result is sorted deterministically, and the connection is
/// released on every exit path including error.
#[async_trait]
pub trait Introspector: Send + Sync {
    async fn introspect(&self, cancel: CancellationToken) -> Result<Schema, IntrospectError>;
}

/// Sorts and returns `schema`, the merge point every dialect's
/// concurrently-fetched catalog queries funnel through before being
/// exposed to the Differ.
pub fn finalize(mut schema: Schema) -> Schema {
    schema.sort_deterministically();
    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_exhausts_attempts_and_reports_the_last_error() {
        let config = ConnectionConfig {
            retry_attempts: 2,
            connection_timeout: Duration::from_millis(50),
            ..ConnectionConfig::default()
        };
        let cancel = CancellationToken::new();
        let result: Result<(), IntrospectError> =
            with_retry(&config, &cancel, || async { Err("refused".to_string()) }).await;
        assert!(matches!(result, Err(IntrospectError::ConnectionFailed { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn retry_succeeds_on_a_later_attempt() {
        let config = ConnectionConfig { retry_attempts: 3, ..ConnectionConfig::default() };
        let cancel = CancellationToken::new();
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = with_retry(&config, &cancel, || {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { if n < 1 { Err("not yet".to_string()) } else { Ok(42) } }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_retry() {
        let config = ConnectionConfig::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), IntrospectError> =
            with_retry(&config, &cancel, || async { Err("refused".to_string()) }).await;
        assert!(matches!(result, Err(IntrospectError::Cancelled)));
    }
}
