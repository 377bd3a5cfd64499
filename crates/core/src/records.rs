//! Record store contract.
//!
//! A requester owns one ordered list of strings, addressed by the
//! `(user_id, team_id)` pair. Backends implement [`RecordStore`]; callers get
//! deadlines and bounded retries by wrapping a backend in
//! [`ResilientRecordStore`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// Identity of one requester's record collection.
///
/// Stored as a pair so that ids containing `-` can never collide; the
/// `{user_id}-{team_id}` form is only used for display and logs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub user_id: String,
    pub team_id: String,
}

impl RecordKey {
    pub fn new(user_id: impl Into<String>, team_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), team_id: team_id.into() }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.user_id, self.team_id)
    }
}

/// Label carried by the button rendered next to each record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordAction {
    Send,
    Delete,
}

impl RecordAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Delete => "delete",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "send" => Some(Self::Send),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no records stored for key")]
    NotFound,
    #[error("record storage unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Current records for `key`, in insertion order.
    async fn get(&self, key: &RecordKey) -> Result<Vec<String>, StoreError>;

    /// Appends `value`, creating the document when it does not exist yet.
    async fn append(&self, key: &RecordKey, value: &str) -> Result<(), StoreError>;

    /// Drops every record equal to `value`. Fails with `NotFound` only when
    /// the document itself is missing.
    async fn remove(&self, key: &RecordKey, value: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    async fn get(&self, key: &RecordKey) -> Result<Vec<String>, StoreError> {
        (**self).get(key).await
    }

    async fn append(&self, key: &RecordKey, value: &str) -> Result<(), StoreError> {
        (**self).append(key, value).await
    }

    async fn remove(&self, key: &RecordKey, value: &str) -> Result<(), StoreError> {
        (**self).remove(key, value).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorePolicy {
    pub operation_timeout: Duration,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(2_000),
            max_retries: 2,
            base_delay_ms: 50,
            max_delay_ms: 500,
        }
    }
}

impl StorePolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Applies one deadline to every call and retries `Unavailable` failures of
/// the idempotent operations inside it. `append` is never retried: a timed
/// out append may already have been applied.
pub struct ResilientRecordStore<S> {
    inner: S,
    policy: StorePolicy,
}

impl<S> ResilientRecordStore<S>
where
    S: RecordStore,
{
    pub fn new(inner: S, policy: StorePolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    async fn with_deadline<T, Fut>(
        &self,
        operation: &'static str,
        call: Fut,
    ) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>> + Send,
    {
        match tokio::time::timeout(self.policy.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "{operation} timed out after {}ms",
                self.policy.operation_timeout.as_millis()
            ))),
        }
    }

    /// The deadline bounds the whole operation, retries and backoff included.
    async fn retrying<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        self.with_deadline(operation, self.retry_loop(operation, call)).await
    }

    async fn retry_loop<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(StoreError::Unavailable(reason)) if attempt < self.policy.max_retries => {
                    warn!(
                        event_name = "records.store.retry",
                        operation,
                        attempt,
                        max_retries = self.policy.max_retries,
                        error = %reason,
                        "record store operation failed; retrying"
                    );
                    let delay = self.policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

#[async_trait]
impl<S> RecordStore for ResilientRecordStore<S>
where
    S: RecordStore,
{
    async fn get(&self, key: &RecordKey) -> Result<Vec<String>, StoreError> {
        self.retrying("get", || self.inner.get(key)).await
    }

    async fn append(&self, key: &RecordKey, value: &str) -> Result<(), StoreError> {
        self.with_deadline("append", self.inner.append(key, value)).await
    }

    async fn remove(&self, key: &RecordKey, value: &str) -> Result<(), StoreError> {
        self.retrying("remove", || self.inner.remove(key, value)).await
    }
}
