//! Fetch-and-persist capability.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::task::FetchKey;

/// Failure of one fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Network or upstream failure; retrying may succeed.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The module version does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),

    /// The artifact cannot be processed; retrying cannot help.
    #[error("malformed artifact: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether retrying cannot change the outcome.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Transient(_))
    }
}

/// Names of enabled experiments, passed through to the fetcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentSet {
    active: BTreeSet<String>,
}

impl ExperimentSet {
    /// Create a set from experiment names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            active: names.into_iter().map(Into::into).collect(),
        }
    }

}

impl fmt::Display for ExperimentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.active.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

/// Time budget and cancellation signal of one fetch attempt.
///
/// The orchestrator keeps a key `Running` until the fetcher returns, so
/// fetchers must stop once [`Budget::remaining`] fails. Blocking work should
/// check it between steps and bound every I/O call by the time left.
#[derive(Debug, Clone)]
pub struct Budget {
    deadline: Instant,
    cancelled: Arc<watch::Sender<bool>>,
}

impl Budget {
    /// Budget ending `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            deadline: Instant::now() + timeout,
            cancelled: Arc::new(cancelled),
        }
    }

    /// Time left, or a transient error once the attempt was cancelled or
    /// its deadline has passed.
    pub fn remaining(&self) -> Result<Duration, FetchError> {
        if self.is_cancelled() {
            return Err(FetchError::Transient("cancelled".to_owned()));
        }
        self.deadline
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
            .ok_or_else(|| FetchError::Transient("deadline exceeded".to_owned()))
    }

    /// Whether the attempt was cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves once the attempt is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.cancelled.subscribe();
        if receiver.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Ask the fetcher to stop.
    pub(crate) fn cancel(&self) {
        self.cancelled.send_replace(true);
    }
}

/// Fetches a module version, derives its metadata and stores it.
///
/// Implementations are injected into the orchestrator; tests use fakes that
/// succeed or fail on demand.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch and store the module version named by `key`, within `budget`.
    async fn fetch(
        &self,
        key: &FetchKey,
        experiments: &ExperimentSet,
        budget: &Budget,
    ) -> Result<(), FetchError>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
