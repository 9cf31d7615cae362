//! Background fetching of module versions.
//!
//! Request handling never waits on a fetch. It calls
//! [`Orchestrator::schedule`] and reports the current [`TaskStatus`]; a
//! bounded worker pool runs the injected [`Fetcher`] with per-key
//! deduplication, exponential backoff between attempts, per-attempt
//! timeouts and graceful shutdown.
//!
//! [`ProxyFetcher`] is the production fetcher: it reads module versions from
//! a Go module proxy and stores them in a [`pkgdoc_storage::DataSource`].

mod fetcher;
mod orchestrator;
mod proxy;
mod task;

pub use fetcher::{Budget, Clock, ExperimentSet, FetchError, Fetcher, SystemClock};
pub use orchestrator::{FetchConfig, Orchestrator, RestoreSummary, ScheduleOutcome};
pub use proxy::{DEFAULT_PROXY_URL, ProxyFetcher};
pub use task::{FetchKey, FetchTask, TaskStatus, backoff};
