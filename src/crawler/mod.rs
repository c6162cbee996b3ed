//! The crawler core: traffic control, fetch execution and orchestration

pub mod backoff;
pub mod coordinator;
pub mod fetcher;
pub mod proxy;
pub mod ratelimit;
pub mod scheduler;

pub use backoff::Backoff;
pub use coordinator::Coordinator;
pub use fetcher::{FetchOutcome, Fetcher};
pub use proxy::{Acquired, ProxyPool, DIRECT};
pub use ratelimit::{RateController, MAX_RETRY_AFTER};
pub use scheduler::{Scheduler, SchedulerSnapshot};
