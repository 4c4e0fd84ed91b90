//! Per-day scrape rate limiting.

pub mod clock;
pub mod coordinator;
pub mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{
    is_actually_running, CoordinatorError, CoordinatorSettings, RateLimitCoordinator, RecordOutcome,
};
pub use record::{RateLimitRecord, ScrapeStatus};
