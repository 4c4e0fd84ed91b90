//! Scrape triggering: target selection, the scraper client and the
//! service the HTTP handlers call.

pub mod client;
pub mod service;
pub mod target;

pub use client::{ScraperClient, ScraperError, ScraperResponse};
pub use service::{DateWindow, Disposition, ScrapeTriggerService, TriggerError, TriggerOutcome};
pub use target::{NoTargets, TargetDate};
