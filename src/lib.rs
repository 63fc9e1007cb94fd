//! cita-watch: drives a headless browser through a consular
//! appointment-booking flow, retries the whole flow when the flaky
//! multi-page site trips it up, and pushes an ntfy alert when slots show
//! up (or when the check cannot complete at all).

pub mod chrome;
pub mod config;
pub mod error;
pub mod flow;
pub mod notify;
pub mod page;

pub use config::MonitorConfig;
pub use error::PageError;
pub use flow::{FlowOutcome, FlowVariant, Monitor, MonitorResult};
pub use notify::Notifier;
pub use page::{Locator, Page, PageProvider};
