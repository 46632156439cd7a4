pub mod classify;
pub mod config;
pub mod data;
pub mod delivery;
pub mod error;
pub mod hooks;
pub mod host;
pub mod intake;
pub mod model;
pub mod process;
pub mod schedule;
pub mod service;

pub use config::Config;
pub use data::Database;
pub use delivery::DeliveryOutcome;
pub use error::{Error, Result};
pub use hooks::Hooks;
pub use host::Host;
pub use intake::{IntakeRequest, advertisement_link};
pub use process::{ProcessOutcome, ProcessReport};
pub use schedule::DueWorkReport;
pub use service::MentionService;
