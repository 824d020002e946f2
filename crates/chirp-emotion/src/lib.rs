//! Emotion signal persistence and the daily report scheduler.
//!
//! Chat messages are classified by an external collaborator, which records
//! one [`chirp_types::EmotionSignal`] per message through this crate's
//! store. Two time-triggered jobs turn those signals into parent-facing
//! reports: the generate job aggregates each user's day into one
//! [`chirp_types::EmotionReport`] and announces it; the push job publishes
//! every still-unpushed report of the day and stamps it. Delivery is
//! at-least-once by design: a report whose push-stamp write fails is
//! re-pushed on the next run.

mod error;
mod scheduler;
mod store;
mod summary;

pub use error::EmotionError;
pub use scheduler::{ReportGeneratedEvent, ReportScheduler, SchedulerConfig};
pub use store::{
    distinct_user_ids_on, get_report, insert_report, insert_signal, mark_pushed, NewReport,
    NewSignal, signals_for_user_on, unpushed_reports_on,
};
pub use summary::summarize;
