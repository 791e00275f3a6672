//! Background copy/move jobs.
//!
//! A [`JobPayload`] is a flat, serializable record of one transfer: both
//! provider configurations, both raw paths, the conflict policy. It is
//! [`submit`]ted to an external [`TaskQueue`] and later executed by a
//! [`Worker`], which rebuilds everything from the payload on every attempt
//! and reports the terminal [`JobReport`] to a [`Notifier`].

pub mod error;
mod factory;
mod payload;
mod queue;
mod report;
mod worker;

pub use crate::factory::{DefaultFactory, ProviderFactory};
pub use crate::payload::{Endpoint, JobPayload};
pub use crate::queue::{QueuedTask, TaskQueue, submit};
pub use crate::report::{FailureClass, JobReport, LogNotifier, Notifier, Outcome};
pub use crate::worker::Worker;
