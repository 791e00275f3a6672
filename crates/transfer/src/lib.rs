//! Copy and move between providers.
//!
//! The single entry point is [`transfer()`]. Given a source path on one
//! provider and a destination on another (or the same), it:
//!
//! 1. resolves the final destination name and applies the [`Conflict`] policy
//!    before anything is mutated,
//! 2. refuses to overwrite the source with itself,
//! 3. uses the backend's native copy/move when both ends share a storage
//!    root and the backend offers it, otherwise streams the bytes through
//!    this process,
//! 4. recurses into folders child by child, reporting partial failure
//!    instead of rolling back.
//!
//! Errors are the provider taxonomy ([`wharf_provider::error`]): a failed
//! upload surfaces as [`Upload`](ErrorKind::Upload) untouched, a folder with
//! failing children as [`IntraCopy`](ErrorKind::IntraCopy) or
//! [`IntraMove`](ErrorKind::IntraMove), a move that could not delete its
//! source after writing as [`MoveIncomplete`](ErrorKind::MoveIncomplete).

mod folder;
mod orchestrate;
#[cfg(test)]
mod testing;

pub use crate::orchestrate::transfer;
use derive_more::Display;
use serde::{Deserialize, Serialize};
pub use wharf_provider::error::{self, Error, ErrorKind, Result};
use wharf_provider::{Conflict, Metadata};
use wharf_stream::CancellationToken;

/// Default folder fan-out.
pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[display("copy")]
    Copy,
    #[display("move")]
    Move,
}

#[derive(Clone, Debug)]
pub struct TransferOptions {
    pub conflict: Conflict,
    /// Name to give the destination instead of the source's.
    pub rename: Option<String>,
    /// Maximum children of one folder transferred at once.
    pub concurrency: usize,
    /// Cancelling abandons the in-flight backend call of every child, read
    /// or write side, and fails the reads of every streamed file. Partially
    /// written destination files are left as they are.
    pub cancel: CancellationToken,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            conflict: Conflict::default(),
            rename: None,
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancellationToken::new(),
        }
    }
}

impl TransferOptions {
    pub fn with_conflict(mut self, conflict: Conflict) -> Self {
        self.conflict = conflict;
        self
    }

    pub fn with_rename(mut self, rename: impl Into<String>) -> Self {
        self.rename = Some(rename.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Outcome of a successful transfer.
#[derive(Clone, Debug)]
pub struct Transferred {
    /// The destination entry as listed in its parent folder.
    pub metadata: Metadata,
    /// `false` when an existing destination was replaced.
    pub created: bool,
    /// How the bytes moved.
    pub strategy: Strategy,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Strategy {
    /// Backend-native copy/move.
    #[display("native")]
    Native,
    /// Downloaded from the source and uploaded to the destination.
    #[display("stream-through")]
    StreamThrough,
}
