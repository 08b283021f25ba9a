// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use thiserror::Error;

use crate::state::EntryState;

pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by entry operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An operation was invoked against an entry that does not satisfy its
    /// precondition. This is a caller bug: it is never recovered from
    /// locally and should propagate as a programming error.
    #[error("{operation} on entry {entry}: expected {expected}, found {actual:?}")]
    InvalidState {
        operation: &'static str,
        entry: String,
        expected: String,
        actual: EntryState,
    },

    /// The absolute deadline passed while blocking on an entry. Caught at
    /// the transaction boundary; the transaction aborts and may retry.
    /// The entry itself stays valid for other threads.
    #[error("timed out after {elapsed:?} waiting on entry {entry}")]
    TransactionTimeout { entry: String, elapsed: Duration },

    /// The waiter was interrupted while blocking on an entry. Caught at
    /// the transaction boundary to abort the transaction promptly.
    #[error("interrupted while waiting on entry {entry}")]
    TransactionInterrupted { entry: String },
}
