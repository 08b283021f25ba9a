// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

mod cache;
mod entry;
mod error;
mod metrics;
mod state;

pub use cache::*;
pub use entry::*;
pub use error::*;
pub use metrics::*;
pub use state::*;
