// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

mod keys;
mod parameters;

pub use keys::*;
pub use parameters::*;
