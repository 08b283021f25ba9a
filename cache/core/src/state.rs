// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use bitflags::bitflags;

bitflags! {
    /// Orthogonal status dimensions of a cache entry, packed into one byte.
    /// Every [`EntryState`] encodes to a fixed combination of these bits,
    /// which is what the predicates and the wait operations test against.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StateFlags: u8 {
        /// A fetch for read access is in progress.
        const READING = 0x01;
        /// The value may be read.
        const READABLE = 0x02;
        /// A transition to a writable state is in progress.
        const UPGRADING = 0x04;
        /// The value may be written.
        const WRITABLE = 0x08;
        /// The local value diverges from the backing store.
        const MODIFIED = 0x10;
        /// A transition away from a writable state is in progress.
        const DOWNGRADING = 0x20;
        /// Eviction is in progress.
        const DECACHING = 0x40;
        /// The entry is gone from the cache.
        const NOT_CACHED = 0x80;
    }
}

/// Lifecycle state of a cache entry.
///
/// Entries start in one of the fetching states, or directly in a clean
/// cached state when the value is synthesized locally, and end in
/// [`EntryState::Decached`]. The permitted transitions between states are
/// the `set_*` operations on [`crate::EntryGuard`]; anything else is
/// rejected as an invalid-state error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// Reading from the backing store for read access.
    FetchingRead,
    /// Readable, clean.
    CachedRead,
    /// Readable, with an upgrade to write access in progress.
    FetchingUpgrade,
    /// Fetching from the backing store directly for write access.
    FetchingWrite,
    /// Writable, clean.
    CachedWrite,
    /// Writable, with uncommitted local changes.
    CachedDirty,
    /// Being demoted from write access back to read access.
    EvictingDowngrade,
    /// Being removed from the cache out of a readable state.
    EvictingRead,
    /// Being removed from the cache out of a writable state.
    EvictingWrite,
    /// Gone from the cache. Terminal.
    Decached,
}

impl EntryState {
    /// The bit encoding of this state.
    pub const fn flags(self) -> StateFlags {
        match self {
            EntryState::FetchingRead => StateFlags::READING,
            EntryState::CachedRead => StateFlags::READABLE,
            EntryState::FetchingUpgrade => StateFlags::READABLE.union(StateFlags::UPGRADING),
            EntryState::FetchingWrite => StateFlags::READING.union(StateFlags::UPGRADING),
            EntryState::CachedWrite => StateFlags::READABLE.union(StateFlags::WRITABLE),
            EntryState::CachedDirty => StateFlags::READABLE
                .union(StateFlags::WRITABLE)
                .union(StateFlags::MODIFIED),
            EntryState::EvictingDowngrade => StateFlags::READABLE.union(StateFlags::DOWNGRADING),
            EntryState::EvictingRead => StateFlags::DECACHING,
            EntryState::EvictingWrite => StateFlags::DOWNGRADING.union(StateFlags::DECACHING),
            EntryState::Decached => StateFlags::NOT_CACHED,
        }
    }

    /// True when every bit of `mask` is set in this state's encoding.
    pub fn contains(self, mask: StateFlags) -> bool {
        self.flags().contains(mask)
    }

    #[cfg(test)]
    pub(crate) const ALL: [EntryState; 10] = [
        EntryState::FetchingRead,
        EntryState::CachedRead,
        EntryState::FetchingUpgrade,
        EntryState::FetchingWrite,
        EntryState::CachedWrite,
        EntryState::CachedDirty,
        EntryState::EvictingDowngrade,
        EntryState::EvictingRead,
        EntryState::EvictingWrite,
        EntryState::Decached,
    ];
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn state_encodings() {
        // The encoded values are part of the entry's contract with its
        // waiters; lock them down bit for bit.
        let expected: [(EntryState, u8); 10] = [
            (EntryState::FetchingRead, 0x01),
            (EntryState::CachedRead, 0x02),
            (EntryState::FetchingUpgrade, 0x06),
            (EntryState::FetchingWrite, 0x05),
            (EntryState::CachedWrite, 0x0a),
            (EntryState::CachedDirty, 0x1a),
            (EntryState::EvictingDowngrade, 0x22),
            (EntryState::EvictingRead, 0x40),
            (EntryState::EvictingWrite, 0x60),
            (EntryState::Decached, 0x80),
        ];
        for (state, bits) in expected {
            assert_eq!(state.flags().bits(), bits, "{state:?}");
        }
    }

    #[test]
    fn encodings_are_distinct() {
        for (i, a) in EntryState::ALL.iter().enumerate() {
            for b in &EntryState::ALL[i + 1..] {
                assert_ne!(a.flags(), b.flags(), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn contains_is_all_bits_set() {
        for state in EntryState::ALL {
            for flag in [
                StateFlags::READING,
                StateFlags::READABLE,
                StateFlags::UPGRADING,
                StateFlags::WRITABLE,
                StateFlags::MODIFIED,
                StateFlags::DOWNGRADING,
                StateFlags::DECACHING,
                StateFlags::NOT_CACHED,
            ] {
                assert_eq!(
                    state.contains(flag),
                    state.flags().bits() & flag.bits() == flag.bits(),
                    "{state:?} / {flag:?}"
                );
            }
            // A multi-bit mask requires every bit, not any of them.
            let readable_writable = StateFlags::READABLE | StateFlags::WRITABLE;
            assert_eq!(
                state.contains(readable_writable),
                state.contains(StateFlags::READABLE) && state.contains(StateFlags::WRITABLE)
            );
        }
    }
}
