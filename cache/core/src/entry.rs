// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cache_types::{ContextId, EntryKey};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use crate::error::{CacheError, CacheResult};
use crate::state::{EntryState, StateFlags};

/// Retry bound for [`EntryGuard::wait_writable`]. Exceeding it means the
/// entry keeps alternating between upgrade and downgrade, which upstream
/// access coordination is supposed to rule out, so it is fatal rather
/// than an error the caller could act on.
const MAX_WRITABLE_RETRIES: usize = 1000;

/// Cooperative cancellation signal for threads blocked on an entry.
///
/// A coordinator aborting a transaction sets the flag and then calls
/// [`Entry::interrupt_waiters`] on the entry the transaction blocks on.
/// The waiter observes the flag on wake-up and fails with
/// [`CacheError::TransactionInterrupted`].
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that waits checking this flag fail promptly.
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What [`EntryGuard::wait_writable`] found once it stopped blocking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    /// The value may be written.
    Writable,
    /// The value may be read, but the entry did not become writable.
    Readable,
    /// The entry was removed from the cache.
    Decached,
}

struct EntryInner<V> {
    state: EntryState,
    value: Option<V>,
    context_id: ContextId,
}

/// The cached image of one key's value together with its lifecycle state.
///
/// The mutable fields live inside the entry's own mutex and are reachable
/// only through the [`EntryGuard`] returned by [`Entry::lock`], so holding
/// the guard is the proof that the lock is held. The key is immutable and
/// may be read without locking.
///
/// The entry holds no threads of its own: transitions and predicates never
/// block, and only the `wait_*` family suspends. Every state change is
/// published under the lock and broadcast to all waiters, which re-check
/// their predicate on every wake-up.
pub struct Entry<K, V> {
    key: K,
    inner: Mutex<EntryInner<V>>,
    /// Broadcast on every state change.
    available: Condvar,
}

impl<K: EntryKey, V> Entry<K, V> {
    /// Creates an entry for `key`, last touched by `context_id`, in
    /// `initial_state`. The container picks one of the two fetching states,
    /// or a clean cached state when the value is synthesized locally; the
    /// constructor does not check which.
    pub fn new(key: K, context_id: ContextId, initial_state: EntryState) -> Self {
        Self {
            key,
            inner: Mutex::new(EntryInner {
                state: initial_state,
                value: None,
                context_id,
            }),
            available: Condvar::new(),
        }
    }

    /// The key this entry caches. Immutable, so no lock is required.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Acquires the entry lock, blocking until it is free.
    pub fn lock(&self) -> EntryGuard<'_, K, V> {
        EntryGuard {
            entry: self,
            inner: self.inner.lock(),
        }
    }

    /// Non-blocking [`Entry::lock`]; `None` when the lock is contended.
    pub fn try_lock(&self) -> Option<EntryGuard<'_, K, V>> {
        self.inner
            .try_lock()
            .map(|inner| EntryGuard { entry: self, inner })
    }

    /// Wakes every thread blocked on this entry without changing state.
    ///
    /// Used to deliver an [`InterruptFlag`] to waiters. Harmless otherwise:
    /// waits treat it as a spurious wake-up and re-check their predicate.
    pub fn interrupt_waiters(&self) {
        self.available.notify_all();
    }
}

/// Witness that the entry lock is held.
///
/// All state reads, transitions and waits are methods here. The waits
/// release the lock while blocked and have reacquired it by the time they
/// return, so the guard stays valid across them.
pub struct EntryGuard<'a, K, V> {
    entry: &'a Entry<K, V>,
    inner: MutexGuard<'a, EntryInner<V>>,
}

impl<K: EntryKey, V> EntryGuard<'_, K, V> {
    pub fn state(&self) -> EntryState {
        self.inner.state
    }

    /// The cached value. `Some` whenever the state is readable; callers
    /// must not rely on it in any other state.
    pub fn value(&self) -> Option<&V> {
        self.inner.value.as_ref()
    }

    pub fn set_value(&mut self, value: V) {
        self.inner.value = Some(value);
    }

    pub fn context_id(&self) -> ContextId {
        self.inner.context_id
    }

    /// Records an access by `context_id`. The stored id only moves forward.
    pub fn note_access(&mut self, context_id: ContextId) {
        self.inner.context_id = self.inner.context_id.max(context_id);
    }

    /// True while a fetch for read access is in progress.
    pub fn is_reading(&self) -> bool {
        self.inner.state.contains(StateFlags::READING)
    }

    /// True while the value may be read.
    pub fn is_readable(&self) -> bool {
        self.inner.state.contains(StateFlags::READABLE)
    }

    /// True while an upgrade to write access is in progress.
    pub fn is_upgrading(&self) -> bool {
        self.inner.state.contains(StateFlags::UPGRADING)
    }

    /// True while the value may be written.
    pub fn is_writable(&self) -> bool {
        self.inner.state.contains(StateFlags::WRITABLE)
    }

    /// True while the local value diverges from the backing store.
    pub fn is_modified(&self) -> bool {
        self.inner.state.contains(StateFlags::MODIFIED)
    }

    /// True while a demotion from write access is in progress.
    pub fn is_downgrading(&self) -> bool {
        self.inner.state.contains(StateFlags::DOWNGRADING)
    }

    /// True while eviction is in progress.
    pub fn is_decaching(&self) -> bool {
        self.inner.state.contains(StateFlags::DECACHING)
    }

    /// True once the entry has reached its terminal state. This is an
    /// identity comparison against [`EntryState::Decached`], not a bit test.
    pub fn is_decached(&self) -> bool {
        self.inner.state == EntryState::Decached
    }

    // Transitions. Each verifies its precondition, stores the new state and
    // wakes all waiters; on a precondition mismatch it fails with
    // InvalidState and changes nothing.

    /// FetchingRead → CachedRead, when a fetch for read completes.
    pub fn set_cached_read(&mut self) -> CacheResult<()> {
        self.transition(
            "set_cached_read",
            &[EntryState::FetchingRead],
            EntryState::CachedRead,
        )
    }

    /// FetchingWrite → CachedWrite, when a fetch for write completes.
    pub fn set_cached_write(&mut self) -> CacheResult<()> {
        self.transition(
            "set_cached_write",
            &[EntryState::FetchingWrite],
            EntryState::CachedWrite,
        )
    }

    /// FetchingUpgrade → CachedWrite, when an upgrade completes.
    pub fn set_upgraded(&mut self) -> CacheResult<()> {
        self.transition(
            "set_upgraded",
            &[EntryState::FetchingUpgrade],
            EntryState::CachedWrite,
        )
    }

    /// CachedRead → FetchingUpgrade, when an upgrade to write access starts.
    pub fn set_fetching_upgrade(&mut self) -> CacheResult<()> {
        self.transition(
            "set_fetching_upgrade",
            &[EntryState::CachedRead],
            EntryState::FetchingUpgrade,
        )
    }

    /// CachedRead → CachedWrite, for a promotion that needs no fetch,
    /// e.g. because the neighboring binding was just removed.
    pub fn set_upgraded_immediate(&mut self) -> CacheResult<()> {
        self.transition(
            "set_upgraded_immediate",
            &[EntryState::CachedRead],
            EntryState::CachedWrite,
        )
    }

    /// CachedWrite → CachedDirty, after the value is modified locally.
    pub fn set_cached_dirty(&mut self) -> CacheResult<()> {
        self.transition(
            "set_cached_dirty",
            &[EntryState::CachedWrite],
            EntryState::CachedDirty,
        )
    }

    /// CachedDirty → CachedWrite, after commit or abort flushed the value.
    pub fn set_not_modified(&mut self) -> CacheResult<()> {
        self.transition(
            "set_not_modified",
            &[EntryState::CachedDirty],
            EntryState::CachedWrite,
        )
    }

    /// CachedWrite → EvictingDowngrade, when a demotion to read begins.
    pub fn set_evicting_downgrade(&mut self) -> CacheResult<()> {
        self.transition(
            "set_evicting_downgrade",
            &[EntryState::CachedWrite],
            EntryState::EvictingDowngrade,
        )
    }

    /// EvictingDowngrade → CachedRead, when the demotion completes.
    pub fn set_evicted_downgrade(&mut self) -> CacheResult<()> {
        self.transition(
            "set_evicted_downgrade",
            &[EntryState::EvictingDowngrade],
            EntryState::CachedRead,
        )
    }

    /// CachedWrite → CachedRead, demoting an entry known not to be in use.
    pub fn set_evicted_downgrade_immediate(&mut self) -> CacheResult<()> {
        self.transition(
            "set_evicted_downgrade_immediate",
            &[EntryState::CachedWrite],
            EntryState::CachedRead,
        )
    }

    /// CachedRead → EvictingRead or CachedWrite → EvictingWrite, when
    /// eviction begins. The destination follows the source access mode.
    pub fn set_evicting(&mut self) -> CacheResult<()> {
        match self.inner.state {
            EntryState::CachedRead => {
                self.store(EntryState::EvictingRead);
                Ok(())
            }
            EntryState::CachedWrite => {
                self.store(EntryState::EvictingWrite);
                Ok(())
            }
            actual => Err(self.invalid_state(
                "set_evicting",
                &[EntryState::CachedRead, EntryState::CachedWrite],
                actual,
            )),
        }
    }

    /// {EvictingRead, EvictingWrite} → Decached, when eviction completes.
    pub fn set_evicted(&mut self) -> CacheResult<()> {
        self.transition(
            "set_evicted",
            &[EntryState::EvictingRead, EntryState::EvictingWrite],
            EntryState::Decached,
        )
    }

    /// {CachedRead, CachedWrite} → Decached, evicting an entry known not
    /// to be in use, skipping the in-progress eviction states.
    pub fn set_evicted_immediate(&mut self) -> CacheResult<()> {
        self.transition(
            "set_evicted_immediate",
            &[EntryState::CachedRead, EntryState::CachedWrite],
            EntryState::Decached,
        )
    }

    /// {FetchingRead, FetchingWrite} → Decached, abandoning a fetch that
    /// yielded nothing useful. Only the sentinel last-binding entry may be
    /// abandoned this way.
    pub fn set_evicted_abandon_fetching(&mut self) -> CacheResult<()> {
        if !self.entry.key.is_last_binding() {
            return Err(CacheError::InvalidState {
                operation: "set_evicted_abandon_fetching",
                entry: self.entry.key.to_string(),
                expected: "the sentinel last-binding key".to_string(),
                actual: self.inner.state,
            });
        }
        self.transition(
            "set_evicted_abandon_fetching",
            &[EntryState::FetchingRead, EntryState::FetchingWrite],
            EntryState::Decached,
        )
    }

    /// Blocks until the value can be read, the deadline passes or the
    /// interrupt fires. Returns false when the entry is being, or already
    /// has been, removed from the cache instead of becoming readable.
    pub fn wait_readable(&mut self, stop: Instant, interrupt: &InterruptFlag) -> CacheResult<bool> {
        if self.is_readable() {
            return Ok(true);
        }
        if self.is_reading() {
            self.wait_flags_clear(StateFlags::READING, stop, interrupt)?;
            return Ok(self.is_readable());
        }
        if self.is_decaching() {
            self.wait_flags_set(StateFlags::NOT_CACHED, stop, interrupt)?;
            return Ok(false);
        }
        debug_assert!(self.is_decached());
        Ok(false)
    }

    /// Blocks until the entry settles as writable, readable without a
    /// pending upgrade, or decached.
    ///
    /// In-progress upgrades, downgrades and fetches are waited out and the
    /// state re-examined, bounded by [`MAX_WRITABLE_RETRIES`].
    pub fn wait_writable(
        &mut self,
        stop: Instant,
        interrupt: &InterruptFlag,
    ) -> CacheResult<Availability> {
        for _ in 0..MAX_WRITABLE_RETRIES {
            if self.is_writable() {
                return Ok(Availability::Writable);
            }
            if self.is_upgrading() {
                self.wait_flags_clear(StateFlags::UPGRADING, stop, interrupt)?;
                continue;
            }
            if self.is_downgrading() {
                self.wait_flags_clear(StateFlags::DOWNGRADING, stop, interrupt)?;
                continue;
            }
            if self.state() == EntryState::CachedRead {
                return Ok(Availability::Readable);
            }
            if self.is_reading() {
                self.wait_flags_clear(StateFlags::READING, stop, interrupt)?;
                continue;
            }
            if self.is_decaching() {
                self.wait_decached(stop, interrupt)?;
                return Ok(Availability::Decached);
            }
            debug_assert!(self.is_decached());
            return Ok(Availability::Decached);
        }
        panic!(
            "too many retries waiting for entry {} to become writable",
            self.entry.key
        );
    }

    /// Blocks until an eviction in progress completes. Immediate when the
    /// entry is already gone; invalid-state when no eviction is in
    /// progress.
    pub fn wait_decached(&mut self, stop: Instant, interrupt: &InterruptFlag) -> CacheResult<()> {
        if self.is_decached() {
            return Ok(());
        }
        match self.state() {
            EntryState::EvictingRead | EntryState::EvictingWrite => {
                self.wait_flags_set(StateFlags::NOT_CACHED, stop, interrupt)
            }
            actual => Err(self.invalid_state(
                "wait_decached",
                &[EntryState::EvictingRead, EntryState::EvictingWrite],
                actual,
            )),
        }
    }

    /// Blocks until an upgrade in progress completes; invalid-state when
    /// no upgrade is in progress.
    pub fn wait_not_upgrading(
        &mut self,
        stop: Instant,
        interrupt: &InterruptFlag,
    ) -> CacheResult<()> {
        match self.state() {
            EntryState::FetchingUpgrade | EntryState::FetchingWrite => {
                self.wait_flags_clear(StateFlags::UPGRADING, stop, interrupt)
            }
            actual => Err(self.invalid_state(
                "wait_not_upgrading",
                &[EntryState::FetchingUpgrade, EntryState::FetchingWrite],
                actual,
            )),
        }
    }

    /// Blocks until every bit of `mask` is set in the entry state.
    pub fn wait_flags_set(
        &mut self,
        mask: StateFlags,
        stop: Instant,
        interrupt: &InterruptFlag,
    ) -> CacheResult<()> {
        self.wait_while(stop, interrupt, |state| !state.contains(mask))
    }

    /// Blocks until every bit of `mask` is clear in the entry state.
    pub fn wait_flags_clear(
        &mut self,
        mask: StateFlags,
        stop: Instant,
        interrupt: &InterruptFlag,
    ) -> CacheResult<()> {
        self.wait_while(stop, interrupt, |state| state.flags().intersects(mask))
    }

    /// Forces the state without precondition checks, to stage situations
    /// the transition graph cannot reach directly.
    #[cfg(test)]
    pub(crate) fn set_state_for_test(&mut self, state: EntryState) {
        self.store(state);
    }

    // Blocks while `blocked` holds, re-checking on every wake-up. Bounded
    // by `stop`, cancelled by `interrupt`; both produce errors carrying the
    // entry identity for the transaction boundary to report.
    fn wait_while(
        &mut self,
        stop: Instant,
        interrupt: &InterruptFlag,
        blocked: impl Fn(EntryState) -> bool,
    ) -> CacheResult<()> {
        let start = Instant::now();
        while blocked(self.inner.state) {
            if Instant::now() >= stop {
                return Err(CacheError::TransactionTimeout {
                    entry: self.entry.key.to_string(),
                    elapsed: start.elapsed(),
                });
            }
            let _ = self.entry.available.wait_until(&mut self.inner, stop);
            if interrupt.is_set() {
                return Err(CacheError::TransactionInterrupted {
                    entry: self.entry.key.to_string(),
                });
            }
        }
        Ok(())
    }

    fn transition(
        &mut self,
        operation: &'static str,
        sources: &[EntryState],
        next: EntryState,
    ) -> CacheResult<()> {
        let actual = self.inner.state;
        if !sources.contains(&actual) {
            return Err(self.invalid_state(operation, sources, actual));
        }
        self.store(next);
        Ok(())
    }

    fn store(&mut self, next: EntryState) {
        trace!(key = %self.entry.key, from = ?self.inner.state, to = ?next, "entry state transition");
        self.inner.state = next;
        self.entry.available.notify_all();
    }

    fn invalid_state(
        &self,
        operation: &'static str,
        sources: &[EntryState],
        actual: EntryState,
    ) -> CacheError {
        let expected = sources
            .iter()
            .map(|state| format!("{state:?}"))
            .collect::<Vec<_>>()
            .join(" or ");
        CacheError::InvalidState {
            operation,
            entry: self.entry.key.to_string(),
            expected,
            actual,
        }
    }
}
