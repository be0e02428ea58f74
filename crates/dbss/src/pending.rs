// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending-Fetch Coalescer: tracks, per DOID, the single in-flight `GET_ALL`
//! fetch from the database and everyone waiting on its response, plus the
//! process-wide database context counter it shares with forwarded field
//! fetches.

use crate::wire::{Channel, DoId, FieldValue, Location};
use dbss_schema::FieldId;
use std::collections::{HashMap, HashSet};

/// Draws monotonically increasing database contexts, shared by every kind of
/// outstanding database request (`GET_ALL`, `GET_FIELD(S)`) so that no two
/// live requests ever collide.
#[derive(Debug, Default)]
pub struct ContextCounter {
    next: u32,
    live: HashSet<u32>,
}

impl ContextCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw the next context not currently in use, advancing past collisions.
    pub fn allocate(&mut self) -> u32 {
        loop {
            let candidate = self.next;
            self.next = self.next.wrapping_add(1);
            if self.live.insert(candidate) {
                return candidate;
            }
        }
    }

    pub fn release(&mut self, context: u32) {
        self.live.remove(&context);
    }
}

/// A waiter queued on a Pending Fetch Entry, tagged by what it's waiting for.
#[derive(Debug, Clone)]
pub enum Waiter {
    Activate {
        location: Location,
        /// Field overrides from `ACTIVATE_WITH_DEFAULTS_OTHER`: these
        /// replace the DC default for the named field only. Empty for a plain
        /// `ACTIVATE_WITH_DEFAULTS`.
        overrides: Vec<FieldValue>,
    },
    GetAll {
        reply_to: Channel,
        context: u32,
    },
}

/// One in-flight `DB_GET_ALL` and everyone waiting on its response.
#[derive(Debug, Clone)]
pub struct PendingFetchEntry {
    pub context: u32,
    pub waiters: Vec<Waiter>,
}

impl PendingFetchEntry {
    fn new(context: u32) -> Self {
        Self {
            context,
            waiters: Vec::new(),
        }
    }
}

/// Tracks the single outstanding `GET_ALL` fetch per DOID. Invariant: at most
/// one entry per DOID; a context names exactly one live entry.
#[derive(Debug, Default)]
pub struct PendingTable {
    by_doid: HashMap<DoId, PendingFetchEntry>,
    by_context: HashMap<u32, DoId>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self, doid: DoId) -> bool {
        self.by_doid.contains_key(&doid)
    }

    pub fn get(&self, doid: DoId) -> Option<&PendingFetchEntry> {
        self.by_doid.get(&doid)
    }

    /// Append a waiter to an already-pending entry -- the coalescing path.
    ///
    /// Panics if there is no pending entry for `doid` -- callers must check
    /// `is_pending` first, matching the dispatch table's branch structure.
    pub fn push_waiter(&mut self, doid: DoId, waiter: Waiter) {
        let entry = self
            .by_doid
            .get_mut(&doid)
            .expect("push_waiter called with no pending entry");
        entry.waiters.push(waiter);
    }

    /// Create a new entry for `doid`, draw a free context from `counter`, and
    /// seed it with the first waiter. Returns the context to use for the
    /// outbound `DB_GET_ALL`.
    pub fn create(&mut self, doid: DoId, waiter: Waiter, counter: &mut ContextCounter) -> u32 {
        let context = counter.allocate();
        let mut entry = PendingFetchEntry::new(context);
        entry.waiters.push(waiter);
        self.by_doid.insert(doid, entry);
        self.by_context.insert(context, doid);
        context
    }

    /// Resolve a `DB_GET_ALL_RESP` context to the pending entry it answers,
    /// removing it from the table.
    pub fn take_by_context(
        &mut self,
        context: u32,
        counter: &mut ContextCounter,
    ) -> Option<(DoId, PendingFetchEntry)> {
        let doid = self.by_context.remove(&context)?;
        counter.release(context);
        let entry = self.by_doid.remove(&doid)?;
        Some((doid, entry))
    }
}

/// Whether a forwarded `DB_GET_FIELD(S)` answers a single-field or multi-field
/// request from the caller, so the response can be reshaped back to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFetchShape {
    Single,
    Multi,
}

/// Remembers who to reply to, and which fields were already resolved locally
/// from RAM, for one forwarded `DB_GET_FIELD(S)`.
#[derive(Debug, Clone)]
pub struct FieldFetchEntry {
    pub reply_to: Channel,
    pub caller_context: u32,
    pub shape: FieldFetchShape,
    /// The single field originally requested, kept to label a `Single`-shape
    /// failure reply when nothing was resolved.
    pub requested_field: FieldId,
    pub local_values: Vec<FieldValue>,
}

/// Keyed purely by context -- unlike `GET_ALL`, field fetches are not
/// coalesced per DOID; every request in flight gets its own context.
#[derive(Debug, Default)]
pub struct FieldFetchTable {
    by_context: HashMap<u32, FieldFetchEntry>,
}

impl FieldFetchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        entry: FieldFetchEntry,
        counter: &mut ContextCounter,
    ) -> u32 {
        let context = counter.allocate();
        self.by_context.insert(context, entry);
        context
    }

    pub fn take(&mut self, context: u32, counter: &mut ContextCounter) -> Option<FieldFetchEntry> {
        let entry = self.by_context.remove(&context)?;
        counter.release(context);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_coalesce_preserves_arrival_order() {
        let mut table = PendingTable::new();
        let mut counter = ContextCounter::new();
        let context = table.create(
            9011,
            Waiter::GetAll {
                reply_to: Channel(5),
                context: 3,
            },
            &mut counter,
        );
        assert!(table.is_pending(9011));

        table.push_waiter(
            9011,
            Waiter::Activate {
                location: Location::new(33000, 33),
                overrides: Vec::new(),
            },
        );

        let (doid, entry) = table.take_by_context(context, &mut counter).unwrap();
        assert_eq!(doid, 9011);
        assert_eq!(entry.waiters.len(), 2);
        assert!(matches!(entry.waiters[0], Waiter::GetAll { .. }));
        assert!(matches!(entry.waiters[1], Waiter::Activate { .. }));
        assert!(!table.is_pending(9011));
    }

    #[test]
    fn context_allocation_skips_live_contexts() {
        let mut table = PendingTable::new();
        let mut counter = ContextCounter::new();
        let activate = |loc| Waiter::Activate {
            location: loc,
            overrides: Vec::new(),
        };
        let c1 = table.create(1, activate(Location::INVALID), &mut counter);
        let c2 = table.create(2, activate(Location::INVALID), &mut counter);
        assert_ne!(c1, c2);

        table.take_by_context(c1, &mut counter);
        let c3 = table.create(3, activate(Location::INVALID), &mut counter);
        assert_ne!(c3, c2);
    }

    #[test]
    fn unknown_context_is_discarded() {
        let mut table = PendingTable::new();
        let mut counter = ContextCounter::new();
        assert!(table.take_by_context(999, &mut counter).is_none());
    }

    #[test]
    fn field_fetch_table_round_trips_by_context() {
        let mut table = FieldFetchTable::new();
        let mut counter = ContextCounter::new();
        let context = table.create(
            FieldFetchEntry {
                reply_to: Channel(7),
                caller_context: 42,
                shape: FieldFetchShape::Single,
                requested_field: 3,
                local_values: Vec::new(),
            },
            &mut counter,
        );
        let entry = table.take(context, &mut counter).unwrap();
        assert_eq!(entry.caller_context, 42);
        assert!(table.take(context, &mut counter).is_none());
    }

    #[test]
    fn shared_counter_never_repeats_live_context() {
        let mut counter = ContextCounter::new();
        let a = counter.allocate();
        let b = counter.allocate();
        assert_ne!(a, b);
        counter.release(a);
        let c = counter.allocate();
        assert_ne!(c, b);
    }
}
