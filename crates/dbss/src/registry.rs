// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Object Registry: the set of currently-active (in-RAM) objects, keyed by DOID.

use crate::wire::{Channel, DoId, FieldValue, Location};
use dbss_schema::{ClassId, FieldId};
use std::collections::HashMap;

/// An object resident in RAM.
///
/// Invariant: the field map contains exactly the fields whose DC flags
/// mark them ram-or-required, no others.
#[derive(Debug, Clone)]
pub struct ActiveObjectRecord {
    pub class: ClassId,
    pub location: Location,
    fields: HashMap<FieldId, Vec<u8>>,
    /// Sender of the last mutation, used as the broadcast "from" on `DELETE_RAM`.
    pub last_mutator: Channel,
}

impl ActiveObjectRecord {
    pub fn new(class: ClassId, location: Location, fields: HashMap<FieldId, Vec<u8>>) -> Self {
        Self {
            class,
            location,
            fields,
            last_mutator: Channel(0),
        }
    }

    pub fn get(&self, field: FieldId) -> Option<&[u8]> {
        self.fields.get(&field).map(|v| v.as_slice())
    }

    pub fn set(&mut self, field: FieldId, value: Vec<u8>) {
        self.fields.insert(field, value);
    }

    pub fn has_field(&self, field: FieldId) -> bool {
        self.fields.contains_key(&field)
    }

    /// All fields currently held, for `GET_ALL_RESP` (required+ram).
    pub fn field_values(&self) -> Vec<FieldValue> {
        self.fields
            .iter()
            .map(|(field, value)| FieldValue {
                field: *field,
                value: value.clone(),
            })
            .collect()
    }
}

/// Holds the `DOID -> Active Object Record` map. Invariant: at most one
/// record per DOID.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: HashMap<DoId, ActiveObjectRecord>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, doid: DoId) -> bool {
        self.objects.contains_key(&doid)
    }

    pub fn get(&self, doid: DoId) -> Option<&ActiveObjectRecord> {
        self.objects.get(&doid)
    }

    pub fn get_mut(&mut self, doid: DoId) -> Option<&mut ActiveObjectRecord> {
        self.objects.get_mut(&doid)
    }

    pub fn insert(&mut self, doid: DoId, record: ActiveObjectRecord) {
        self.objects.insert(doid, record);
    }

    /// Tears down a record on `DELETE_RAM`. Returns the removed record
    /// so the caller can read its location for the broadcast before it's gone.
    pub fn remove(&mut self, doid: DoId) -> Option<ActiveObjectRecord> {
        self.objects.remove(&doid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_most_one_record_per_doid() {
        let mut registry = ObjectRegistry::new();
        assert!(!registry.is_active(1));
        registry.insert(1, ActiveObjectRecord::new(5, Location::INVALID, HashMap::new()));
        assert!(registry.is_active(1));
        registry.insert(1, ActiveObjectRecord::new(6, Location::INVALID, HashMap::new()));
        assert_eq!(registry.get(1).unwrap().class, 6);
    }

    #[test]
    fn remove_returns_record_for_broadcast() {
        let mut registry = ObjectRegistry::new();
        registry.insert(
            1,
            ActiveObjectRecord::new(5, Location::new(10, 20), HashMap::new()),
        );
        let removed = registry.remove(1).unwrap();
        assert_eq!(removed.location, Location::new(10, 20));
        assert!(!registry.is_active(1));
    }

    #[test]
    fn field_set_and_get() {
        let mut record = ActiveObjectRecord::new(5, Location::INVALID, HashMap::new());
        assert!(record.get(1).is_none());
        record.set(1, vec![1, 2, 3]);
        assert_eq!(record.get(1), Some(&[1u8, 2, 3][..]));
        assert!(record.has_field(1));
    }
}
