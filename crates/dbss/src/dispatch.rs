// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Object State Machine & dispatch: the largest component,
//! the function of `(message type, active?, pending?)` that the Range
//! Subscriber hands every inbound message off to.

use crate::bus::BusInterface;
use crate::pending::{
    ContextCounter, FieldFetchEntry, FieldFetchShape, FieldFetchTable, PendingTable, Waiter,
};
use crate::registry::{ActiveObjectRecord, ObjectRegistry};
use crate::wire::{BusMessage, Channel, DbGetAllResult, DbStatus, DoId, FieldValue, Location, MessageKind};
use dbss_schema::{DcSchema, FieldId};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns the registry and pending tables and turns one inbound `BusMessage`
/// into the zero or more outbound ones the dispatch table describes.
///
/// Single-threaded by design: `dispatch` takes `&mut self` and every
/// call runs to completion before the next is accepted.
pub struct Dispatcher {
    schema: Arc<DcSchema>,
    bus: Arc<dyn BusInterface>,
    own_channel: Channel,
    database_channel: Channel,
    range_min: DoId,
    range_max: DoId,
    registry: ObjectRegistry,
    pending: PendingTable,
    field_fetches: FieldFetchTable,
    contexts: ContextCounter,
}

impl Dispatcher {
    pub fn new(
        schema: Arc<DcSchema>,
        bus: Arc<dyn BusInterface>,
        own_channel: Channel,
        database_channel: Channel,
        range_min: DoId,
        range_max: DoId,
    ) -> Self {
        Self {
            schema,
            bus,
            own_channel,
            database_channel,
            range_min,
            range_max,
            registry: ObjectRegistry::new(),
            pending: PendingTable::new(),
            field_fetches: FieldFetchTable::new(),
            contexts: ContextCounter::new(),
        }
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    fn in_range(&self, doid: DoId) -> bool {
        (self.range_min..=self.range_max).contains(&doid)
    }

    fn send(&self, message: BusMessage) {
        if let Err(err) = self.bus.send(message) {
            tracing::error!(%err, "bus send failed");
        }
    }

    fn reply(&self, to: Channel, kind: MessageKind) {
        self.send(BusMessage::to(to, self.own_channel, kind));
    }

    /// Dispatch one inbound message. Never panics on protocol errors -- every
    /// failure path is logged and discarded.
    pub fn dispatch(&mut self, message: BusMessage) {
        let sender = message.sender;
        match message.kind {
            MessageKind::ActivateWithDefaults { doid, location } => {
                self.handle_activate(doid, location, Vec::new());
            }
            MessageKind::ActivateWithDefaultsOther {
                doid,
                location,
                overrides,
            } => {
                self.handle_activate(doid, location, overrides);
            }
            MessageKind::GetAll { context, doid } => {
                self.handle_get_all(sender, context, doid);
            }
            MessageKind::GetField { context, doid, field } => {
                self.handle_get_fields(sender, context, doid, vec![field], FieldFetchShape::Single);
            }
            MessageKind::GetFields { context, doid, fields } => {
                self.handle_get_fields(sender, context, doid, fields, FieldFetchShape::Multi);
            }
            MessageKind::SetField { doid, field, value } => {
                self.handle_set_fields(sender, doid, vec![FieldValue { field, value }]);
            }
            MessageKind::SetFields { doid, fields } => {
                self.handle_set_fields(sender, doid, fields);
            }
            MessageKind::DeleteRam { doid } => {
                self.handle_delete_ram(doid);
            }
            MessageKind::DeleteDisk { doid } => {
                self.handle_delete_disk(doid);
            }
            MessageKind::DbGetAllResp {
                context,
                status,
                result,
            } => {
                self.handle_db_get_all_resp(context, status, result);
            }
            MessageKind::DbGetFieldResp {
                context,
                status,
                field,
                value,
            } => {
                self.handle_db_get_field_resp(context, status, field, value);
            }
            MessageKind::DbGetFieldsResp {
                context,
                status,
                fields,
            } => {
                self.handle_db_get_fields_resp(context, status, fields);
            }
            other => {
                tracing::warn!(?other, "unsupported or out-of-state message; discarding");
            }
        }
    }

    // -- ACTIVATE_WITH_DEFAULTS[_OTHER] ----------------------------------

    fn handle_activate(&mut self, doid: DoId, location: Location, overrides: Vec<FieldValue>) {
        if !self.in_range(doid) {
            tracing::warn!(doid, "activate for doid outside configured range; discarding");
            return;
        }
        if self.registry.is_active(doid) {
            tracing::debug!(doid, "activate on already-active object; ignoring");
            return;
        }
        let waiter = Waiter::Activate { location, overrides };
        if self.pending.is_pending(doid) {
            self.pending.push_waiter(doid, waiter);
            return;
        }
        let context = self.pending.create(doid, waiter, &mut self.contexts);
        self.send(BusMessage::to(
            self.database_channel,
            self.own_channel,
            MessageKind::DbGetAll { context, doid },
        ));
    }

    // -- GET_ALL ----------------------------------------------------------

    fn handle_get_all(&mut self, sender: Channel, context: u32, doid: DoId) {
        if !self.in_range(doid) {
            tracing::warn!(doid, "get_all for doid outside configured range; discarding");
            return;
        }
        if let Some(record) = self.registry.get(doid) {
            let (required, optional) = self.get_all_sections(record);
            self.reply(
                sender,
                MessageKind::GetAllResp {
                    context,
                    doid,
                    location: record.location,
                    class: record.class,
                    required,
                    optional,
                },
            );
            return;
        }

        let waiter = Waiter::GetAll {
            reply_to: sender,
            context,
        };
        if self.pending.is_pending(doid) {
            self.pending.push_waiter(doid, waiter);
            return;
        }
        let db_context = self.pending.create(doid, waiter, &mut self.contexts);
        self.send(BusMessage::to(
            self.database_channel,
            self.own_channel,
            MessageKind::DbGetAll {
                context: db_context,
                doid,
            },
        ));
    }

    /// `GET_ALL_RESP` field grouping: the main section
    /// holds every field backed by a guaranteed source of truth (required, or
    /// ram-and-db); the optional section holds ram-only fields with no `db`
    /// flag, which only carry a value when an override has set one.
    fn get_all_sections(&self, record: &ActiveObjectRecord) -> (Vec<FieldValue>, Vec<FieldValue>) {
        let mut main = Vec::new();
        let mut optional = Vec::new();
        if let Some(class_def) = self.schema.class(record.class) {
            for &field_id in &class_def.field_order {
                let Some(def) = self.schema.field(field_id) else {
                    continue;
                };
                let Some(value) = record.get(field_id) else {
                    continue;
                };
                let fv = FieldValue {
                    field: field_id,
                    value: value.to_vec(),
                };
                if def.flags.required || (def.flags.ram && def.flags.db) {
                    main.push(fv);
                } else if def.flags.ram {
                    optional.push(fv);
                }
            }
        }
        (main, optional)
    }

    /// Required-flagged field values only, in DC declaration order -- the
    /// main section of `ENTER_LOCATION_WITH_REQUIRED`.
    fn required_values(&self, record: &ActiveObjectRecord) -> Vec<FieldValue> {
        self.schema
            .required_fields(record.class)
            .into_iter()
            .filter_map(|f| {
                record.get(f.id).map(|v| FieldValue {
                    field: f.id,
                    value: v.to_vec(),
                })
            })
            .collect()
    }

    /// Ram-but-not-required fields that an `ACTIVATE_WITH_DEFAULTS_OTHER`
    /// explicitly overrode, in DC declaration order. Empty unless the
    /// activation carried overrides, which is why
    /// plain activations never produce the `_OTHER` broadcast variant even
    /// when the object has other ram fields holding values.
    fn enter_location_optional(
        &self,
        class: dbss_schema::ClassId,
        overrides: &[FieldValue],
    ) -> Vec<FieldValue> {
        let mut optional = Vec::new();
        if let Some(class_def) = self.schema.class(class) {
            for &field_id in &class_def.field_order {
                let Some(def) = self.schema.field(field_id) else {
                    continue;
                };
                if def.flags.required || !def.flags.ram {
                    continue;
                }
                if let Some(fv) = overrides.iter().find(|o| o.field == field_id) {
                    optional.push(fv.clone());
                }
            }
        }
        optional
    }

    // -- GET_FIELD / GET_FIELDS --------------------------------------------

    fn handle_get_fields(
        &mut self,
        sender: Channel,
        context: u32,
        doid: DoId,
        fields: Vec<FieldId>,
        shape: FieldFetchShape,
    ) {
        if !self.in_range(doid) {
            tracing::warn!(doid, "get_field(s) for doid outside configured range; discarding");
            return;
        }

        let requested_field = fields.first().copied().unwrap_or(0);
        let mut local_values = Vec::new();
        let mut remote_fields = Vec::new();
        let active_record = self.registry.get(doid);

        for field in fields {
            let Some(def) = self.schema.field(field) else {
                tracing::warn!(doid, field, "unknown field in get_field(s); discarding request");
                return;
            };
            match active_record {
                Some(record) if def.flags.is_ram_or_required() => {
                    if let Some(value) = record.get(field) {
                        local_values.push(FieldValue {
                            field,
                            value: value.to_vec(),
                        });
                    }
                }
                Some(_) => remote_fields.push(field),
                None if def.flags.db => remote_fields.push(field),
                None => {
                    tracing::debug!(doid, field, "non-persisted field on inactive object");
                }
            }
        }

        if remote_fields.is_empty() {
            self.reply_local_field_fetch(sender, context, shape, requested_field, local_values);
            return;
        }

        let entry = FieldFetchEntry {
            reply_to: sender,
            caller_context: context,
            shape,
            requested_field,
            local_values,
        };
        let db_context = self.field_fetches.create(entry, &mut self.contexts);
        if remote_fields.len() == 1 {
            self.send(BusMessage::to(
                self.database_channel,
                self.own_channel,
                MessageKind::DbGetField {
                    context: db_context,
                    doid,
                    field: remote_fields[0],
                },
            ));
        } else {
            self.send(BusMessage::to(
                self.database_channel,
                self.own_channel,
                MessageKind::DbGetFields {
                    context: db_context,
                    doid,
                    fields: remote_fields,
                },
            ));
        }
    }

    fn reply_local_field_fetch(
        &self,
        reply_to: Channel,
        context: u32,
        shape: FieldFetchShape,
        requested_field: FieldId,
        values: Vec<FieldValue>,
    ) {
        match shape {
            FieldFetchShape::Single => {
                let (field, value, status) = match values.into_iter().next() {
                    Some(fv) => (fv.field, Some(fv.value), DbStatus::Success),
                    None => (requested_field, None, DbStatus::Failure),
                };
                self.reply(
                    reply_to,
                    MessageKind::GetFieldResp {
                        context,
                        status,
                        field,
                        value,
                    },
                );
            }
            FieldFetchShape::Multi => {
                let status = if values.is_empty() {
                    DbStatus::Failure
                } else {
                    DbStatus::Success
                };
                self.reply(
                    reply_to,
                    MessageKind::GetFieldsResp {
                        context,
                        status,
                        fields: values,
                    },
                );
            }
        }
    }

    fn handle_db_get_field_resp(
        &mut self,
        context: u32,
        status: DbStatus,
        field: FieldId,
        value: Option<Vec<u8>>,
    ) {
        let Some(entry) = self.field_fetches.take(context, &mut self.contexts) else {
            tracing::warn!(context, "db_get_field_resp matches no field fetch; discarding");
            return;
        };
        let mut values = entry.local_values;
        if status.is_success() {
            if let Some(value) = value {
                values.push(FieldValue { field, value });
            }
        }
        self.reply_local_field_fetch(
            entry.reply_to,
            entry.caller_context,
            entry.shape,
            entry.requested_field,
            values,
        );
    }

    fn handle_db_get_fields_resp(
        &mut self,
        context: u32,
        status: DbStatus,
        fields: Vec<FieldValue>,
    ) {
        let Some(entry) = self.field_fetches.take(context, &mut self.contexts) else {
            tracing::warn!(context, "db_get_fields_resp matches no field fetch; discarding");
            return;
        };
        let mut values = entry.local_values;
        if status.is_success() {
            values.extend(fields);
        }
        self.reply_local_field_fetch(
            entry.reply_to,
            entry.caller_context,
            entry.shape,
            entry.requested_field,
            values,
        );
    }

    // -- SET_FIELD / SET_FIELDS --------------------------------------------

    fn handle_set_fields(&mut self, sender: Channel, doid: DoId, fields: Vec<FieldValue>) {
        if !self.in_range(doid) {
            tracing::warn!(doid, "set_field(s) for doid outside configured range; discarding");
            return;
        }

        let mut db_fields = Vec::new();
        let mut broadcast_fields = Vec::new();
        let mut ram_fields = Vec::new();

        for fv in fields {
            let Some(def) = self.schema.field(fv.field) else {
                tracing::warn!(doid, field = fv.field, "unknown field in set_field(s); skipping");
                continue;
            };
            if def.flags.db {
                db_fields.push(fv.clone());
            }
            if def.flags.is_ram_or_required() {
                ram_fields.push(fv.clone());
            }
            if def.flags.broadcast {
                broadcast_fields.push(fv);
            }
        }

        if !db_fields.is_empty() {
            self.forward_set_to_database(doid, db_fields);
        }

        if let Some(record) = self.registry.get_mut(doid) {
            for fv in &ram_fields {
                record.set(fv.field, fv.value.clone());
            }
            record.last_mutator = sender;
        }

        if !broadcast_fields.is_empty() {
            if let Some(record) = self.registry.get(doid) {
                self.forward_set_broadcast(record.location, sender, doid, broadcast_fields);
            }
        }
    }

    fn forward_set_to_database(&self, doid: DoId, fields: Vec<FieldValue>) {
        if fields.len() == 1 {
            let fv = fields.into_iter().next().unwrap();
            self.send(BusMessage::to(
                self.database_channel,
                self.own_channel,
                MessageKind::DbSetField {
                    doid,
                    field: fv.field,
                    value: fv.value,
                },
            ));
        } else {
            self.send(BusMessage::to(
                self.database_channel,
                self.own_channel,
                MessageKind::DbSetFields { doid, fields },
            ));
        }
    }

    fn forward_set_broadcast(
        &self,
        location: Location,
        original_sender: Channel,
        doid: DoId,
        fields: Vec<FieldValue>,
    ) {
        let kind = if fields.len() == 1 {
            let fv = fields.into_iter().next().unwrap();
            MessageKind::SetField {
                doid,
                field: fv.field,
                value: fv.value,
            }
        } else {
            MessageKind::SetFields { doid, fields }
        };
        self.send(BusMessage::to(location.channel(), original_sender, kind));
    }

    // -- DELETE_RAM / DELETE_DISK -------------------------------------------

    fn handle_delete_ram(&mut self, doid: DoId) {
        if let Some(record) = self.registry.remove(doid) {
            self.send(BusMessage::to(
                record.location.channel(),
                record.last_mutator,
                MessageKind::DeleteRam { doid },
            ));
        }
    }

    fn handle_delete_disk(&mut self, doid: DoId) {
        self.send(BusMessage::to(
            self.database_channel,
            self.own_channel,
            MessageKind::DbDelete { doid },
        ));
        if let Some(record) = self.registry.get(doid) {
            self.send(BusMessage::to(
                record.location.channel(),
                self.own_channel,
                MessageKind::DeleteDisk { doid },
            ));
        }
    }

    // -- DB_GET_ALL_RESP ------------------------------------------------

    fn handle_db_get_all_resp(
        &mut self,
        context: u32,
        status: DbStatus,
        result: Option<DbGetAllResult>,
    ) {
        let Some((doid, entry)) = self.pending.take_by_context(context, &mut self.contexts) else {
            tracing::warn!(context, "db_get_all_resp matches no pending fetch; discarding");
            return;
        };

        let result = if status.is_success() { result } else { None };
        let Some(result) = result else {
            for waiter in entry.waiters {
                if let Waiter::GetAll { reply_to, context } = waiter {
                    self.reply(reply_to, MessageKind::GetAllRespFailure { context });
                }
            }
            return;
        };

        let Some(class_def) = self.schema.class(result.class) else {
            tracing::warn!(doid, class = result.class, "db_get_all_resp names an unknown class");
            for waiter in entry.waiters {
                if let Waiter::GetAll { reply_to, context } = waiter {
                    self.reply(reply_to, MessageKind::GetAllRespFailure { context });
                }
            }
            return;
        };
        let class = class_def.id;

        let returned: HashMap<FieldId, Vec<u8>> = result
            .fields
            .into_iter()
            .map(|fv| (fv.field, fv.value))
            .collect();

        let mut ram_map = HashMap::new();
        for field in self.schema.required_fields(class).into_iter().chain(self.schema.ram_only_fields(class)) {
            if let Some(value) = returned.get(&field.id) {
                ram_map.insert(field.id, value.clone());
            } else if field.flags.required {
                ram_map.insert(field.id, field.default.clone());
            }
        }

        let mut record = ActiveObjectRecord::new(class, Location::INVALID, ram_map);
        let mut location_set = false;

        for waiter in entry.waiters {
            match waiter {
                Waiter::Activate { location, overrides } => {
                    for fv in &overrides {
                        if self.schema.field(fv.field).map(|f| f.flags.is_ram_or_required()).unwrap_or(false) {
                            record.set(fv.field, fv.value.clone());
                        }
                    }
                    if !location_set {
                        record.location = location;
                        location_set = true;
                    }
                    let required = self.required_values(&record);
                    let optional = self.enter_location_optional(class, &overrides);
                    let kind = if optional.is_empty() {
                        MessageKind::EnterLocationWithRequired {
                            doid,
                            location,
                            class,
                            required,
                        }
                    } else {
                        MessageKind::EnterLocationWithRequiredOther {
                            doid,
                            location,
                            class,
                            required,
                            optional,
                        }
                    };
                    self.send(BusMessage::to(location.channel(), self.own_channel, kind));
                }
                Waiter::GetAll { reply_to, context } => {
                    let (required, optional) = self.get_all_sections(&record);
                    self.reply(
                        reply_to,
                        MessageKind::GetAllResp {
                            context,
                            doid,
                            location: record.location,
                            class,
                            required,
                            optional,
                        },
                    );
                }
            }
        }

        self.registry.insert(doid, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBusInterface;
    use dbss_schema::DcSchema;

    const SCHEMA_SRC: &str = r#"
        class DistributedTestObject5 : 5 {
          setRequired1 : uint32 required;
          setRDB3 : uint32 required db;
          setRDbD5 : uint8 ram db;
          setFoo : uint32 db;
          setBR1 : string broadcast ram;
        };
    "#;

    fn test_dispatcher(bus: Arc<MockBusInterface>) -> Dispatcher {
        let schema = Arc::new(DcSchema::from_source(SCHEMA_SRC).unwrap());
        Dispatcher::new(schema, bus, Channel(1), Channel(200), 9000, 9999)
    }

    fn field_id(schema: &DcSchema, name: &str) -> FieldId {
        let class = schema.class_by_name("DistributedTestObject5").unwrap();
        class
            .field_order
            .iter()
            .find(|id| schema.field(**id).unwrap().name == name)
            .copied()
            .unwrap()
    }

    #[test]
    fn activate_hit_emits_get_all_then_enter_location() {
        let bus = Arc::new(MockBusInterface::new());
        let mut dispatcher = test_dispatcher(bus.clone());
        let schema = Arc::new(DcSchema::from_source(SCHEMA_SRC).unwrap());
        let rdb3 = field_id(&schema, "setRDB3");
        let rdbd5 = field_id(&schema, "setRDbD5");

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(50),
            MessageKind::ActivateWithDefaults {
                doid: 9001,
                location: Location::new(80000, 100),
            },
        ));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 1);
        let context = match &sent[0].kind {
            MessageKind::DbGetAll { context, doid } => {
                assert_eq!(*doid, 9001);
                *context
            }
            other => panic!("expected DbGetAll, got {other:?}"),
        };

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(200),
            MessageKind::DbGetAllResp {
                context,
                status: DbStatus::Success,
                result: Some(DbGetAllResult {
                    class: 5,
                    fields: vec![
                        FieldValue {
                            field: rdb3,
                            value: 3117u32.to_le_bytes().to_vec(),
                        },
                        FieldValue {
                            field: rdbd5,
                            value: vec![97],
                        },
                    ],
                }),
            },
        ));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].kind {
            MessageKind::EnterLocationWithRequired {
                doid,
                location,
                class,
                required,
            } => {
                assert_eq!(*doid, 9001);
                assert_eq!(*location, Location::new(80000, 100));
                assert_eq!(*class, 5);
                assert_eq!(required.len(), 2);
            }
            other => panic!("expected EnterLocationWithRequired, got {other:?}"),
        }
        assert!(dispatcher.registry().is_active(9001));
    }

    #[test]
    fn activate_already_active_is_silent() {
        let bus = Arc::new(MockBusInterface::new());
        let mut dispatcher = test_dispatcher(bus.clone());
        dispatcher
            .registry
            .insert(9001, ActiveObjectRecord::new(5, Location::new(1, 1), HashMap::new()));

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(50),
            MessageKind::ActivateWithDefaults {
                doid: 9001,
                location: Location::new(80000, 101),
            },
        ));

        assert!(bus.drain_sent().is_empty());
    }

    #[test]
    fn coalesced_get_all_and_activate_issue_one_db_get_all() {
        let bus = Arc::new(MockBusInterface::new());
        let mut dispatcher = test_dispatcher(bus.clone());

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(60),
            MessageKind::GetAll { context: 3, doid: 9011 },
        ));
        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(61),
            MessageKind::ActivateWithDefaults {
                doid: 9011,
                location: Location::new(33000, 33),
            },
        ));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 1);
        let context = match &sent[0].kind {
            MessageKind::DbGetAll { context, .. } => *context,
            other => panic!("expected DbGetAll, got {other:?}"),
        };

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(200),
            MessageKind::DbGetAllResp {
                context,
                status: DbStatus::Success,
                result: Some(DbGetAllResult {
                    class: 5,
                    fields: Vec::new(),
                }),
            },
        ));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|m| matches!(m.kind, MessageKind::GetAllResp { .. })));
        assert!(sent.iter().any(|m| matches!(m.kind, MessageKind::EnterLocationWithRequired { .. })));
    }

    #[test]
    fn set_field_on_disk_only_object_forwards_to_database_without_ram_record() {
        let bus = Arc::new(MockBusInterface::new());
        let mut dispatcher = test_dispatcher(bus.clone());
        let schema = DcSchema::from_source(SCHEMA_SRC).unwrap();
        let foo = field_id(&schema, "setFoo");

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(70),
            MessageKind::SetField {
                doid: 9030,
                field: foo,
                value: 4096u32.to_le_bytes().to_vec(),
            },
        ));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].kind, MessageKind::DbSetField { .. }));
        assert!(!dispatcher.registry().is_active(9030));
    }

    #[test]
    fn get_field_non_persisted_on_inactive_object_fails_immediately() {
        let bus = Arc::new(MockBusInterface::new());
        let mut dispatcher = test_dispatcher(bus.clone());
        let schema = DcSchema::from_source(SCHEMA_SRC).unwrap();
        let br1 = field_id(&schema, "setBR1");

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(80),
            MessageKind::GetField {
                context: 9,
                doid: 9040,
                field: br1,
            },
        ));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].kind {
            MessageKind::GetFieldResp { status, .. } => assert_eq!(*status, DbStatus::Failure),
            other => panic!("expected GetFieldResp, got {other:?}"),
        }
    }

    #[test]
    fn get_fields_mixed_inactive_forwards_only_db_subset() {
        let bus = Arc::new(MockBusInterface::new());
        let mut dispatcher = test_dispatcher(bus.clone());
        let schema = DcSchema::from_source(SCHEMA_SRC).unwrap();
        let rdb3 = field_id(&schema, "setRDB3");
        let br1 = field_id(&schema, "setBR1");

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(90),
            MessageKind::GetFields {
                context: 11,
                doid: 9050,
                fields: vec![rdb3, br1],
            },
        ));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].kind {
            MessageKind::DbGetField { field, .. } => assert_eq!(*field, rdb3),
            other => panic!("expected DbGetField, got {other:?}"),
        }
    }

    #[test]
    fn range_probe_ignores_doids_outside_configured_range() {
        let bus = Arc::new(MockBusInterface::new());
        let mut dispatcher = test_dispatcher(bus.clone());

        for doid in [900, 999, 8999, 10000, 14545] {
            dispatcher.dispatch(BusMessage::to(
                Channel(1),
                Channel(5),
                MessageKind::GetAll { context: 1, doid },
            ));
        }
        assert!(bus.drain_sent().is_empty());

        for doid in [9000, 9001, 9999] {
            dispatcher.dispatch(BusMessage::to(
                Channel(1),
                Channel(5),
                MessageKind::GetAll { context: 1, doid },
            ));
        }
        assert_eq!(bus.drain_sent().len(), 3);
    }

    #[test]
    fn delete_disk_preserves_ram_record() {
        let bus = Arc::new(MockBusInterface::new());
        let mut dispatcher = test_dispatcher(bus.clone());
        dispatcher.registry.insert(
            9060,
            ActiveObjectRecord::new(5, Location::new(1, 2), HashMap::new()),
        );

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(100),
            MessageKind::DeleteDisk { doid: 9060 },
        ));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|m| matches!(m.kind, MessageKind::DbDelete { .. })));
        assert!(sent.iter().any(|m| matches!(m.kind, MessageKind::DeleteDisk { .. })));
        assert!(dispatcher.registry().is_active(9060));
    }

    #[test]
    fn delete_ram_broadcasts_and_removes_record() {
        let bus = Arc::new(MockBusInterface::new());
        let mut dispatcher = test_dispatcher(bus.clone());
        dispatcher.registry.insert(
            9070,
            ActiveObjectRecord::new(5, Location::new(3, 4), HashMap::new()),
        );

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(100),
            MessageKind::DeleteRam { doid: 9070 },
        ));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].kind, MessageKind::DeleteRam { .. }));
        assert!(!dispatcher.registry().is_active(9070));
    }

    #[test]
    fn set_fields_on_active_object_splits_db_and_ram() {
        let bus = Arc::new(MockBusInterface::new());
        let mut dispatcher = test_dispatcher(bus.clone());
        let schema = DcSchema::from_source(SCHEMA_SRC).unwrap();
        let rdb3 = field_id(&schema, "setRDB3");
        let rdbd5 = field_id(&schema, "setRDbD5");
        dispatcher.registry.insert(
            9080,
            ActiveObjectRecord::new(5, Location::new(5, 6), HashMap::new()),
        );

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(110),
            MessageKind::SetFields {
                doid: 9080,
                fields: vec![
                    FieldValue {
                        field: rdb3,
                        value: 77u32.to_le_bytes().to_vec(),
                    },
                    FieldValue {
                        field: rdbd5,
                        value: vec![9],
                    },
                ],
            },
        ));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].kind, MessageKind::DbSetFields { .. }));

        let record = dispatcher.registry().get(9080).unwrap();
        assert_eq!(record.get(rdb3), Some(&77u32.to_le_bytes()[..]));
        assert_eq!(record.get(rdbd5), Some(&[9u8][..]));
    }

    #[test]
    fn get_all_miss_groups_ram_db_fields_with_required() {
        let bus = Arc::new(MockBusInterface::new());
        let mut dispatcher = test_dispatcher(bus.clone());
        let schema = DcSchema::from_source(SCHEMA_SRC).unwrap();
        let rdb3 = field_id(&schema, "setRDB3");
        let rdbd5 = field_id(&schema, "setRDbD5");

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(120),
            MessageKind::GetAll { context: 1, doid: 9011 },
        ));
        let context = match &bus.drain_sent()[0].kind {
            MessageKind::DbGetAll { context, .. } => *context,
            other => panic!("expected DbGetAll, got {other:?}"),
        };

        dispatcher.dispatch(BusMessage::to(
            Channel(1),
            Channel(200),
            MessageKind::DbGetAllResp {
                context,
                status: DbStatus::Success,
                result: Some(DbGetAllResult {
                    class: 5,
                    fields: vec![
                        FieldValue {
                            field: rdb3,
                            value: 32144123u32.to_le_bytes().to_vec(),
                        },
                        FieldValue {
                            field: rdbd5,
                            value: vec![23],
                        },
                    ],
                }),
            },
        ));

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].kind {
            MessageKind::GetAllResp {
                location,
                required,
                optional,
                ..
            } => {
                assert_eq!(*location, Location::INVALID);
                assert_eq!(required.len(), 3);
                assert!(required.iter().any(|fv| fv.field == rdbd5));
                assert!(optional.is_empty());
            }
            other => panic!("expected GetAllResp, got {other:?}"),
        }
    }
}
