// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire codec for the framed datagram: `recipient_count: u8, (recipient_channel: u64)*, sender_channel: u64,
//! msgtype: u16, payload`. This module is the single source of truth for the
//! numeric `msgtype` values every crate in the workspace agrees on.
//!
//! Transport framing used by [`crate::bus::TcpBusInterface`]: each datagram on
//! the wire is preceded by a 2-byte little-endian length prefix so a stream
//! reader knows where one frame ends and the next begins.

use crate::wire::{BusMessage, Channel, DbGetAllResult, DbStatus, FieldValue, Location, MessageKind};
use anyhow::{anyhow, bail, Result};
use dbss_schema::{ClassId, FieldId};

pub mod msgtype {
    pub const ACTIVATE_WITH_DEFAULTS: u16 = 2000;
    pub const ACTIVATE_WITH_DEFAULTS_OTHER: u16 = 2001;
    pub const GET_ALL: u16 = 2002;
    pub const GET_ALL_RESP: u16 = 2003;
    pub const GET_ALL_RESP_FAILURE: u16 = 2004;
    pub const GET_FIELD: u16 = 2005;
    pub const GET_FIELDS: u16 = 2006;
    pub const GET_FIELD_RESP: u16 = 2007;
    pub const GET_FIELDS_RESP: u16 = 2008;
    pub const SET_FIELD: u16 = 2009;
    pub const SET_FIELDS: u16 = 2010;
    pub const DELETE_RAM: u16 = 2011;
    pub const DELETE_DISK: u16 = 2012;
    pub const ENTER_LOCATION_WITH_REQUIRED: u16 = 2013;
    pub const ENTER_LOCATION_WITH_REQUIRED_OTHER: u16 = 2014;

    pub const DB_GET_ALL: u16 = 3000;
    pub const DB_GET_ALL_RESP: u16 = 3001;
    pub const DB_GET_FIELD: u16 = 3002;
    pub const DB_GET_FIELDS: u16 = 3003;
    pub const DB_GET_FIELD_RESP: u16 = 3004;
    pub const DB_GET_FIELDS_RESP: u16 = 3005;
    pub const DB_SET_FIELD: u16 = 3006;
    pub const DB_SET_FIELDS: u16 = 3007;
    pub const DB_DELETE: u16 = 3008;
}

fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}
fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_field_value(buf: &mut Vec<u8>, fv: &FieldValue) {
    write_u16(buf, fv.field);
    write_u16(buf, fv.value.len() as u16);
    buf.extend_from_slice(&fv.value);
}

fn write_field_values(buf: &mut Vec<u8>, fvs: &[FieldValue]) {
    write_u16(buf, fvs.len() as u16);
    for fv in fvs {
        write_field_value(buf, fv);
    }
}

fn write_field_ids(buf: &mut Vec<u8>, ids: &[FieldId]) {
    write_u16(buf, ids.len() as u16);
    for id in ids {
        write_u16(buf, *id);
    }
}

fn write_location(buf: &mut Vec<u8>, location: Location) {
    write_u32(buf, location.parent);
    write_u32(buf, location.zone);
}

fn write_status(buf: &mut Vec<u8>, status: DbStatus) {
    write_u8(buf, if status.is_success() { 0 } else { 1 });
}

fn write_optional_value(buf: &mut Vec<u8>, value: &Option<Vec<u8>>) {
    match value {
        Some(bytes) => {
            write_u8(buf, 1);
            write_u16(buf, bytes.len() as u16);
            buf.extend_from_slice(bytes);
        }
        None => write_u8(buf, 0),
    }
}

/// Little-endian cursor over an in-memory payload.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            bail!("truncated payload: wanted {n} bytes, had {}", self.remaining());
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    fn read_status(&mut self) -> Result<DbStatus> {
        Ok(DbStatus::from_byte(self.read_u8()?))
    }

    fn read_location(&mut self) -> Result<Location> {
        let parent = self.read_u32()?;
        let zone = self.read_u32()?;
        Ok(Location::new(parent, zone))
    }

    fn read_field_value(&mut self) -> Result<FieldValue> {
        let field = self.read_u16()?;
        let len = self.read_u16()? as usize;
        let value = self.read_bytes(len)?;
        Ok(FieldValue { field, value })
    }

    fn read_field_values(&mut self) -> Result<Vec<FieldValue>> {
        let count = self.read_u16()?;
        (0..count).map(|_| self.read_field_value()).collect()
    }

    fn read_field_ids(&mut self) -> Result<Vec<FieldId>> {
        let count = self.read_u16()?;
        (0..count).map(|_| self.read_u16()).collect()
    }

    fn read_optional_value(&mut self) -> Result<Option<Vec<u8>>> {
        match self.read_u8()? {
            0 => Ok(None),
            _ => {
                let len = self.read_u16()? as usize;
                Ok(Some(self.read_bytes(len)?))
            }
        }
    }
}

/// Serialize one `BusMessage` into a full framed datagram, without the
/// outer transport length prefix.
pub fn encode_message(message: &BusMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u8(&mut buf, message.recipients.len() as u8);
    for recipient in &message.recipients {
        write_u64(&mut buf, recipient.0);
    }
    write_u64(&mut buf, message.sender.0);

    match &message.kind {
        MessageKind::ActivateWithDefaults { doid, location } => {
            write_u16(&mut buf, msgtype::ACTIVATE_WITH_DEFAULTS);
            write_u32(&mut buf, *doid);
            write_location(&mut buf, *location);
        }
        MessageKind::ActivateWithDefaultsOther {
            doid,
            location,
            overrides,
        } => {
            write_u16(&mut buf, msgtype::ACTIVATE_WITH_DEFAULTS_OTHER);
            write_u32(&mut buf, *doid);
            write_location(&mut buf, *location);
            write_field_values(&mut buf, overrides);
        }
        MessageKind::GetAll { context, doid } => {
            write_u16(&mut buf, msgtype::GET_ALL);
            write_u32(&mut buf, *context);
            write_u32(&mut buf, *doid);
        }
        MessageKind::GetAllResp {
            context,
            doid,
            location,
            class,
            required,
            optional,
        } => {
            write_u16(&mut buf, msgtype::GET_ALL_RESP);
            write_u32(&mut buf, *context);
            write_u32(&mut buf, *doid);
            write_location(&mut buf, *location);
            write_u16(&mut buf, *class);
            write_field_values(&mut buf, required);
            write_field_values(&mut buf, optional);
        }
        MessageKind::GetAllRespFailure { context } => {
            write_u16(&mut buf, msgtype::GET_ALL_RESP_FAILURE);
            write_u32(&mut buf, *context);
        }
        MessageKind::GetField { context, doid, field } => {
            write_u16(&mut buf, msgtype::GET_FIELD);
            write_u32(&mut buf, *context);
            write_u32(&mut buf, *doid);
            write_u16(&mut buf, *field);
        }
        MessageKind::GetFields { context, doid, fields } => {
            write_u16(&mut buf, msgtype::GET_FIELDS);
            write_u32(&mut buf, *context);
            write_u32(&mut buf, *doid);
            write_field_ids(&mut buf, fields);
        }
        MessageKind::GetFieldResp {
            context,
            status,
            field,
            value,
        } => {
            write_u16(&mut buf, msgtype::GET_FIELD_RESP);
            write_u32(&mut buf, *context);
            write_status(&mut buf, *status);
            write_u16(&mut buf, *field);
            write_optional_value(&mut buf, value);
        }
        MessageKind::GetFieldsResp {
            context,
            status,
            fields,
        } => {
            write_u16(&mut buf, msgtype::GET_FIELDS_RESP);
            write_u32(&mut buf, *context);
            write_status(&mut buf, *status);
            write_field_values(&mut buf, fields);
        }
        MessageKind::SetField { doid, field, value } => {
            write_u16(&mut buf, msgtype::SET_FIELD);
            write_u32(&mut buf, *doid);
            write_field_value(
                &mut buf,
                &FieldValue {
                    field: *field,
                    value: value.clone(),
                },
            );
        }
        MessageKind::SetFields { doid, fields } => {
            write_u16(&mut buf, msgtype::SET_FIELDS);
            write_u32(&mut buf, *doid);
            write_field_values(&mut buf, fields);
        }
        MessageKind::DeleteRam { doid } => {
            write_u16(&mut buf, msgtype::DELETE_RAM);
            write_u32(&mut buf, *doid);
        }
        MessageKind::DeleteDisk { doid } => {
            write_u16(&mut buf, msgtype::DELETE_DISK);
            write_u32(&mut buf, *doid);
        }
        MessageKind::EnterLocationWithRequired {
            doid,
            location,
            class,
            required,
        } => {
            write_u16(&mut buf, msgtype::ENTER_LOCATION_WITH_REQUIRED);
            write_u32(&mut buf, *doid);
            write_location(&mut buf, *location);
            write_u16(&mut buf, *class);
            write_field_values(&mut buf, required);
        }
        MessageKind::EnterLocationWithRequiredOther {
            doid,
            location,
            class,
            required,
            optional,
        } => {
            write_u16(&mut buf, msgtype::ENTER_LOCATION_WITH_REQUIRED_OTHER);
            write_u32(&mut buf, *doid);
            write_location(&mut buf, *location);
            write_u16(&mut buf, *class);
            write_field_values(&mut buf, required);
            write_field_values(&mut buf, optional);
        }
        MessageKind::DbGetAll { context, doid } => {
            write_u16(&mut buf, msgtype::DB_GET_ALL);
            write_u32(&mut buf, *context);
            write_u32(&mut buf, *doid);
        }
        MessageKind::DbGetAllResp {
            context,
            status,
            result,
        } => {
            write_u16(&mut buf, msgtype::DB_GET_ALL_RESP);
            write_u32(&mut buf, *context);
            write_status(&mut buf, *status);
            match result {
                Some(result) => {
                    write_u8(&mut buf, 1);
                    write_u16(&mut buf, result.class);
                    write_field_values(&mut buf, &result.fields);
                }
                None => write_u8(&mut buf, 0),
            }
        }
        MessageKind::DbGetField { context, doid, field } => {
            write_u16(&mut buf, msgtype::DB_GET_FIELD);
            write_u32(&mut buf, *context);
            write_u32(&mut buf, *doid);
            write_u16(&mut buf, *field);
        }
        MessageKind::DbGetFields { context, doid, fields } => {
            write_u16(&mut buf, msgtype::DB_GET_FIELDS);
            write_u32(&mut buf, *context);
            write_u32(&mut buf, *doid);
            write_field_ids(&mut buf, fields);
        }
        MessageKind::DbGetFieldResp {
            context,
            status,
            field,
            value,
        } => {
            write_u16(&mut buf, msgtype::DB_GET_FIELD_RESP);
            write_u32(&mut buf, *context);
            write_status(&mut buf, *status);
            write_u16(&mut buf, *field);
            write_optional_value(&mut buf, value);
        }
        MessageKind::DbGetFieldsResp {
            context,
            status,
            fields,
        } => {
            write_u16(&mut buf, msgtype::DB_GET_FIELDS_RESP);
            write_u32(&mut buf, *context);
            write_status(&mut buf, *status);
            write_field_values(&mut buf, fields);
        }
        MessageKind::DbSetField { doid, field, value } => {
            write_u16(&mut buf, msgtype::DB_SET_FIELD);
            write_u32(&mut buf, *doid);
            write_field_value(
                &mut buf,
                &FieldValue {
                    field: *field,
                    value: value.clone(),
                },
            );
        }
        MessageKind::DbSetFields { doid, fields } => {
            write_u16(&mut buf, msgtype::DB_SET_FIELDS);
            write_u32(&mut buf, *doid);
            write_field_values(&mut buf, fields);
        }
        MessageKind::DbDelete { doid } => {
            write_u16(&mut buf, msgtype::DB_DELETE);
            write_u32(&mut buf, *doid);
        }
        MessageKind::Unknown { msgtype } => {
            write_u16(&mut buf, *msgtype);
        }
    }
    buf
}

/// Parse one full framed datagram (without the outer transport length
/// prefix) back into a `BusMessage`. Unrecognized `msgtype`s decode to
/// `MessageKind::Unknown` rather than failing: unknown messages are
/// logged and discarded, never treated as a transport error.
pub fn decode_message(bytes: &[u8]) -> Result<BusMessage> {
    let mut r = Reader::new(bytes);
    let recipient_count = r.read_u8()?;
    let mut recipients = Vec::with_capacity(recipient_count as usize);
    for _ in 0..recipient_count {
        recipients.push(Channel(r.read_u64()?));
    }
    let sender = Channel(r.read_u64()?);
    let msgtype = r.read_u16()?;

    let kind = match msgtype {
        msgtype::ACTIVATE_WITH_DEFAULTS => MessageKind::ActivateWithDefaults {
            doid: r.read_u32()?,
            location: r.read_location()?,
        },
        msgtype::ACTIVATE_WITH_DEFAULTS_OTHER => MessageKind::ActivateWithDefaultsOther {
            doid: r.read_u32()?,
            location: r.read_location()?,
            overrides: r.read_field_values()?,
        },
        msgtype::GET_ALL => MessageKind::GetAll {
            context: r.read_u32()?,
            doid: r.read_u32()?,
        },
        msgtype::GET_ALL_RESP => MessageKind::GetAllResp {
            context: r.read_u32()?,
            doid: r.read_u32()?,
            location: r.read_location()?,
            class: r.read_u16()? as ClassId,
            required: r.read_field_values()?,
            optional: r.read_field_values()?,
        },
        msgtype::GET_ALL_RESP_FAILURE => MessageKind::GetAllRespFailure {
            context: r.read_u32()?,
        },
        msgtype::GET_FIELD => MessageKind::GetField {
            context: r.read_u32()?,
            doid: r.read_u32()?,
            field: r.read_u16()?,
        },
        msgtype::GET_FIELDS => MessageKind::GetFields {
            context: r.read_u32()?,
            doid: r.read_u32()?,
            fields: r.read_field_ids()?,
        },
        msgtype::GET_FIELD_RESP => MessageKind::GetFieldResp {
            context: r.read_u32()?,
            status: r.read_status()?,
            field: r.read_u16()?,
            value: r.read_optional_value()?,
        },
        msgtype::GET_FIELDS_RESP => MessageKind::GetFieldsResp {
            context: r.read_u32()?,
            status: r.read_status()?,
            fields: r.read_field_values()?,
        },
        msgtype::SET_FIELD => {
            let doid = r.read_u32()?;
            let fv = r.read_field_value()?;
            MessageKind::SetField {
                doid,
                field: fv.field,
                value: fv.value,
            }
        }
        msgtype::SET_FIELDS => MessageKind::SetFields {
            doid: r.read_u32()?,
            fields: r.read_field_values()?,
        },
        msgtype::DELETE_RAM => MessageKind::DeleteRam { doid: r.read_u32()? },
        msgtype::DELETE_DISK => MessageKind::DeleteDisk { doid: r.read_u32()? },
        msgtype::ENTER_LOCATION_WITH_REQUIRED => MessageKind::EnterLocationWithRequired {
            doid: r.read_u32()?,
            location: r.read_location()?,
            class: r.read_u16()? as ClassId,
            required: r.read_field_values()?,
        },
        msgtype::ENTER_LOCATION_WITH_REQUIRED_OTHER => MessageKind::EnterLocationWithRequiredOther {
            doid: r.read_u32()?,
            location: r.read_location()?,
            class: r.read_u16()? as ClassId,
            required: r.read_field_values()?,
            optional: r.read_field_values()?,
        },
        msgtype::DB_GET_ALL => MessageKind::DbGetAll {
            context: r.read_u32()?,
            doid: r.read_u32()?,
        },
        msgtype::DB_GET_ALL_RESP => {
            let context = r.read_u32()?;
            let status = r.read_status()?;
            let result = match r.read_u8()? {
                0 => None,
                _ => Some(DbGetAllResult {
                    class: r.read_u16()?,
                    fields: r.read_field_values()?,
                }),
            };
            MessageKind::DbGetAllResp {
                context,
                status,
                result,
            }
        }
        msgtype::DB_GET_FIELD => MessageKind::DbGetField {
            context: r.read_u32()?,
            doid: r.read_u32()?,
            field: r.read_u16()?,
        },
        msgtype::DB_GET_FIELDS => MessageKind::DbGetFields {
            context: r.read_u32()?,
            doid: r.read_u32()?,
            fields: r.read_field_ids()?,
        },
        msgtype::DB_GET_FIELD_RESP => MessageKind::DbGetFieldResp {
            context: r.read_u32()?,
            status: r.read_status()?,
            field: r.read_u16()?,
            value: r.read_optional_value()?,
        },
        msgtype::DB_GET_FIELDS_RESP => MessageKind::DbGetFieldsResp {
            context: r.read_u32()?,
            status: r.read_status()?,
            fields: r.read_field_values()?,
        },
        msgtype::DB_SET_FIELD => {
            let doid = r.read_u32()?;
            let fv = r.read_field_value()?;
            MessageKind::DbSetField {
                doid,
                field: fv.field,
                value: fv.value,
            }
        }
        msgtype::DB_SET_FIELDS => MessageKind::DbSetFields {
            doid: r.read_u32()?,
            fields: r.read_field_values()?,
        },
        msgtype::DB_DELETE => MessageKind::DbDelete { doid: r.read_u32()? },
        other => MessageKind::Unknown { msgtype: other },
    };

    Ok(BusMessage::new(recipients, sender, kind))
}

/// Control-channel operations the bus itself understands, distinct
/// from object-addressed `BusMessage`s.
pub enum ControlOp {
    AddChannel(Channel),
    AddChannelRange(Channel, Channel),
    RemoveChannel(Channel),
}

const CONTROL_ADD_CHANNEL: u8 = 1;
const CONTROL_ADD_CHANNEL_RANGE: u8 = 2;
const CONTROL_REMOVE_CHANNEL: u8 = 3;

pub fn encode_control(op: ControlOp) -> Vec<u8> {
    let mut buf = Vec::new();
    match op {
        ControlOp::AddChannel(channel) => {
            write_u8(&mut buf, CONTROL_ADD_CHANNEL);
            write_u64(&mut buf, channel.0);
        }
        ControlOp::AddChannelRange(min, max) => {
            write_u8(&mut buf, CONTROL_ADD_CHANNEL_RANGE);
            write_u64(&mut buf, min.0);
            write_u64(&mut buf, max.0);
        }
        ControlOp::RemoveChannel(channel) => {
            write_u8(&mut buf, CONTROL_REMOVE_CHANNEL);
            write_u64(&mut buf, channel.0);
        }
    }
    buf
}

/// Prefix a frame with its 2-byte little-endian length for the TCP transport.
pub fn frame(payload: Vec<u8>) -> Result<Vec<u8>> {
    if payload.len() > u16::MAX as usize {
        return Err(anyhow!("datagram too large: {} bytes", payload.len()));
    }
    let mut out = Vec::with_capacity(payload.len() + 2);
    write_u16(&mut out, payload.len() as u16);
    out.extend_from_slice(&payload);
    Ok(out)
}
