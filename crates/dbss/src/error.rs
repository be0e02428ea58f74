// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed errors the dispatcher matches on. None of these are fatal to
//! the process -- the dispatcher treats every one of them as "log and discard".

use crate::wire::DoId;
use dbss_schema::{ClassId, FieldId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbssError {
    #[error("doid {0} is outside the configured range")]
    OutOfRange(DoId),

    #[error("unknown field {field} for class {class}")]
    UnknownField { class: ClassId, field: FieldId },

    #[error("database response context {0} matches no pending fetch entry")]
    UnmatchedContext(u32),

    #[error("required field {field} missing from GET_ALL_RESP for class {class} with no DC default")]
    MissingRequiredField { class: ClassId, field: FieldId },

    #[error("bus send failed: {0}")]
    BusSend(String),
}
