// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Database State Server
//!
//! Bridges an in-RAM State Server's object field traffic to a persistent
//! Database Server: activates objects by pulling their required and
//! database-backed fields out of storage, forwards field updates to the
//! fields' `db` flag destination(s), and answers field queries from RAM when
//! possible and from the database when not.
//!
//! # Architecture
//!
//! ```text
//! DbssService
//! +-- BusInterface        (message director transport: TCP or mock)
//! +-- Dispatcher          (Object State Machine)
//!     +-- ObjectRegistry      (active objects, in RAM)
//!     +-- PendingTable        (coalesced ACTIVATE/GET_ALL fetches)
//!     +-- FieldFetchTable     (in-flight GET_FIELD(S) forwarded to the DB)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use dbss::{Config, DbssService};
//! use dbss::bus::TcpBusInterface;
//! use dbss_schema::DcSchema;
//! use std::sync::Arc;
//!
//! let config = Config::from_file("dbss.toml")?;
//! let schema = Arc::new(DcSchema::load_files(&config.dc_file_paths)?);
//! let bus = Arc::new(TcpBusInterface::connect("127.0.0.1:7199").await?);
//!
//! let service = DbssService::new(&config, schema, bus);
//! let handle = service.subscribe(&config)?;
//! service.run().await?;
//! ```

pub mod bus;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pending;
pub mod registry;
pub mod service;
pub mod wire;

pub use bus::{BusInterface, MockBusInterface, TcpBusInterface};
pub use config::{Config, ConfigError};
pub use dispatch::Dispatcher;
pub use error::DbssError;
pub use service::{DbssService, ServiceHandle, ServiceStatsSnapshot};
