// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Range Subscriber run loop.
//!
//! Ties the Field Classifier, Object Registry, Pending-Fetch Coalescer and
//! Object State Machine (all owned by [`Dispatcher`]) to a [`BusInterface`]:
//! subscribes the configured channel and DOID range at startup, then polls
//! for delivered messages and hands each one to the dispatcher in order
//! until asked to stop.

use crate::bus::BusInterface;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::wire::Channel;
use anyhow::Result;
use dbss_schema::DcSchema;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Running totals exposed to operators, in the shape of `hdds-router`'s
/// `RouteStats`: plain atomics updated from the dispatch loop, snapshotted on
/// request.
#[derive(Debug, Default)]
struct ServiceStats {
    messages_dispatched: AtomicU64,
}

impl ServiceStats {
    fn record_dispatch(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ServiceStatsSnapshot {
        ServiceStatsSnapshot {
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServiceStats`] for printing or reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceStatsSnapshot {
    pub messages_dispatched: u64,
}

/// Handle to a running [`DbssService`], mirroring `hdds-router`'s
/// `RouterHandle`: cheaply cloned, used by the binary's Ctrl+C handler to
/// request shutdown without owning the loop itself.
#[derive(Clone)]
pub struct ServiceHandle {
    running: Arc<AtomicBool>,
    stats: Arc<ServiceStats>,
}

impl ServiceHandle {
    /// Request the dispatch loop to stop after its current poll.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ServiceStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Owns the dispatcher and drives it off whatever the bus delivers.
pub struct DbssService {
    bus: Arc<dyn BusInterface>,
    dispatcher: Dispatcher,
    running: Arc<AtomicBool>,
    stats: Arc<ServiceStats>,
}

impl DbssService {
    pub fn new(config: &Config, schema: Arc<DcSchema>, bus: Arc<dyn BusInterface>) -> Self {
        let dispatcher = Dispatcher::new(
            schema,
            bus.clone(),
            Channel(config.bus_channel),
            Channel(config.database_channel),
            config.range_min,
            config.range_max,
        );
        Self {
            bus,
            dispatcher,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ServiceStats::default()),
        }
    }

    /// Issue the startup subscriptions: `ADD_CHANNEL` for the DBSS's
    /// own channel, plus the contiguous `[min_doid, max_doid]` range, and
    /// hand back a handle the caller can use to stop the loop later.
    pub fn subscribe(&self, config: &Config) -> Result<ServiceHandle> {
        self.bus.add_channel(Channel(config.bus_channel))?;
        self.bus.add_channel_range(
            Channel(config.range_min as u64),
            Channel(config.range_max as u64),
        )?;
        self.running.store(true, Ordering::Relaxed);
        tracing::info!(
            range_min = config.range_min,
            range_max = config.range_max,
            bus_channel = config.bus_channel,
            "dbss subscribed"
        );
        Ok(ServiceHandle {
            running: self.running.clone(),
            stats: self.stats.clone(),
        })
    }

    /// Dispatch every message currently sitting in the bus's inbox.
    async fn drain_pending(&mut self) {
        for message in self.bus.take_delivered() {
            self.dispatcher.dispatch(message);
            self.stats.record_dispatch();
        }
    }

    /// Poll the bus until `stop` is called on the handle returned by
    /// [`DbssService::subscribe`]. Single-threaded cooperative dispatch
    /// each poll fully drains and dispatches before the next tick.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("dbss dispatch loop starting");
        let mut ticker = interval(POLL_INTERVAL);
        while self.running.load(Ordering::Relaxed) {
            ticker.tick().await;
            self.drain_pending().await;
        }
        tracing::info!(
            messages_dispatched = self.stats.snapshot().messages_dispatched,
            "dbss dispatch loop stopped"
        );
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &crate::registry::ObjectRegistry {
        self.dispatcher.registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockBusInterface;
    use crate::wire::{BusMessage, DbGetAllResult, DbStatus, Location, MessageKind};
    use dbss_schema::DcSchema;

    const SCHEMA_SRC: &str = r#"
        class DistributedTestObject5 : 5 {
          setRequired1 : uint32 required;
          setRDB3 : uint32 required db;
          setRDbD5 : uint8 ram db;
        };
    "#;

    fn test_config() -> Config {
        Config::builder()
            .range(9000, 9999)
            .bus_channel(1)
            .database_channel(200)
            .dc_file("inline.dc")
            .build()
    }

    #[tokio::test]
    async fn subscribe_registers_own_channel_and_range() {
        let bus = Arc::new(MockBusInterface::new());
        let schema = Arc::new(DcSchema::from_source(SCHEMA_SRC).unwrap());
        let config = test_config();
        let service = DbssService::new(&config, schema, bus.clone());
        service.subscribe(&config).unwrap();

        assert!(bus.is_subscribed(Channel(1)));
        assert!(bus.is_subscribed(Channel(9500)));
        assert!(!bus.is_subscribed(Channel(10000)));
    }

    #[tokio::test]
    async fn drain_pending_dispatches_delivered_messages_in_order() {
        let bus = Arc::new(MockBusInterface::new());
        let schema = Arc::new(DcSchema::from_source(SCHEMA_SRC).unwrap());
        let config = test_config();
        let mut service = DbssService::new(&config, schema, bus.clone());
        let handle = service.subscribe(&config).unwrap();

        bus.deliver(BusMessage::to(
            Channel(1),
            Channel(50),
            MessageKind::ActivateWithDefaults {
                doid: 9001,
                location: Location::new(80000, 100),
            },
        ));
        service.drain_pending().await;

        let sent = bus.drain_sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].kind, MessageKind::DbGetAll { doid: 9001, .. }));
        assert_eq!(handle.stats().messages_dispatched, 1);

        let context = match &sent[0].kind {
            MessageKind::DbGetAll { context, .. } => *context,
            other => panic!("expected DbGetAll, got {other:?}"),
        };
        bus.deliver(BusMessage::to(
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
        service.drain_pending().await;

        assert!(service.registry().is_active(9001));
        assert_eq!(handle.stats().messages_dispatched, 2);
    }

    #[tokio::test]
    async fn stop_ends_the_run_loop() {
        let bus = Arc::new(MockBusInterface::new());
        let schema = Arc::new(DcSchema::from_source(SCHEMA_SRC).unwrap());
        let config = test_config();
        let service = DbssService::new(&config, schema, bus);
        let handle = service.subscribe(&config).unwrap();

        let join = tokio::spawn(service.run());
        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), join)
            .await
            .expect("run loop should exit promptly after stop")
            .unwrap()
            .unwrap();
    }
}
