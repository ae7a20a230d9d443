//! Stream registry
//!
//! The authoritative set of active streams, keyed by network endpoint.
//!
//! Each endpoint maps to a slot. Inserting the slot is the atomic
//! reservation; the slot's lifecycle mutex orders every operation on that
//! endpoint (create resolves before a delete or failure teardown looks at it).
//! Listing never takes the lifecycle mutex: it only sees slots whose pump has
//! reached `Running`, and reads their counters lock-free.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::catalog::CapabilityCatalog;
use crate::audio::driver::HardwareDriver;
use crate::config::PumpConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::{BackendError, Error, Result};
use crate::network::{NetworkEndpoint, NetworkTransport};
use crate::streams::metrics::PumpMetrics;
use crate::streams::pump::{PumpContext, PumpEvent, PumpHandle};
use crate::streams::stream::{Stream, StreamRecord};

/// Lifecycle notifications, mainly for observers of asynchronous failures
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Created(StreamRecord),
    Deleted(StreamRecord),
    /// The pump died on its own and the stream was removed. `error` is
    /// always [`Error::PumpFailure`].
    Failed {
        record: StreamRecord,
        error: Arc<Error>,
    },
}

enum Lifecycle {
    Starting,
    Active(PumpHandle),
    Removed,
}

struct Slot {
    id: Uuid,
    seq: u64,
    stream: Stream,
    metrics: Arc<PumpMetrics>,
    /// Set once the pump is running; listing skips slots without it
    created_at: OnceLock<DateTime<Utc>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Slot {
    fn record(&self) -> Option<StreamRecord> {
        let created_at = *self.created_at.get()?;
        let metrics = self.metrics.snapshot();
        Some(StreamRecord {
            id: self.id,
            stream: self.stream.clone(),
            created_at,
            total_bytes_captured: metrics.bytes_captured,
            total_bytes_played: metrics.bytes_played,
        })
    }
}

struct RegistryInner {
    catalog: CapabilityCatalog,
    driver: Arc<dyn HardwareDriver>,
    transport: Arc<dyn NetworkTransport>,
    config: PumpConfig,
    slots: DashMap<NetworkEndpoint, Arc<Slot>>,
    next_seq: AtomicU64,
    events: broadcast::Sender<StreamEvent>,
    pump_events: mpsc::UnboundedSender<PumpEvent>,
}

pub struct StreamRegistry {
    inner: Arc<RegistryInner>,
    supervisor: JoinHandle<()>,
}

impl StreamRegistry {
    /// Must be called from within a tokio runtime
    pub fn new(
        catalog: CapabilityCatalog,
        driver: Arc<dyn HardwareDriver>,
        transport: Arc<dyn NetworkTransport>,
        config: PumpConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (pump_events, pump_events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(RegistryInner {
            catalog,
            driver,
            transport,
            config,
            slots: DashMap::new(),
            next_seq: AtomicU64::new(0),
            events,
            pump_events,
        });
        let supervisor = tokio::spawn(supervise(Arc::downgrade(&inner), pump_events_rx));

        Self { inner, supervisor }
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.inner.catalog
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    /// Validate, reserve the endpoint, and start a pump for `stream`
    pub async fn create(&self, stream: Stream) -> Result<StreamRecord> {
        // Run detached so a dropped caller can't strand a half-made reservation
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.create(stream).await })
            .await
            .map_err(|_| Error::BackendUnavailable(BackendError::PumpVanished))?
    }

    /// Stop the stream bound to `endpoint` and remove it
    pub async fn delete(&self, endpoint: &NetworkEndpoint) -> Result<()> {
        let inner = self.inner.clone();
        let endpoint = endpoint.clone();
        tokio::spawn(async move { inner.delete(&endpoint).await })
            .await
            .map_err(|_| Error::BackendUnavailable(BackendError::PumpVanished))?
    }

    /// Snapshot of active streams in creation order
    pub fn list(&self, channel: Option<u32>) -> Vec<StreamRecord> {
        let mut records: Vec<(u64, StreamRecord)> = self
            .inner
            .slots
            .iter()
            .filter(|entry| channel.map_or(true, |c| entry.stream.hardware_port.channel == c))
            .filter_map(|entry| entry.record().map(|record| (entry.seq, record)))
            .collect();
        records.sort_by_key(|(seq, _)| *seq);
        records.into_iter().map(|(_, record)| record).collect()
    }

    pub fn get(&self, endpoint: &NetworkEndpoint) -> Option<StreamRecord> {
        self.inner.slots.get(endpoint).and_then(|slot| slot.record())
    }

    /// Number of running streams
    pub fn len(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|entry| entry.created_at.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every stream
    pub async fn shutdown(&self) {
        let endpoints: Vec<NetworkEndpoint> =
            self.inner.slots.iter().map(|entry| entry.key().clone()).collect();
        tracing::info!("Shutting down {} stream(s)", endpoints.len());

        for endpoint in endpoints {
            match self.delete(&endpoint).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => tracing::warn!("Failed to stop {}: {}", endpoint, e),
            }
        }
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

impl RegistryInner {
    async fn create(self: Arc<Self>, stream: Stream) -> Result<StreamRecord> {
        stream.endpoint.validate()?;
        self.catalog.check(&stream.hardware_port)?;

        let slot = Arc::new(Slot {
            id: Uuid::new_v4(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            stream: stream.clone(),
            metrics: Arc::new(PumpMetrics::new()),
            created_at: OnceLock::new(),
            lifecycle: Mutex::new(Lifecycle::Starting),
        });
        // Held until the pump resolves so later operations on this endpoint queue behind us
        let mut lifecycle = slot.lifecycle.lock().await;

        loop {
            let occupant = match self.slots.entry(stream.endpoint.clone()) {
                Entry::Occupied(occupied) => occupied.get().clone(),
                Entry::Vacant(vacant) => {
                    vacant.insert(slot.clone());
                    break;
                }
            };
            // A slot still starting or stopping is settled once its lock is free.
            // Removed slots are already out of the map by then.
            if !matches!(*occupant.lifecycle.lock().await, Lifecycle::Removed) {
                return Err(Error::EndpointInUse(stream.endpoint));
            }
        }

        let ctx = PumpContext {
            id: slot.id,
            stream: stream.clone(),
            driver: self.driver.clone(),
            transport: self.transport.clone(),
            metrics: slot.metrics.clone(),
            config: self.config.clone(),
            events: self.pump_events.clone(),
        };

        match PumpHandle::spawn(ctx).await {
            Ok(handle) => {
                let _ = slot.created_at.set(Utc::now());
                *lifecycle = Lifecycle::Active(handle);
                tracing::info!("Created stream {} ({})", stream, slot.id);

                let record = slot.record().ok_or_else(|| {
                    Error::BackendUnavailable(BackendError::PumpVanished)
                })?;
                let _ = self.events.send(StreamEvent::Created(record.clone()));
                Ok(record)
            }
            Err(e) => {
                *lifecycle = Lifecycle::Removed;
                self.remove_slot(&slot);
                tracing::warn!("Failed to start stream {}: {}", stream, e);
                Err(Error::BackendUnavailable(e))
            }
        }
    }

    async fn delete(self: Arc<Self>, endpoint: &NetworkEndpoint) -> Result<()> {
        let slot = self
            .slots
            .get(endpoint)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(endpoint.clone()))?;

        let mut lifecycle = slot.lifecycle.lock().await;
        let handle = match std::mem::replace(&mut *lifecycle, Lifecycle::Removed) {
            Lifecycle::Active(handle) => handle,
            // Creation failed or a failure teardown got here first
            Lifecycle::Starting | Lifecycle::Removed => return Err(Error::NotFound(endpoint.clone())),
        };

        let record = slot.record();
        let state = handle.stop(self.config.stop_grace()).await;
        self.remove_slot(&slot);
        let totals = slot.metrics.snapshot();
        tracing::info!(
            "Deleted stream {} (pump {:?}, {} datagrams, {} transient errors)",
            slot.stream,
            state,
            totals.datagrams,
            totals.transient_errors
        );

        if let Some(record) = record {
            let _ = self.events.send(StreamEvent::Deleted(record));
        }
        Ok(())
    }

    /// Tear down a stream whose pump reported a fatal error
    async fn reap(self: Arc<Self>, id: Uuid, endpoint: NetworkEndpoint, reason: String) {
        let slot = self.slots.get(&endpoint).map(|entry| entry.value().clone());
        let Some(slot) = slot else {
            return;
        };
        if slot.id != id {
            // The endpoint has been reused since
            return;
        }

        let mut lifecycle = slot.lifecycle.lock().await;
        let handle = match std::mem::replace(&mut *lifecycle, Lifecycle::Removed) {
            Lifecycle::Active(handle) => handle,
            // A delete won the race
            _ => return,
        };

        let record = slot.record();
        handle.stop(self.config.stop_grace()).await;
        self.remove_slot(&slot);
        let error = Error::PumpFailure {
            endpoint: slot.stream.endpoint.clone(),
            reason,
        };
        let totals = slot.metrics.snapshot();
        tracing::error!(
            "{}; stream removed after {} datagrams, {} transient errors",
            error,
            totals.datagrams,
            totals.transient_errors
        );

        if let Some(record) = record {
            let _ = self.events.send(StreamEvent::Failed {
                record,
                error: Arc::new(error),
            });
        }
    }

    fn remove_slot(&self, slot: &Arc<Slot>) {
        self.slots
            .remove_if(&slot.stream.endpoint, |_, current| Arc::ptr_eq(current, slot));
    }
}

async fn supervise(inner: Weak<RegistryInner>, mut events: mpsc::UnboundedReceiver<PumpEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            PumpEvent::Failed {
                id,
                endpoint,
                reason,
            } => {
                tokio::spawn(inner.reap(id, endpoint, reason));
            }
        }
    }
}
