mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod recurrence;
mod validate;

pub use availability::{availability, compute_saturated_spans, merge_overlapping, subtract_intervals};
pub use conflict::{check_slot, SlotCheck};
pub use error::EngineError;
pub use mutations::{BookingPatch, Expansion, ResourcePatch, SeriesSpec};
pub use queries::ConflictReport;
pub use recurrence::expand_dates;
pub use validate::validate_range;

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::limits::MAX_AUDIT_ENTRIES;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
pub type SharedSeriesState = Arc<RwLock<SeriesState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Audit ring ───────────────────────────────────────────

struct AuditRing {
    seq: u64,
    entries: VecDeque<AuditEntry>,
}

impl AuditRing {
    fn record(&mut self, actor: &str, action: &'static str, entity: Ulid, at_ms: Ms) {
        self.seq += 1;
        self.entries.push_back(AuditEntry {
            seq: self.seq,
            at_ms,
            actor: actor.to_string(),
            action,
            entity,
        });
        if self.entries.len() > MAX_AUDIT_ENTRIES {
            self.entries.pop_front();
        }
    }
}

/// Audit label for a committed event.
fn action_label(event: &Event) -> &'static str {
    match event {
        Event::ResourceCreated { .. } => "resource.create",
        Event::ResourceUpdated { .. } => "resource.update",
        Event::ResourceDeleted { .. } => "resource.delete",
        Event::HoursAdded { .. } => "hours.add",
        Event::HoursRemoved { .. } => "hours.remove",
        Event::BookingRequested { .. } => "booking.request",
        Event::BookingEdited { .. } => "booking.edit",
        Event::BookingStatusChanged { status, .. } => match status {
            BookingStatus::Approved => "booking.approve",
            BookingStatus::Rejected => "booking.reject",
            BookingStatus::Cancelled => "booking.cancel",
            BookingStatus::Completed => "booking.complete",
            BookingStatus::Pending => "booking.restore",
        },
        Event::SeriesMaterialized { .. } => "series.create",
        Event::SeriesExtended { .. } => "series.extend",
        Event::SeriesStatusChanged { status, .. } => match status {
            SeriesStatus::Paused => "series.pause",
            SeriesStatus::Active => "series.resume",
            SeriesStatus::Cancelled => "series.cancel",
        },
        Event::SeriesCancelled { .. } => "series.cancel",
        Event::BookingSnapshot { .. } | Event::SeriesSnapshot { .. } => "snapshot",
    }
}

/// The entity an event acts on, for the audit ring.
fn event_entity(event: &Event) -> Ulid {
    match event {
        Event::ResourceCreated { id, .. }
        | Event::ResourceUpdated { id, .. }
        | Event::ResourceDeleted { id }
        | Event::HoursAdded { id, .. }
        | Event::HoursRemoved { id, .. }
        | Event::BookingRequested { id, .. }
        | Event::BookingEdited { id, .. }
        | Event::BookingStatusChanged { id, .. }
        | Event::SeriesMaterialized { id, .. }
        | Event::SeriesExtended { id, .. }
        | Event::SeriesStatusChanged { id, .. }
        | Event::SeriesCancelled { id, .. } => *id,
        Event::BookingSnapshot { booking, .. } => booking.id,
        Event::SeriesSnapshot { series } => series.id,
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub state: DashMap<Ulid, SharedResourceState>,
    pub series: DashMap<Ulid, SharedSeriesState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (booking/hours) id → resource id
    pub(super) entity_to_resource: DashMap<Ulid, Ulid>,
    audit: Mutex<AuditRing>,
    /// Days ahead of today the rolling-window materializer fills.
    pub(super) horizon_days: u32,
}

/// Apply an event directly to a ResourceState (no locking — caller holds
/// the lock). Series-map effects are applied separately.
fn apply_to_resource(rs: &mut ResourceState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::HoursAdded { id, resource_id, weekday, window } => {
            rs.insert_window(OpeningWindow { id: *id, weekday: *weekday, window: *window });
            entity_map.insert(*id, *resource_id);
        }
        Event::HoursRemoved { id, .. } => {
            rs.remove_window(*id);
            entity_map.remove(id);
        }
        Event::BookingRequested { id, resource_id, member, date, range, purpose, series_id } => {
            rs.insert_booking(BookingRecord {
                id: *id,
                member: member.clone(),
                date: *date,
                range: *range,
                status: BookingStatus::Pending,
                purpose: purpose.clone(),
                series_id: *series_id,
                version: 1,
            });
            entity_map.insert(*id, *resource_id);
        }
        Event::BookingEdited { id, date, range, purpose, version, .. } => {
            // Date/start may change: remove and reinsert to keep order.
            if let Some(mut booking) = rs.remove_booking(*id) {
                booking.date = *date;
                booking.range = *range;
                booking.purpose = purpose.clone();
                booking.version = *version;
                rs.insert_booking(booking);
            }
        }
        Event::BookingStatusChanged { id, status, version, .. } => {
            if let Some(booking) = rs.booking_mut(*id) {
                booking.status = *status;
                booking.version = *version;
            }
        }
        Event::SeriesMaterialized { id, resource_id, member, range, purpose, instances, .. } => {
            for instance in instances {
                rs.insert_booking(BookingRecord {
                    id: instance.booking_id,
                    member: member.clone(),
                    date: instance.date,
                    range: *range,
                    status: BookingStatus::Pending,
                    purpose: purpose.clone(),
                    series_id: Some(*id),
                    version: 1,
                });
                entity_map.insert(instance.booking_id, *resource_id);
            }
        }
        Event::SeriesExtended { id, resource_id, member, range, purpose, instances, .. } => {
            for instance in instances {
                rs.insert_booking(BookingRecord {
                    id: instance.booking_id,
                    member: member.clone(),
                    date: instance.date,
                    range: *range,
                    status: BookingStatus::Pending,
                    purpose: purpose.clone(),
                    series_id: Some(*id),
                    version: 1,
                });
                entity_map.insert(instance.booking_id, *resource_id);
            }
        }
        Event::SeriesCancelled { cancelled, .. } => {
            for booking_id in cancelled {
                if let Some(booking) = rs.booking_mut(*booking_id) {
                    booking.status = BookingStatus::Cancelled;
                    booking.version += 1;
                }
            }
        }
        Event::BookingSnapshot { resource_id, booking } => {
            entity_map.insert(booking.id, *resource_id);
            rs.insert_booking(booking.clone());
        }
        Event::ResourceUpdated { name, capacity, certification, status, .. } => {
            rs.name = name.clone();
            rs.capacity = *capacity;
            rs.certification = certification.clone();
            rs.status = *status;
        }
        // Handled at the map level, not here
        Event::ResourceCreated { .. }
        | Event::ResourceDeleted { .. }
        | Event::SeriesStatusChanged { .. }
        | Event::SeriesSnapshot { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, horizon_days: u32) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            series: DashMap::new(),
            wal_tx,
            notify,
            entity_to_resource: DashMap::new(),
            audit: Mutex::new(AuditRing { seq: 0, entries: VecDeque::new() }),
            horizon_days,
        };

        // Replay — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use
        // blocking_read/blocking_write here because this may run inside an
        // async context (lazy site creation).
        for event in &events {
            match event {
                Event::ResourceCreated { id, name, category, capacity, certification, status } => {
                    let mut rs = ResourceState::new(
                        *id,
                        name.clone(),
                        category.clone(),
                        *capacity,
                        certification.clone(),
                    );
                    rs.status = *status;
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::ResourceDeleted { id } => {
                    if let Some((_, rs)) = engine.state.remove(id) {
                        let guard = rs.try_read().expect("replay: uncontended read");
                        for booking in &guard.bookings {
                            engine.entity_to_resource.remove(&booking.id);
                        }
                        for window in &guard.hours {
                            engine.entity_to_resource.remove(&window.id);
                        }
                    }
                    engine.series.retain(|_, s| {
                        s.try_read().expect("replay: uncontended read").resource_id != *id
                    });
                }
                other => {
                    if let Some(resource_id) = event_resource_id(other)
                        && let Some(entry) = engine.state.get(&resource_id) {
                            let rs_arc = entry.clone();
                            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                            apply_to_resource(&mut guard, other, &engine.entity_to_resource);
                        }
                    engine.apply_series_map(other);
                }
            }
        }

        Ok(engine)
    }

    /// Apply the series-map effects of an event. Replay and
    /// fresh-series paths only — runtime mutations that already hold a
    /// series lock update it inline.
    fn apply_series_map(&self, event: &Event) {
        match event {
            Event::SeriesMaterialized {
                id,
                resource_id,
                member,
                rule,
                range,
                purpose,
                planned,
                instances,
                skipped,
            } => {
                let series = SeriesState {
                    id: *id,
                    resource_id: *resource_id,
                    member: member.clone(),
                    rule: rule.clone(),
                    range: *range,
                    purpose: purpose.clone(),
                    status: SeriesStatus::Active,
                    planned: *planned,
                    materialized: instances.len() as u32,
                    consumed: (instances.len() + skipped.len()) as u32,
                    skipped: skipped.clone(),
                };
                self.series.insert(*id, Arc::new(RwLock::new(series)));
            }
            Event::SeriesSnapshot { series } => {
                self.series.insert(series.id, Arc::new(RwLock::new(series.clone())));
            }
            Event::SeriesExtended { id, instances, skipped, .. } => {
                if let Some(entry) = self.series.get(id) {
                    let mut guard = entry.try_write().expect("replay: uncontended write");
                    guard.materialized += instances.len() as u32;
                    guard.consumed += (instances.len() + skipped.len()) as u32;
                    guard.skipped.extend_from_slice(skipped);
                }
            }
            Event::SeriesStatusChanged { id, status, .. } => {
                if let Some(entry) = self.series.get(id) {
                    entry.try_write().expect("replay: uncontended write").status = *status;
                }
            }
            Event::SeriesCancelled { id, .. } => {
                if let Some(entry) = self.series.get(id) {
                    entry.try_write().expect("replay: uncontended write").status =
                        SeriesStatus::Cancelled;
                }
            }
            _ => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event: event.clone(), response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_series(&self, id: &Ulid) -> Option<SharedSeriesState> {
        self.series.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_resource.get(entity_id).map(|e| *e.value())
    }

    pub(super) fn record_audit(&self, actor: &str, event: &Event) {
        self.audit.lock().unwrap().record(
            actor,
            action_label(event),
            event_entity(event),
            conflict::now_ms(),
        );
    }

    pub fn audit_entries(&self, entity: Option<Ulid>) -> Vec<AuditEntry> {
        let ring = self.audit.lock().unwrap();
        ring.entries
            .iter()
            .filter(|e| entity.is_none_or(|id| e.entity == id))
            .cloned()
            .collect()
    }

    /// WAL-append + apply + audit + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        actor: &str,
        resource_id: Ulid,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.entity_to_resource);
        self.record_audit(actor, event);
        self.notify.send(resource_id, event);
        Ok(())
    }

    /// Lookup entity → resource, get resource, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        let resource_id = self
            .get_resource_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, guard))
    }
}
