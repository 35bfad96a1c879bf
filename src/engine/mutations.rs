use chrono::{Days, NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::auth::Actor;
use crate::limits::*;
use crate::model::*;

use super::conflict::check_slot;
use super::{recurrence, validate, Engine, EngineError, SlotCheck, WalCommand};

use tokio::sync::oneshot;

/// Partial update for a resource; `None` leaves a field unchanged.
#[derive(Debug, Default, Clone)]
pub struct ResourcePatch {
    pub name: Option<String>,
    pub capacity: Option<u32>,
    pub status: Option<ResourceStatus>,
    pub certification: Option<String>,
}

/// Partial update for a booking, raw strings from the request.
#[derive(Debug, Default, Clone)]
pub struct BookingPatch {
    pub date: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub purpose: Option<String>,
}

/// A recurring-series request, raw strings from the request.
#[derive(Debug, Clone)]
pub struct SeriesSpec {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub frequency: String,
    pub by_weekday: Option<String>,
    pub interval: u32,
    pub start_date: String,
    pub until: Option<String>,
    pub count: Option<u32>,
    pub start: String,
    pub end: String,
    pub purpose: Option<String>,
}

/// What a materialization produced: the created instances, the dates
/// skipped over conflicts, and the rule's total plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub materialized: Vec<SeriesInstance>,
    pub skipped: Vec<SkipRecord>,
    pub planned: u32,
}

fn booking_transition_allowed(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled) | (Approved, Cancelled)
    )
}

impl Engine {
    // ── Resources ────────────────────────────────────────

    pub async fn create_resource(
        &self,
        actor: &Actor,
        id: Ulid,
        name: Option<String>,
        category: Option<String>,
        capacity: u32,
        certification: Option<String>,
    ) -> Result<(), EngineError> {
        if !actor.can_manage_resources() {
            return Err(EngineError::Forbidden("resource management requires tender role"));
        }
        if self.state.len() >= MAX_RESOURCES_PER_SITE {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("resource name too long"));
            }
        if capacity == 0 {
            return Err(EngineError::LimitExceeded("capacity must be at least 1"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceCreated {
            id,
            name: name.clone(),
            category: category.clone(),
            capacity,
            certification: certification.clone(),
            status: ResourceStatus::Active,
        };
        self.wal_append(&event).await?;
        let rs = ResourceState::new(id, name, category, capacity, certification);
        self.state.insert(id, std::sync::Arc::new(tokio::sync::RwLock::new(rs)));
        self.record_audit(&actor.name, &event);
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_resource(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: ResourcePatch,
    ) -> Result<(), EngineError> {
        if !actor.can_manage_resources() {
            return Err(EngineError::Forbidden("resource management requires tender role"));
        }
        if let Some(ref n) = patch.name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("resource name too long"));
            }
        if patch.capacity == Some(0) {
            return Err(EngineError::LimitExceeded("capacity must be at least 1"));
        }
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::ResourceUpdated {
            id,
            name: patch.name.or_else(|| guard.name.clone()),
            capacity: patch.capacity.unwrap_or(guard.capacity),
            certification: patch.certification.or_else(|| guard.certification.clone()),
            status: patch.status.unwrap_or(guard.status),
        };
        self.persist_and_apply(&actor.name, id, &mut guard, &event).await
    }

    /// Hard delete. Only for resources with no future active bookings;
    /// day-to-day decommissioning goes through status = retired.
    pub async fn delete_resource(&self, actor: &Actor, id: Ulid, today: NaiveDate) -> Result<(), EngineError> {
        if !actor.can_hard_delete() {
            return Err(EngineError::Forbidden("resource deletion requires steward role"));
        }
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        if guard.has_future_active(today) {
            return Err(EngineError::HasBookings(id));
        }
        drop(guard);

        let event = Event::ResourceDeleted { id };
        self.wal_append(&event).await?;
        if let Some((_, rs)) = self.state.remove(&id) {
            let guard = rs.read().await;
            for booking in &guard.bookings {
                self.entity_to_resource.remove(&booking.id);
            }
            for window in &guard.hours {
                self.entity_to_resource.remove(&window.id);
            }
        }
        self.series.retain(|_, s| {
            s.try_read().map(|g| g.resource_id != id).unwrap_or(true)
        });
        self.record_audit(&actor.name, &event);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Opening hours ────────────────────────────────────

    pub async fn add_hours(
        &self,
        actor: &Actor,
        id: Ulid,
        resource_id: Ulid,
        weekday: &str,
        start: &str,
        end: &str,
    ) -> Result<(), EngineError> {
        if !actor.can_manage_resources() {
            return Err(EngineError::Forbidden("opening hours require tender role"));
        }
        let weekday = weekday_from_code(weekday)
            .ok_or(EngineError::InvalidRange("weekday must be MO..SU"))?;
        let window = validate::validate_times(start, end)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if guard.hours.len() >= MAX_WINDOWS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many opening windows"));
        }

        let event = Event::HoursAdded { id, resource_id, weekday, window };
        self.persist_and_apply(&actor.name, resource_id, &mut guard, &event).await
    }

    pub async fn remove_hours(&self, actor: &Actor, id: Ulid) -> Result<Ulid, EngineError> {
        if !actor.can_manage_resources() {
            return Err(EngineError::Forbidden("opening hours require tender role"));
        }
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.hours.iter().any(|w| w.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::HoursRemoved { id, resource_id };
        self.persist_and_apply(&actor.name, resource_id, &mut guard, &event).await?;
        Ok(resource_id)
    }

    // ── Bookings ─────────────────────────────────────────

    /// Request a slot. Returns the overlap verdict: `Clear`, or
    /// `Warning` when the booking fits but shares its range with others
    /// on a multi-seat resource. `SLOT_TAKEN` is a hard error.
    pub async fn request_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        resource_id: Ulid,
        date: &str,
        start: &str,
        end: &str,
        purpose: Option<String>,
    ) -> Result<SlotCheck, EngineError> {
        let (date, range) = validate::validate_range(date, start, end)?;
        if let Some(ref p) = purpose
            && p.len() > MAX_PURPOSE_LEN {
                return Err(EngineError::LimitExceeded("purpose too long"));
            }
        if self.entity_to_resource.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if !guard.status.accepts_bookings() {
            return Err(EngineError::ResourceUnavailable { id: resource_id, status: guard.status });
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }

        let verdict = check_slot(&guard, date, &range, None)?;

        let event = Event::BookingRequested {
            id,
            resource_id,
            member: actor.name.clone(),
            date,
            range,
            purpose,
            series_id: None,
        };
        self.persist_and_apply(&actor.name, resource_id, &mut guard, &event).await?;
        Ok(verdict)
    }

    /// Edit a booking's slot or purpose. The caller presents the version
    /// it read; a stale version fails `VERSION_MISMATCH`.
    pub async fn edit_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        presented_version: u64,
        patch: BookingPatch,
    ) -> Result<SlotCheck, EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?.clone();
        if !actor.can_act_on(&current.member) {
            return Err(EngineError::Forbidden("only the owner or a tender may edit a booking"));
        }
        if current.version != presented_version {
            return Err(EngineError::VersionMismatch {
                current: current.version,
                presented: presented_version,
            });
        }
        if !matches!(current.status, BookingStatus::Pending | BookingStatus::Approved) {
            return Err(EngineError::InvalidTransition {
                from: current.status.as_str(),
                to: "edited",
            });
        }
        if !guard.status.accepts_bookings() {
            return Err(EngineError::ResourceUnavailable { id: resource_id, status: guard.status });
        }

        let date = match &patch.date {
            Some(s) => validate::parse_date(s)?,
            None => current.date,
        };
        let start = match &patch.start {
            Some(s) => validate::parse_time(s)?,
            None => current.range.start,
        };
        let end = match &patch.end {
            Some(s) => validate::parse_time(s)?,
            None => current.range.end,
        };
        if end <= start {
            return Err(EngineError::InvalidRange("end must be after start"));
        }
        let range = TimeRange::new(start, end);
        if let Some(ref p) = patch.purpose
            && p.len() > MAX_PURPOSE_LEN {
                return Err(EngineError::LimitExceeded("purpose too long"));
            }
        let purpose = patch.purpose.or(current.purpose);

        let verdict = check_slot(&guard, date, &range, Some(id))?;

        let event = Event::BookingEdited {
            id,
            resource_id,
            date,
            range,
            purpose,
            version: current.version + 1,
        };
        self.persist_and_apply(&actor.name, resource_id, &mut guard, &event).await?;
        Ok(verdict)
    }

    /// Approve, reject, or cancel. Returns the prior status and the new
    /// version, which a caller needs to arm an undo window.
    pub async fn set_booking_status(
        &self,
        actor: &Actor,
        id: Ulid,
        presented_version: u64,
        status: BookingStatus,
    ) -> Result<(BookingStatus, u64), EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?.clone();

        match status {
            BookingStatus::Approved | BookingStatus::Rejected => {
                if !actor.can_review_bookings() {
                    return Err(EngineError::Forbidden("booking review requires tender role"));
                }
            }
            BookingStatus::Cancelled => {
                if !actor.can_act_on(&current.member) {
                    return Err(EngineError::Forbidden(
                        "only the owner or a tender may cancel a booking",
                    ));
                }
            }
            _ => {
                return Err(EngineError::InvalidTransition {
                    from: current.status.as_str(),
                    to: status.as_str(),
                });
            }
        }
        if current.version != presented_version {
            return Err(EngineError::VersionMismatch {
                current: current.version,
                presented: presented_version,
            });
        }
        if !booking_transition_allowed(current.status, status) {
            return Err(EngineError::InvalidTransition {
                from: current.status.as_str(),
                to: status.as_str(),
            });
        }

        let event = Event::BookingStatusChanged {
            id,
            resource_id,
            status,
            version: current.version + 1,
        };
        self.persist_and_apply(&actor.name, resource_id, &mut guard, &event).await?;
        Ok((current.status, current.version + 1))
    }

    /// Reverse a cancellation within its undo window. `expected_version`
    /// is the version the cancel produced; any interleaved mutation makes
    /// the undo fail with `VERSION_MISMATCH` instead of clobbering it.
    pub async fn undo_cancel(
        &self,
        actor: &Actor,
        id: Ulid,
        expected_version: u64,
        restore_to: BookingStatus,
    ) -> Result<(), EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?.clone();
        if current.status != BookingStatus::Cancelled {
            return Err(EngineError::InvalidTransition {
                from: current.status.as_str(),
                to: restore_to.as_str(),
            });
        }
        if current.version != expected_version {
            return Err(EngineError::VersionMismatch {
                current: current.version,
                presented: expected_version,
            });
        }
        // The slot may have been taken while the booking sat cancelled.
        check_slot(&guard, current.date, &current.range, Some(id))?;

        let event = Event::BookingStatusChanged {
            id,
            resource_id,
            status: restore_to,
            version: current.version + 1,
        };
        self.persist_and_apply(&actor.name, resource_id, &mut guard, &event).await
    }

    /// Sweep hook: move an approved booking whose slot has passed to
    /// `completed`.
    pub async fn complete_booking(&self, id: Ulid) -> Result<(), EngineError> {
        let (resource_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?.clone();
        if current.status != BookingStatus::Approved {
            return Err(EngineError::InvalidTransition {
                from: current.status.as_str(),
                to: BookingStatus::Completed.as_str(),
            });
        }
        let event = Event::BookingStatusChanged {
            id,
            resource_id,
            status: BookingStatus::Completed,
            version: current.version + 1,
        };
        self.persist_and_apply("system", resource_id, &mut guard, &event).await
    }

    /// Approved bookings whose end lies in the past, for the sweeper.
    pub fn collect_finished(&self, today: NaiveDate, now: NaiveTime) -> Vec<Ulid> {
        let mut finished = Vec::new();
        for entry in self.state.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for booking in &guard.bookings {
                    if booking.status == BookingStatus::Approved
                        && (booking.date < today
                            || (booking.date == today && booking.range.end <= now))
                    {
                        finished.push(booking.id);
                    }
                }
            }
        }
        finished
    }

    // ── Series ───────────────────────────────────────────

    /// Expand a recurrence rule and materialize its instances up to the
    /// rolling horizon, atomically. Dates whose slot is taken are
    /// skipped into the series' skip report; the series plus all
    /// created instances are one WAL record, so a storage failure or
    /// crash leaves no partial series.
    pub async fn create_series(
        &self,
        actor: &Actor,
        spec: SeriesSpec,
        today: NaiveDate,
    ) -> Result<Expansion, EngineError> {
        let range = validate::validate_times(&spec.start, &spec.end)?;
        let start_date = validate::parse_date(&spec.start_date)?;
        let frequency = Frequency::parse(&spec.frequency)
            .ok_or(EngineError::InvalidRecurrence("unknown frequency"))?;
        let by_weekday = match &spec.by_weekday {
            Some(codes) => Some(
                WeekdaySet::from_codes(codes)
                    .ok_or(EngineError::InvalidRecurrence("bad weekday codes"))?,
            ),
            None => None,
        };
        let end = match (&spec.until, spec.count) {
            (Some(until), None) => RecurrenceEnd::Until(validate::parse_date(until)?),
            (None, Some(count)) => RecurrenceEnd::Count(count),
            _ => {
                return Err(EngineError::InvalidRecurrence(
                    "exactly one of until/count is required",
                ));
            }
        };
        if let Some(ref p) = spec.purpose
            && p.len() > MAX_PURPOSE_LEN {
                return Err(EngineError::LimitExceeded("purpose too long"));
            }

        let rule = RecurrenceRule { frequency, by_weekday, interval: spec.interval, start_date, end };
        let dates = recurrence::expand_dates(&rule)?;
        let planned = dates.len() as u32;

        if self.series.contains_key(&spec.id) {
            return Err(EngineError::AlreadyExists(spec.id));
        }
        let rs = self
            .get_resource(&spec.resource_id)
            .ok_or(EngineError::NotFound(spec.resource_id))?;
        let mut guard = rs.write().await;
        if !guard.status.accepts_bookings() {
            return Err(EngineError::ResourceUnavailable {
                id: spec.resource_id,
                status: guard.status,
            });
        }

        // Instances land on strictly ascending dates, so the batch can
        // never conflict with itself — each date is checked only against
        // the existing calendar.
        let horizon = today + Days::new(self.horizon_days as u64);
        let mut instances = Vec::new();
        let mut skipped = Vec::new();
        for date in &dates {
            if *date > horizon {
                break;
            }
            match check_slot(&guard, *date, &range, None) {
                Ok(_) => instances.push(SeriesInstance { booking_id: Ulid::new(), date: *date }),
                Err(EngineError::SlotTaken { conflict_with }) => {
                    skipped.push(SkipRecord { date: *date, conflict_with });
                }
                Err(e) => return Err(e),
            }
        }
        if guard.bookings.len() + instances.len() > MAX_BOOKINGS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }

        let event = Event::SeriesMaterialized {
            id: spec.id,
            resource_id: spec.resource_id,
            member: actor.name.clone(),
            rule,
            range,
            purpose: spec.purpose,
            planned,
            instances: instances.clone(),
            skipped: skipped.clone(),
        };
        self.persist_and_apply(&actor.name, spec.resource_id, &mut guard, &event).await?;
        self.apply_series_map(&event);

        Ok(Expansion { materialized: instances, skipped, planned })
    }

    /// Series lifecycle: `active ⇄ paused`; `active|paused → cancelled`
    /// is terminal and cancels the series' future bookings, leaving past
    /// ones untouched.
    pub async fn set_series_status(
        &self,
        actor: &Actor,
        id: Ulid,
        status: SeriesStatus,
        today: NaiveDate,
    ) -> Result<(), EngineError> {
        let series = self.get_series(&id).ok_or(EngineError::NotFound(id))?;
        let mut s_guard = series.write().await;
        if !actor.can_act_on(&s_guard.member) {
            return Err(EngineError::Forbidden("only the owner or a tender may change a series"));
        }

        use SeriesStatus::*;
        let allowed = matches!(
            (s_guard.status, status),
            (Active, Paused) | (Paused, Active) | (Active, Cancelled) | (Paused, Cancelled)
        );
        if !allowed {
            return Err(EngineError::InvalidTransition {
                from: s_guard.status.as_str(),
                to: status.as_str(),
            });
        }

        if status == Cancelled {
            let resource_id = s_guard.resource_id;
            let rs = self
                .get_resource(&resource_id)
                .ok_or(EngineError::NotFound(resource_id))?;
            let mut guard = rs.write().await;
            let cancelled: Vec<Ulid> = guard
                .bookings
                .iter()
                .filter(|b| {
                    b.series_id == Some(id)
                        && b.date >= today
                        && matches!(b.status, BookingStatus::Pending | BookingStatus::Approved)
                })
                .map(|b| b.id)
                .collect();
            let event = Event::SeriesCancelled { id, resource_id, cancelled };
            self.persist_and_apply(&actor.name, resource_id, &mut guard, &event).await?;
            s_guard.status = Cancelled;
        } else {
            let event = Event::SeriesStatusChanged { id, resource_id: s_guard.resource_id, status };
            self.wal_append(&event).await?;
            s_guard.status = status;
            self.record_audit(&actor.name, &event);
            self.notify.send(s_guard.resource_id, &event);
        }
        Ok(())
    }

    /// Sweep hook: materialize the instances of an active series that
    /// have entered the rolling horizon. Paused and cancelled series are
    /// never extended. Returns how many instances were created.
    pub async fn extend_series(&self, id: Ulid, today: NaiveDate) -> Result<u32, EngineError> {
        let series = self.get_series(&id).ok_or(EngineError::NotFound(id))?;
        let mut s_guard = series.write().await;
        if s_guard.status != SeriesStatus::Active {
            return Ok(0);
        }
        let dates = recurrence::expand_dates(&s_guard.rule)?;
        let horizon = today + Days::new(self.horizon_days as u64);
        let due: Vec<NaiveDate> = dates
            .into_iter()
            .skip(s_guard.consumed as usize)
            .take_while(|d| *d <= horizon)
            .collect();
        if due.is_empty() {
            return Ok(0);
        }

        let resource_id = s_guard.resource_id;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;

        let range = s_guard.range;
        let mut instances = Vec::new();
        let mut skipped = Vec::new();
        for date in due {
            match check_slot(&guard, date, &range, None) {
                Ok(_) => instances.push(SeriesInstance { booking_id: Ulid::new(), date }),
                Err(EngineError::SlotTaken { conflict_with }) => {
                    skipped.push(SkipRecord { date, conflict_with });
                }
                Err(e) => return Err(e),
            }
        }

        let event = Event::SeriesExtended {
            id,
            resource_id,
            member: s_guard.member.clone(),
            range,
            purpose: s_guard.purpose.clone(),
            instances: instances.clone(),
            skipped: skipped.clone(),
        };
        self.persist_and_apply("system", resource_id, &mut guard, &event).await?;
        s_guard.materialized += instances.len() as u32;
        s_guard.consumed += (instances.len() + skipped.len()) as u32;
        s_guard.skipped.extend_from_slice(&skipped);
        Ok(instances.len() as u32)
    }

    /// Active series ids, for the sweeper.
    pub fn active_series(&self) -> Vec<Ulid> {
        self.series
            .iter()
            .filter(|e| {
                e.value()
                    .try_read()
                    .map(|s| s.status == SeriesStatus::Active)
                    .unwrap_or(false)
            })
            .map(|e| *e.key())
            .collect()
    }

    // ── Compaction ───────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.state.iter() {
            let rs = entry.value().clone();
            let guard = rs.try_read().expect("compact: uncontended read");

            events.push(Event::ResourceCreated {
                id: guard.id,
                name: guard.name.clone(),
                category: guard.category.clone(),
                capacity: guard.capacity,
                certification: guard.certification.clone(),
                status: guard.status,
            });
            for window in &guard.hours {
                events.push(Event::HoursAdded {
                    id: window.id,
                    resource_id: guard.id,
                    weekday: window.weekday,
                    window: window.window,
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingSnapshot {
                    resource_id: guard.id,
                    booking: booking.clone(),
                });
            }
        }
        for entry in self.series.iter() {
            let series = entry.value().clone();
            let guard = series.try_read().expect("compact: uncontended read");
            events.push(Event::SeriesSnapshot { series: guard.clone() });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
