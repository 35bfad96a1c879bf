use ulid::Ulid;

use crate::model::*;

use super::availability::availability;
use super::conflict::check_slot;
use super::{validate, Engine, EngineError, SlotCheck};

/// Dry-run verdict for a candidate slot, the query-level face of the
/// Overlap Detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub verdict: &'static str,
    pub overlapping: u32,
    pub conflict_with: Option<Ulid>,
}

impl Engine {
    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        self.state
            .iter()
            .map(|entry| {
                let rs = entry.value().clone();
                let guard = rs.try_read().expect("list_resources: uncontended read");
                ResourceInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    category: guard.category.clone(),
                    capacity: guard.capacity,
                    certification: guard.certification.clone(),
                    status: guard.status,
                }
            })
            .collect()
    }

    pub async fn get_hours(&self, resource_id: Ulid) -> Result<Vec<HoursInfo>, EngineError> {
        let rs = match self.get_resource(&resource_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        Ok(guard
            .hours
            .iter()
            .map(|w| HoursInfo {
                id: w.id,
                resource_id,
                weekday: w.weekday,
                window: w.window,
            })
            .collect())
    }

    pub async fn get_bookings(
        &self,
        resource_id: Ulid,
        date: Option<&str>,
        status: Option<BookingStatus>,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let date = date.map(validate::parse_date).transpose()?;
        let rs = match self.get_resource(&resource_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        let slice: &[BookingRecord] = match date {
            Some(d) => guard.on_date(d),
            None => &guard.bookings,
        };
        Ok(slice
            .iter()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .map(|b| booking_info(resource_id, b))
            .collect())
    }

    pub async fn get_booking(&self, id: Ulid) -> Option<BookingInfo> {
        let resource_id = self.get_resource_for_entity(&id)?;
        let rs = self.get_resource(&resource_id)?;
        let guard = rs.read().await;
        guard.booking(id).map(|b| booking_info(resource_id, b))
    }

    pub fn list_series(&self, resource_id: Option<Ulid>) -> Vec<SeriesInfo> {
        self.series
            .iter()
            .filter_map(|entry| {
                let series = entry.value().clone();
                let guard = series.try_read().ok()?;
                if resource_id.is_some_and(|rid| guard.resource_id != rid) {
                    return None;
                }
                Some(SeriesInfo {
                    id: guard.id,
                    resource_id: guard.resource_id,
                    member: guard.member.clone(),
                    rule: guard.rule.clone(),
                    range: guard.range,
                    status: guard.status,
                    planned: guard.planned,
                    materialized: guard.materialized,
                })
            })
            .collect()
    }

    /// The skip report of a series: dates the expander could not
    /// materialize, with the booking each collided with.
    pub async fn get_skips(&self, series_id: Ulid) -> Result<Vec<SkipRecord>, EngineError> {
        let series = self
            .get_series(&series_id)
            .ok_or(EngineError::NotFound(series_id))?;
        let guard = series.read().await;
        Ok(guard.skipped.clone())
    }

    /// Free windows on a resource for one date: opening hours minus
    /// capacity-saturated booking ranges.
    pub async fn compute_availability(
        &self,
        resource_id: Ulid,
        date: &str,
        min_duration: Option<i64>,
    ) -> Result<Vec<TimeRange>, EngineError> {
        let date = validate::parse_date(date)?;
        let rs = match self.get_resource(&resource_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        let mut free = availability(&guard, date);
        if let Some(min) = min_duration {
            free.retain(|r| r.duration_minutes() >= min);
        }
        Ok(free)
    }

    /// Dry-run overlap check: would this slot be clear, a shared-seat
    /// warning, or taken? Nothing is persisted.
    pub async fn check_conflicts(
        &self,
        resource_id: Ulid,
        date: &str,
        start: &str,
        end: &str,
    ) -> Result<ConflictReport, EngineError> {
        let (date, range) = validate::validate_range(date, start, end)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        match check_slot(&guard, date, &range, None) {
            Ok(SlotCheck::Clear) => Ok(ConflictReport {
                verdict: "ok",
                overlapping: 0,
                conflict_with: None,
            }),
            Ok(SlotCheck::Warning { overlapping }) => Ok(ConflictReport {
                verdict: "overlap_warning",
                overlapping,
                conflict_with: None,
            }),
            Err(EngineError::SlotTaken { conflict_with }) => Ok(ConflictReport {
                verdict: "slot_taken",
                overlapping: 0,
                conflict_with: Some(conflict_with),
            }),
            Err(e) => Err(e),
        }
    }
}

fn booking_info(resource_id: Ulid, b: &BookingRecord) -> BookingInfo {
    BookingInfo {
        id: b.id,
        resource_id,
        member: b.member.clone(),
        date: b.date,
        range: b.range,
        status: b.status,
        purpose: b.purpose.clone(),
        series_id: b.series_id,
        version: b.version,
    }
}
