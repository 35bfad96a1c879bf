use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Ms, ResourceState, TimeRange};

use super::EngineError;

/// Outcome of a slot check that did not hard-fail. `Warning` means the
/// candidate overlaps existing bookings but fits within capacity — the
/// shared-seats case; callers may surface it and proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotCheck {
    Clear,
    Warning { overlapping: u32 },
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Overlap Detector. Checks `candidate` against the capacity-occupying
/// bookings already on `date`, excluding `exclude` (the booking being
/// edited, if any).
///
/// Two ranges overlap iff `s1 < e2 && s2 < e1` (half-open). With
/// capacity 1 any overlap is a hard conflict. Otherwise a sweep line
/// over the candidate window finds the peak simultaneous count; if the
/// candidate would push that peak past capacity the slot is taken,
/// else any overlap is reported as a warning.
pub fn check_slot(
    rs: &ResourceState,
    date: NaiveDate,
    candidate: &TimeRange,
    exclude: Option<Ulid>,
) -> Result<SlotCheck, EngineError> {
    let overlapping: Vec<(Ulid, TimeRange)> = rs
        .active_on_date(date)
        .filter(|b| Some(b.id) != exclude && b.range.overlaps(candidate))
        .map(|b| (b.id, b.range))
        .collect();

    if overlapping.is_empty() {
        return Ok(SlotCheck::Clear);
    }
    if rs.capacity <= 1 {
        return Err(EngineError::SlotTaken { conflict_with: overlapping[0].0 });
    }

    // Sweep-line events clamped to the candidate window: +1 where an
    // existing booking enters it, -1 where it leaves. Ends sort before
    // starts at the same instant (half-open).
    let mut events: Vec<(chrono::NaiveTime, i32)> = Vec::with_capacity(overlapping.len() * 2);
    for (_, range) in &overlapping {
        events.push((range.start.max(candidate.start), 1));
        events.push((range.end.min(candidate.end), -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut count: u32 = 0;
    let mut peak: u32 = 0;
    for (_, delta) in &events {
        if *delta > 0 {
            count += 1;
        } else {
            count -= 1;
        }
        peak = peak.max(count);
    }

    if peak + 1 > rs.capacity {
        return Err(EngineError::SlotTaken { conflict_with: overlapping[0].0 });
    }
    Ok(SlotCheck::Warning { overlapping: overlapping.len() as u32 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookingRecord, BookingStatus};
    use chrono::{NaiveDate, NaiveTime};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    const DATE: &str = "2024-03-01";

    fn date() -> NaiveDate {
        NaiveDate::parse_from_str(DATE, "%Y-%m-%d").unwrap()
    }

    fn resource(capacity: u32, bookings: &[(u32, u32, u32, u32, BookingStatus)]) -> ResourceState {
        let mut rs = ResourceState::new(Ulid::new(), None, None, capacity, None);
        for &(sh, sm, eh, em, status) in bookings {
            rs.insert_booking(BookingRecord {
                id: Ulid::new(),
                member: "ada".into(),
                date: date(),
                range: TimeRange::new(t(sh, sm), t(eh, em)),
                status,
                purpose: None,
                series_id: None,
                version: 1,
            });
        }
        rs
    }

    #[test]
    fn empty_calendar_is_clear() {
        let rs = resource(1, &[]);
        let verdict = check_slot(&rs, date(), &TimeRange::new(t(9, 0), t(10, 0)), None).unwrap();
        assert_eq!(verdict, SlotCheck::Clear);
    }

    #[test]
    fn adjacent_ranges_never_conflict() {
        // A booking ending at 10:00 does not conflict with one starting at 10:00.
        let rs = resource(1, &[(9, 0, 10, 0, BookingStatus::Approved)]);
        let verdict = check_slot(&rs, date(), &TimeRange::new(t(10, 0), t(11, 0)), None).unwrap();
        assert_eq!(verdict, SlotCheck::Clear);
    }

    #[test]
    fn exclusive_tool_overlap_is_taken() {
        // capacity = 1: any overlapping pair is SLOT_TAKEN, never a warning
        let rs = resource(1, &[(9, 0, 10, 0, BookingStatus::Pending)]);
        let result = check_slot(&rs, date(), &TimeRange::new(t(9, 30), t(10, 30)), None);
        assert!(matches!(result, Err(EngineError::SlotTaken { .. })));
    }

    #[test]
    fn identical_ranges_are_full_overlap() {
        let rs = resource(1, &[(9, 0, 10, 0, BookingStatus::Approved)]);
        let result = check_slot(&rs, date(), &TimeRange::new(t(9, 0), t(10, 0)), None);
        assert!(matches!(result, Err(EngineError::SlotTaken { .. })));
    }

    #[test]
    fn single_minute_overlap_conflicts() {
        let rs = resource(1, &[(9, 0, 10, 1, BookingStatus::Approved)]);
        let result = check_slot(&rs, date(), &TimeRange::new(t(10, 0), t(11, 0)), None);
        assert!(matches!(result, Err(EngineError::SlotTaken { .. })));
    }

    #[test]
    fn cancelled_and_rejected_never_block() {
        let rs = resource(
            1,
            &[
                (9, 0, 10, 0, BookingStatus::Cancelled),
                (9, 0, 10, 0, BookingStatus::Rejected),
            ],
        );
        let verdict = check_slot(&rs, date(), &TimeRange::new(t(9, 0), t(10, 0)), None).unwrap();
        assert_eq!(verdict, SlotCheck::Clear);
    }

    #[test]
    fn other_dates_do_not_interfere() {
        let mut rs = resource(1, &[]);
        rs.insert_booking(BookingRecord {
            id: Ulid::new(),
            member: "ada".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            range: TimeRange::new(t(9, 0), t(10, 0)),
            status: BookingStatus::Approved,
            purpose: None,
            series_id: None,
            version: 1,
        });
        let verdict = check_slot(&rs, date(), &TimeRange::new(t(9, 0), t(10, 0)), None).unwrap();
        assert_eq!(verdict, SlotCheck::Clear);
    }

    #[test]
    fn shared_capacity_second_booking_warns() {
        // capacity = 3: 2nd and 3rd overlapping bookings are warnings
        let rs = resource(3, &[(9, 0, 10, 0, BookingStatus::Approved)]);
        let verdict = check_slot(&rs, date(), &TimeRange::new(t(9, 0), t(10, 0)), None).unwrap();
        assert_eq!(verdict, SlotCheck::Warning { overlapping: 1 });

        let rs = resource(
            3,
            &[
                (9, 0, 10, 0, BookingStatus::Approved),
                (9, 0, 10, 0, BookingStatus::Approved),
            ],
        );
        let verdict = check_slot(&rs, date(), &TimeRange::new(t(9, 0), t(10, 0)), None).unwrap();
        assert_eq!(verdict, SlotCheck::Warning { overlapping: 2 });
    }

    #[test]
    fn shared_capacity_saturation_is_taken() {
        // capacity = 3: the 4th concurrently overlapping booking fails
        let rs = resource(
            3,
            &[
                (9, 0, 10, 0, BookingStatus::Approved),
                (9, 0, 10, 0, BookingStatus::Approved),
                (9, 0, 10, 0, BookingStatus::Approved),
            ],
        );
        let result = check_slot(&rs, date(), &TimeRange::new(t(9, 0), t(10, 0)), None);
        assert!(matches!(result, Err(EngineError::SlotTaken { .. })));
    }

    #[test]
    fn peak_counts_concurrency_not_total() {
        // Three existing bookings overlap the candidate but never each
        // other; peak concurrency is 1, so capacity 2 still fits.
        let rs = resource(
            2,
            &[
                (9, 0, 9, 30, BookingStatus::Approved),
                (9, 30, 10, 0, BookingStatus::Approved),
                (10, 0, 10, 30, BookingStatus::Approved),
            ],
        );
        let verdict = check_slot(&rs, date(), &TimeRange::new(t(9, 0), t(10, 30)), None).unwrap();
        assert_eq!(verdict, SlotCheck::Warning { overlapping: 3 });
    }

    #[test]
    fn peak_outside_candidate_window_ignored() {
        // Saturation at 11:00-12:00 doesn't matter for a 9:00-10:00 candidate
        // that only overlaps one of the bookings.
        let rs = resource(
            2,
            &[
                (9, 30, 12, 0, BookingStatus::Approved),
                (11, 0, 12, 0, BookingStatus::Approved),
            ],
        );
        let verdict = check_slot(&rs, date(), &TimeRange::new(t(9, 0), t(10, 0)), None).unwrap();
        assert_eq!(verdict, SlotCheck::Warning { overlapping: 1 });
    }

    #[test]
    fn exclude_skips_the_edited_booking() {
        let mut rs = resource(1, &[]);
        let id = Ulid::new();
        rs.insert_booking(BookingRecord {
            id,
            member: "ada".into(),
            date: date(),
            range: TimeRange::new(t(9, 0), t(10, 0)),
            status: BookingStatus::Approved,
            purpose: None,
            series_id: None,
            version: 1,
        });
        // Shifting the same booking by 30 minutes overlaps its old slot,
        // which must not count against it.
        let verdict =
            check_slot(&rs, date(), &TimeRange::new(t(9, 30), t(10, 30)), Some(id)).unwrap();
        assert_eq!(verdict, SlotCheck::Clear);
    }
}
