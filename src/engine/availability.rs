use chrono::{Datelike, NaiveDate};

use crate::model::{ResourceState, TimeRange};

// ── Availability Algorithm ────────────────────────────────────────

/// Compute the free windows of a resource on one date: the day's
/// opening hours minus the time ranges where active bookings already
/// saturate capacity.
pub fn availability(resource: &ResourceState, date: NaiveDate) -> Vec<TimeRange> {
    let mut open = resource.windows_for(date.weekday());
    if open.is_empty() {
        return Vec::new(); // closed that day
    }
    open.sort_by_key(|w| w.start);
    let mut free = merge_overlapping(&open);

    let mut allocs: Vec<TimeRange> = resource
        .active_on_date(date)
        .map(|b| b.range)
        .collect();
    if allocs.is_empty() {
        return free;
    }
    allocs.sort_by_key(|r| r.start);

    let saturated = compute_saturated_spans(&allocs, resource.capacity);
    if !saturated.is_empty() {
        free = subtract_intervals(&free, &saturated);
    }

    free
}

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[TimeRange]) -> Vec<TimeRange> {
    let mut merged: Vec<TimeRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end {
                last.end = last.end.max(range.end);
                continue;
            }
        merged.push(range);
    }
    merged
}

/// Subtract sorted `to_remove` ranges from sorted disjoint `base` ranges.
pub fn subtract_intervals(base: &[TimeRange], to_remove: &[TimeRange]) -> Vec<TimeRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(TimeRange::new(current_start, current_end));
        }
    }

    result
}

/// Sweep line: find the ranges where the booking count reaches
/// capacity. Returns sorted, merged saturated ranges.
pub fn compute_saturated_spans(allocs: &[TimeRange], capacity: u32) -> Vec<TimeRange> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return merge_overlapping(allocs);
    }

    // +1 at start, -1 at end; ends sort first at equal instants.
    let mut events: Vec<(chrono::NaiveTime, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<chrono::NaiveTime> = None;

    for (time, delta) in &events {
        if *delta > 0 {
            count += *delta as u32;
        } else {
            count -= (-*delta) as u32;
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity
            && let Some(start) = saturated_start.take()
            && *time > start {
                result.push(TimeRange::new(start, *time));
            }
    }

    result
}
