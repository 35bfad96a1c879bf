use chrono::{Datelike, Days, NaiveDate};

use crate::limits::{MAX_RECURRENCE_INTERVAL, MAX_SERIES_INSTANCES};
use crate::model::{Frequency, RecurrenceEnd, RecurrenceRule};

use super::EngineError;

/// Recurrence Expander: turn a rule into the ordered, finite sequence
/// of instance dates. Pure and deterministic — the same rule always
/// yields the same sequence, and the materializer resumes mid-sequence
/// by index.
///
/// Monthly rules anchored on a day that a stepped month lacks (the 31st
/// in a 30-day month) fail `INVALID_RECURRENCE` outright; instances past
/// the `until` bound are never generated and so never trip this.
pub fn expand_dates(rule: &RecurrenceRule) -> Result<Vec<NaiveDate>, EngineError> {
    if rule.interval == 0 {
        return Err(EngineError::InvalidRecurrence("interval must be at least 1"));
    }
    if rule.interval > MAX_RECURRENCE_INTERVAL {
        return Err(EngineError::LimitExceeded("recurrence interval too large"));
    }
    match rule.end {
        RecurrenceEnd::Until(until) if until < rule.start_date => {
            return Err(EngineError::InvalidRecurrence("end date before start date"));
        }
        RecurrenceEnd::Count(0) => {
            return Err(EngineError::InvalidRecurrence("count must be at least 1"));
        }
        RecurrenceEnd::Count(c) if c as usize > MAX_SERIES_INSTANCES => {
            return Err(EngineError::LimitExceeded("too many instances in series"));
        }
        _ => {}
    }
    if rule.by_weekday.is_some() && rule.frequency != Frequency::Weekly {
        return Err(EngineError::InvalidRecurrence("weekday set requires a weekly rule"));
    }
    if let Some(set) = &rule.by_weekday
        && set.is_empty() {
            return Err(EngineError::InvalidRecurrence("weekday set is empty"));
        }

    match rule.frequency {
        Frequency::Daily => step_by_days(rule, rule.interval as u64),
        Frequency::Weekly => match &rule.by_weekday {
            None => step_by_days(rule, 7 * rule.interval as u64),
            Some(_) => weekly_by_weekday(rule),
        },
        Frequency::Monthly => monthly(rule),
    }
}

fn done(dates: &[NaiveDate], end: &RecurrenceEnd, candidate: NaiveDate) -> bool {
    match end {
        RecurrenceEnd::Until(until) => candidate > *until,
        RecurrenceEnd::Count(count) => dates.len() >= *count as usize,
    }
}

fn push(dates: &mut Vec<NaiveDate>, date: NaiveDate) -> Result<(), EngineError> {
    if dates.len() >= MAX_SERIES_INSTANCES {
        return Err(EngineError::LimitExceeded("too many instances in series"));
    }
    dates.push(date);
    Ok(())
}

fn step_by_days(rule: &RecurrenceRule, step: u64) -> Result<Vec<NaiveDate>, EngineError> {
    let mut dates = Vec::new();
    let mut date = rule.start_date;
    loop {
        if done(&dates, &rule.end, date) {
            break;
        }
        push(&mut dates, date)?;
        date = date
            .checked_add_days(Days::new(step))
            .ok_or(EngineError::InvalidRecurrence("date out of range"))?;
    }
    Ok(dates)
}

/// One instance per listed weekday per week boundary, weeks anchored on
/// the Monday of the start date's week and stepped by `interval`.
/// Emission is ascending Mon..Sun within a week; dates before the start
/// date (earlier weekdays of week zero) are not emitted.
fn weekly_by_weekday(rule: &RecurrenceRule) -> Result<Vec<NaiveDate>, EngineError> {
    let set = rule.by_weekday.as_ref().expect("checked by caller");
    let mut dates = Vec::new();
    let mut week_start = rule.start_date
        - Days::new(rule.start_date.weekday().num_days_from_monday() as u64);

    'weeks: loop {
        for day in set.iter() {
            let date = week_start + Days::new(day.num_days_from_monday() as u64);
            if date < rule.start_date {
                continue;
            }
            if done(&dates, &rule.end, date) {
                break 'weeks;
            }
            push(&mut dates, date)?;
        }
        week_start = week_start
            .checked_add_days(Days::new(7 * rule.interval as u64))
            .ok_or(EngineError::InvalidRecurrence("date out of range"))?;
        if let RecurrenceEnd::Until(until) = rule.end
            && week_start > until {
                break;
            }
    }
    Ok(dates)
}

fn monthly(rule: &RecurrenceRule) -> Result<Vec<NaiveDate>, EngineError> {
    let day = rule.start_date.day();
    let base_months = rule.start_date.year() as i64 * 12 + rule.start_date.month0() as i64;
    let mut dates = Vec::new();
    let mut k: i64 = 0;

    loop {
        let total = base_months + k * rule.interval as i64;
        let year = total.div_euclid(12) as i32;
        let month = total.rem_euclid(12) as u32 + 1;

        match NaiveDate::from_ymd_opt(year, month, day) {
            Some(date) => {
                if done(&dates, &rule.end, date) {
                    break;
                }
                push(&mut dates, date)?;
            }
            None => {
                // The anchor day is missing from this month. If the month
                // already lies past the until-bound no instance is due
                // there; otherwise the rule itself is invalid.
                let month_start = NaiveDate::from_ymd_opt(year, month, 1)
                    .ok_or(EngineError::InvalidRecurrence("date out of range"))?;
                match rule.end {
                    RecurrenceEnd::Until(until) if month_start > until => break,
                    _ => {
                        return Err(EngineError::InvalidRecurrence(
                            "day of month missing from a stepped month",
                        ));
                    }
                }
            }
        }
        k += 1;
    }
    Ok(dates)
}
