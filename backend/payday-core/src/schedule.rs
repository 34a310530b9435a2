// src/schedule.rs
//
// Period Generator: pure calendar logic that turns a CutoffSchedule into a
// backward-walking run of cutoff windows. No store access here; the
// synchronizer in store.rs persists what this module produces.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use thiserror::Error;

use crate::model::{
    CutoffPeriod, CutoffSchedule, CutoffStatus, PeriodId, PeriodType, ScheduleKind,
};

pub const DEFAULT_PERIOD_COUNT: usize = 10;

/// Semimonthly period ends sit 13-17 days apart for any valid configuration,
/// so a probe 25 days past a period start always lands inside the next
/// period. The probe is reclassified to find that period's start, and the
/// day before it is the current period's end.
const SEMIMONTHLY_PROBE_DAYS: i64 = 25;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("day of month {0} is outside 1..=31")]
    MonthlyDayOutOfRange(u32),
    #[error("first cutoff day {0} is outside 1..=15")]
    FirstCutoffDayOutOfRange(u32),
    #[error("last cutoff day {0} is outside 16..=28")]
    LastCutoffDayOutOfRange(u32),
    #[error("schedule {0} is deleted")]
    ScheduleDeleted(String),
}

/// Deterministic period identifier; regeneration against an unchanged
/// schedule reproduces the same ids, which is what makes sync idempotent.
pub fn period_id(schedule_id: &str, start: NaiveDate, end: NaiveDate) -> PeriodId {
    format!(
        "{}-{}-{}",
        schedule_id,
        start.format("%Y%m%d"),
        end.format("%Y%m%d")
    )
}

pub fn validate_schedule(schedule: &CutoffSchedule) -> Result<(), ScheduleError> {
    match schedule.kind {
        ScheduleKind::Monthly { day_of_month } => {
            if !(1..=31).contains(&day_of_month) {
                return Err(ScheduleError::MonthlyDayOutOfRange(day_of_month));
            }
        }
        ScheduleKind::Semimonthly {
            first_cutoff_day,
            last_cutoff_day,
        } => {
            if !(1..=15).contains(&first_cutoff_day) {
                return Err(ScheduleError::FirstCutoffDayOutOfRange(first_cutoff_day));
            }
            if !(16..=28).contains(&last_cutoff_day) {
                return Err(ScheduleError::LastCutoffDayOutOfRange(last_cutoff_day));
            }
        }
        ScheduleKind::Weekly { .. } => {}
    }
    Ok(())
}

/// Generate `count` consecutive periods walking backward from the window
/// anchored at `reference_date`. Pure and reproducible: same inputs, same
/// period set.
pub fn generate_periods(
    schedule: &CutoffSchedule,
    reference_date: NaiveDate,
    count: usize,
) -> Result<Vec<CutoffPeriod>, ScheduleError> {
    validate_schedule(schedule)?;
    if schedule.deleted {
        return Err(ScheduleError::ScheduleDeleted(schedule.id.clone()));
    }

    let windows = match schedule.kind {
        ScheduleKind::Monthly { day_of_month } => {
            monthly_windows(day_of_month, reference_date, count)
        }
        ScheduleKind::Semimonthly {
            first_cutoff_day,
            last_cutoff_day,
        } => semimonthly_windows(first_cutoff_day, last_cutoff_day, reference_date, count),
        ScheduleKind::Weekly { cutoff_weekday } => {
            weekly_windows(cutoff_weekday, reference_date, count)
        }
    };

    Ok(windows
        .into_iter()
        .map(|(start, end, period_type)| materialize(schedule, start, end, period_type))
        .collect())
}

fn materialize(
    schedule: &CutoffSchedule,
    start: NaiveDate,
    end: NaiveDate,
    period_type: PeriodType,
) -> CutoffPeriod {
    CutoffPeriod {
        id: period_id(&schedule.id, start, end),
        schedule_id: schedule.id.clone(),
        company_id: schedule.company_id.clone(),
        start_date: start,
        end_date: end,
        release_date: end + Duration::days(schedule.release_offset_days as i64),
        period_type,
        status: CutoffStatus::Timekeeping,
        totals: None,
        timekeeping_job_id: None,
        payroll_job_id: None,
        payslip_job_id: None,
    }
}

// --- Monthly ---

fn monthly_windows(
    day_of_month: u32,
    reference_date: NaiveDate,
    count: usize,
) -> Vec<(NaiveDate, NaiveDate, PeriodType)> {
    let (mut year, mut month) = (reference_date.year(), reference_date.month());
    // The window containing the reference date ends at this month's anchor;
    // if that anchor already passed, the containing window ends next month.
    if month_anchor(year, month, day_of_month) < reference_date {
        (year, month) = next_month(year, month);
    }

    let mut windows = Vec::with_capacity(count);
    for _ in 0..count {
        let end = month_anchor(year, month, day_of_month);
        let (prev_year, prev_month) = prev_month(year, month);
        let start = month_anchor(prev_year, prev_month, day_of_month) + Duration::days(1);
        // Monthly schedules have exactly one window per month.
        windows.push((start, end, PeriodType::Last));
        (year, month) = (prev_year, prev_month);
    }
    windows
}

// --- Semimonthly ---

/// Classify a day-of-month into its sub-period: strictly after the first
/// cutoff day up to and including the last cutoff day is the FIRST period,
/// everything else wraps around as the LAST period.
pub fn classify_semimonthly(day: u32, first_cutoff_day: u32, last_cutoff_day: u32) -> PeriodType {
    if day > first_cutoff_day && day <= last_cutoff_day {
        PeriodType::First
    } else {
        PeriodType::Last
    }
}

fn semimonthly_windows(
    first_cutoff_day: u32,
    last_cutoff_day: u32,
    reference_date: NaiveDate,
    count: usize,
) -> Vec<(NaiveDate, NaiveDate, PeriodType)> {
    // Start of the window containing the reference date.
    let mut start =
        prev_anchor_before(reference_date, first_cutoff_day, last_cutoff_day) + Duration::days(1);

    let mut windows = Vec::with_capacity(count);
    for _ in 0..count {
        // First/last windows have unequal lengths, so the end is derived, not
        // assumed: probe past the window, reclassify, step back one day.
        let probe = start + Duration::days(SEMIMONTHLY_PROBE_DAYS);
        let end = prev_anchor_before(probe, first_cutoff_day, last_cutoff_day);
        let period_type = classify_semimonthly(end.day(), first_cutoff_day, last_cutoff_day);
        windows.push((start, end, period_type));
        start = prev_anchor_before(start - Duration::days(1), first_cutoff_day, last_cutoff_day)
            + Duration::days(1);
    }
    windows
}

/// Latest cutoff anchor strictly before `date`.
fn prev_anchor_before(date: NaiveDate, first_cutoff_day: u32, last_cutoff_day: u32) -> NaiveDate {
    let (year, month) = (date.year(), date.month());
    let last_anchor = month_anchor(year, month, last_cutoff_day);
    if last_anchor < date {
        return last_anchor;
    }
    let first_anchor = month_anchor(year, month, first_cutoff_day);
    if first_anchor < date {
        return first_anchor;
    }
    let (prev_year, prev_mon) = prev_month(year, month);
    month_anchor(prev_year, prev_mon, last_cutoff_day)
}

// --- Weekly ---

fn weekly_windows(
    cutoff_weekday: Weekday,
    reference_date: NaiveDate,
    count: usize,
) -> Vec<(NaiveDate, NaiveDate, PeriodType)> {
    // Most recent occurrence of the cutoff weekday at or before the reference.
    let offset = (reference_date.weekday().num_days_from_monday() + 7
        - cutoff_weekday.num_days_from_monday())
        % 7;
    let mut end = reference_date - Duration::days(offset as i64);

    let mut windows = Vec::with_capacity(count);
    for _ in 0..count {
        let start = end - Duration::days(6);
        windows.push((start, end, weekly_period_type(end)));
        end -= Duration::days(7);
    }
    windows
}

/// First/last occurrence of the anchor weekday within its month maps to
/// FIRST/LAST; everything in between is MIDDLE.
fn weekly_period_type(anchor: NaiveDate) -> PeriodType {
    if anchor.day() <= 7 {
        PeriodType::First
    } else if anchor.day() + 7 > days_in_month(anchor.year(), anchor.month()) {
        PeriodType::Last
    } else {
        PeriodType::Middle
    }
}

// --- Calendar helpers ---

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_mon) = next_month(year, month);
    NaiveDate::from_ymd_opt(next_year, next_mon, 1)
        .and_then(|d| d.pred_opt())
        .expect("first of month has a predecessor")
        .day()
}

/// Anchor day within a month, clamped to the month's length (a day-31 anchor
/// lands on Feb 28/29).
fn month_anchor(year: i32, month: u32, day: u32) -> NaiveDate {
    let clamped = day.min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, clamped).expect("clamped day fits the month")
}

fn prev_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}
