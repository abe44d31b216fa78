use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use remindhub_core::{EndCondition, Frequency, RecurrenceRule};
use tracing::warn;

/// Result of asking a rule for its next occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextOccurrence {
    At(DateTime<Utc>),
    /// The rule's end condition has been met; the series is over.
    Exhausted,
}

impl NextOccurrence {
    pub fn instant(self) -> Option<DateTime<Utc>> {
        match self {
            NextOccurrence::At(at) => Some(at),
            NextOccurrence::Exhausted => None,
        }
    }
}

/// Compute the smallest occurrence of `rule` strictly after `after`.
///
/// Returns `Exhausted` once the count is used up or the next occurrence would
/// fall after the `until` bound.
pub fn next_occurrence(rule: &RecurrenceRule, after: DateTime<Utc>) -> NextOccurrence {
    match index_after(rule, after) {
        Some(index) => resolve(rule, index),
        None => {
            warn!(frequency = %rule.frequency, "recurrence index overflow; treating series as exhausted");
            NextOccurrence::Exhausted
        }
    }
}

/// Compute the smallest occurrence of `rule` at or after `at`.
pub fn first_occurrence(rule: &RecurrenceRule, at: DateTime<Utc>) -> NextOccurrence {
    next_occurrence(rule, at - Duration::nanoseconds(1))
}

/// Add `months` calendar months to `base`, placing the result on `day`
/// (clamped to the length of the target month) at `base`'s wall-clock time.
pub fn add_months_clamped(
    base: DateTime<FixedOffset>,
    months: i64,
    day: u32,
) -> Option<DateTime<FixedOffset>> {
    let total = i64::from(base.year()) * 12 + i64::from(base.month0()) + months;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    let month = total.rem_euclid(12) as u32 + 1;
    let day = day.clamp(1, days_in_month(year, month)?);
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    base.offset()
        .from_local_datetime(&date.and_time(base.time()))
        .single()
}

pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    Some(NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?.day())
}

// --- private helpers ---------------------------------------------------

fn resolve(rule: &RecurrenceRule, index: u64) -> NextOccurrence {
    if let Some(EndCondition::Count { count }) = rule.end {
        if index >= u64::from(count) {
            return NextOccurrence::Exhausted;
        }
    }
    let Some(at) = occurrence(rule, index) else {
        warn!(index, "occurrence outside the representable calendar range");
        return NextOccurrence::Exhausted;
    };
    if let Some(EndCondition::Until { at: until }) = rule.end {
        if at > until {
            return NextOccurrence::Exhausted;
        }
    }
    NextOccurrence::At(at.with_timezone(&Utc))
}

/// Seconds between occurrences for fixed-length units; `None` for months.
fn fixed_step_secs(rule: &RecurrenceRule) -> Option<i64> {
    let unit = match rule.frequency {
        Frequency::Minute => 60,
        Frequency::Hour => 3_600,
        // Offsets are fixed, so a calendar day is always 24 h here.
        Frequency::Day => 86_400,
        Frequency::Week => 7 * 86_400,
        Frequency::Month => return None,
    };
    Some(unit * i64::from(rule.interval.max(1)))
}

/// Occurrence `k` of the series (k = 0 is `rule.start`).
fn occurrence(rule: &RecurrenceRule, k: u64) -> Option<DateTime<FixedOffset>> {
    let k = i64::try_from(k).ok()?;
    match fixed_step_secs(rule) {
        Some(step) => rule
            .start
            .checked_add_signed(Duration::try_seconds(step.checked_mul(k)?)?),
        None => {
            let months = k.checked_mul(i64::from(rule.interval.max(1)))?;
            let day = rule.month_day.map(u32::from).unwrap_or(rule.start.day());
            add_months_clamped(rule.start, months, day)
        }
    }
}

/// Smallest index whose occurrence is strictly after `after`.
fn index_after(rule: &RecurrenceRule, after: DateTime<Utc>) -> Option<u64> {
    let start = rule.start.with_timezone(&Utc);
    if after < start {
        return Some(0);
    }

    if let Some(step) = fixed_step_secs(rule) {
        let elapsed_ms = (after - start).num_milliseconds();
        let k = elapsed_ms.div_euclid(step.checked_mul(1000)?) + 1;
        return u64::try_from(k).ok();
    }

    // Monthly: jump close to the target month, then walk forward. Clamping
    // only ever moves an occurrence earlier within its month, so at most a
    // couple of steps are needed.
    let local_after = after.with_timezone(rule.start.offset());
    let months = i64::from(local_after.year() - rule.start.year()) * 12
        + i64::from(local_after.month())
        - i64::from(rule.start.month());
    let interval = i64::from(rule.interval.max(1));
    let mut k = u64::try_from((months.div_euclid(interval) - 1).max(0)).ok()?;
    for _ in 0..8 {
        if occurrence(rule, k)?.with_timezone(&Utc) > after {
            return Some(k);
        }
        k += 1;
    }
    None
}
