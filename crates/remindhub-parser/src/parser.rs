use std::ops::Range;

use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike,
    Utc, Weekday,
};
use regex::{Captures, Regex};
use remindhub_core::config::ParserConfig;
use remindhub_core::{EndCondition, Frequency, RecurrenceRule, TimeSpec};
use remindhub_scheduler::schedule::{add_months_clamped, days_in_month};
use tracing::debug;

use crate::error::{ParseError, Result};
use crate::patterns::{
    self, COUNT, DAY_MONTH, EVERY, ISO_DATE, MONTH_DAY, NAMED_DAY, ORDINAL_DAY, RELATIVE,
    SHORTHAND, SLASH_DATE, TIME_24H, TIME_BARE, TIME_MERIDIEM, TIME_NAMED, TIME_OCLOCK, UNTIL,
    WEEKDAY,
};

/// A parsed time expression plus where it was found in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTime {
    pub spec: TimeSpec,
    /// Byte ranges of the input that expressed the time, ascending.
    pub spans: Vec<Range<usize>>,
    /// The instant relative phrases were resolved against.
    pub reference: DateTime<Utc>,
}

impl ParsedTime {
    /// Wrap a spec that did not come from text (nothing to strip).
    pub fn from_spec(spec: TimeSpec, reference: DateTime<Utc>) -> Self {
        Self {
            spec,
            spans: Vec::new(),
            reference,
        }
    }
}

/// Turns English time phrases into [`TimeSpec`]s.
///
/// Relative phrases ("in 20 minutes", "tomorrow") are resolved against the
/// reference instant immediately, so the result never depends on when it is
/// read back. Identical text, reference and offset always give an identical
/// spec.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    config: ParserConfig,
}

impl Parser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn parse(&self, text: &str, reference: DateTime<Utc>, tz: FixedOffset) -> Result<TimeSpec> {
        self.parse_expression(text, reference, tz).map(|p| p.spec)
    }

    pub fn parse_expression(
        &self,
        text: &str,
        reference: DateTime<Utc>,
        tz: FixedOffset,
    ) -> Result<ParsedTime> {
        // ASCII lowercasing keeps byte offsets identical to `text`.
        let lower = text.to_ascii_lowercase();
        let tokens = scan(&lower)?;
        let resolver = Resolver {
            config: &self.config,
            reference,
            local: reference.with_timezone(&tz),
        };
        let (spec, spans) = resolver.resolve(tokens)?;
        debug!(
            recurring = spec.is_recurring(),
            spans = spans.len(),
            "time expression parsed"
        );
        Ok(ParsedTime {
            spec,
            spans,
            reference,
        })
    }
}

/// Parse with the default policy (grace window, default hours).
pub fn parse(text: &str, reference: DateTime<Utc>, tz: FixedOffset) -> Result<TimeSpec> {
    Parser::default().parse(text, reference, tz)
}

// --- tokens --------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Fixed(Frequency),
    Weekday(Weekday),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateExpr {
    Calendar {
        year: Option<i32>,
        month: u32,
        day: u32,
        /// ISO dates may carry their own time of day.
        time: Option<NaiveTime>,
    },
    DayOfMonth(u32),
    Today,
    Tonight,
    Tomorrow,
    Yesterday,
    Weekday {
        day: Weekday,
        next: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Every { interval: u32, unit: Unit },
    Relative { amount: u32, unit: Frequency },
    Date(DateExpr),
    Time(NaiveTime),
    Count(u32),
    Until,
}

#[derive(Debug)]
struct Token {
    span: Range<usize>,
    kind: Kind,
}

struct Candidate {
    span: Range<usize>,
    kind: Result<Kind>,
}

type Reader = fn(&str, &Captures<'_>) -> Option<Result<Kind>>;

/// Match every pattern, then keep the leftmost-longest non-overlapping set.
///
/// Errors attached to a candidate ("3/4") only surface if it survives.
fn scan(text: &str) -> Result<Vec<Token>> {
    let readers: [(&Regex, Reader); 17] = [
        (&*EVERY, read_every),
        (&*SHORTHAND, read_shorthand),
        (&*RELATIVE, read_relative),
        (&*COUNT, read_count),
        (&*UNTIL, read_until),
        (&*ISO_DATE, read_iso),
        (&*SLASH_DATE, read_slash),
        (&*MONTH_DAY, read_month_day),
        (&*DAY_MONTH, read_day_month),
        (&*ORDINAL_DAY, read_ordinal),
        (&*NAMED_DAY, read_named_day),
        (&*WEEKDAY, read_weekday),
        (&*TIME_MERIDIEM, read_meridiem),
        (&*TIME_24H, read_24h),
        (&*TIME_BARE, read_bare_hour),
        (&*TIME_OCLOCK, read_bare_hour),
        (&*TIME_NAMED, read_named_time),
    ];

    let mut found = Vec::new();
    for (re, read) in readers {
        for caps in re.captures_iter(text) {
            let Some(m) = caps.get(0) else { continue };
            // "#friday" is a tag, not a date.
            if text[..m.start()].ends_with('#') {
                continue;
            }
            if let Some(kind) = read(text, &caps) {
                found.push(Candidate {
                    span: m.range(),
                    kind,
                });
            }
        }
    }

    found.sort_by(|a, b| {
        a.span
            .start
            .cmp(&b.span.start)
            .then(b.span.end.cmp(&a.span.end))
    });

    let mut tokens = Vec::new();
    let mut end = 0;
    for candidate in found {
        if candidate.span.start < end {
            continue;
        }
        end = candidate.span.end;
        tokens.push(Token {
            span: candidate.span,
            kind: candidate.kind?,
        });
    }
    Ok(tokens)
}

fn read_every(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let other = caps.get(1).is_some();
    let count = caps.get(2).map(|m| patterns::number(m.as_str()));
    let interval = match (other, count) {
        (false, None) => 1,
        (true, None) => 2,
        (false, Some(Some(n))) if n > 0 => n,
        _ => {
            return Some(Err(ParseError::unparseable(format!(
                "bad recurrence interval in {:?}",
                &caps[0]
            ))))
        }
    };
    let word = &caps[3];
    let unit = match patterns::unit(word) {
        Some(f) => Unit::Fixed(f),
        None => Unit::Weekday(patterns::weekday(word)?),
    };
    Some(Ok(Kind::Every { interval, unit }))
}

fn read_until(_: &str, _: &Captures<'_>) -> Option<Result<Kind>> {
    Some(Ok(Kind::Until))
}

fn read_shorthand(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let frequency = match &caps[1] {
        "hourly" => Frequency::Hour,
        "daily" => Frequency::Day,
        "weekly" => Frequency::Week,
        "monthly" => Frequency::Month,
        _ => return None,
    };
    Some(Ok(Kind::Every {
        interval: 1,
        unit: Unit::Fixed(frequency),
    }))
}

fn read_relative(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    if caps.get(1).is_some() {
        return Some(Ok(Kind::Relative {
            amount: 30,
            unit: Frequency::Minute,
        }));
    }
    let amount = patterns::number(&caps[2])?;
    let unit = patterns::unit(&caps[3])?;
    if amount == 0 {
        return Some(Err(ParseError::unparseable("offset of zero")));
    }
    Some(Ok(Kind::Relative { amount, unit }))
}

fn read_count(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let n = match caps.get(1) {
        Some(m) => patterns::number(m.as_str())?,
        None => 2,
    };
    Some(Ok(Kind::Count(n)))
}

fn read_iso(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    let time = match (caps.get(4), caps.get(5)) {
        (Some(h), Some(m)) => {
            match clock(h.as_str().parse().ok()?, m.as_str().parse().ok()?) {
                Ok(t) => Some(t),
                Err(e) => return Some(Err(e)),
            }
        }
        _ => None,
    };
    Some(calendar(Some(year), month, day, time))
}

fn read_slash(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let a: u32 = caps[1].parse().ok()?;
    let b: u32 = caps[2].parse().ok()?;
    let year = match caps.get(3) {
        Some(m) => {
            let y: i32 = m.as_str().parse().ok()?;
            Some(if m.len() == 2 { 2000 + y } else { y })
        }
        None => None,
    };
    if a == 0 || b == 0 {
        return Some(Err(ParseError::unparseable(format!(
            "{:?} is not a date",
            &caps[0]
        ))));
    }
    let (month, day) = match (a <= 12, b <= 12) {
        (true, true) if a != b => {
            return Some(Err(ParseError::ambiguous(format!(
                "{:?} reads as both day/month and month/day",
                &caps[0]
            ))))
        }
        (true, _) => (a, b),
        (false, true) => (b, a),
        (false, false) => {
            return Some(Err(ParseError::unparseable(format!(
                "{:?} is not a date",
                &caps[0]
            ))))
        }
    };
    Some(calendar(year, month, day, None))
}

fn read_month_day(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let month = patterns::month(&caps[1])?;
    let day = caps[2].parse().ok()?;
    let year = caps.get(3).and_then(|m| m.as_str().parse().ok());
    Some(calendar(year, month, day, None))
}

fn read_day_month(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let day = caps[1].parse().ok()?;
    let month = patterns::month(&caps[2])?;
    let year = caps.get(3).and_then(|m| m.as_str().parse().ok());
    Some(calendar(year, month, day, None))
}

fn read_ordinal(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let day: u32 = caps[1].parse().ok()?;
    if !(1..=31).contains(&day) {
        return Some(Err(ParseError::unparseable(format!(
            "there is no day {day} in a month"
        ))));
    }
    Some(Ok(Kind::Date(DateExpr::DayOfMonth(day))))
}

fn read_named_day(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let expr = match &caps[1] {
        "today" => DateExpr::Today,
        "tonight" => DateExpr::Tonight,
        "tomorrow" | "tmrw" => DateExpr::Tomorrow,
        "yesterday" => DateExpr::Yesterday,
        _ => return None,
    };
    Some(Ok(Kind::Date(expr)))
}

fn read_weekday(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let day = patterns::weekday(&caps[2])?;
    let next = caps.get(1).is_some_and(|m| m.as_str() == "next");
    Some(Ok(Kind::Date(DateExpr::Weekday { day, next })))
}

fn read_meridiem(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    if !(1..=12).contains(&hour) {
        return Some(Err(ParseError::unparseable(format!(
            "{:?} is not a 12-hour clock time",
            &caps[0]
        ))));
    }
    let pm = caps[3].starts_with('p');
    let hour = hour % 12 + if pm { 12 } else { 0 };
    Some(clock(hour, minute).map(Kind::Time))
}

fn read_24h(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let hour = caps[1].parse().ok()?;
    let minute = caps[2].parse().ok()?;
    Some(clock(hour, minute).map(Kind::Time))
}

/// "at 9", "9 o'clock". Not a time when followed by ":" or "/" (those belong
/// to a longer expression), nor when the number cannot be an hour.
fn read_bare_hour(text: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let end = caps.get(0)?.end();
    if text[end..].starts_with([':', '/']) {
        return None;
    }
    let hour: u32 = caps[1].parse().ok()?;
    if hour > 23 {
        return None;
    }
    Some(clock(hour, 0).map(Kind::Time))
}

fn read_named_time(_: &str, caps: &Captures<'_>) -> Option<Result<Kind>> {
    let hour = if &caps[1] == "midnight" { 0 } else { 12 };
    Some(clock(hour, 0).map(Kind::Time))
}

fn clock(hour: u32, minute: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| ParseError::unparseable(format!("{hour}:{minute:02} is not a time of day")))
}

fn calendar(year: Option<i32>, month: u32, day: u32, time: Option<NaiveTime>) -> Result<Kind> {
    // Without a year, accept anything a leap year allows.
    if NaiveDate::from_ymd_opt(year.unwrap_or(2024), month, day).is_none() {
        return Err(ParseError::unparseable(format!(
            "there is no day {day} in month {month}"
        )));
    }
    Ok(Kind::Date(DateExpr::Calendar {
        year,
        month,
        day,
        time,
    }))
}

/// Exactly one distinct value, or none. Repeats of the same value are fine.
fn single<T: Copy + PartialEq>(values: &[T], what: &str) -> Result<Option<T>> {
    match values.split_first() {
        None => Ok(None),
        Some((first, rest)) if rest.iter().all(|v| v == first) => Ok(Some(*first)),
        Some(_) => Err(ParseError::ambiguous(format!("conflicting {what}"))),
    }
}

// --- resolution ----------------------------------------------------------

struct Resolver<'a> {
    config: &'a ParserConfig,
    reference: DateTime<Utc>,
    /// The reference instant on the caller's wall clock.
    local: DateTime<FixedOffset>,
}

impl Resolver<'_> {
    fn resolve(&self, tokens: Vec<Token>) -> Result<(TimeSpec, Vec<Range<usize>>)> {
        let recurring = tokens.iter().any(|t| matches!(t.kind, Kind::Every { .. }));

        let mut spans = Vec::new();
        let mut every = Vec::new();
        let mut relative = Vec::new();
        let mut dates = Vec::new();
        let mut times = Vec::new();
        let mut counts = Vec::new();
        let mut until = Vec::new();

        let mut iter = tokens.into_iter().peekable();
        while let Some(token) = iter.next() {
            match token.kind {
                Kind::Until => {
                    // Outside a series "until friday" is just a date.
                    if !recurring {
                        continue;
                    }
                    let end = token.span.end;
                    match iter.next_if(|next| {
                        next.span.start == end && matches!(next.kind, Kind::Date(_))
                    }) {
                        Some(Token {
                            span,
                            kind: Kind::Date(expr),
                        }) => {
                            until.push(expr);
                            spans.push(token.span.start..span.end);
                        }
                        _ => return Err(ParseError::unparseable("\"until\" must be followed by a date")),
                    }
                    continue;
                }
                Kind::Count(_) if !recurring => continue,
                Kind::Count(n) => counts.push(n),
                Kind::Every { interval, unit } => every.push((interval, unit)),
                Kind::Relative { amount, unit } => relative.push((amount, unit)),
                Kind::Date(expr) => {
                    if let DateExpr::Calendar { time: Some(t), .. } = expr {
                        times.push(t);
                    }
                    dates.push(expr);
                }
                Kind::Time(t) => times.push(t),
            }
            spans.push(token.span);
        }

        let date = single(&dates, "dates")?;
        let time = single(&times, "times of day")?;
        let every = single(&every, "recurrences")?;
        let relative = single(&relative, "offsets")?;

        let spec = match (every, relative) {
            (Some(_), Some(_)) => {
                return Err(ParseError::ambiguous(
                    "a recurrence cannot also be a relative offset",
                ))
            }
            (Some((interval, unit)), None) => {
                let end = match (single(&counts, "counts")?, single(&until, "end dates")?) {
                    (Some(_), Some(_)) => {
                        return Err(ParseError::ambiguous(
                            "a series can end after a count or at a date, not both",
                        ))
                    }
                    (Some(count), None) => Some(EndCondition::Count { count }),
                    (None, Some(expr)) => Some(EndCondition::Until {
                        at: self.until(expr)?,
                    }),
                    (None, None) => None,
                };
                self.recurring(interval, unit, date, time, end)?
            }
            (None, Some((amount, unit))) => self.relative(amount, unit, date, time)?,
            (None, None) if date.is_some() || time.is_some() => self.absolute(date, time)?,
            (None, None) => return Err(ParseError::unparseable("no time expression found")),
        };
        Ok((spec, spans))
    }

    fn absolute(&self, date: Option<DateExpr>, time: Option<NaiveTime>) -> Result<TimeSpec> {
        let at = match (date, time) {
            (Some(expr), _) => {
                let (day, t) = self.resolve_date(expr, time)?;
                self.at(day, t)?
            }
            (None, Some(t)) => {
                // A bare time means the next time the clock shows it.
                let today = self.at(self.today(), t)?;
                if today < self.local {
                    self.at(self.shift(self.today(), 1)?, t)?
                } else {
                    today
                }
            }
            (None, None) => return Err(ParseError::unparseable("no time expression found")),
        };
        self.check_not_past(at)?;
        Ok(TimeSpec::Absolute { at })
    }

    fn relative(
        &self,
        amount: u32,
        unit: Frequency,
        date: Option<DateExpr>,
        time: Option<NaiveTime>,
    ) -> Result<TimeSpec> {
        if date.is_some() {
            return Err(ParseError::ambiguous(
                "a relative offset cannot be combined with a date",
            ));
        }
        let n = i64::from(amount);
        let shifted = match unit {
            Frequency::Minute | Frequency::Hour => {
                if time.is_some() {
                    return Err(ParseError::ambiguous(
                        "a time of day cannot be combined with an offset in minutes or hours",
                    ));
                }
                let secs = if unit == Frequency::Minute { n * 60 } else { n * 3_600 };
                Duration::try_seconds(secs).and_then(|d| self.local.checked_add_signed(d))
            }
            Frequency::Day => Duration::try_days(n).and_then(|d| self.local.checked_add_signed(d)),
            Frequency::Week => {
                Duration::try_weeks(n).and_then(|d| self.local.checked_add_signed(d))
            }
            Frequency::Month => add_months_clamped(self.local, n, self.local.day()),
        }
        .ok_or_else(|| ParseError::unparseable("offset is out of range"))?;

        let at = match time {
            Some(t) => self.at(shifted.date_naive(), t)?,
            None => shifted,
        };
        Ok(TimeSpec::Absolute { at })
    }

    fn recurring(
        &self,
        interval: u32,
        unit: Unit,
        date: Option<DateExpr>,
        time: Option<NaiveTime>,
        end: Option<EndCondition>,
    ) -> Result<TimeSpec> {
        let (frequency, start, month_day) = match unit {
            Unit::Fixed(f @ (Frequency::Minute | Frequency::Hour)) => {
                if date.is_some() || time.is_some() {
                    return Err(ParseError::ambiguous(
                        "a minute or hour recurrence cannot be pinned to a date or time",
                    ));
                }
                // Sub-daily series start one interval after the reference minute.
                let base = self
                    .local
                    .with_second(0)
                    .and_then(|d| d.with_nanosecond(0))
                    .ok_or_else(|| ParseError::unparseable("reference out of range"))?;
                let unit_secs = if f == Frequency::Minute { 60 } else { 3_600 };
                let start = Duration::try_seconds(unit_secs * i64::from(interval))
                    .and_then(|d| base.checked_add_signed(d))
                    .ok_or_else(|| ParseError::unparseable("interval is out of range"))?;
                (f, start, None)
            }
            Unit::Fixed(Frequency::Day) => {
                let (from, t) = self.series_from(date, time)?;
                let mut start = self.at(from, t)?;
                if start < self.local {
                    start = self.at(self.shift(from, 1)?, t)?;
                }
                (Frequency::Day, start, None)
            }
            Unit::Fixed(Frequency::Week) => {
                let (from, t) = self.series_from(date, time)?;
                (Frequency::Week, self.weekly_start(from, from.weekday(), t)?, None)
            }
            Unit::Weekday(day) => {
                let (from, t) = self.series_from(date, time)?;
                (Frequency::Week, self.weekly_start(from, day, t)?, None)
            }
            Unit::Fixed(Frequency::Month) => {
                let month_day = match date {
                    Some(DateExpr::DayOfMonth(d)) | Some(DateExpr::Calendar { day: d, .. }) => d,
                    _ => self.today().day(),
                };
                let (from, t) = self.series_from(date, time)?;
                let first_of_month = from
                    .with_day(1)
                    .ok_or_else(|| ParseError::unparseable("date out of range"))?;
                let base = self.at(first_of_month, t)?;
                let start = (0..3)
                    .filter_map(|k| add_months_clamped(base, k, month_day))
                    .find(|c| c.date_naive() >= from && *c >= self.local)
                    .ok_or_else(|| ParseError::unparseable("no matching day of month"))?;
                (Frequency::Month, start, u8::try_from(month_day).ok())
            }
        };

        let mut rule = RecurrenceRule::new(frequency, interval, start);
        if let Some(day) = month_day {
            rule = rule.with_month_day(day);
        }
        if let Some(end) = end {
            if let EndCondition::Until { at } = &end {
                if *at < start {
                    return Err(ParseError::past("the series ends before its first occurrence"));
                }
            }
            rule = rule.with_end(end);
        }
        rule.validate().map_err(ParseError::unparseable)?;

        Ok(TimeSpec::Recurring {
            rule,
            anchor: self.local,
        })
    }

    /// End of a series: the named day, inclusive to its last second.
    fn until(&self, expr: DateExpr) -> Result<DateTime<FixedOffset>> {
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)
            .ok_or_else(|| ParseError::unparseable("end of day"))?;
        let (day, t) = self.resolve_date(expr, Some(end_of_day))?;
        self.at(day, t)
    }

    fn weekly_start(
        &self,
        from: NaiveDate,
        day: Weekday,
        t: NaiveTime,
    ) -> Result<DateTime<FixedOffset>> {
        let ahead = days_until(from.weekday(), day);
        let first = self.at(self.shift(from, ahead)?, t)?;
        if first < self.local {
            self.at(self.shift(from, ahead + 7)?, t)
        } else {
            Ok(first)
        }
    }

    /// First calendar day a day/week/month series may use, and its time.
    fn series_from(
        &self,
        date: Option<DateExpr>,
        time: Option<NaiveTime>,
    ) -> Result<(NaiveDate, NaiveTime)> {
        let Some(expr) = date else {
            let t = match time {
                Some(t) => t,
                None => self.hour(self.config.date_hour)?,
            };
            return Ok((self.today(), t));
        };
        let (day, t) = self.resolve_date(expr, time)?;
        if day < self.today() {
            return Err(ParseError::past("the series would start in the past"));
        }
        Ok((day, t))
    }

    fn resolve_date(
        &self,
        expr: DateExpr,
        time: Option<NaiveTime>,
    ) -> Result<(NaiveDate, NaiveTime)> {
        let today = self.today();
        let or_default = |hour: u32| match time {
            Some(t) => Ok(t),
            None => self.hour(hour),
        };

        match expr {
            DateExpr::Today => Ok((today, or_default(self.config.today_hour)?)),
            DateExpr::Tonight => Ok((today, or_default(self.config.tonight_hour)?)),
            DateExpr::Tomorrow => Ok((self.shift(today, 1)?, or_default(self.config.tomorrow_hour)?)),
            DateExpr::Yesterday => {
                let day = today
                    .pred_opt()
                    .ok_or_else(|| ParseError::unparseable("date out of range"))?;
                Ok((day, or_default(self.config.date_hour)?))
            }
            DateExpr::Weekday { day, next } => {
                let t = or_default(self.config.date_hour)?;
                let mut ahead = days_until(today.weekday(), day);
                // Today only counts while the time is still ahead.
                if ahead == 0 && (next || self.at(today, t)? < self.local) {
                    ahead = 7;
                }
                Ok((self.shift(today, ahead)?, t))
            }
            DateExpr::Calendar {
                year,
                month,
                day,
                time: embedded,
            } => {
                let t = match embedded.or(time) {
                    Some(t) => t,
                    None => self.hour(self.config.date_hour)?,
                };
                let date = match year {
                    Some(y) => NaiveDate::from_ymd_opt(y, month, day),
                    // Without a year, the next time that date and time come round.
                    None => (today.year()..=today.year() + 8)
                        .filter_map(|y| NaiveDate::from_ymd_opt(y, month, day))
                        .find(|d| *d > today || (*d == today && self.still_ahead(today, t))),
                }
                .ok_or_else(|| {
                    ParseError::unparseable(format!("there is no day {day} in month {month}"))
                })?;
                Ok((date, t))
            }
            DateExpr::DayOfMonth(day) => {
                let t = or_default(self.config.date_hour)?;
                let this_month = clamped_date(today.year(), today.month(), day)?;
                if this_month > today || (this_month == today && self.still_ahead(today, t)) {
                    return Ok((this_month, t));
                }
                let (y, m) = if today.month() == 12 {
                    (today.year() + 1, 1)
                } else {
                    (today.year(), today.month() + 1)
                };
                Ok((clamped_date(y, m, day)?, t))
            }
        }
    }

    fn check_not_past(&self, at: DateTime<FixedOffset>) -> Result<()> {
        let earliest = Duration::try_seconds(self.config.grace_window_secs.max(0))
            .and_then(|grace| self.reference.checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if at.with_timezone(&Utc) < earliest {
            return Err(ParseError::past(format!(
                "{} is before {}",
                at.to_rfc3339(),
                self.local.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Whether `t` on `day` is not yet behind the reference instant.
    fn still_ahead(&self, day: NaiveDate, t: NaiveTime) -> bool {
        self.at(day, t).is_ok_and(|at| at >= self.local)
    }

    fn today(&self) -> NaiveDate {
        self.local.date_naive()
    }

    fn shift(&self, day: NaiveDate, days: u32) -> Result<NaiveDate> {
        day.checked_add_days(Days::new(u64::from(days)))
            .ok_or_else(|| ParseError::unparseable("date out of range"))
    }

    fn hour(&self, hour: u32) -> Result<NaiveTime> {
        NaiveTime::from_hms_opt(hour, 0, 0).ok_or_else(|| {
            ParseError::unparseable(format!("configured default hour {hour} is out of range"))
        })
    }

    fn at(&self, day: NaiveDate, time: NaiveTime) -> Result<DateTime<FixedOffset>> {
        self.local
            .offset()
            .from_local_datetime(&day.and_time(time))
            .single()
            .ok_or_else(|| ParseError::unparseable("instant out of range"))
    }
}

fn days_until(from: Weekday, to: Weekday) -> u32 {
    (7 + to.num_days_from_monday() - from.num_days_from_monday()) % 7
}

fn clamped_date(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    days_in_month(year, month)
        .and_then(|last| NaiveDate::from_ymd_opt(year, month, day.min(last)))
        .ok_or_else(|| ParseError::unparseable("date out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorReason;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn r(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn absolute(text: &str, reference: DateTime<Utc>) -> DateTime<Utc> {
        match parse(text, reference, utc()).unwrap() {
            TimeSpec::Absolute { at } => at.with_timezone(&Utc),
            other => panic!("{text:?} gave {other:?}"),
        }
    }

    fn rule(text: &str, reference: DateTime<Utc>) -> RecurrenceRule {
        match parse(text, reference, utc()).unwrap() {
            TimeSpec::Recurring { rule, .. } => rule,
            other => panic!("{text:?} gave {other:?}"),
        }
    }

    fn reason(text: &str, reference: DateTime<Utc>) -> ParseErrorReason {
        parse(text, reference, utc()).unwrap_err().reason
    }

    #[test]
    fn in_ten_minutes_resolves_immediately() {
        let text = "remind me in 10 minutes to call Alex";
        let parsed = Parser::default()
            .parse_expression(text, r(2024, 1, 1, 10, 0), utc())
            .unwrap();
        assert_eq!(
            parsed.spec,
            TimeSpec::Absolute {
                at: r(2024, 1, 1, 10, 10).fixed_offset()
            }
        );
        assert_eq!(parsed.spans.len(), 1);
        assert_eq!(&text[parsed.spans[0].clone()], "in 10 minutes");
    }

    #[test]
    fn every_monday_at_nine() {
        let text = "every Monday at 9am standup";
        let parsed = Parser::default()
            .parse_expression(text, r(2024, 1, 3, 8, 0), utc())
            .unwrap();
        let TimeSpec::Recurring { rule, anchor } = parsed.spec else {
            panic!("expected a recurrence");
        };
        assert_eq!(rule.frequency, Frequency::Week);
        assert_eq!(rule.interval, 1);
        assert_eq!(rule.start, r(2024, 1, 8, 9, 0).fixed_offset());
        assert_eq!(rule.start.weekday(), Weekday::Mon);
        assert_eq!(anchor, r(2024, 1, 3, 8, 0).fixed_offset());

        let stripped: Vec<&str> = parsed.spans.iter().map(|s| &text[s.clone()]).collect();
        assert_eq!(stripped, ["every Monday", "at 9am"]);
    }

    #[test]
    fn parsing_is_deterministic() {
        let reference = r(2024, 5, 17, 13, 37);
        for text in [
            "tomorrow at 5pm",
            "every other friday at 18:30",
            "in 3 weeks",
            "every month on the 31st 4 times",
        ] {
            assert_eq!(
                parse(text, reference, utc()).unwrap(),
                parse(text, reference, utc()).unwrap()
            );
        }
    }

    #[test]
    fn yesterday_is_in_the_past() {
        assert_eq!(
            reason("yesterday at 5pm", r(2024, 1, 3, 8, 0)),
            ParseErrorReason::PastInstant
        );
        assert_eq!(
            reason("2023-12-01 call the bank", r(2024, 1, 3, 8, 0)),
            ParseErrorReason::PastInstant
        );
    }

    #[test]
    fn grace_window_tolerates_just_missed_instants() {
        let reference = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 30).unwrap();
        assert_eq!(absolute("today at 10:00", reference), r(2024, 1, 1, 10, 0));
        assert_eq!(reason("today at 9:58", reference), ParseErrorReason::PastInstant);
    }

    #[test]
    fn slash_dates_must_be_unambiguous() {
        let reference = r(2024, 1, 1, 10, 0);
        assert_eq!(reason("pay rent 3/4", reference), ParseErrorReason::AmbiguousDate);
        assert_eq!(absolute("pay rent 13/4", reference), r(2024, 4, 13, 9, 0));
        assert_eq!(absolute("pay rent 4/13", reference), r(2024, 4, 13, 9, 0));
        assert_eq!(absolute("pay rent 5/5", reference), r(2024, 5, 5, 9, 0));
        assert_eq!(reason("pay rent 0/5", reference), ParseErrorReason::Unparseable);
        assert_eq!(reason("pay rent 5/0", reference), ParseErrorReason::Unparseable);
    }

    #[test]
    fn conflicting_expressions_are_ambiguous() {
        let reference = r(2024, 1, 1, 10, 0);
        assert_eq!(
            reason("tomorrow at 5pm or at 6pm", reference),
            ParseErrorReason::AmbiguousDate
        );
        assert_eq!(
            reason("friday or saturday", reference),
            ParseErrorReason::AmbiguousDate
        );
        assert_eq!(
            reason("in 2 days on friday", reference),
            ParseErrorReason::AmbiguousDate
        );
        // Repeating the same expression is not a conflict.
        assert_eq!(
            absolute("tomorrow, yes tomorrow", reference),
            r(2024, 1, 2, 9, 0)
        );
    }

    #[test]
    fn named_days_use_default_hours() {
        let reference = r(2024, 1, 1, 10, 0);
        assert_eq!(absolute("today", reference), r(2024, 1, 1, 17, 0));
        assert_eq!(absolute("tonight", reference), r(2024, 1, 1, 20, 0));
        assert_eq!(absolute("tomorrow", reference), r(2024, 1, 2, 9, 0));
        assert_eq!(absolute("tomorrow at noon", reference), r(2024, 1, 2, 12, 0));
    }

    #[test]
    fn default_hours_follow_config() {
        let parser = Parser::new(ParserConfig {
            tomorrow_hour: 7,
            ..ParserConfig::default()
        });
        let spec = parser.parse("tomorrow", r(2024, 1, 1, 10, 0), utc()).unwrap();
        assert_eq!(
            spec,
            TimeSpec::Absolute {
                at: r(2024, 1, 2, 7, 0).fixed_offset()
            }
        );
    }

    #[test]
    fn bare_time_rolls_to_tomorrow_once_passed() {
        let reference = r(2024, 1, 1, 10, 0);
        assert_eq!(absolute("at 9am", reference), r(2024, 1, 2, 9, 0));
        assert_eq!(absolute("5:30 pm", reference), r(2024, 1, 1, 17, 30));
        assert_eq!(absolute("at 14", reference), r(2024, 1, 1, 14, 0));
        assert_eq!(absolute("midnight", reference), r(2024, 1, 2, 0, 0));
    }

    #[test]
    fn weekdays() {
        // 2024-01-08 is a Monday.
        assert_eq!(absolute("monday", r(2024, 1, 8, 8, 0)), r(2024, 1, 8, 9, 0));
        assert_eq!(absolute("monday", r(2024, 1, 8, 10, 0)), r(2024, 1, 15, 9, 0));
        assert_eq!(absolute("next monday", r(2024, 1, 8, 8, 0)), r(2024, 1, 15, 9, 0));
        assert_eq!(absolute("on fri at 4pm", r(2024, 1, 8, 8, 0)), r(2024, 1, 12, 16, 0));
    }

    #[test]
    fn calendar_dates() {
        let reference = r(2024, 1, 1, 10, 0);
        assert_eq!(absolute("on March 3rd at 5pm", reference), r(2024, 3, 3, 17, 0));
        assert_eq!(absolute("3 march 2025", reference), r(2025, 3, 3, 9, 0));
        assert_eq!(absolute("2024-03-03 17:00", reference), r(2024, 3, 3, 17, 0));
        assert_eq!(absolute("2024-03-03T08:15", reference), r(2024, 3, 3, 8, 15));
        // No year and already gone this year: next year.
        assert_eq!(absolute("jan 1", r(2024, 6, 1, 10, 0)), r(2025, 1, 1, 9, 0));
        assert_eq!(reason("2024-02-30", reference), ParseErrorReason::Unparseable);
    }

    #[test]
    fn todays_date_after_its_time_rolls_forward() {
        // Sunday 2024-03-03, 18:00.
        let reference = r(2024, 3, 3, 18, 0);
        assert_eq!(absolute("march 3 at 5pm", reference), r(2025, 3, 3, 17, 0));
        assert_eq!(absolute("on the 3rd", reference), r(2024, 4, 3, 9, 0));
        assert_eq!(absolute("sunday", reference), r(2024, 3, 10, 9, 0));
        // Still ahead today: kept.
        assert_eq!(absolute("march 3 at 7pm", reference), r(2024, 3, 3, 19, 0));
        assert_eq!(absolute("on the 3rd at 9pm", reference), r(2024, 3, 3, 21, 0));
        // An explicit year is taken literally.
        assert_eq!(
            reason("march 3 2024 at 5pm", reference),
            ParseErrorReason::PastInstant
        );
    }

    #[test]
    fn relative_offsets() {
        let reference = r(2024, 1, 31, 10, 0);
        assert_eq!(absolute("in half an hour", reference), r(2024, 1, 31, 10, 30));
        assert_eq!(absolute("in an hour", reference), r(2024, 1, 31, 11, 0));
        assert_eq!(absolute("in 2 days", reference), r(2024, 2, 2, 10, 0));
        assert_eq!(absolute("in 2 days at 8am", reference), r(2024, 2, 2, 8, 0));
        // Calendar months clamp to the month length.
        assert_eq!(absolute("in 1 month", reference), r(2024, 2, 29, 10, 0));
    }

    #[test]
    fn offsets_respect_the_callers_timezone() {
        let plus2 = FixedOffset::east_opt(2 * 3600).unwrap();
        let spec = parse("tomorrow at 9am", r(2024, 1, 1, 10, 0), plus2).unwrap();
        let TimeSpec::Absolute { at } = spec else {
            panic!("expected absolute");
        };
        assert_eq!(at.offset(), &plus2);
        assert_eq!(at.with_timezone(&Utc), r(2024, 1, 2, 7, 0));
    }

    #[test]
    fn sub_daily_rules_start_one_interval_out() {
        let reference = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 42).unwrap();
        let every = rule("every 15 minutes", reference);
        assert_eq!(every.frequency, Frequency::Minute);
        assert_eq!(every.interval, 15);
        assert_eq!(every.start, r(2024, 1, 1, 10, 15).fixed_offset());

        let hourly = rule("hourly", reference);
        assert_eq!(hourly.start, r(2024, 1, 1, 11, 0).fixed_offset());
    }

    #[test]
    fn daily_and_weekly_rules() {
        let reference = r(2024, 1, 3, 8, 0);
        let daily = rule("daily at 7:30", reference);
        assert_eq!(daily.frequency, Frequency::Day);
        assert_eq!(daily.start, r(2024, 1, 4, 7, 30).fixed_offset());

        let other = rule("every other friday", reference);
        assert_eq!(other.frequency, Frequency::Week);
        assert_eq!(other.interval, 2);
        assert_eq!(other.start, r(2024, 1, 5, 9, 0).fixed_offset());

        let weekly = rule("weekly on tuesday at 6pm", reference);
        assert_eq!(weekly.start, r(2024, 1, 9, 18, 0).fixed_offset());
    }

    #[test]
    fn monthly_rule_on_the_31st_clamps() {
        let rule = rule("every month on the 31st", r(2024, 2, 15, 10, 0));
        assert_eq!(rule.frequency, Frequency::Month);
        assert_eq!(rule.month_day, Some(31));
        assert_eq!(rule.start, r(2024, 2, 29, 9, 0).fixed_offset());
    }

    #[test]
    fn end_conditions() {
        let reference = r(2024, 1, 1, 10, 0);
        assert_eq!(
            rule("every day at 8am 3 times", reference).end,
            Some(EndCondition::Count { count: 3 })
        );
        let until = rule("every day until jan 10", reference);
        assert_eq!(
            until.end,
            Some(EndCondition::Until {
                at: Utc
                    .with_ymd_and_hms(2024, 1, 10, 23, 59, 59)
                    .unwrap()
                    .fixed_offset()
            })
        );
        assert_eq!(
            reason("every day 3 times until jan 10", reference),
            ParseErrorReason::AmbiguousDate
        );
    }

    #[test]
    fn unrecognised_text_is_unparseable() {
        let reference = r(2024, 1, 1, 10, 0);
        assert_eq!(reason("buy milk", reference), ParseErrorReason::Unparseable);
        assert_eq!(reason("at 25:00", reference), ParseErrorReason::Unparseable);
    }

    #[test]
    fn hashtags_are_not_dates() {
        let reference = r(2024, 1, 1, 10, 0);
        assert_eq!(absolute("standup #friday tomorrow", reference), r(2024, 1, 2, 9, 0));
    }
}
