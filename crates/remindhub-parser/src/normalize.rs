use std::ops::Range;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use remindhub_core::config::ParserConfig;
use remindhub_core::{OwnerId, Priority, Reminder, ReminderId, TimeSpec};
use remindhub_scheduler::schedule::{first_occurrence, NextOccurrence};
use tracing::debug;

use crate::error::{ParseError, Result};
use crate::parser::{ParsedTime, Parser};

static HASHTAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\w+)").expect("static pattern compiles"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static pattern compiles"));
static LEAD_IN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:please\s+)?remind\s+me\s*(?:(?:to|that|about|of)\b\s*)?")
        .expect("static pattern compiles")
});
static PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:task|todo|reminder)\s*:\s*").expect("static pattern compiles")
});
static LEADING_CONNECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:to|by|at|on|about)\b\s*").expect("static pattern compiles")
});
static TRAILING_CONNECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*\b(?:to|by|at|on|in|until|from|every|and|starting)$")
        .expect("static pattern compiles")
});

const EDGE_PUNCTUATION: &[char] = &[' ', ',', ';', ':', '-', '.', '!'];

/// Build a Pending reminder from the original text and its parsed time.
///
/// Pure apart from id generation; storing the result is the caller's job.
pub fn normalize(text: &str, parsed: &ParsedTime, owner: OwnerId) -> Result<Reminder> {
    normalize_with_id(ReminderId::new(), text, parsed, owner)
}

/// [`normalize`] with a caller-supplied id, for idempotent replays.
pub fn normalize_with_id(
    id: ReminderId,
    text: &str,
    parsed: &ParsedTime,
    owner: OwnerId,
) -> Result<Reminder> {
    let next = next_fire_at(&parsed.spec)?;
    let cleaned = clean_subject(text, &parsed.spans);

    let mut reminder = Reminder::pending(
        id,
        owner,
        cleaned.subject,
        parsed.spec.clone(),
        next,
        parsed.reference,
    );
    reminder.priority = cleaned.priority;
    reminder.tags = cleaned.tags;
    debug!(reminder_id = %reminder.id, next_fire_at = %next, "reminder normalized");
    Ok(reminder)
}

/// Parse `text` and normalize it in one step.
pub fn interpret(
    text: &str,
    reference: DateTime<Utc>,
    tz: FixedOffset,
    owner: OwnerId,
    config: &ParserConfig,
) -> Result<Reminder> {
    let parsed = Parser::new(config.clone()).parse_expression(text, reference, tz)?;
    normalize(text, &parsed, owner)
}

/// First instant a spec should fire.
///
/// Recurring specs fire at the rule's first occurrence at or after their
/// anchor; a rule already exhausted there is rejected as past.
pub fn next_fire_at(spec: &TimeSpec) -> Result<DateTime<Utc>> {
    match spec {
        TimeSpec::Absolute { at } => Ok(at.with_timezone(&Utc)),
        TimeSpec::Relative {
            anchor,
            offset_secs,
        } => Duration::try_seconds(*offset_secs)
            .and_then(|offset| anchor.checked_add_signed(offset))
            .map(|at| at.with_timezone(&Utc))
            .ok_or_else(|| ParseError::unparseable("relative offset is out of range")),
        TimeSpec::Recurring { rule, anchor } => {
            rule.validate().map_err(ParseError::unparseable)?;
            match first_occurrence(rule, anchor.with_timezone(&Utc)) {
                NextOccurrence::At(at) => Ok(at),
                NextOccurrence::Exhausted => Err(ParseError::past(
                    "the recurrence has no occurrence after its anchor",
                )),
            }
        }
    }
}

struct Subject {
    subject: String,
    priority: Priority,
    tags: Vec<String>,
}

fn clean_subject(text: &str, spans: &[Range<usize>]) -> Subject {
    let mut remaining = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in spans {
        // Spans from a different text are ignored rather than trusted.
        let (Some(before), Some(_)) = (text.get(cursor..span.start), text.get(span.clone())) else {
            continue;
        };
        remaining.push_str(before);
        remaining.push(' ');
        cursor = span.end;
    }
    remaining.push_str(text.get(cursor..).unwrap_or_default());

    let mut priority = Priority::default();
    let mut tags: Vec<String> = Vec::new();
    for caps in HASHTAG.captures_iter(&remaining) {
        let tag = &caps[1];
        match tag.to_ascii_lowercase().parse::<Priority>() {
            Ok(p) => priority = p,
            Err(_) if !tags.iter().any(|t| t == tag) => tags.push(tag.to_string()),
            Err(_) => {}
        }
    }

    let mut subject = collapse(&HASHTAG.replace_all(&remaining, " "));
    loop {
        let before = subject.clone();
        subject = subject.trim_matches(EDGE_PUNCTUATION).to_string();
        subject = LEAD_IN.replace(&subject, "").into_owned();
        subject = PREFIX.replace(&subject, "").into_owned();
        subject = LEADING_CONNECTOR.replace(&subject, "").into_owned();
        subject = TRAILING_CONNECTOR.replace(&subject, "").into_owned();
        if subject == before {
            break;
        }
    }

    if subject.is_empty() {
        // Nothing but the time phrase: keep what the user wrote.
        subject = collapse(&HASHTAG.replace_all(text, " "));
        if subject.is_empty() {
            subject = "reminder".to_string();
        }
    }

    Subject {
        subject,
        priority,
        tags,
    }
}

fn collapse(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}
