//! Compiled phrase patterns. All of them run against ASCII-lowercased text,
//! so byte offsets line up with the caller's original string.

use chrono::Weekday;
use once_cell::sync::Lazy;
use regex::Regex;
use remindhub_core::Frequency;

const WEEKDAYS: &str =
    "monday|tuesday|wednesday|thursday|friday|saturday|sunday|tues|thurs|thur|mon|tue|wed|thu|fri|sat|sun";
const MONTHS: &str = "january|february|march|april|may|june|july|august|september|october|november|december|sept|jan|feb|mar|apr|jun|jul|aug|sep|oct|nov|dec";
const NUMBER: &str =
    r"\d+|an?|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|fifteen|twenty|thirty";
const UNITS: &str = "minutes|minute|mins|min|hours|hour|hrs|hr|days|day|weeks|week|months|month";

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

/// "in 20 minutes", "in an hour", "in half an hour".
pub static RELATIVE: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"\bin\s+(?:(half)\s+an?\s+hour|({NUMBER})\s+({UNITS}))\b"
    ))
});

/// "every 15 minutes", "every other friday", "every day", "every 2 mondays".
pub static EVERY: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"\bevery\s+(?:(other)\s+)?(?:({NUMBER})\s+)?({UNITS}|(?:{WEEKDAYS})s?)\b"
    ))
});

pub static SHORTHAND: Lazy<Regex> = Lazy::new(|| compile(r"\b(hourly|daily|weekly|monthly)\b"));

/// "3 times", "twice".
pub static COUNT: Lazy<Regex> =
    Lazy::new(|| compile(&format!(r"\b(?:({NUMBER})\s+times|(twice))\b")));

/// Introduces the end date of a series; the date itself is matched separately.
pub static UNTIL: Lazy<Regex> = Lazy::new(|| compile(r"\b(?:until|till)\s+"));

/// "2024-03-03", "2024-03-03 17:00", "2024-03-03t17:00".
pub static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    compile(r"\b(\d{4})-(\d{1,2})-(\d{1,2})(?:(?:t|\s+)(\d{1,2}):(\d{2}))?\b")
});

/// "3/4", "03/04/2025", "3/4/25".
pub static SLASH_DATE: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{4}|\d{2}))?\b"));

/// "march 3rd", "on mar 3, 2025".
pub static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"\b(?:on\s+)?({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?(?:,?\s+(\d{{4}}))?\b"
    ))
});

/// "3 march", "on the 3rd of march 2025".
pub static DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"\b(?:on\s+)?(?:the\s+)?(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTHS})\.?(?:,?\s+(\d{{4}}))?\b"
    ))
});

/// "on the 31st".
pub static ORDINAL_DAY: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(?:on\s+)?the\s+(\d{1,2})(?:st|nd|rd|th)\b"));

pub static NAMED_DAY: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(today|tonight|tomorrow|tmrw|yesterday)\b"));

/// "friday", "on friday", "next friday", "this friday".
pub static WEEKDAY: Lazy<Regex> =
    Lazy::new(|| compile(&format!(r"\b(?:(on|next|this)\s+)?({WEEKDAYS})\b")));

/// "5pm", "at 5:30 pm", "7 a.m."
pub static TIME_MERIDIEM: Lazy<Regex> = Lazy::new(|| {
    compile(r"\b(?:at\s+)?(\d{1,2})(?::(\d{2}))?\s*(am\b|pm\b|a\.m\.|p\.m\.)")
});

/// "17:45", "at 9:05".
pub static TIME_24H: Lazy<Regex> = Lazy::new(|| compile(r"\b(?:at\s+)?(\d{1,2}):(\d{2})\b"));

/// "at 9" (read as a 24-hour clock hour).
pub static TIME_BARE: Lazy<Regex> = Lazy::new(|| compile(r"\bat\s+(\d{1,2})\b"));

pub static TIME_OCLOCK: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(?:at\s+)?(\d{1,2})\s+o'?clock\b"));

pub static TIME_NAMED: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(?:at\s+)?(noon|midday|midnight)\b"));

/// Small cardinal numbers as digits or words; "a"/"an" count as one.
pub fn number(word: &str) -> Option<u32> {
    if let Ok(n) = word.parse() {
        return Some(n);
    }
    let n = match word {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "fifteen" => 15,
        "twenty" => 20,
        "thirty" => 30,
        _ => return None,
    };
    Some(n)
}

pub fn unit(word: &str) -> Option<Frequency> {
    let unit = match word {
        "minutes" | "minute" | "mins" | "min" => Frequency::Minute,
        "hours" | "hour" | "hrs" | "hr" => Frequency::Hour,
        "days" | "day" => Frequency::Day,
        "weeks" | "week" => Frequency::Week,
        "months" | "month" => Frequency::Month,
        _ => return None,
    };
    Some(unit)
}

pub fn weekday(word: &str) -> Option<Weekday> {
    let day = match word.get(..3)? {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(day)
}

pub fn month(word: &str) -> Option<u32> {
    let month = match word.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}
