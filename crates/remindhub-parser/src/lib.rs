//! `remindhub-parser`: turns freeform reminder text into schedulable records.
//!
//! Two stages:
//!
//! 1. [`Parser`] finds the time phrase(s) in English text and resolves them
//!    against a reference instant and UTC offset into a
//!    [`TimeSpec`](remindhub_core::TimeSpec).
//! 2. [`normalize`] strips those phrases (and the "remind me to" noise) from
//!    the text, reads `#hashtags`, and builds a Pending
//!    [`Reminder`](remindhub_core::Reminder) with its first fire instant.
//!
//! [`interpret`] runs both.

pub mod error;
pub mod normalize;
pub mod parser;
mod patterns;

pub use error::{ParseError, ParseErrorReason, Result};
pub use normalize::{interpret, next_fire_at, normalize, normalize_with_id};
pub use parser::{parse, ParsedTime, Parser};
