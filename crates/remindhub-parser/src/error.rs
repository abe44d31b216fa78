use thiserror::Error;

/// Why a phrase could not be turned into a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorReason {
    /// No usable time expression, or one that names an impossible instant.
    Unparseable,
    /// The text admits more than one reading ("3/4", two different times).
    AmbiguousDate,
    /// The resolved instant is earlier than the reference minus the grace window.
    PastInstant,
}

impl ParseErrorReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unparseable => "UNPARSEABLE",
            Self::AmbiguousDate => "AMBIGUOUS_DATE",
            Self::PastInstant => "PAST_INSTANT",
        }
    }
}

impl std::fmt::Display for ParseErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unparseable => "unparseable",
            Self::AmbiguousDate => "ambiguous date",
            Self::PastInstant => "past instant",
        };
        write!(f, "{s}")
    }
}

/// Bad input, reported to the caller and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {detail}")]
pub struct ParseError {
    pub reason: ParseErrorReason,
    pub detail: String,
}

impl ParseError {
    pub fn unparseable(detail: impl Into<String>) -> Self {
        Self {
            reason: ParseErrorReason::Unparseable,
            detail: detail.into(),
        }
    }

    pub fn ambiguous(detail: impl Into<String>) -> Self {
        Self {
            reason: ParseErrorReason::AmbiguousDate,
            detail: detail.into(),
        }
    }

    pub fn past(detail: impl Into<String>) -> Self {
        Self {
            reason: ParseErrorReason::PastInstant,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;
