//! Decoding of date-derived version tokens.
//!
//! Tokens seen in the wild:
//!
//! | Shape               | Example            | Date          |
//! |---------------------|--------------------|---------------|
//! | `YYYYMMDD…`         | `2025061943687406` | 2025-06-19    |
//! | `YYMMDD…`           | `250612214398701`  | 2025-06-12    |
//! | four chars or fewer | `1210`             | none          |

use chrono::NaiveDate;
use tracing::debug;

/// Shape of a version token, in decoding priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionFormat {
    /// At least 8 chars starting with `19` or `20`
    Long,
    /// At least 6 chars starting with a digit
    Short,
    /// Four chars or fewer, never dated
    Tiny,
    /// Anything else
    Unknown,
}

impl VersionFormat {
    pub fn classify(token: &str) -> Self {
        let len = token.chars().count();
        if len >= 8 && (token.starts_with("19") || token.starts_with("20")) {
            VersionFormat::Long
        } else if len >= 6 && token.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            VersionFormat::Short
        } else if len <= 4 {
            VersionFormat::Tiny
        } else {
            VersionFormat::Unknown
        }
    }
}

/// Normalize a token to its 8-digit `YYYYMMDD` form, if it has one.
pub fn normalize_version_date(token: &str) -> Option<String> {
    let normalized = match VersionFormat::classify(token) {
        VersionFormat::Long => token.chars().take(8).collect::<String>(),
        VersionFormat::Short => {
            let yymmdd: String = token.chars().take(6).collect();
            let yy: u32 = yymmdd.get(..2)?.parse().ok()?;
            let century = if yy < 50 { "20" } else { "19" };
            format!("{century}{yymmdd}")
        }
        VersionFormat::Tiny | VersionFormat::Unknown => return None,
    };

    if normalized.len() == 8 && normalized.bytes().all(|b| b.is_ascii_digit()) {
        Some(normalized)
    } else {
        None
    }
}

/// Decode the calendar date encoded in a version token.
pub fn decode_version_date(token: &str) -> Option<NaiveDate> {
    let date = normalize_version_date(token)
        .and_then(|digits| NaiveDate::parse_from_str(&digits, "%Y%m%d").ok());
    debug!(token, ?date, "Decoded version token");
    date
}

/// Per-shape token counts over a set of entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionCensus {
    pub long: usize,
    pub short: usize,
    pub tiny: usize,
    pub unknown: usize,
}

impl VersionCensus {
    pub fn record(&mut self, token: &str) {
        match VersionFormat::classify(token) {
            VersionFormat::Long => self.long += 1,
            VersionFormat::Short => self.short += 1,
            VersionFormat::Tiny => self.tiny += 1,
            VersionFormat::Unknown => self.unknown += 1,
        }
    }
}

impl<'a> FromIterator<&'a str> for VersionCensus {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut census = VersionCensus::default();
        for token in iter {
            census.record(token);
        }
        census
    }
}
