//! Human-facing document numbers of the form `{PREFIX}{YY}-{NNNNN}`.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

pub const SEQUENCE_WIDTH: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Service,
    Quote,
    WorkOrder,
}

impl DocumentKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Service => "SRV",
            Self::Quote => "PRE",
            Self::WorkOrder => "ODT",
        }
    }

    /// The shared leading part of every number issued for this kind in `year`.
    pub fn pattern_prefix(&self, year: i32) -> String {
        format!("{}{:02}-", self.prefix(), year_suffix(year))
    }
}

pub fn year_suffix(year: i32) -> i32 {
    year.rem_euclid(100)
}

pub fn current_year(now: chrono::DateTime<chrono::Utc>) -> i32 {
    now.year()
}

/// Trailing sequence of `number` when it belongs to `kind` in `year`.
pub fn parse_sequence(kind: DocumentKind, year: i32, number: &str) -> Option<u32> {
    let suffix = number.strip_prefix(&kind.pattern_prefix(year))?;
    if suffix.is_empty() || !suffix.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

pub fn format_number(kind: DocumentKind, year: i32, sequence: u32) -> String {
    format!("{}{:0width$}", kind.pattern_prefix(year), sequence, width = SEQUENCE_WIDTH)
}

/// Next number after the highest one among `existing`. Numbers from other kinds or years
/// are ignored.
pub fn next_number<'a, I>(kind: DocumentKind, year: i32, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let highest = existing
        .into_iter()
        .filter_map(|number| parse_sequence(kind, year, number))
        .max()
        .unwrap_or(0);
    format_number(kind, year, highest + 1)
}

#[cfg(test)]
mod tests {
    use super::{format_number, next_number, parse_sequence, DocumentKind};

    #[test]
    fn first_number_of_the_year() {
        let existing: Vec<&str> = Vec::new();
        assert_eq!(next_number(DocumentKind::Service, 2025, existing), "SRV25-00001");
    }

    #[test]
    fn nth_number_follows_the_highest_suffix() {
        let existing = ["PRE25-00001", "PRE25-00007", "PRE25-00003"];
        assert_eq!(next_number(DocumentKind::Quote, 2025, existing), "PRE25-00008");
    }

    #[test]
    fn other_years_and_kinds_are_ignored() {
        let existing = ["ODT24-00099", "SRV25-00012", "ODT25-00002"];
        assert_eq!(next_number(DocumentKind::WorkOrder, 2025, existing), "ODT25-00003");
    }

    #[test]
    fn malformed_suffixes_do_not_count() {
        assert_eq!(parse_sequence(DocumentKind::Service, 2025, "SRV25-00abc"), None);
        assert_eq!(parse_sequence(DocumentKind::Service, 2025, "SRV25-"), None);
        assert_eq!(parse_sequence(DocumentKind::Service, 2025, "SRV25-00042"), Some(42));
    }

    #[test]
    fn sequence_grows_past_the_padding() {
        assert_eq!(format_number(DocumentKind::Quote, 2030, 123_456), "PRE30-123456");
        assert_eq!(format_number(DocumentKind::Quote, 2100, 1), "PRE00-00001");
    }
}
