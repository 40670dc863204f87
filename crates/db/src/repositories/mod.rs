//! Row codecs and compare-and-set persistence for the workshop entities.
//!
//! Every function takes a `&mut SqliteConnection` so callers decide the transaction
//! boundary: pass `&mut *tx` inside `pool.begin()`, or a pooled connection for reads.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::Row;
use thiserror::Error;

use taller_core::errors::{ApplicationError, DomainError};

pub mod part;
pub mod quote;
pub mod sequence;
pub mod service;
pub mod token;
pub mod work_order;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} {id} is no longer {expected}")]
    StaleState { entity: &'static str, id: i64, expected: &'static str },
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        let unique = error.as_database_error().is_some_and(|db| db.is_unique_violation());
        if unique {
            Self::UniqueViolation(error.to_string())
        } else {
            Self::Database(error)
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::StaleState { .. } => {
                ApplicationError::Domain(DomainError::InvalidState(error.to_string()))
            }
            RepositoryError::UniqueViolation(message) => ApplicationError::AlreadyExists(message),
            RepositoryError::Database(_) | RepositoryError::Decode(_) => {
                ApplicationError::Persistence(error.to_string())
            }
        }
    }
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(e.to_string()))
}

/// Fixed-width RFC3339 so that stored timestamps compare correctly as text.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(name: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{name}: `{value}`: {e}")))
}

pub(crate) fn timestamp_column(
    row: &SqliteRow,
    name: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = column(row, name)?;
    parse_timestamp(name, &raw)
}

pub(crate) fn optional_timestamp_column(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|value| parse_timestamp(name, &value)).transpose()
}

pub(crate) fn format_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

pub(crate) fn date_column(row: &SqliteRow, name: &str) -> Result<NaiveDate, RepositoryError> {
    let raw: String = column(row, name)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| RepositoryError::Decode(format!("{name}: `{raw}`: {e}")))
}

pub(crate) fn optional_date_column(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<NaiveDate>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|value| {
        NaiveDate::parse_from_str(&value, "%Y-%m-%d")
            .map_err(|e| RepositoryError::Decode(format!("{name}: `{value}`: {e}")))
    })
    .transpose()
}

pub(crate) fn decimal_column(row: &SqliteRow, name: &str) -> Result<Decimal, RepositoryError> {
    let raw: String = column(row, name)?;
    Decimal::from_str(&raw).map_err(|e| RepositoryError::Decode(format!("{name}: `{raw}`: {e}")))
}

pub(crate) fn optional_decimal_column(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<Decimal>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|value| {
        Decimal::from_str(&value)
            .map_err(|e| RepositoryError::Decode(format!("{name}: `{value}`: {e}")))
    })
    .transpose()
}

pub(crate) fn quantity_column(row: &SqliteRow, name: &str) -> Result<u32, RepositoryError> {
    let raw: i64 = column(row, name)?;
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("{name}: `{raw}` out of range")))
}

pub(crate) fn code_column<T>(
    row: &SqliteRow,
    name: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    let raw: String = column(row, name)?;
    parse(&raw).ok_or_else(|| RepositoryError::Decode(format!("{name}: unknown code `{raw}`")))
}

pub(crate) fn optional_code_column<T>(
    row: &SqliteRow,
    name: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|value| {
        parse(&value)
            .ok_or_else(|| RepositoryError::Decode(format!("{name}: unknown code `{value}`")))
    })
    .transpose()
}


#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use taller_core::errors::{ApplicationError, ErrorKind};

    use super::{format_timestamp, parse_timestamp, RepositoryError};

    #[test]
    fn timestamps_are_fixed_width_and_round_trip() {
        let early = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).single().expect("instant");
        let late = early + chrono::Duration::microseconds(1);

        let early_text = format_timestamp(early);
        let late_text = format_timestamp(late);
        assert_eq!(early_text, "2025-01-02T03:04:05.000000Z");
        assert!(early_text < late_text);
        assert_eq!(parse_timestamp("created_at", &late_text).expect("parse"), late);
    }

    #[test]
    fn stale_state_surfaces_as_invalid_state() {
        let error = ApplicationError::from(RepositoryError::StaleState {
            entity: "quote",
            id: 4,
            expected: "ENVIADO",
        });
        assert_eq!(error.kind(), ErrorKind::InvalidState);

        let duplicate = ApplicationError::from(RepositoryError::UniqueViolation("number".into()));
        assert_eq!(duplicate.kind(), ErrorKind::AlreadyExists);
    }
}
