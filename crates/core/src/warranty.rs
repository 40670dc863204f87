use chrono::{DateTime, Duration, Utc};

use crate::domain::service::{Service, ServiceStatus};
use crate::errors::DomainError;

pub const WARRANTY_WINDOW_DAYS: i64 = 90;

/// True while `now` is strictly before the end of the warranty window that opened when
/// the equipment was handed back.
pub fn is_within_window(returned_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    returned_at + Duration::days(WARRANTY_WINDOW_DAYS) > now
}

/// Checks that `original` can back a warranty claim raised at `now`.
pub fn check_original(original: &Service, now: DateTime<Utc>) -> Result<bool, DomainError> {
    if original.status != ServiceStatus::Finished {
        return Err(DomainError::InvalidState(format!(
            "service {} is {} and cannot back a warranty claim",
            original.number,
            original.status.as_str()
        )));
    }
    let returned_at = original.actual_return_at.ok_or_else(|| {
        DomainError::InvariantViolation(format!(
            "finished service {} has no return date",
            original.number
        ))
    })?;
    Ok(is_within_window(returned_at, now))
}
