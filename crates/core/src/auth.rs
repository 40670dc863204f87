//! Caller identity as handed over by the external authentication layer.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ApplicationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Technician,
    Receptionist,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub role: Role,
    pub employee_id: i64,
}

impl Principal {
    pub fn require_any(&self, roles: &[Role]) -> Result<(), ApplicationError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(ApplicationError::Unauthorized(format!(
                "{} ({:?}) may not perform this operation",
                self.username, self.role
            )))
        }
    }
}

/// A verified session as produced by the authentication layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionClaims {
    pub session_id: String,
    pub principal: Principal,
    pub expires_at: DateTime<Utc>,
}

/// Sessions revoked before their natural expiry.
///
/// An entry only lives until the session it names would have expired anyway, and the
/// store never holds more than `capacity` entries; when full, the entry closest to
/// expiry is dropped first.
pub struct SessionRevocations {
    capacity: usize,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SessionRevocations {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: Mutex::new(HashMap::new()) }
    }

    pub fn revoke(&self, session_id: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        if expires_at <= now {
            return;
        }
        self.with_entries(|entries| {
            entries.retain(|_, expiry| *expiry > now);
            if entries.len() >= self.capacity && !entries.contains_key(session_id) {
                let soonest =
                    entries.iter().min_by_key(|(_, expiry)| **expiry).map(|(id, _)| id.clone());
                if let Some(soonest) = soonest {
                    entries.remove(&soonest);
                }
            }
            entries.insert(session_id.to_owned(), expires_at);
        });
    }

    pub fn is_revoked(&self, session_id: &str, now: DateTime<Utc>) -> bool {
        self.with_entries(|entries| entries.get(session_id).is_some_and(|expiry| *expiry > now))
    }

    /// Drops entries whose session has expired. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|_, expiry| *expiry > now);
            before - entries.len()
        })
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accepts `claims` unless the session expired or was revoked.
    pub fn authenticate(
        &self,
        claims: &SessionClaims,
        now: DateTime<Utc>,
    ) -> Result<Principal, ApplicationError> {
        if claims.expires_at <= now {
            return Err(ApplicationError::Unauthorized("session expired".to_owned()));
        }
        if self.is_revoked(&claims.session_id, now) {
            return Err(ApplicationError::Unauthorized("session revoked".to_owned()));
        }
        Ok(claims.principal.clone())
    }

    fn with_entries<T>(&self, apply: impl FnOnce(&mut HashMap<String, DateTime<Utc>>) -> T) -> T {
        match self.entries.lock() {
            Ok(mut entries) => apply(&mut entries),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }
}

impl Default for SessionRevocations {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Principal, Role, SessionClaims, SessionRevocations};
    use crate::errors::ApplicationError;

    fn claims(session_id: &str, ttl: Duration) -> SessionClaims {
        SessionClaims {
            session_id: session_id.to_owned(),
            principal: Principal {
                username: "mostrador".to_owned(),
                role: Role::Receptionist,
                employee_id: 4,
            },
            expires_at: Utc::now() + ttl,
        }
    }

    #[test]
    fn revoked_session_is_rejected_until_it_expires() {
        let store = SessionRevocations::default();
        let now = Utc::now();
        let session = claims("s-1", Duration::hours(1));

        assert!(store.authenticate(&session, now).is_ok());
        store.revoke("s-1", session.expires_at, now);
        assert!(matches!(
            store.authenticate(&session, now),
            Err(ApplicationError::Unauthorized(_))
        ));

        let later = now + Duration::hours(2);
        assert!(!store.is_revoked("s-1", later));
        assert_eq!(store.prune(later), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn store_is_bounded_and_evicts_the_soonest_expiry() {
        let store = SessionRevocations::new(2);
        let now = Utc::now();

        store.revoke("short", now + Duration::minutes(5), now);
        store.revoke("long", now + Duration::hours(5), now);
        store.revoke("newest", now + Duration::hours(1), now);

        assert_eq!(store.len(), 2);
        assert!(!store.is_revoked("short", now));
        assert!(store.is_revoked("long", now));
        assert!(store.is_revoked("newest", now));
    }

    #[test]
    fn already_expired_sessions_are_not_stored() {
        let store = SessionRevocations::new(4);
        let now = Utc::now();
        store.revoke("gone", now - Duration::seconds(1), now);
        assert!(store.is_empty());
    }

    #[test]
    fn role_checks_name_the_caller() {
        let principal =
            Principal { username: "tecnico".to_owned(), role: Role::Technician, employee_id: 9 };
        assert!(principal.require_any(&[Role::Technician, Role::Admin]).is_ok());
        let error = principal.require_any(&[Role::Admin]).expect_err("admin only");
        assert!(error.to_string().contains("tecnico"));
    }
}
