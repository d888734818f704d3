//! Absolute expiry computation and lazy staleness checks.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::session::Session;

/// Computes record expiry from a session's cookie or a default lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    default_ttl: Duration,
}

impl ExpirationPolicy {
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Expiry in epoch milliseconds: the cookie's `expires` when set,
    /// otherwise `now` plus the default lifetime.
    pub fn compute_expiry(&self, session: &Session, now: DateTime<Utc>) -> i64 {
        if let Some(expires) = session.cookie.as_ref().and_then(|c| c.expires) {
            return expires.timestamp_millis();
        }
        let ttl = i64::try_from(self.default_ttl.as_millis()).unwrap_or(i64::MAX);
        now.timestamp_millis().saturating_add(ttl)
    }

    /// A record without an expiry never expires.
    pub fn is_expired(expires: Option<i64>, now: DateTime<Utc>) -> bool {
        expires.is_some_and(|expires| now.timestamp_millis() >= expires)
    }
}
