//! Session values handed to and returned by the store.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Cookie settings attached to a session.
///
/// The serde form is the cookie's canonical form: only these settings are
/// stored. Derived values such as the remaining [`Cookie::max_age`] are
/// recomputed, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    /// Lifetime in milliseconds the cookie was issued with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_max_age: Option<i64>,

    /// Absolute expiry. `None` is a browser-session cookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,

    #[serde(default)]
    pub secure: bool,

    #[serde(default)]
    pub http_only: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expire `max_age_ms` milliseconds from now.
    pub fn with_max_age(mut self, max_age_ms: i64) -> Self {
        self.original_max_age = Some(max_age_ms);
        self.expires = Some(Utc::now() + Duration::milliseconds(max_age_ms));
        self
    }

    /// Expire at a fixed instant.
    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Remaining lifetime in milliseconds at `now`, if the cookie has an expiry.
    pub fn max_age(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires
            .map(|expires| (expires - now).num_milliseconds())
    }
}

/// A web session: optional cookie settings plus arbitrary JSON properties.
///
/// The `cookie` property name is reserved for [`Session::cookie`]; the
/// built-in serializers refuse sessions whose `data` contains it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Cookie>,

    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Builder form of [`Session::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a property, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a property decoded as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Number of properties, not counting the cookie.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
