//! Internal message model.
//!
//! A `Message` is what producers send and consumers receive: an identifier,
//! a creation instant, an ordered header list and an opaque body. Header
//! names are compared ASCII case-insensitively, like HTTP headers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Header name carrying the message content type.
pub const CONTENT_TYPE: &str = "Content-Type";

/// Header name that is always recomputed from the destination URL.
pub const HOST: &str = "Host";

/// Ordered, case-insensitive header list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Get a header value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Set a header, replacing an existing value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Set a header only if it is not already present.
    ///
    /// Returns `true` if the value was inserted.
    pub fn put_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.entries.push((name, value.into()));
        true
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Keep only the headers for which the predicate returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.entries.retain(|(k, v)| keep(k, v));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// A message flowing through a producer or consumer.
#[derive(Debug, Clone)]
pub struct Message {
    id: String,
    created: DateTime<Utc>,
    headers: Headers,
    body: Bytes,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    /// Create an empty message with a fresh identifier.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created: Utc::now(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Create a message carrying the given body.
    pub fn with_body(body: impl Into<Bytes>) -> Self {
        let mut message = Self::new();
        message.body = body.into();
        message
    }

    /// Builder-style header setter.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Override the creation instant.
    pub fn created_at(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    /// Override the message identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// The content type header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)
    }
}
