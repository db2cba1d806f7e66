//! Request start/end bookkeeping and request metadata.

use crate::error::ProfResult;
use crate::store::{ProfileStore, RequestRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request headers with case-insensitive keys.
///
/// Keys are ASCII-lowercased on every insert and lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

fn normalize(key: &str) -> String {
    key.to_ascii_lowercase()
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, returning the previous value for the same key.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) -> Option<String> {
        self.entries.insert(normalize(key), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&normalize(key)).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize(key))
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(&normalize(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }

    /// Encode as a JSON object.
    pub fn to_json(&self) -> ProfResult<String> {
        Ok(serde_json::to_string(&self.entries)?)
    }

    /// Decode a JSON object. An empty string decodes to no headers.
    pub fn from_json(encoded: &str) -> ProfResult<Self> {
        if encoded.trim().is_empty() {
            return Ok(Self::new());
        }
        let raw: BTreeMap<String, String> = serde_json::from_str(encoded)?;
        Ok(raw.into())
    }
}

impl From<BTreeMap<String, String>> for Headers {
    fn from(raw: BTreeMap<String, String>) -> Self {
        raw.into_iter().collect()
    }
}

impl From<Headers> for BTreeMap<String, String> {
    fn from(headers: Headers) -> Self {
        headers.entries
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k.as_ref(), v);
        }
        headers
    }
}

/// What the recorder captures about an incoming request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestInfo {
    pub path: String,
    pub method: String,
    /// Raw query string, without the leading `?`.
    pub query_params: String,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
    /// Body exactly as received.
    pub raw_body: Vec<u8>,
    pub view_name: Option<String>,
    pub headers: Headers,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_params = query.into();
        self
    }

    /// Set the body; `body` is the lossy UTF-8 decoding of `raw`.
    pub fn with_body(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.raw_body = raw.into();
        self.body = String::from_utf8_lossy(&self.raw_body).into_owned();
        self
    }

    pub fn with_view_name(mut self, view_name: impl Into<String>) -> Self {
        self.view_name = Some(view_name.into());
        self
    }

    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Whole milliseconds between `start` and `end`, truncated.
pub fn time_taken_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds()
}

/// Create the stored record for a request starting now.
pub async fn start_request(store: &dyn ProfileStore, info: RequestInfo) -> ProfResult<RequestRecord> {
    let mut record = RequestRecord::new(info.method, info.path);
    record.query_params = info.query_params;
    record.body = info.body;
    record.raw_body = String::from_utf8_lossy(&info.raw_body).into_owned();
    record.view_name = info.view_name;
    record.encoded_headers = info.headers.to_json()?;
    record.start_time = Utc::now();
    store.create_request(record).await
}

/// Stamp the end time and elapsed time, then persist the record.
pub async fn finish_request(
    store: &dyn ProfileStore,
    mut record: RequestRecord,
) -> ProfResult<RequestRecord> {
    let end = Utc::now();
    record.end_time = Some(end);
    record.time_taken_ms = Some(time_taken_ms(record.start_time, end));
    store.update_request(&record).await?;
    Ok(record)
}
