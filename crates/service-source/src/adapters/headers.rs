//! Header extraction for quoted `'key:value'` header lists.
//!
//! Accepts strings such as `'name:John', 'age:23'`. Entries are comma
//! separated, optionally wrapped in single or double quotes, and split on the
//! first `:`. [`render_metadata`] produces the same format from the metadata
//! of an inbound call.

use crate::domain::error::HeaderError;
use crate::ports::HeaderExtractor;
use axum::http::HeaderMap;
use std::collections::HashMap;

/// Render call metadata as a quoted header list.
///
/// Values that are not visible ASCII or that contain a `,` cannot be
/// represented and are left out.
pub fn render_metadata(metadata: &HeaderMap) -> String {
    metadata
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            if value.contains(',') {
                return None;
            }
            Some(format!("'{}:{}'", name.as_str(), value))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Default [`HeaderExtractor`] for quoted header lists
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotedHeaderExtractor;

impl QuotedHeaderExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Parse the header string into key/value pairs. Later keys win.
    pub fn parse(headers: &str) -> Result<HashMap<String, String>, HeaderError> {
        let mut parsed = HashMap::new();
        for raw in headers.split(',') {
            let entry = unquote(raw.trim());
            if entry.is_empty() {
                continue;
            }
            let (key, value) = entry
                .split_once(':')
                .ok_or_else(|| HeaderError::Malformed(entry.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(HeaderError::Malformed(entry.to_string()));
            }
            parsed.insert(key.to_string(), value.trim().to_string());
        }
        Ok(parsed)
    }
}

impl HeaderExtractor for QuotedHeaderExtractor {
    fn extract(&self, headers: &str, requested: &[String]) -> Result<Vec<String>, HeaderError> {
        let parsed = Self::parse(headers)?;
        requested
            .iter()
            .map(|name| {
                parsed
                    .get(name)
                    .cloned()
                    .ok_or_else(|| HeaderError::MissingProperty(name.clone()))
            })
            .collect()
    }
}

fn unquote(entry: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = entry
            .strip_prefix(quote)
            .and_then(|e| e.strip_suffix(quote))
        {
            return inner.trim();
        }
    }
    entry
}
