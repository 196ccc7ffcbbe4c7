//! Query string helpers for list and search endpoints.
//!
//! List endpoints take many optional filters. [`QueryParams`] collects only the
//! ones that are set, rendering timestamps as RFC 3339 so every client formats
//! time ranges the same way.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Display;

/// Builder for assembling query parameter pairs.
#[derive(Debug, Default, Clone)]
pub struct QueryParams {
    pairs: Vec<(&'static str, String)>,
}

impl QueryParams {
    /// Create a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Append a key/value pair when the value is present.
    pub fn push_opt<T>(&mut self, key: &'static str, value: Option<T>)
    where
        T: Display,
    {
        if let Some(value) = value {
            self.pairs.push((key, value.to_string()));
        }
    }

    /// Append a timestamp in RFC 3339 form (UTC, second precision).
    pub fn push_opt_time(&mut self, key: &'static str, value: Option<&DateTime<Utc>>) {
        if let Some(value) = value {
            self.pairs
                .push((key, value.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
    }

    /// Append a comma-joined list when it is non-empty.
    pub fn push_list<T>(&mut self, key: &'static str, values: &[T])
    where
        T: Display,
    {
        if values.is_empty() {
            return;
        }
        let joined = values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.pairs.push((key, joined));
    }

    /// Append a required key/value pair.
    pub fn push<T>(&mut self, key: &'static str, value: T)
    where
        T: Display,
    {
        self.pairs.push((key, value.to_string()));
    }

    /// Return the collected key/value pairs.
    #[must_use]
    pub fn into_pairs(self) -> Vec<(&'static str, String)> {
        self.pairs
    }

    /// Returns true if no parameters have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
