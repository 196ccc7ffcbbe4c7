//! Strongly-typed identifier wrappers for DBaaS resources.
//!
//! The control plane hands out opaque string identifiers. Wrapping them keeps
//! a task id from being passed where a cluster id is expected. Identifiers are
//! spliced into request paths, so only URL-unreserved characters are accepted
//! and a dot-segment (`.`, `..`) is rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Macro to generate strongly-typed identifier wrapper types.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $doc:expr) => {
        $(#[$meta])*
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parses an identifier after trimming surrounding whitespace.
            ///
            /// # Errors
            ///
            /// Returns [`Error::InvalidId`] if the string is empty, is a
            /// dot-segment, or contains a character outside `[A-Za-z0-9-._~:]`.
            pub fn parse_str(input: &str) -> Result<Self> {
                let trimmed = input.trim();
                if trimmed.is_empty() {
                    return Err(Error::InvalidId(format!(
                        "{} must not be empty",
                        stringify!($name)
                    )));
                }
                if !is_path_safe(trimmed) {
                    return Err(Error::InvalidId(format!(
                        "{} `{trimmed}` is not a single path segment",
                        stringify!($name)
                    )));
                }
                Ok(Self(trimmed.to_string()))
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Converts into the inner string.
            #[must_use]
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                Self::parse_str(&value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(value: &str) -> Result<Self> {
                Self::parse_str(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse_str(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

fn is_path_safe(id: &str) -> bool {
    id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | ':'))
}

id_type!(ClusterId, "Database cluster identifier");
id_type!(TaskId, "Asynchronous task identifier");
id_type!(BackupId, "Backup identifier");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let id = ClusterId::parse_str("cl-123").unwrap();
        assert_eq!(id.as_str(), "cl-123");
        assert_eq!(id.to_string(), "cl-123");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let id = TaskId::parse_str("  t-1 \n").unwrap();
        assert_eq!(id.as_str(), "t-1");
    }

    #[test]
    fn test_parse_rejects_empty() {
        let err = TaskId::parse_str("").unwrap_err();
        assert!(matches!(err, Error::InvalidId(_)));
        assert!(err.to_string().contains("TaskId"));

        assert!(ClusterId::parse_str("   ").is_err());
    }

    #[test]
    fn test_from_str() {
        let id: BackupId = "bk-9".parse().unwrap();
        assert_eq!(id.into_string(), "bk-9");
    }

    #[test]
    fn test_serde_round_trip_and_rejection() {
        let id = ClusterId::parse_str("cl-1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"cl-1\"");

        let back: ClusterId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        assert!(serde_json::from_str::<ClusterId>("\"\"").is_err());
    }

    #[test]
    fn test_parse_rejects_path_traversal() {
        for raw in ["../../clusters/c1", "t-1/../t-2", "..", ".", "t?x=1", "t#frag", "t%2F1", "t 1"] {
            let err = TaskId::parse_str(raw).unwrap_err();
            assert!(matches!(err, Error::InvalidId(_)), "{raw} accepted");
        }
        assert!(TaskId::parse_str("task.2024-06-01:7~a").is_ok());

        // Server-sent ids go through the same check
        assert!(serde_json::from_str::<TaskId>("\"../c2\"").is_err());
    }

    #[test]
    fn test_try_from() {
        assert!(TaskId::try_from("abc").is_ok());
        assert!(TaskId::try_from(String::new()).is_err());
    }
}
