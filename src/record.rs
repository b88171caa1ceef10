//! Record - the unit of work flowing through the engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single unit of work.
///
/// Records are immutable by convention: a session produces a new *version* of a
/// record on every mutation, and the superseded version becomes stale for all
/// further session operations. The engine itself never mutates a record; it only
/// moves records between bins and routes them to a [`Destination`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unique record identifier
    pub(crate) id: u64,
    /// Version counter, bumped by the owning session on every mutation
    pub(crate) version: u64,
    /// Record size in bytes
    pub(crate) size: u64,
    /// User-defined string attributes
    pub(crate) attributes: HashMap<String, String>,
}

impl Record {
    /// Create a new record at version zero
    pub fn new(id: u64, size: u64) -> Self {
        Self {
            id,
            version: 0,
            size,
            attributes: HashMap::new(),
        }
    }

    /// Create a record with attributes
    pub fn with_attributes(id: u64, size: u64, attributes: HashMap<String, String>) -> Self {
        Self {
            id,
            version: 0,
            size,
            attributes,
        }
    }

    /// Unique identifier of this record
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current version of this record
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Size of the record content in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Access the record attributes
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Get a specific attribute value
    pub fn get_attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    /// Check if an attribute exists
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Produce the next version of this record with one attribute replaced.
    ///
    /// Session implementations call this when mutating a record; the engine
    /// itself does not. The returned record supersedes `self`.
    pub fn next_version_with_attribute(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.attributes.insert(key.into(), value.into());
        next
    }
}

/// Routing label for records leaving the engine.
///
/// Every record admitted into a bin eventually reaches exactly one destination,
/// or is redelivered unchanged after an unrecoverable-failure rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// The records that were used to build a completed bundle
    Original,
    /// Records from a bundle that could not be processed
    Failure,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Original => write!(f, "original"),
            Destination::Failure => write!(f, "failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_basic() {
        let record = Record::new(7, 1024);
        assert_eq!(record.id(), 7);
        assert_eq!(record.version(), 0);
        assert_eq!(record.size(), 1024);
        assert!(record.attributes().is_empty());
    }

    #[test]
    fn test_record_attributes() {
        let mut attrs = HashMap::new();
        attrs.insert("kind".to_string(), "csv".to_string());
        let record = Record::with_attributes(1, 10, attrs);

        assert_eq!(record.get_attribute("kind"), Some("csv"));
        assert_eq!(record.get_attribute("missing"), None);
        assert!(record.has_attribute("kind"));
        assert!(!record.has_attribute("missing"));
    }

    #[test]
    fn test_record_versioning() {
        let record = Record::new(1, 10);
        let next = record.next_version_with_attribute("group", "a");

        assert_eq!(next.version(), 1);
        assert_eq!(next.get_attribute("group"), Some("a"));
        // the old version is untouched
        assert_eq!(record.version(), 0);
        assert!(!record.has_attribute("group"));
    }

    #[test]
    fn test_destination_display() {
        assert_eq!(Destination::Original.to_string(), "original");
        assert_eq!(Destination::Failure.to_string(), "failure");
    }
}
