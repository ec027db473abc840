//! Mount table entries and collision checks
//!
//! Before registering a device the caller checks the proposed mount against
//! every existing one with [`is_distinct`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Device types that take part in distinctness checks
const DISTINCT_TYPES: [&str; 3] = ["file", "socket", "syslog"];

/// An audit device as recorded in the mount table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MountEntry {
    /// Mount path, e.g. `file/`
    pub path: String,
    /// Device type, e.g. `file`
    #[serde(rename = "type")]
    pub device_type: String,
    /// Free-form description
    pub description: String,
    /// Whether the device is local to this cluster node
    pub local: bool,
    /// Device options
    pub options: HashMap<String, String>,
}

impl MountEntry {
    /// Create an entry with no options
    pub fn new(path: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            device_type: device_type.into(),
            ..Self::default()
        }
    }

    /// Add an option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// The file target, read from `file_path` or `path`
    pub fn file_path(&self) -> Option<&str> {
        self.options
            .get("file_path")
            .or_else(|| self.options.get("path"))
            .map(String::as_str)
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Check that `proposed` does not collide with `existing`
///
/// Paths collide when equal or when one is a prefix of the other. Two file
/// devices collide when they write to the same file.
pub fn is_distinct(proposed: &MountEntry, existing: &MountEntry) -> Result<()> {
    const OP: &str = "audit.is_distinct";

    let a = normalize_path(&proposed.path);
    let b = normalize_path(&existing.path);
    if a.starts_with(&b) || b.starts_with(&a) {
        return Err(Error::new(OP, "path already in use", ErrorKind::Conflict));
    }

    for entry in [proposed, existing] {
        if !DISTINCT_TYPES.contains(&entry.device_type.as_str()) {
            return Err(Error::internal_error(
                OP,
                format!("unknown audit device type {:?}", entry.device_type),
            ));
        }
    }

    if proposed.device_type == "file" && existing.device_type == "file" {
        let same_file = match (proposed.file_path(), existing.file_path()) {
            (Some(p), Some(e)) => p.trim() == e.trim(),
            _ => false,
        };
        if same_file {
            return Err(Error::new(
                OP,
                "file_path already in use on device",
                ErrorKind::Conflict,
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, file_path: &str) -> MountEntry {
        MountEntry::new(path, "file").with_option("file_path", file_path)
    }

    #[test]
    fn test_same_path_conflicts() {
        let err = is_distinct(&file("a/", "x"), &file("a/", "y")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.message(), "path already in use");
    }

    #[test]
    fn test_same_file_conflicts() {
        let err = is_distinct(&file("a/", "x"), &file("b/", "x")).unwrap_err();
        assert_eq!(err.message(), "file_path already in use on device");
    }

    #[test]
    fn test_nested_paths_conflict() {
        let err = is_distinct(&MountEntry::new("a/b/", ""), &MountEntry::new("a/", "")).unwrap_err();
        assert_eq!(err.message(), "path already in use");
        assert!(is_distinct(&MountEntry::new("a", "file"), &MountEntry::new("ab", "file")).is_ok());
    }

    #[test]
    fn test_distinct_devices() {
        assert!(is_distinct(&file("a/", "x"), &file("b/", "y")).is_ok());
        let socket = MountEntry::new("sock/", "socket").with_option("address", "127.0.0.1:9090");
        assert!(is_distinct(&socket, &file("b/", "y")).is_ok());
        let legacy = MountEntry::new("c/", "file").with_option("path", "y");
        assert!(is_distinct(&legacy, &file("b/", "y")).is_err());
    }

    #[test]
    fn test_unknown_type_is_internal() {
        let err = is_distinct(&MountEntry::new("a/", "noop"), &file("b/", "y")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
