//! Validated job inputs: source descriptors and file selections.

use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{JobError, JobResult};

const MAGNET_PREFIX: &str = "magnet:?";
const INFO_HASH_OFFSET: usize = "magnet:?xt=urn:btih:".len();
const INFO_HASH_LEN: usize = 40;

static MAGNET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^magnet:\?xt=urn:btih:[a-fA-F0-9]{40}").ok());

/// Transfer source accepted by the engine: a magnet link carrying a hex info-hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceDescriptor(String);

impl SourceDescriptor {
    /// Validate and wrap a raw descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidArgument`] when the descriptor is empty, is not a
    /// magnet link, or lacks a 40-character hex info-hash.
    pub fn parse(raw: &str) -> JobResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(JobError::invalid_argument("magnet_link", "empty", None));
        }
        if !raw.starts_with(MAGNET_PREFIX) {
            return Err(JobError::invalid_argument(
                "magnet_link",
                "invalid_format",
                Some(raw.to_string()),
            ));
        }
        let matches = MAGNET_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(raw));
        if !matches {
            return Err(JobError::invalid_argument(
                "magnet_link",
                "invalid_info_hash",
                Some(raw.to_string()),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Raw descriptor text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased 40-character info-hash embedded in the descriptor.
    #[must_use]
    pub fn info_hash(&self) -> String {
        self.0
            .get(INFO_HASH_OFFSET..INFO_HASH_OFFSET + INFO_HASH_LEN)
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

impl Display for SourceDescriptor {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl TryFrom<String> for SourceDescriptor {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SourceDescriptor> for String {
    fn from(value: SourceDescriptor) -> Self {
        value.0
    }
}

/// Non-empty, duplicate-free list of file indices in caller order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSelection {
    indices: Vec<usize>,
}

impl FileSelection {
    /// Validate raw indices as supplied by a client.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidArgument`] for an empty list, a negative index,
    /// or a duplicated index.
    pub fn from_raw(raw: &[i64]) -> JobResult<Self> {
        if raw.is_empty() {
            return Err(JobError::invalid_argument(
                "selected_indices",
                "empty",
                None,
            ));
        }
        let mut seen = HashSet::with_capacity(raw.len());
        let mut indices = Vec::with_capacity(raw.len());
        for &value in raw {
            let index = usize::try_from(value).map_err(|_| {
                JobError::invalid_argument(
                    "selected_indices",
                    "negative",
                    Some(value.to_string()),
                )
            })?;
            if !seen.insert(index) {
                return Err(JobError::invalid_argument(
                    "selected_indices",
                    "duplicate",
                    Some(value.to_string()),
                ));
            }
            indices.push(index);
        }
        Ok(Self { indices })
    }

    /// Selected indices in caller order.
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// First selected index; the target of sequential delivery.
    #[must_use]
    pub fn first(&self) -> usize {
        self.indices[0]
    }

    /// Whether `index` is part of the selection.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    /// Confirm every index addresses one of `file_count` files.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidArgument`] naming the first out-of-range index.
    pub fn check_bounds(&self, file_count: usize) -> JobResult<()> {
        match self.indices.iter().find(|&&index| index >= file_count) {
            Some(index) => Err(JobError::invalid_argument(
                "selected_indices",
                "out_of_range",
                Some(format!("{index} (transfer has {file_count} files)")),
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789ABCDEF01234567";

    fn magnet() -> String {
        format!("magnet:?xt=urn:btih:{HASH}&dn=example")
    }

    #[test]
    fn accepts_magnet_with_hex_hash() -> JobResult<()> {
        let source = SourceDescriptor::parse(&magnet())?;
        assert_eq!(source.info_hash(), HASH.to_ascii_lowercase());
        assert_eq!(source.to_string(), magnet());
        Ok(())
    }

    #[test]
    fn rejects_malformed_descriptors() {
        for (raw, reason) in [
            ("", "empty"),
            ("http://example.com", "invalid_format"),
            ("magnet:?xt=urn:btih:abc", "invalid_info_hash"),
        ] {
            match SourceDescriptor::parse(raw) {
                Err(JobError::InvalidArgument { reason: got, .. }) => assert_eq!(got, reason),
                other => panic!("unexpected result for {raw:?}: {other:?}"),
            }
        }
    }

    #[test]
    fn selection_rejects_empty_negative_and_duplicates() {
        for (raw, reason) in [
            (vec![], "empty"),
            (vec![0, -1], "negative"),
            (vec![0, 2, 0], "duplicate"),
        ] {
            match FileSelection::from_raw(&raw) {
                Err(JobError::InvalidArgument { reason: got, .. }) => assert_eq!(got, reason),
                other => panic!("unexpected result for {raw:?}: {other:?}"),
            }
        }
    }

    #[test]
    fn selection_bounds_name_offending_index() -> JobResult<()> {
        let selection = FileSelection::from_raw(&[2, 0, 5])?;
        assert_eq!(selection.first(), 2);
        assert!(selection.contains(0));
        assert!(selection.check_bounds(6).is_ok());
        match selection.check_bounds(3) {
            Err(JobError::InvalidArgument { value, .. }) => {
                assert_eq!(value.as_deref(), Some("5 (transfer has 3 files)"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }
}
