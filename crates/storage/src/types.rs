//! Common types used across storage operations.

use bytes::Bytes;

/// The unit of storage: one key and its value.
///
/// Keys are hierarchical, `/`-separated byte strings. Backends themselves
/// accept any bytes; the [encoding guard](crate::encoding) is what restricts
/// durably written keys to printable UTF-8.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use bastion_storage::Entry;
///
/// let entry = Entry::new("sys/policy/default", "path \"*\" {}");
/// assert_eq!(entry.key_str(), Some("sys/policy/default"));
/// assert_eq!(entry.value, Bytes::from_static(b"path \"*\" {}"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The opaque value stored at this key.
    pub value: Bytes,
}

impl Entry {
    /// Creates a new entry from anything convertible into [`Bytes`].
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    /// Returns the key as text when it is valid UTF-8.
    #[must_use]
    pub fn key_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.key).ok()
    }
}

/// Renders a key for log output.
pub(crate) fn display_key(key: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(key)
}
