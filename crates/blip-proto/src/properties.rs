//! The properties dictionary: an ordered, null-terminated UTF-8 key/value
//! list carried at the start of a message.

use crate::error::FrameError;
use crate::message::MAX_PROPERTIES_SIZE;

/// Well-known property name identifying the registered handler for a
/// request.
pub const PROFILE: &str = "Profile";

/// Error response property naming the domain of an `Error`-typed message.
pub const ERROR_DOMAIN: &str = "Error-Domain";

/// Error response property naming the numeric code within `Error-Domain`.
pub const ERROR_CODE: &str = "Error-Code";

/// The domain used for errors synthesized by the engine itself rather than
/// by a request handler.
pub const BLIP_ERROR_DOMAIN: &str = "BLIP";

/// An ordered key/value dictionary, preserving insertion order the way the
/// wire encoding does (lookups are linear; dictionaries are tiny).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    /// An empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any existing entry with that key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Builder-style variant of [`Self::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Looks up a property by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Iterates entries in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether the dictionary has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes as `key\0value\0key\0value\0...`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (k, v) in &self.entries {
            out.extend_from_slice(k.as_bytes());
            out.push(0);
            out.extend_from_slice(v.as_bytes());
            out.push(0);
        }
        out
    }

    /// Decodes a properties slab produced by [`Self::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PropertiesTooLarge`] if `bytes` exceeds
    /// [`MAX_PROPERTIES_SIZE`], [`FrameError::PropertiesNotTerminated`] if
    /// the slab's final field lacks a trailing NUL (non-UTF-8 bytes produce
    /// lossy-replaced strings instead of an error; validation is the
    /// handler's job), and [`FrameError::PropertiesUnpaired`] if the field
    /// count is odd.
    #[allow(clippy::expect_used)]
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() > MAX_PROPERTIES_SIZE {
            return Err(FrameError::PropertiesTooLarge {
                size: bytes.len(),
                limit: MAX_PROPERTIES_SIZE,
            });
        }
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        if *bytes.last().expect("checked non-empty above") != 0 {
            return Err(FrameError::PropertiesNotTerminated);
        }

        let fields: Vec<String> = bytes[..bytes.len() - 1]
            .split(|&b| b == 0)
            .map(|field| String::from_utf8_lossy(field).into_owned())
            .collect();

        if fields.len() % 2 != 0 {
            return Err(FrameError::PropertiesUnpaired);
        }

        let mut entries = Vec::with_capacity(fields.len() / 2);
        let mut iter = fields.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            entries.push((key, value));
        }
        Ok(Self { entries })
    }
}

impl FromIterator<(String, String)> for Properties {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut props = Self::default();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_round_trips() {
        let props = Properties::new();
        assert_eq!(Properties::decode(&props.encode()).unwrap(), props);
    }

    #[test]
    fn single_pair_round_trips() {
        let props = Properties::new().with(PROFILE, "Echo");
        let encoded = props.encode();
        assert_eq!(encoded, b"Profile\0Echo\0");
        assert_eq!(Properties::decode(&encoded).unwrap(), props);
    }

    #[test]
    fn set_replaces_existing_key_in_place() {
        let props = Properties::new().with("a", "1").with("b", "2").with("a", "3");
        assert_eq!(props.get("a"), Some("3"));
        assert_eq!(props.iter().collect::<Vec<_>>(), vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn rejects_unterminated_slab() {
        assert_eq!(Properties::decode(b"Profile\0Echo"), Err(FrameError::PropertiesNotTerminated));
    }

    #[test]
    fn rejects_unpaired_field() {
        assert_eq!(Properties::decode(b"Profile\0"), Err(FrameError::PropertiesUnpaired));
        assert_eq!(
            Properties::decode(b"Profile\0Echo\0Extra\0"),
            Err(FrameError::PropertiesUnpaired)
        );
    }

    #[test]
    fn empty_value_round_trips() {
        assert_eq!(Properties::decode(b"Profile\0\0"), Ok(Properties::new().with("Profile", "")));
    }

    #[test]
    fn rejects_oversized_slab() {
        let huge = vec![b'a'; MAX_PROPERTIES_SIZE + 1];
        assert!(matches!(
            Properties::decode(&huge),
            Err(FrameError::PropertiesTooLarge { .. })
        ));
    }

    proptest! {
        #[test]
        fn round_trip(
            pairs in prop::collection::vec(
                ("[a-zA-Z][a-zA-Z0-9_-]{0,16}", "[a-zA-Z0-9 _-]{0,32}"),
                0..8,
            )
        ) {
            let mut props = Properties::new();
            let mut seen = std::collections::HashSet::new();
            for (k, v) in pairs {
                if seen.insert(k.clone()) {
                    props.set(k, v);
                }
            }
            let decoded = Properties::decode(&props.encode()).expect("valid slab");
            prop_assert_eq!(decoded, props);
        }
    }
}
