//! 128-bit peer identifier.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;

use crate::IdentityError;
use crate::varint::{read_uvarint, write_uvarint};

/// Unique 128-bit identifier of a client or server that created a
/// [`crate::Version`].
///
/// An all-zero instance ([`SourceId::ME`]) stands for the local peer's own
/// ID, saving space and letting a [`crate::VersionVector`] be built before
/// the real ID is known (it may be assigned by a server). [`SourceId::LEGACY_REV`]
/// marks a version created during upgrade from the legacy (non-vector)
/// revision encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourceId([u8; 16]);

impl SourceId {
    /// Placeholder representing the local peer. Binary value is all zero;
    /// ASCII form is `*`; binary wire form is a single zero byte.
    pub const ME: SourceId = SourceId([0u8; 16]);

    /// Marks a version created while upgrading a database from the legacy
    /// tree-revision encoding.
    pub const LEGACY_REV: SourceId = {
        let mut bytes = [0u8; 16];
        bytes[0] = 0x1e;
        SourceId(bytes)
    };

    /// Length of the base64 ASCII encoding of a 16-byte ID (no padding).
    pub const ASCII_LEN: usize = 22;

    /// Builds a `SourceId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        SourceId(bytes)
    }

    /// Builds a `SourceId` from two 64-bit words, used mostly to
    /// special-case comparisons.
    #[must_use]
    pub fn from_words(w1: u64, w2: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&w1.to_be_bytes());
        bytes[8..].copy_from_slice(&w2.to_be_bytes());
        SourceId(bytes)
    }

    /// The raw 16 bytes.
    #[must_use]
    pub const fn bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Is this the `me` placeholder?
    #[must_use]
    pub fn is_me(&self) -> bool {
        *self == Self::ME
    }

    /// Formats as base64 (does not apply the `*` shortcut for `me`; callers
    /// that want the shortcut should check [`SourceId::is_me`] first, as
    /// [`crate::VersionVector::write_ascii`] does).
    #[must_use]
    pub fn as_ascii(&self) -> String {
        STANDARD_NO_PAD.encode(self.0)
    }

    /// Parses a base64-encoded `SourceId`. Does not accept the `*` shortcut.
    pub fn parse_ascii(s: &str) -> Result<Self, IdentityError> {
        let decoded = STANDARD_NO_PAD
            .decode(s)
            .map_err(|_| IdentityError::BadAscii(s.to_string()))?;
        let bytes: [u8; 16] =
            decoded.try_into().map_err(|_| IdentityError::BadAscii(s.to_string()))?;
        Ok(SourceId(bytes))
    }

    /// Encodes this ID plus a `current` bit (used by `VersionVector`'s
    /// binary format to mark which versions are in the merge prefix) as a
    /// UVarInt tag, optionally followed by 16 raw bytes.
    ///
    /// Tag layout: bit 0 is the `current` flag; bit 1 is set when a real
    /// (non-`me`) id follows. `UVarInt 0` therefore means "me, not current".
    pub(crate) fn write_binary(&self, out: &mut Vec<u8>, current: bool) {
        let tag = u64::from(current) | (u64::from(!self.is_me()) << 1);
        write_uvarint(out, tag);
        if !self.is_me() {
            out.extend_from_slice(&self.0);
        }
    }

    /// Reads a `(SourceId, current)` pair written by [`Self::write_binary`].
    pub(crate) fn read_binary(input: &[u8]) -> Option<(Self, bool, usize)> {
        let (tag, mut consumed) = read_uvarint(input)?;
        let current = tag & 1 != 0;
        if tag & 0b10 == 0 {
            Some((SourceId::ME, current, consumed))
        } else {
            let rest = input.get(consumed..consumed + 16)?;
            consumed += 16;
            let bytes: [u8; 16] = rest.try_into().ok()?;
            Some((SourceId(bytes), current, consumed))
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl SourceId {
    /// Derives a deterministic (non-cryptographic) id from a short label,
    /// for building readable test fixtures (`SourceId::from_label("jens")`)
    /// without hand-rolling 16 arbitrary bytes.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let mut bytes = [0u8; 16];
        let mut state = 0xcbf2_9ce4_8422_2325u64;
        for &b in label.as_bytes() {
            state ^= u64::from(b);
            state = state.wrapping_mul(0x0000_0100_0000_01b3);
        }
        bytes[..8].copy_from_slice(&state.to_be_bytes());
        bytes[8..].copy_from_slice(&state.rotate_left(17).to_be_bytes());
        SourceId(bytes)
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_me() {
            write!(f, "*")
        } else {
            write!(f, "{}", self.as_ascii())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn me_is_all_zero() {
        assert_eq!(SourceId::ME.bytes(), &[0u8; 16]);
        assert!(SourceId::ME.is_me());
    }

    #[test]
    fn legacy_rev_first_byte() {
        assert_eq!(SourceId::LEGACY_REV.bytes()[0], 0x1e);
        assert!(SourceId::LEGACY_REV.bytes()[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn ascii_round_trip() {
        let id = SourceId::from_words(0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210);
        let ascii = id.as_ascii();
        assert_eq!(ascii.len(), SourceId::ASCII_LEN);
        assert_eq!(SourceId::parse_ascii(&ascii).unwrap(), id);
    }

    #[test]
    fn binary_round_trip_me_and_real() {
        for (id, current) in [(SourceId::ME, false), (SourceId::ME, true),
            (SourceId::from_words(1, 2), false), (SourceId::from_words(1, 2), true)] {
            let mut buf = Vec::new();
            id.write_binary(&mut buf, current);
            let (decoded, decoded_current, len) = SourceId::read_binary(&buf).unwrap();
            assert_eq!(decoded, id);
            assert_eq!(decoded_current, current);
            assert_eq!(len, buf.len());
        }
    }
}
