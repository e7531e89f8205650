//! `VersionVector`: an ordered sequence of [`Version`]s summarizing the
//! causal history of a revision, one entry per peer that contributed to it.

use blip_hlc::{HybridClock, LogicalTime};

use crate::source_id::SourceId;
use crate::varint::{read_uvarint, write_uvarint};
use crate::version::{Version, VersionOrder, decimal_time};
use crate::IdentityError;

/// Sentinel author used only to terminate the source-sorted merge walk; no
/// real `SourceId` can equal it since it is all-ones.
const MAX_SOURCE_ID: SourceId = SourceId::from_bytes([0xff; 16]);

/// Ordered sequence of [`Version`]s forming a causal revision identifier.
///
/// Invariants (enforced by [`VersionVector::validate`], which all mutating
/// operations call in debug builds):
/// - At most one `Version` per author, except that the current author may
///   appear a second time within the merge prefix, provided its time there
///   is strictly less than the current version's time.
/// - The first `n_current` entries are the "merge prefix"; `n_current >= 1`
///   whenever the vector is non-empty, and `n_current == 0` iff it is empty.
/// - The very first entry is the current version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionVector {
    vers: Vec<Version>,
    n_current: usize,
}

impl VersionVector {
    /// An empty vector.
    #[must_use]
    pub fn new() -> Self {
        VersionVector::default()
    }

    /// Builds a vector directly from its entries and merge-prefix length.
    /// Validates invariants before returning.
    pub fn from_versions(vers: Vec<Version>, n_current: usize) -> Result<Self, IdentityError> {
        let vv = VersionVector { vers, n_current };
        vv.validate()?;
        Ok(vv)
    }

    /// Empties the vector.
    pub fn clear(&mut self) {
        self.vers.clear();
        self.n_current = 0;
    }

    /// Is the vector empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vers.is_empty()
    }

    /// Number of entries (peers) in the vector.
    #[must_use]
    pub fn count(&self) -> usize {
        self.vers.len()
    }

    /// Number of entries in the merge prefix (1 for a non-merge vector).
    #[must_use]
    pub fn n_current(&self) -> usize {
        self.n_current
    }

    /// Is this a merge vector (more than one entry in the merge prefix)?
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.n_current > 1
    }

    /// The current (first, most authoritative) version.
    #[must_use]
    pub fn current(&self) -> Option<Version> {
        self.vers.first().copied()
    }

    /// All entries, in storage order (current first, then merge parents,
    /// then the rest by descending time).
    #[must_use]
    pub fn entries(&self) -> &[Version] {
        &self.vers
    }

    fn index_of(&self, author: SourceId) -> Option<usize> {
        self.vers.iter().position(|v| v.author() == author)
    }

    /// Does any entry belong to `author`?
    #[must_use]
    pub fn contains(&self, author: SourceId) -> bool {
        self.index_of(author).is_some()
    }

    /// The time recorded for `author`, or [`LogicalTime::NONE`] if absent.
    #[must_use]
    pub fn time_of(&self, author: SourceId) -> LogicalTime {
        self.index_of(author).map_or(LogicalTime::NONE, |i| self.vers[i].time())
    }

    /// Checks structural invariants; called by all mutating operations.
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.is_empty() {
            if self.n_current != 0 {
                return Err(IdentityError::Invalid("empty vector with nonzero n_current".into()));
            }
            return Ok(());
        }
        if self.n_current == 0 {
            return Err(IdentityError::Invalid("non-empty vector with n_current == 0".into()));
        }
        if self.count() <= 1 {
            return Ok(());
        }
        let mut dup_seen = false;
        for i in 0..self.vers.len() {
            let author = self.vers[i].author();
            for j in (i + 1)..self.vers.len() {
                if self.vers[j].author() != author {
                    continue;
                }
                if i == 0 && j < self.n_current && !dup_seen {
                    dup_seen = true;
                    if self.vers[i].time() <= self.vers[j].time() {
                        return Err(IdentityError::Invalid(
                            "current version not newer than its merge-prefix duplicate".into(),
                        ));
                    }
                } else {
                    return Err(IdentityError::Invalid("duplicate author in version vector".into()));
                }
            }
        }
        Ok(())
    }

    /// Adds `v` as the new current version, unless an existing entry for its
    /// author already has a time `>= v.time()`. Returns whether it was
    /// added.
    pub fn add(&mut self, v: Version) -> bool {
        if self.time_of(v.author()) >= v.time() {
            return false;
        }
        self.add_unchecked(v);
        true
    }

    #[allow(clippy::expect_used)]
    fn add_unchecked(&mut self, v: Version) {
        if !self.is_empty() {
            let cur_author = self.current().expect("checked non-empty").author();
            let mut first = true;
            self.vers.retain(|existing| {
                let keep = !(existing.author() == v.author() || (!first && existing.author() == cur_author));
                first = false;
                keep
            });
        }
        self.vers.insert(0, v);
        self.n_current = 1;
    }

    /// Advances `author`'s entry using `clock`, making it the new current
    /// version. Returns `false` if the clock rejects the prior time (too far
    /// in the future to have been legitimately seen).
    pub fn add_new_version(&mut self, clock: &HybridClock, author: SourceId) -> bool {
        let existing = self.time_of(author);
        if existing != LogicalTime::NONE && !clock.see(existing) {
            return false;
        }
        self.add_unchecked(Version::new(clock.now(), author));
        true
    }

    /// Alias for [`Self::add_new_version`].
    pub fn increment_gen(&mut self, clock: &HybridClock, author: SourceId) -> bool {
        self.add_new_version(clock, author)
    }

    /// Compares this vector to a single version: `Older` if our entry for
    /// its author is missing or behind; `Same` if it matches our *current*
    /// entry; otherwise `Newer`.
    #[must_use]
    pub fn compare_to_version(&self, v: &Version) -> VersionOrder {
        match self.index_of(v.author()) {
            None => VersionOrder::OLDER,
            Some(i) if self.vers[i].time() < v.time() => VersionOrder::OLDER,
            Some(0) if self.vers[0].time() == v.time() => VersionOrder::SAME,
            _ => VersionOrder::NEWER,
        }
    }

    /// Compares two vectors against each other's current version.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn compare_to(&self, other: &VersionVector) -> VersionOrder {
        let (my_count, their_count) = (self.count(), other.count());
        if my_count == 0 {
            return if their_count == 0 { VersionOrder::SAME } else { VersionOrder::OLDER };
        } else if their_count == 0 {
            return VersionOrder::NEWER;
        }
        let other_current = other.current().expect("checked non-empty");
        let my_cmp = self.compare_to_version(&other_current);
        if my_cmp.is_same() {
            return VersionOrder::SAME;
        }
        let my_current = self.current().expect("checked non-empty");
        let their_cmp = other.compare_to_version(&my_current);
        debug_assert!(!their_cmp.is_same());
        if my_cmp == their_cmp {
            VersionOrder::CONFLICTING
        } else {
            my_cmp
        }
    }

    /// True if some entry other than `ignoring` is strictly newer here than
    /// in `other`.
    #[must_use]
    pub fn is_newer_ignoring(&self, ignoring: SourceId, other: &VersionVector) -> bool {
        self.vers.iter().any(|v| v.author() != ignoring && v.time() > other.time_of(v.author()))
    }

    /// The merge-prefix entries after the current version (empty unless
    /// [`Self::is_merge`]), sorted by descending time for stable comparison.
    #[must_use]
    pub fn merged_versions(&self) -> Vec<Version> {
        if self.n_current <= 1 {
            return Vec::new();
        }
        let mut result = self.vers[1..self.n_current].to_vec();
        result.sort_by(Version::by_descending_time);
        result
    }

    /// True if both vectors are merges of the same set of parent versions.
    #[must_use]
    pub fn merges_same_versions(&self, other: &VersionVector) -> bool {
        self.is_merge() && other.is_merge() && self.merged_versions() == other.merged_versions()
    }

    fn versions_by_source(&self) -> Vec<Version> {
        let mut sorted = self.vers.clone();
        if self.n_current > 1 {
            let current_author = sorted[0].author();
            for i in (1..self.n_current).rev() {
                if sorted[i].author() == current_author {
                    sorted.remove(i);
                    break;
                }
            }
        }
        sorted.sort_by(Version::by_author);
        sorted.push(Version::new(LogicalTime::from_raw(1), MAX_SOURCE_ID));
        sorted
    }

    /// Walks two vectors in author order, invoking `callback(author, t1,
    /// t2)` once per distinct author appearing in either (using
    /// [`LogicalTime::NONE`] for the side missing that author). Stops early
    /// if the callback returns `false`.
    pub fn compare_by_source(
        v1: &VersionVector,
        v2: &VersionVector,
        mut callback: impl FnMut(SourceId, LogicalTime, LogicalTime) -> bool,
    ) {
        let sorted1 = v1.versions_by_source();
        let sorted2 = v2.versions_by_source();
        let (mut i1, mut i2) = (0usize, 0usize);
        loop {
            let a1 = sorted1[i1].author();
            let a2 = sorted2[i2].author();
            let (author, t1, t2);
            if a1 == a2 {
                if a1 == MAX_SOURCE_ID {
                    break;
                }
                author = a1;
                t1 = sorted1[i1].time();
                t2 = sorted2[i2].time();
                i1 += 1;
                i2 += 1;
            } else if a1 < a2 {
                author = a1;
                t1 = sorted1[i1].time();
                t2 = LogicalTime::NONE;
                i1 += 1;
            } else {
                author = a2;
                t1 = LogicalTime::NONE;
                t2 = sorted2[i2].time();
                i2 += 1;
            }
            if !callback(author, t1, t2) {
                break;
            }
        }
    }

    /// Merges two vectors, producing one whose current entry is a fresh
    /// local timestamp, followed by each input's current version (the
    /// "merge prefix"), followed by the newest time seen for every other
    /// peer appearing in either input.
    pub fn merge(v1: &VersionVector, v2: &VersionVector, clock: &HybridClock) -> Result<VersionVector, IdentityError> {
        let c1 = v1.current().ok_or_else(|| IdentityError::Invalid("cannot merge an empty vector".into()))?;
        let c2 = v2.current().ok_or_else(|| IdentityError::Invalid("cannot merge an empty vector".into()))?;
        if c1.author() == SourceId::ME && !clock.see(c1.time()) {
            return Err(IdentityError::Invalid("invalid timestamp in version vector".into()));
        }
        if c2.author() == SourceId::ME && !clock.see(c2.time()) {
            return Err(IdentityError::Invalid("invalid timestamp in version vector".into()));
        }

        let mut vers = vec![Version::new(clock.now(), SourceId::ME), c1, c2];
        vers[1..].sort_by(Version::by_descending_time);
        let conflictor1 = vers[1].author();
        let conflictor2 = vers[2].author();

        let mut rest = Vec::new();
        VersionVector::compare_by_source(v1, v2, |author, t1, t2| {
            if author != SourceId::ME && author != conflictor1 && author != conflictor2 {
                rest.push(Version::new(t1.max(t2), author));
            }
            true
        });
        rest.sort_by(Version::by_descending_time);
        vers.extend(rest);

        VersionVector::from_versions(vers, 3)
    }

    /// The prefix of `self` containing every entry newer than in `src`, or
    /// `None` if `src` is newer (or conflicting). A delta from an empty
    /// vector is `self` unchanged.
    #[must_use]
    pub fn delta_from(&self, src: &VersionVector) -> Option<VersionVector> {
        if src.is_empty() {
            return Some(self.clone());
        }
        if src.count() > self.count() {
            return None;
        }
        let mut cut = self.vers.len();
        for (i, v) in self.vers.iter().enumerate() {
            let src_time = src.time_of(v.author());
            if v.time() == src_time {
                cut = i;
                break;
            } else if v.time() < src_time {
                return None;
            }
        }
        let n_current = self.n_current.min(cut);
        VersionVector::from_versions(self.vers[..cut].to_vec(), n_current.max(usize::from(cut > 0))).ok()
    }

    /// Reconstructs the vector that `delta` was a delta from `self` of, by
    /// appending every entry of `self` absent from `delta`.
    pub fn by_applying_delta(&self, delta: &VersionVector) -> Result<VersionVector, IdentityError> {
        let mut result = delta.clone();
        for v in &self.vers {
            let time_in_delta = delta.time_of(v.author());
            if time_in_delta == LogicalTime::NONE {
                result.vers.push(*v);
            } else if time_in_delta < v.time() {
                return Err(IdentityError::Invalid("invalid version vector delta".into()));
            }
        }
        result.n_current = usize::from(!result.is_empty());
        result.validate()?;
        Ok(result)
    }

    /// Bounds growth by dropping merge-prefix entries past `max_count`
    /// entries whose time is older than `before` (or all of them, if
    /// `before` is [`LogicalTime::END_OF_TIME`]).
    pub fn prune(&mut self, max_count: usize, before: LogicalTime) {
        if self.vers.len() <= max_count {
            return;
        }
        let max_count = max_count.max(self.n_current);
        if before == LogicalTime::END_OF_TIME {
            self.vers.truncate(max_count);
        } else {
            self.vers.truncate_by_predicate(max_count, before);
        }
    }

    /// Replaces `old`'s entry with `nuu`, failing if `nuu` is already
    /// present.
    #[must_use]
    pub fn replace_author(&mut self, old: SourceId, nuu: SourceId) -> bool {
        if self.contains(nuu) {
            return false;
        }
        for v in &mut self.vers {
            if v.author() == old {
                *v = Version::new(v.time(), nuu);
            }
        }
        true
    }

    /// Replaces `my_id`'s entry with the `me` placeholder, before writing
    /// the vector to local storage.
    pub fn make_local(&mut self, my_id: SourceId) -> Result<(), IdentityError> {
        if self.replace_author(my_id, SourceId::ME) {
            Ok(())
        } else {
            Err(IdentityError::Invalid("vector already contains '*'".into()))
        }
    }

    /// Replaces the `me` placeholder with `my_id`, before sending the vector
    /// to a peer.
    pub fn make_absolute(&mut self, my_id: SourceId) -> Result<(), IdentityError> {
        if self.replace_author(SourceId::ME, my_id) {
            Ok(())
        } else {
            Err(IdentityError::Invalid("vector already contains the real id".into()))
        }
    }

    /// True if no entry is the `me` placeholder.
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        !self.contains(SourceId::ME)
    }

    // ---- ASCII -------------------------------------------------------

    /// Renders as `time@peer[, time@peer...][; merge-parent, ...]`, using
    /// `my_id` to render the `me` placeholder. A semicolon separates the
    /// current version from a trailing merge prefix.
    #[must_use]
    pub fn to_ascii(&self) -> String {
        let mut out = String::new();
        for (i, v) in self.vers.iter().enumerate() {
            if i > 0 {
                out.push_str(if i == self.n_current { "; " } else { ", " });
            }
            out.push_str(&decimal_time(v.time()).to_string());
            out.push('@');
            out.push_str(&v.author().to_string());
        }
        if self.n_current > 1 && self.n_current == self.count() {
            out.push(';');
        }
        out
    }

    /// Parses the ASCII format produced by [`Self::to_ascii`].
    pub fn parse_ascii(s: &str) -> Result<VersionVector, IdentityError> {
        let mut vers = Vec::new();
        let mut n_current = 0usize;
        let mut rest = s;
        while !rest.is_empty() {
            let sep = rest.find([',', ';']);
            let (entry, tail) = match sep {
                Some(idx) => {
                    if rest.as_bytes()[idx] == b';' {
                        if n_current > 0 {
                            return Err(IdentityError::Invalid("multiple ';' in version vector".into()));
                        }
                        n_current = vers.len() + 1;
                    }
                    (&rest[..idx], &rest[idx + 1..])
                }
                None => (rest, ""),
            };
            vers.push(parse_version_ascii(entry.trim())?);
            rest = tail.trim_start();
        }
        if n_current == 0 && !vers.is_empty() {
            n_current = 1;
        }
        VersionVector::from_versions(vers, n_current)
    }

    /// The first (current) version's ASCII form, ignoring any merge suffix.
    pub fn parse_current_version_ascii(s: &str) -> Result<Version, IdentityError> {
        let entry = s.split([',', ';']).next().unwrap_or(s);
        parse_version_ascii(entry.trim())
    }

    /// Parses a vector plus trailing parent-version history entries, as
    /// used when replicating revision history: `history[0]` is the new
    /// vector (or single version), the rest are single parent versions.
    pub fn from_history(history: &[&str]) -> Result<VersionVector, IdentityError> {
        if history.is_empty() {
            return Err(IdentityError::Invalid("empty version history".into()));
        }
        let mut vv = VersionVector::parse_ascii(history[0])?;
        if history.len() == 1 {
            return Ok(vv);
        }
        if vv.count() > 1 {
            return Err(IdentityError::Invalid(
                "invalid version history (vector followed by other history)".into(),
            ));
        }
        if history.len() == 2 {
            let new_version = vv.vers[0];
            vv = VersionVector::parse_ascii(history[1])?;
            vv.add(new_version);
        } else {
            for entry in &history[1..] {
                let parent = parse_version_ascii(entry.trim())?;
                let existing = vv.time_of(parent.author());
                if existing == LogicalTime::NONE {
                    vv.vers.push(parent);
                } else if existing <= parent.time() {
                    return Err(IdentityError::Invalid("invalid version history (increasing logical time)".into()));
                }
            }
        }
        Ok(vv)
    }

    // ---- Binary --------------------------------------------------------

    /// Encodes the compact binary form: a leading `0x00` byte (distinguishing
    /// it from a legacy digest `revid`), then per version a varint time (the
    /// first absolute, the rest signed deltas from the previous) followed by
    /// the author.
    #[must_use]
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = vec![0u8];
        let mut last_time = LogicalTime::NONE;
        for (i, v) in self.vers.iter().enumerate() {
            if i == 0 {
                write_uvarint(&mut out, compress(v.time().as_raw() as i64) as u64);
            } else {
                let delta = last_time.as_raw() as i64 - v.time().as_raw() as i64;
                write_uvarint(&mut out, zigzag_encode(compress(delta)));
            }
            last_time = v.time();
            v.author().write_binary(&mut out, i < self.n_current);
        }
        out
    }

    /// Parses the binary form written by [`Self::to_binary`].
    pub fn parse_binary(data: &[u8]) -> Result<VersionVector, IdentityError> {
        if data.first() != Some(&0) {
            return Err(IdentityError::BadBinary);
        }
        let mut input = &data[1..];
        let mut vers = Vec::new();
        let mut n_current = 0usize;
        let mut time = 0u64;
        let mut n = 0usize;
        while !input.is_empty() {
            let (raw, consumed) = read_uvarint(input).ok_or(IdentityError::BadBinary)?;
            input = &input[consumed..];
            if n == 0 {
                time = decompress(raw as i64) as u64;
            } else {
                let delta = decompress(zigzag_decode(raw));
                time = (time as i64 - delta) as u64;
            }
            let (author, current, consumed) = SourceId::read_binary(input).ok_or(IdentityError::BadBinary)?;
            input = &input[consumed..];
            vers.push(Version::new(LogicalTime::from_raw(time), author));
            if current {
                if n_current == n {
                    n_current += 1;
                } else {
                    return Err(IdentityError::BadBinary);
                }
            }
            n += 1;
        }
        if n_current == 0 && !vers.is_empty() {
            n_current = 1;
        }
        VersionVector::from_versions(vers, n_current)
    }

    /// The current version's binary form only, for the (rare) case a peer
    /// only needs the leading entry without the rest of the vector.
    pub fn parse_current_version_binary(data: &[u8]) -> Result<Version, IdentityError> {
        if data.first() != Some(&0) {
            return Err(IdentityError::BadBinary);
        }
        let input = &data[1..];
        let (raw, consumed) = read_uvarint(input).ok_or(IdentityError::BadBinary)?;
        let time = decompress(raw as i64) as u64;
        let (author, _current, _) = SourceId::read_binary(&input[consumed..]).ok_or(IdentityError::BadBinary)?;
        Ok(Version::new(LogicalTime::from_raw(time), author))
    }
}

fn parse_version_ascii(entry: &str) -> Result<Version, IdentityError> {
    let (time_str, author_str) =
        entry.split_once('@').ok_or_else(|| IdentityError::Invalid(format!("malformed version '{entry}'")))?;
    let time: u64 = time_str.parse().map_err(|_| IdentityError::Invalid(format!("bad time in '{entry}'")))?;
    let author = if author_str == "*" {
        SourceId::ME
    } else {
        SourceId::parse_ascii(author_str)?
    };
    Ok(Version::new(LogicalTime::from_raw(time), author))
}

/// Maps a time whose low 16 bits are zero to `time / 0x8000` (flagged by a
/// clear low bit); otherwise to `2*time + 1`. Saves space in the binary
/// encoding since `logicalTime` values are large but their differences are
/// usually small and round.
fn compress(i: i64) -> i64 {
    if i & 0xFFFF != 0 {
        (2 * i) | 1
    } else {
        i / 0x8000
    }
}

fn decompress(i: i64) -> i64 {
    if i & 1 != 0 {
        i >> 1
    } else {
        i * 0x8000
    }
}

fn zigzag_encode(i: i64) -> u64 {
    ((i << 1) ^ (i >> 63)) as u64
}

fn zigzag_decode(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

trait TruncateByTime {
    fn truncate_by_predicate(&mut self, keep_first: usize, before: LogicalTime);
}

impl TruncateByTime for Vec<Version> {
    fn truncate_by_predicate(&mut self, keep_first: usize, before: LogicalTime) {
        let mut i = keep_first;
        while i < self.len() {
            if self[i].time() < before {
                self.remove(i);
            } else {
                i += 1;
            }
        }
    }
}
