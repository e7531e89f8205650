//! Causal revision identity: [`SourceId`] (a peer identifier), [`Version`]
//! (one peer's logical timestamp), and [`VersionVector`] (the ordered
//! collection of versions naming a revision's full causal history).

mod source_id;
mod varint;
mod vector;
mod version;

pub use blip_hlc::LogicalTime;
pub use source_id::SourceId;
pub use vector::VersionVector;
pub use version::{Version, VersionOrder};

/// Errors arising from parsing or combining identity values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    /// A base64 `SourceId` string was malformed.
    #[error("invalid base64 source id '{0}'")]
    BadAscii(String),

    /// A binary-encoded `VersionVector` was truncated or malformed.
    #[error("invalid binary version vector")]
    BadBinary,

    /// A `VersionVector` violated a structural invariant, or an operation's
    /// precondition was not met.
    #[error("invalid version vector: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use blip_hlc::HybridClock;

    fn clock() -> HybridClock {
        HybridClock::new(0x1_0000_0000_0000)
    }

    #[test]
    fn single_version_round_trips_ascii_and_binary() {
        let jens = SourceId::from_label("jens");
        let v = Version::new(LogicalTime::from_raw(19), jens);
        let vv = VersionVector::from_versions(vec![v], 1).unwrap();

        let ascii = vv.to_ascii();
        let parsed = VersionVector::parse_ascii(&ascii).unwrap();
        assert_eq!(parsed, vv);

        let binary = vv.to_binary();
        let parsed_bin = VersionVector::parse_binary(&binary).unwrap();
        assert_eq!(parsed_bin, vv);
    }

    #[test]
    fn compare_to_detects_conflict() {
        let jens = SourceId::from_label("jens");
        let eve = SourceId::from_label("eve");
        let base = VersionVector::from_versions(vec![Version::new(LogicalTime::from_raw(10), jens)], 1).unwrap();
        let mut a = base.clone();
        let mut b = base.clone();
        assert!(a.add(Version::new(LogicalTime::from_raw(20), jens)));
        assert!(b.add(Version::new(LogicalTime::from_raw(5), eve)));
        assert!(a.compare_to(&b).is_conflicting());
        assert!(b.compare_to(&a).is_conflicting());
    }

    #[test]
    fn merge_combines_both_parents_and_stays_newer_than_both() {
        let jens = SourceId::from_label("jens");
        let eve = SourceId::from_label("eve");
        let base = VersionVector::from_versions(vec![Version::new(LogicalTime::from_raw(10), jens)], 1).unwrap();
        let mut a = base.clone();
        let mut b = base;
        a.add(Version::new(LogicalTime::from_raw(20), jens));
        b.add(Version::new(LogicalTime::from_raw(5), eve));

        let clock = clock();
        let merged = VersionVector::merge(&a, &b, &clock).unwrap();
        assert!(merged.is_merge());
        assert!(merged.compare_to(&a).is_newer());
        assert!(merged.compare_to(&b).is_newer());
        assert!(merged.merges_same_versions(&merged));
    }

    #[test]
    fn delta_round_trips_through_apply() {
        let jens = SourceId::from_label("jens");
        let base = VersionVector::from_versions(vec![Version::new(LogicalTime::from_raw(10), jens)], 1).unwrap();
        let mut ahead = base.clone();
        ahead.add(Version::new(LogicalTime::from_raw(30), jens));

        let delta = ahead.delta_from(&base).unwrap();
        let rebuilt = base.by_applying_delta(&delta).unwrap();
        assert_eq!(rebuilt.time_of(jens), ahead.time_of(jens));
    }

    #[test]
    fn make_local_then_absolute_round_trips() {
        let jens = SourceId::from_label("jens");
        let mut vv = VersionVector::from_versions(vec![Version::new(LogicalTime::from_raw(10), jens)], 1).unwrap();
        vv.make_local(jens).unwrap();
        assert!(!vv.is_absolute());
        vv.make_absolute(jens).unwrap();
        assert!(vv.is_absolute());
        assert_eq!(vv.time_of(jens), LogicalTime::from_raw(10));
    }

    #[test]
    fn make_local_rejects_existing_me_entry() {
        let mut vv = VersionVector::from_versions(vec![Version::new(LogicalTime::from_raw(10), SourceId::ME)], 1)
            .unwrap();
        assert!(vv.make_local(SourceId::from_label("jens")).is_err());
    }

    #[test]
    fn prune_keeps_merge_prefix_and_drops_old_parents() {
        let jens = SourceId::from_label("jens");
        let eve = SourceId::from_label("eve");
        let ada = SourceId::from_label("ada");
        let base = VersionVector::from_versions(vec![Version::new(LogicalTime::from_raw(10), jens)], 1).unwrap();
        let mut a = base.clone();
        let mut b = base;
        a.add(Version::new(LogicalTime::from_raw(20), eve));
        b.add(Version::new(LogicalTime::from_raw(5), ada));
        let merged = VersionVector::merge(&a, &b, &clock()).unwrap();

        let mut pruned = merged.clone();
        pruned.prune(0, LogicalTime::END_OF_TIME);
        assert_eq!(pruned.count(), pruned.n_current());
        assert!(pruned.is_merge());
    }

    #[test]
    fn from_history_applies_parent_versions_in_order() {
        let jens = SourceId::from_label("jens");
        let eve = SourceId::from_label("eve");
        let current = format!("20@{jens}");
        let parent = format!("10@{eve}");
        let vv = VersionVector::from_history(&[&current, &parent]).unwrap();
        assert_eq!(vv.time_of(jens), LogicalTime::from_raw(20));
        assert_eq!(vv.time_of(eve), LogicalTime::from_raw(10));
    }
}
