use blip_sequence::SequenceSet;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Add(u64),
    Remove(u64),
    AddRange(u64, u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..50).prop_map(Op::Add),
        (0u64..50).prop_map(Op::Remove),
        (0u64..50, 0u64..10).prop_map(|(s, len)| Op::AddRange(s, s + len)),
    ]
}

fn reference_contains(present: &[bool], s: u64) -> bool {
    present.get(s as usize).copied().unwrap_or(false)
}

proptest! {
    /// `SequenceSet` membership always agrees with a naive boolean-vector
    /// reference implementation, across arbitrary add/remove sequences.
    #[test]
    fn matches_naive_membership(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mut set = SequenceSet::new();
        let mut present = vec![false; 64];
        for op in ops {
            match op {
                Op::Add(s) => {
                    set.add(s);
                    present[s as usize] = true;
                }
                Op::Remove(s) => {
                    set.remove(s);
                    present[s as usize] = false;
                }
                Op::AddRange(s0, s1) => {
                    set.add_range(s0, s1);
                    for s in s0..s1 {
                        present[s as usize] = true;
                    }
                }
            }
        }
        for s in 0u64..64 {
            prop_assert_eq!(set.contains(s), reference_contains(&present, s));
        }
    }

    /// Ranges stay sorted, non-empty and non-adjacent after any sequence of
    /// operations.
    #[test]
    fn ranges_stay_normalized(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mut set = SequenceSet::new();
        for op in ops {
            match op {
                Op::Add(s) => set.add(s),
                Op::Remove(s) => { set.remove(s); }
                Op::AddRange(s0, s1) => set.add_range(s0, s1),
            }
        }
        let ranges: Vec<(u64, u64)> = set.iter().collect();
        for w in ranges.windows(2) {
            prop_assert!(w[0].1 < w[1].0, "ranges must not touch or overlap: {:?}", ranges);
        }
        for &(start, end) in &ranges {
            prop_assert!(start < end, "ranges must be non-empty: {:?}", ranges);
        }
    }
}
