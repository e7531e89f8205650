//! Property: for any sequence of `now()`/`see(t)` calls on one clock, the
//! values returned by `now()` strictly increase.

use blip_hlc::{FakeClockSource, HybridClock, LogicalTime, WallTime};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Now,
    See(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Now),
        (0x1_7100_0000_0000u64..0x1_8000_0000_0000u64).prop_map(Op::See),
    ]
}

proptest! {
    #[test]
    fn now_values_strictly_increase(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let clock = HybridClock::with_source(Box::new(FakeClockSource::new(0x1_7200_0000_0000, 0x1_0000)));
        let mut prev = LogicalTime::NONE;
        for op in ops {
            match op {
                Op::Now => {
                    let t = clock.now();
                    prop_assert!(t > prev);
                    prev = t;
                }
                Op::See(wall) => {
                    let seen = LogicalTime::from_parts(WallTime::from_nanos(wall), 0);
                    let _ = clock.see(seen);
                    // `see` never decreases what a subsequent `now()` returns.
                    let t = clock.now();
                    prop_assert!(t > prev);
                    prev = t;
                }
            }
        }
    }
}
