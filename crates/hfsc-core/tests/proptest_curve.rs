//! Property-based tests for service-curve arithmetic.
//!
//! Conversions between configured and fixed-point curves must be lossless
//! over the accepted range, and merging a new curve into a running one must
//! never promise more service than the running curve already did.

use hfsc_core::curve::{to_external, to_internal, ServiceCurve, MAX_DURATION_US, MAX_RATE_BPS};
use hfsc_core::runtime_curve::RuntimeCurve;
use proptest::prelude::*;

/// Rounding of the split multiply, a few bytes at most.
const SLACK: u64 = 3;

// ─── Strategies ─────────────────────────────────────────────────────────────

fn rate() -> impl Strategy<Value = u64> {
    prop_oneof![
        Just(0u64),
        1u64..100_000,
        100_000u64..10_000_000_000,
        Just(MAX_RATE_BPS),
        0u64..=MAX_RATE_BPS,
    ]
}

fn curve() -> impl Strategy<Value = ServiceCurve> {
    (rate(), 0u64..10_000_000, rate()).prop_map(|(m1, d, m2)| ServiceCurve::new(m1, d, m2))
}

// ─── Conversion ─────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn conversion_roundtrip(m1 in rate(), d in 0u64..=MAX_DURATION_US, m2 in rate()) {
        let sc = ServiceCurve::new(m1, d, m2);
        prop_assert_eq!(to_external(&to_internal(&sc)), sc);
    }

    #[test]
    fn evaluation_is_monotone(sc in curve(), x0 in 0u64..1 << 40, y0 in 0u64..1 << 40,
                              a in 0u64..1 << 34, b in 0u64..1 << 34) {
        let rc = RuntimeCurve::anchor(&to_internal(&sc), x0, y0);
        let (lo, hi) = (a.min(b), a.max(b));
        prop_assert!(rc.x2y(x0 + lo) <= rc.x2y(x0 + hi));
        prop_assert!(rc.x2y(x0 + lo) >= y0);
    }
}

// ─── compose_min ────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn compose_min_never_raises(
        running in curve(),
        merged in curve(),
        x0 in 0u64..1 << 40,
        y0 in 0u64..1 << 40,
        gap in 0u64..1 << 30,
        delta in -50_000i64..50_000,
        points in prop::collection::vec(0u64..1 << 32, 1..16),
    ) {
        let old = to_internal(&running);
        let new = to_internal(&merged);
        let before = RuntimeCurve::anchor(&old, x0, y0);

        let x1 = x0 + gap;
        let y1 = before.x2y(x1).saturating_add_signed(delta);

        let mut after = before;
        after.compose_min(&new, x1, y1);

        // a convex curve merged into itself may keep the earlier anchor even
        // where the new start would be lower later on
        let same_shape = old.sm1 == new.sm1 && old.sm2 == new.sm2 && old.dx == new.dx;
        let below_new = !(same_shape && new.is_convex());
        let fresh = RuntimeCurve::anchor(&new, x1, y1);

        prop_assert!(after.x2y(x1) <= y1.min(before.x2y(x1)));
        for p in points {
            let x = x1 + p;
            prop_assert!(
                after.x2y(x) <= before.x2y(x) + SLACK,
                "at {}: after {} > before {}", x, after.x2y(x), before.x2y(x)
            );
            if below_new {
                prop_assert!(
                    after.x2y(x) <= fresh.x2y(x) + SLACK,
                    "at {}: after {} > new {}", x, after.x2y(x), fresh.x2y(x)
                );
            }
        }
    }

    #[test]
    fn compose_min_with_itself_never_raises(
        sc in curve(),
        x0 in 0u64..1 << 40,
        y0 in 0u64..1 << 40,
        gap in 0u64..1 << 30,
        delta in -50_000i64..50_000,
        points in prop::collection::vec(0u64..1 << 32, 1..16),
    ) {
        let ic = to_internal(&sc);
        let before = RuntimeCurve::anchor(&ic, x0, y0);

        let x1 = x0 + gap;
        let y1 = before.x2y(x1).saturating_add_signed(delta);

        let mut after = before;
        after.compose_min(&ic, x1, y1);

        for p in points {
            let x = x1 + p;
            prop_assert!(after.x2y(x) <= before.x2y(x) + SLACK);
        }
    }

    #[test]
    fn compose_min_is_idempotent_at_same_point(
        sc in curve(),
        x0 in 0u64..1 << 40,
        y0 in 0u64..1 << 40,
    ) {
        let ic = to_internal(&sc);
        let mut rc = RuntimeCurve::anchor(&ic, x0, y0);
        rc.compose_min(&ic, x0, y0);
        prop_assert_eq!(rc.x2y(x0), y0);
        let once = rc;
        rc.compose_min(&ic, x0, y0);
        prop_assert_eq!(rc, once);
    }
}
