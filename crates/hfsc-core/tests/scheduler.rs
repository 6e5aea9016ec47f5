//! End-to-end scheduling behaviour: fairness, real-time guarantees, upper
//! limits and class removal under load.

use bytes::Bytes;
use hfsc_core::{ClassCurves, ClassId, Dequeue, Scheduler, ServiceCurve, Verdict};

const ROOT: ClassId = ClassId(1);
const A: ClassId = ClassId(10);
const B: ClassId = ClassId(20);

/// 8 Mbit/s, one byte per microsecond.
const BYTE_PER_US: u64 = 8_000_000;

fn pkt(len: usize) -> Bytes {
    Bytes::from(vec![0u8; len])
}

fn ls(rate: u64) -> ClassCurves {
    ClassCurves::link_share(ServiceCurve::linear(rate))
}

fn served_class(d: &Dequeue) -> Option<ClassId> {
    match d {
        Dequeue::Packet { class, .. } => Some(*class),
        _ => None,
    }
}

/// Two equal link-sharing classes with ten packets each.
fn two_equal_classes() -> Scheduler {
    let mut s = Scheduler::new(ROOT);
    s.create_class(A, ROOT, ls(BYTE_PER_US), 0).unwrap();
    s.create_class(B, ROOT, ls(BYTE_PER_US), 0).unwrap();
    for _ in 0..10 {
        assert_eq!(s.enqueue(Some(A), pkt(1_000), 0), Verdict::Queued);
    }
    for _ in 0..10 {
        assert_eq!(s.enqueue(Some(B), pkt(1_000), 0), Verdict::Queued);
    }
    s
}

// ─── Link-sharing ───────────────────────────────────────────────────────────

#[test]
fn equal_shares_interleave() {
    let mut s = two_equal_classes();
    s.check_invariants();

    let mut order = Vec::new();
    let (mut a, mut b) = (0i64, 0i64);
    loop {
        let d = s.dequeue(0);
        let Some(class) = served_class(&d) else {
            assert_eq!(d, Dequeue::Idle);
            break;
        };
        if class == A {
            a += 1;
        } else {
            b += 1;
        }
        assert!((a - b).abs() <= 1, "skew {a} vs {b}");
        order.push(class);
        s.check_invariants();
    }

    assert_eq!(order.len(), 20);
    let expected: Vec<ClassId> = (0..20).map(|i| if i % 2 == 0 { A } else { B }).collect();
    assert_eq!(order, expected);
}

#[test]
fn shares_follow_curve_ratio() {
    let mut s = Scheduler::new(ROOT);
    s.create_class(A, ROOT, ls(3 * BYTE_PER_US), 0).unwrap();
    s.create_class(B, ROOT, ls(BYTE_PER_US), 0).unwrap();
    for _ in 0..200 {
        s.enqueue(Some(A), pkt(500), 0);
        s.enqueue(Some(B), pkt(500), 0);
    }

    let mut counts = [0u32; 2];
    for _ in 0..200 {
        match served_class(&s.dequeue(0)) {
            Some(c) if c == A => counts[0] += 1,
            Some(_) => counts[1] += 1,
            None => panic!("ran dry"),
        }
    }
    // 3:1 within a packet or two
    assert!((counts[0] as i64 - 150).abs() <= 2, "{counts:?}");
    s.check_invariants();
}

#[test]
fn nested_shares_split_at_each_level() {
    // root ── 2 (1x) ── 21 (1x)
    //     │         └── 22 (1x)
    //     └── 3 (1x)
    let mut s = Scheduler::new(ROOT);
    s.create_class(ClassId(2), ROOT, ls(BYTE_PER_US), 0).unwrap();
    s.create_class(ClassId(3), ROOT, ls(BYTE_PER_US), 0).unwrap();
    s.create_class(ClassId(21), ClassId(2), ls(BYTE_PER_US), 0).unwrap();
    s.create_class(ClassId(22), ClassId(2), ls(BYTE_PER_US), 0).unwrap();
    for _ in 0..100 {
        for id in [3, 21, 22] {
            s.enqueue(Some(ClassId(id)), pkt(1_000), 0);
        }
    }

    let mut bytes = std::collections::HashMap::new();
    for _ in 0..120 {
        let id = served_class(&s.dequeue(0)).unwrap();
        *bytes.entry(id.0).or_insert(0u64) += 1_000;
    }
    // class 3 gets half, 21 and 22 a quarter each
    assert!((bytes[&3] as i64 - 60_000).abs() <= 2_000, "{bytes:?}");
    assert!((bytes[&21] as i64 - 30_000).abs() <= 2_000, "{bytes:?}");
    assert!((bytes[&22] as i64 - 30_000).abs() <= 2_000, "{bytes:?}");
    s.check_invariants();
}

// ─── Real-time ──────────────────────────────────────────────────────────────

#[test]
fn realtime_packet_waits_for_its_eligible_time() {
    let mut s = Scheduler::new(ROOT);
    // 1000 bytes per second
    s.create_class(A, ROOT, ClassCurves::realtime(ServiceCurve::linear(8_000)), 0)
        .unwrap();
    s.enqueue(Some(A), pkt(1_000), 0);
    s.enqueue(Some(A), pkt(1_000), 0);

    assert!(matches!(s.dequeue(0), Dequeue::Packet { realtime: true, .. }));
    assert_eq!(s.class_stats(A).unwrap().eligible_time, 1_000_000);
    for now in [1, 10_000, 999_999] {
        assert_eq!(
            s.dequeue(now),
            Dequeue::NotReady {
                wake_at: Some(1_000_000)
            }
        );
    }
    assert!(matches!(
        s.dequeue(1_000_000),
        Dequeue::Packet { realtime: true, .. }
    ));
    s.check_invariants();
}

#[test]
fn realtime_guarantee_holds_against_bulk_traffic() {
    // 80 Mbit/s link: 10 bytes per microsecond
    let link_bytes_per_us = 10;
    let mut s = Scheduler::with_queue_limit(ROOT, 10_000);
    s.create_class(A, ROOT, ClassCurves::realtime(ServiceCurve::linear(BYTE_PER_US)), 0)
        .unwrap();
    s.create_class(B, ROOT, ls(80_000_000), 0).unwrap();
    for _ in 0..2_000 {
        s.enqueue(Some(A), pkt(1_000), 0);
        s.enqueue(Some(B), pkt(1_000), 0);
    }

    let mut now = 0u64;
    let mut rt_bytes = 0u64;
    while now < 200_000 {
        match s.dequeue(now) {
            Dequeue::Packet {
                class, packet, realtime,
            } => {
                if class == A {
                    assert!(realtime);
                    rt_bytes += packet.len() as u64;
                }
                now += packet.len() as u64 / link_bytes_per_us;
            }
            other => panic!("link idled at {now}: {other:?}"),
        }
        // one byte per microsecond, at most two packets behind
        assert!(rt_bytes + 2_000 >= now, "at {now} only {rt_bytes} bytes");
    }
    s.check_invariants();
}

#[test]
fn concave_curve_serves_burst_first() {
    let mut s = Scheduler::new(ROOT);
    // 80 Mbit/s for 1 ms, then 8 Mbit/s
    let curves = ClassCurves::realtime(ServiceCurve::new(80_000_000, 1_000, 8_000_000));
    s.create_class(A, ROOT, curves, 0).unwrap();
    for _ in 0..20 {
        s.enqueue(Some(A), pkt(1_000), 0);
    }
    let a = s.class_stats(A).unwrap();
    // first packet due after 100 µs at the burst rate
    assert_eq!((a.eligible_time, a.deadline), (0, 100));

    s.dequeue(0);
    let a = s.class_stats(A).unwrap();
    assert_eq!(a.deadline, 200);
    s.check_invariants();
}

// ─── Upper limit ────────────────────────────────────────────────────────────

#[test]
fn upper_limit_caps_link_sharing() {
    let mut s = Scheduler::new(ROOT);
    let curves = ls(80_000_000).with_usc(ServiceCurve::linear(BYTE_PER_US));
    s.create_class(A, ROOT, curves, 0).unwrap();
    for _ in 0..150 {
        s.enqueue(Some(A), pkt(1_000), 0);
    }

    let mut served = 0u64;
    let mut wakeups = 0;
    let mut now = 0;
    while now <= 100_000 {
        loop {
            match s.dequeue(now) {
                Dequeue::Packet { packet, .. } => served += packet.len() as u64,
                Dequeue::NotReady { wake_at } => {
                    assert!(wake_at.is_some_and(|w| w > now));
                    wakeups += 1;
                    break;
                }
                Dequeue::Idle => panic!("queue ran dry"),
            }
        }
        assert!(served <= now + 1_000, "at {now}: {served} bytes");
        assert!(served + 2_000 >= now, "at {now}: {served} bytes");
        now += 100;
    }
    assert!(wakeups > 0);
    s.check_invariants();
}

// ─── Deletion and periods ───────────────────────────────────────────────────

#[test]
fn deleting_backlogged_class_drains_it() {
    let mut s = two_equal_classes();
    for _ in 0..3 {
        s.dequeue(0);
    }
    let b = s.class_stats(B).unwrap();
    assert_eq!(b.virtual_time, 1_000);
    assert_eq!(b.queue_len, 9);

    s.delete_class(B).unwrap();
    s.check_invariants();

    let root = s.class_stats(ROOT).unwrap();
    assert_eq!(root.cvt_max, 1_000);
    assert_eq!(root.nactive, 1);
    assert_eq!(s.active_children(ROOT), Some(vec![A]));
    assert!(!s.eligible_classes().contains(&B));
    assert!(s.class_stats(B).is_none());
    assert_eq!(s.backlog(), 8);
}

#[test]
fn virtual_time_moves_forward_across_periods() {
    let mut s = Scheduler::new(ROOT);
    s.create_class(A, ROOT, ls(BYTE_PER_US), 0).unwrap();
    s.create_class(B, ROOT, ls(2 * BYTE_PER_US), 0).unwrap();

    let mut starts = [0u64; 2];
    let mut periods = [0u64; 2];
    let mut now = 0;
    for round in 0..20 {
        for (i, id) in [A, B].into_iter().enumerate() {
            for _ in 0..(round % 3 + 1) {
                s.enqueue(Some(id), pkt(700), now);
            }
            let st = s.class_stats(id).unwrap();
            if st.vt_period != periods[i] {
                assert!(st.period_start_vt >= starts[i], "class {id} round {round}");
                starts[i] = st.period_start_vt;
                periods[i] = st.vt_period;
            }
        }
        // drain completely so every round starts new periods
        while let Dequeue::Packet { packet, .. } = s.dequeue(now) {
            now += packet.len() as u64;
        }
        s.check_invariants();
    }
    assert!(periods.iter().all(|&p| p == 20));
    assert!(starts[0] > 0 && starts[1] > 0);
}
