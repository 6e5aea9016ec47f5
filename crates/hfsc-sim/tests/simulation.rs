//! Whole-scenario runs against the bundled scenario files.

use hfsc_core::ClassId;
use hfsc_sim::{Report, ScenarioConfig, Simulation, VirtualClock, WallClock};

fn scenario(name: &str) -> ScenarioConfig {
    let path = format!("{}/scenarios/{name}", env!("CARGO_MANIFEST_DIR"));
    ScenarioConfig::load(path).unwrap()
}

fn run(cfg: ScenarioConfig) -> Report {
    Simulation::new(cfg, VirtualClock::default()).unwrap().run()
}

#[test]
fn virtual_runs_are_reproducible() {
    let a = serde_json::to_string(&run(scenario("voice_and_bulk.toml"))).unwrap();
    let b = serde_json::to_string(&run(scenario("voice_and_bulk.toml"))).unwrap();
    assert_eq!(a, b);

    let mut other = scenario("voice_and_bulk.toml");
    other.seed += 1;
    let c = serde_json::to_string(&run(other)).unwrap();
    assert_ne!(a, c);
}

#[test]
fn voice_is_served_in_real_time() {
    let report = run(scenario("voice_and_bulk.toml"));
    let voice = report.class(ClassId(10)).unwrap();

    // one frame every 20 ms for 2 s
    assert_eq!(voice.offered_packets, 100);
    assert_eq!(voice.dropped_packets, 0);
    assert_eq!(voice.realtime_packets, voice.sent_packets);
    assert!(voice.sent_packets >= 99);
    // never waits longer than one full-size data packet on the wire
    assert!(voice.max_delay_us <= 1_500, "voice delay {}", voice.max_delay_us);
}

#[test]
fn data_classes_split_the_rest_by_share() {
    let report = run(scenario("voice_and_bulk.toml"));
    let web = report.class(ClassId(21)).unwrap();
    let bulk = report.class(ClassId(22)).unwrap();

    // bulk joins at 100 ms and then gets a third of the data share
    assert!(
        (3_000_000.0..3_300_000.0).contains(&bulk.throughput_bps),
        "bulk {}",
        bulk.throughput_bps
    );
    assert!(
        (6_500_000.0..7_000_000.0).contains(&web.throughput_bps),
        "web {}",
        web.throughput_bps
    );
    assert_eq!(web.realtime_packets, 0);
    assert!(web.dropped_packets > 0 && bulk.dropped_packets > 0);
    assert!(report.link_utilization > 0.98, "{}", report.link_utilization);

    let data = report.class(ClassId(20)).unwrap();
    assert!(!data.leaf);
    assert_eq!(
        data.scheduler.total_bytes,
        web.scheduler.total_bytes + bulk.scheduler.total_bytes
    );
}

#[test]
fn upper_limit_leaves_the_link_idle() {
    let report = run(scenario("upper_limit.toml"));
    let class = report.class(ClassId(2)).unwrap();

    assert!(
        (1_950_000.0..2_050_000.0).contains(&class.throughput_bps),
        "throughput {}",
        class.throughput_bps
    );
    assert!(report.link_utilization < 0.25);
    assert!(report.watchdog_arms > 0);
    assert!(report.watchdog_fires > 0);
    assert!(class.dropped_packets > 0);
}

#[test]
fn wall_clock_run_completes() {
    let mut cfg = scenario("upper_limit.toml");
    cfg.duration_ms = 50;
    for src in &mut cfg.sources {
        src.stop_ms = 50;
    }
    let report = Simulation::new(cfg, WallClock::new()).unwrap().run();
    assert!(report.sent_packets > 0);
}
