//! # hfsc-sim
//!
//! Run one scenario file and print the JSON report on stdout.
//!
//! ## Usage
//!
//! ```bash
//! # Virtual time, as fast as possible, reproducible
//! hfsc-sim --scenario scenarios/voice_and_bulk.toml --pretty
//!
//! # Wall-clock pacing
//! RUST_LOG=hfsc_core=debug hfsc-sim --scenario scenarios/upper_limit.toml --realtime
//! ```

use std::path::PathBuf;

use hfsc_sim::{Report, ScenarioConfig, Simulation, VirtualClock, WallClock};

struct Args {
    scenario: PathBuf,
    realtime: bool,
    pretty: bool,
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    // ── Parse CLI ───────────────────────────────────────────────
    let args = parse_args()?;
    let cfg = ScenarioConfig::load(&args.scenario)?;
    tracing::info!(
        scenario = %args.scenario.display(),
        realtime = args.realtime,
        "hfsc-sim starting"
    );

    // ── Run ─────────────────────────────────────────────────────
    let report: Report = if args.realtime {
        Simulation::new(cfg, WallClock::new())?.run()
    } else {
        Simulation::new(cfg, VirtualClock::default())?.run()
    };

    let json = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{json}");
    Ok(())
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut scenario = None;
    let mut realtime = false;
    let mut pretty = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--scenario" | "-s" => {
                i += 1;
                let val = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--scenario requires a value"))?;
                scenario = Some(PathBuf::from(val));
            }
            "--realtime" => realtime = true,
            "--pretty" => pretty = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                anyhow::bail!("unknown argument: {other}\nRun with --help for usage.");
            }
        }
        i += 1;
    }

    let Some(scenario) = scenario else {
        anyhow::bail!("no scenario given. Use --scenario <file>.\nRun with --help for usage.");
    };
    Ok(Args {
        scenario,
        realtime,
        pretty,
    })
}

fn print_help() {
    eprintln!(
        "hfsc-sim: single-link H-FSC traffic simulator

USAGE:
    hfsc-sim --scenario <file> [--realtime] [--pretty]

OPTIONS:
    -s, --scenario <file>   Scenario TOML (link, hierarchy, sources)
        --realtime          Pace the run with the wall clock
        --pretty            Pretty-print the JSON report
    -h, --help              Show this help

ENVIRONMENT:
    RUST_LOG                Log filter (default: info), logs go to stderr"
    );
}
