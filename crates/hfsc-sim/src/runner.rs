//! # Simulation Loop
//!
//! ```text
//!   ┌─► admit every arrival due by now ──► Scheduler::enqueue
//!   │   link idle? ──► dequeue_or_arm ──► Packet: link busy for len/rate
//!   │                                 └─► NotReady: watchdog armed
//!   └── advance to min(next arrival, link free, watchdog)
//! ```
//!
//! The link is non-preemptive: a packet occupies it for its full
//! serialization time, and the scheduler is only consulted when it is free.

use std::collections::HashMap;

use anyhow::Context;
use hfsc_core::curve::TICKS_PER_SEC;
use hfsc_core::{ClassId, Dequeue, Scheduler, Verdict, Watchdog};

use crate::clock::TickSource;
use crate::report::{ClassCounters, ClassReport, Report};
use crate::scenario::ScenarioConfig;
use crate::traffic::{PacketHeader, TrafficSource};

/// Records the wakeups the scheduler asks for.
#[derive(Debug, Default)]
struct SimWatchdog {
    wake_at: Option<u64>,
    arms: u64,
    fires: u64,
}

impl Watchdog for SimWatchdog {
    fn arm(&mut self, wake_at: u64) {
        self.wake_at = Some(wake_at);
        self.arms += 1;
    }
}

/// Ticks the link needs to serialize `len` bytes, at least one.
fn transmit_ticks(len: usize, link_rate_bps: u64) -> u64 {
    let bits = len as u128 * 8 * u128::from(TICKS_PER_SEC);
    bits.div_ceil(u128::from(link_rate_bps)).max(1) as u64
}

pub struct Simulation<C: TickSource> {
    cfg: ScenarioConfig,
    scheduler: Scheduler,
    sources: Vec<TrafficSource>,
    clock: C,
    watchdog: SimWatchdog,
    counters: HashMap<ClassId, ClassCounters>,
    link_free_at: u64,
    busy_ticks: u64,
}

impl<C: TickSource> Simulation<C> {
    pub fn new(cfg: ScenarioConfig, clock: C) -> anyhow::Result<Self> {
        let scheduler = cfg
            .hierarchy
            .build(clock.now())
            .context("building class hierarchy")?;
        let sources = cfg
            .sources
            .iter()
            .enumerate()
            .map(|(i, src)| TrafficSource::new(i as u32, src, cfg.seed))
            .collect();
        Ok(Self {
            cfg,
            scheduler,
            sources,
            clock,
            watchdog: SimWatchdog::default(),
            counters: HashMap::new(),
            link_free_at: 0,
            busy_ticks: 0,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run to the configured duration and report.
    pub fn run(mut self) -> Report {
        let end = self.cfg.duration_ms * 1_000;
        tracing::info!(
            seed = self.cfg.seed,
            duration_ms = self.cfg.duration_ms,
            link_rate_bps = self.cfg.link_rate_bps,
            classes = self.scheduler.class_count(),
            sources = self.sources.len(),
            "simulation starting"
        );

        loop {
            let now = self.clock.now();
            if now >= end {
                break;
            }
            self.admit_arrivals(now);
            if self.watchdog.wake_at.is_some_and(|w| w <= now) {
                self.watchdog.wake_at = None;
                self.watchdog.fires += 1;
            }
            if self.link_free_at <= now {
                self.transmit(now);
            }
            let next = self.next_event(now).min(end);
            self.clock.advance_to(next);
        }

        let report = self.report(end);
        tracing::info!(
            sent_packets = report.sent_packets,
            sent_bytes = report.sent_bytes,
            utilization = report.link_utilization,
            watchdog_arms = report.watchdog_arms,
            "simulation finished"
        );
        report
    }

    fn admit_arrivals(&mut self, now: u64) {
        for src in &mut self.sources {
            while src.next_arrival().is_some_and(|at| at <= now) {
                let Some(packet) = src.emit() else {
                    break;
                };
                let len = packet.len();
                let class = src.class();
                let counters = self.counters.entry(class).or_default();
                counters.offered_packets += 1;
                counters.offered_bytes += len as u64;

                if let Verdict::Dropped(reason) = self.scheduler.enqueue(Some(class), packet, now) {
                    counters.dropped_packets += 1;
                    counters.dropped_bytes += len as u64;
                    tracing::trace!(class = %class, len, ?reason, "arrival dropped");
                }
            }
        }
    }

    fn transmit(&mut self, now: u64) {
        match self.scheduler.dequeue_or_arm(now, &mut self.watchdog) {
            Dequeue::Packet {
                class,
                packet,
                realtime,
            } => {
                let ticks = transmit_ticks(packet.len(), self.cfg.link_rate_bps);
                self.link_free_at = now + ticks;
                self.busy_ticks += ticks;
                let delay =
                    PacketHeader::parse(&packet).map_or(0, |h| now.saturating_sub(h.arrival));
                self.counters
                    .entry(class)
                    .or_default()
                    .record_sent(packet.len(), delay, realtime);
            }
            Dequeue::NotReady { wake_at } => {
                tracing::trace!(now, ?wake_at, "scheduler not ready");
            }
            Dequeue::Idle => {}
        }
    }

    /// Earliest tick at which something can change, strictly after `now`.
    fn next_event(&self, now: u64) -> u64 {
        let arrival = self
            .sources
            .iter()
            .filter_map(TrafficSource::next_arrival)
            .min();
        let service = if self.link_free_at > now {
            Some(self.link_free_at)
        } else {
            self.watchdog.wake_at
        };
        let next = match (arrival, service) {
            (Some(a), Some(s)) => a.min(s),
            (a, s) => a.or(s).unwrap_or(u64::MAX),
        };
        next.max(now + 1)
    }

    fn report(&self, end: u64) -> Report {
        let empty = ClassCounters::default();
        let mut classes = Vec::with_capacity(self.scheduler.class_count());
        self.scheduler.walk(|stats| {
            let counters = self.counters.get(&stats.id).unwrap_or(&empty);
            classes.push(ClassReport::new(stats.clone(), counters, end));
        });

        let (sent_packets, sent_bytes) = self
            .counters
            .values()
            .fold((0, 0), |(p, b), c| (p + c.sent_packets, b + c.sent_bytes));
        Report {
            seed: self.cfg.seed,
            duration_ms: self.cfg.duration_ms,
            link_rate_bps: self.cfg.link_rate_bps,
            link_utilization: self.busy_ticks.min(end) as f64 / end as f64,
            sent_packets,
            sent_bytes,
            watchdog_arms: self.watchdog.arms,
            watchdog_fires: self.watchdog.fires,
            classes,
        }
    }
}
