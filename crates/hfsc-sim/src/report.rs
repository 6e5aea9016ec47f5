//! Simulation results.

use hfsc_core::{ClassId, ClassStats};
use serde::Serialize;

/// Running per-class counters kept by the simulation loop.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClassCounters {
    pub offered_packets: u64,
    pub offered_bytes: u64,
    pub sent_packets: u64,
    pub sent_bytes: u64,
    pub realtime_packets: u64,
    pub link_share_packets: u64,
    pub dropped_packets: u64,
    pub dropped_bytes: u64,
    pub delay_sum_us: u64,
    pub max_delay_us: u64,
}

impl ClassCounters {
    pub fn record_sent(&mut self, len: usize, delay_us: u64, realtime: bool) {
        self.sent_packets += 1;
        self.sent_bytes += len as u64;
        if realtime {
            self.realtime_packets += 1;
        } else {
            self.link_share_packets += 1;
        }
        self.delay_sum_us += delay_us;
        self.max_delay_us = self.max_delay_us.max(delay_us);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassReport {
    pub id: ClassId,
    pub parent: Option<ClassId>,
    pub leaf: bool,
    pub offered_packets: u64,
    pub offered_bytes: u64,
    pub sent_packets: u64,
    pub sent_bytes: u64,
    /// Bits per second over the whole run.
    pub throughput_bps: f64,
    pub realtime_packets: u64,
    pub link_share_packets: u64,
    /// Refused at enqueue.
    pub dropped_packets: u64,
    pub dropped_bytes: u64,
    /// Arrival to start of transmission.
    pub max_delay_us: u64,
    pub mean_delay_us: f64,
    /// Packets still queued when the run ended.
    pub backlog: usize,
    /// Scheduler state at the end of the run.
    pub scheduler: ClassStats,
}

impl ClassReport {
    pub(crate) fn new(stats: ClassStats, counters: &ClassCounters, duration_us: u64) -> Self {
        let mean_delay_us = if counters.sent_packets == 0 {
            0.0
        } else {
            counters.delay_sum_us as f64 / counters.sent_packets as f64
        };
        Self {
            id: stats.id,
            parent: stats.parent,
            leaf: stats.leaf,
            offered_packets: counters.offered_packets,
            offered_bytes: counters.offered_bytes,
            sent_packets: counters.sent_packets,
            sent_bytes: counters.sent_bytes,
            throughput_bps: (counters.sent_bytes * 8) as f64 * 1e6 / duration_us as f64,
            realtime_packets: counters.realtime_packets,
            link_share_packets: counters.link_share_packets,
            dropped_packets: counters.dropped_packets,
            dropped_bytes: counters.dropped_bytes,
            max_delay_us: counters.max_delay_us,
            mean_delay_us,
            backlog: stats.queue_len,
            scheduler: stats,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub seed: u64,
    pub duration_ms: u64,
    pub link_rate_bps: u64,
    /// Fraction of the run the link spent transmitting.
    pub link_utilization: f64,
    pub sent_packets: u64,
    pub sent_bytes: u64,
    pub watchdog_arms: u64,
    pub watchdog_fires: u64,
    /// Every class, parents before children.
    pub classes: Vec<ClassReport>,
}

impl Report {
    pub fn class(&self, id: ClassId) -> Option<&ClassReport> {
        self.classes.iter().find(|c| c.id == id)
    }
}
