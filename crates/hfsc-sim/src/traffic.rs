//! Seeded constant-rate traffic sources.
//!
//! Every generated packet starts with a small header so the receiving end
//! of the simulated link can attribute it without side tables:
//!
//! ```text
//!   0        8          12      16
//!   ┌────────┬──────────┬───────┬──────────── ─ ─
//!   │arrival │ source   │ seq   │ zero padding
//!   │ u64 µs │ u32      │ u32   │
//!   └────────┴──────────┴───────┴──────────── ─ ─
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hfsc_core::ClassId;
use rand::RngExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::scenario::SourceConfig;

/// Bytes of header at the front of every generated packet.
pub const HEADER_LEN: usize = 16;

/// Header fields of a generated packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub arrival: u64,
    pub source: u32,
    pub seq: u32,
}

impl PacketHeader {
    /// Read the header back from a packet built by [`TrafficSource::emit`].
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < HEADER_LEN {
            return None;
        }
        let mut buf = packet;
        Some(Self {
            arrival: buf.get_u64(),
            source: buf.get_u32(),
            seq: buf.get_u32(),
        })
    }
}

/// Packets at `rate_bps` between `start_ms` and `stop_ms`.
///
/// Inter-arrival times follow from the size of the packet just sent, so the
/// long-run rate is exact whatever the size jitter.
#[derive(Debug)]
pub struct TrafficSource {
    index: u32,
    class: ClassId,
    rate_bps: u64,
    packet_size: usize,
    size_jitter: usize,
    /// Next arrival in fractional µs.
    next_at: f64,
    stop_at: u64,
    seq: u32,
    rng: StdRng,
}

impl TrafficSource {
    pub fn new(index: u32, cfg: &SourceConfig, seed: u64) -> Self {
        // one independent stream per source
        let rng = StdRng::seed_from_u64(
            seed ^ (u64::from(index) + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );
        Self {
            index,
            class: cfg.class,
            rate_bps: cfg.rate_bps,
            packet_size: cfg.packet_size,
            size_jitter: cfg.size_jitter,
            next_at: (cfg.start_ms * 1_000) as f64,
            stop_at: cfg.stop_ms * 1_000,
            seq: 0,
            rng,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Tick of the next packet, `None` once the source has stopped.
    pub fn next_arrival(&self) -> Option<u64> {
        let at = self.next_at.ceil() as u64;
        (at < self.stop_at).then_some(at)
    }

    /// Produce the packet due at [`Self::next_arrival`] and schedule the one
    /// after it.
    pub fn emit(&mut self) -> Option<Bytes> {
        let arrival = self.next_arrival()?;
        let len = if self.size_jitter == 0 {
            self.packet_size
        } else {
            self.rng.random_range(
                self.packet_size - self.size_jitter..=self.packet_size + self.size_jitter,
            )
        };

        let mut buf = BytesMut::with_capacity(len);
        buf.put_u64(arrival);
        buf.put_u32(self.index);
        buf.put_u32(self.seq);
        buf.resize(len, 0);

        self.seq = self.seq.wrapping_add(1);
        self.next_at += (len * 8) as f64 * 1e6 / self.rate_bps as f64;
        Some(buf.freeze())
    }
}
