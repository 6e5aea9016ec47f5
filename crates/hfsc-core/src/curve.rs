//! # Service Curve Math
//!
//! Two-segment piecewise-linear service curves and their fixed-point form.
//!
//! A [`ServiceCurve`] is what an operator writes down: burst rate `m1` for the
//! first `d` microseconds of a backlog period, then sustained rate `m2`. The
//! scheduler never evaluates it directly; it works on an [`InternalCurve`]
//! whose slopes are scaled integers so that millions of evaluations produce
//! bit-identical results.
//!
//! ## Units
//!
//! ```text
//!   external   m1, m2 : bits / second        d  : microseconds
//!   internal   sm     : bytes / tick  << SM_SHIFT
//!              ism    : ticks / byte  << ISM_SHIFT
//!              dx     : ticks                dy : bytes
//!   1 tick = 1 µs
//! ```
//!
//! `SM_SHIFT` and `ISM_SHIFT` keep at least four significant digits over the
//! rates operators actually use, and every product in [`seg_x2y`] /
//! [`seg_y2x`] stays below 2^64 for rates up to [`MAX_RATE_BPS`]. Beyond that
//! the arithmetic saturates instead of wrapping.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Scheduler ticks per second. Callers pass time as microseconds.
pub const TICKS_PER_SEC: u64 = 1_000_000;

/// Bits/sec → bytes/tick divisor.
const RATE_DIVISOR: u64 = 8 * TICKS_PER_SEC;

/// Fixed-point shift of a slope (bytes per tick).
pub const SM_SHIFT: u32 = 24;
/// Fixed-point shift of an inverse slope (ticks per byte).
pub const ISM_SHIFT: u32 = 20;

const SM_MASK: u64 = (1 << SM_SHIFT) - 1;
const ISM_MASK: u64 = (1 << ISM_SHIFT) - 1;

/// Inverse slope of a zero-rate segment, and the "never" time.
pub const INFINITY: u64 = u64::MAX;

/// Largest accepted rate, 400 Gbit/s.
pub const MAX_RATE_BPS: u64 = 400_000_000_000;

/// Largest accepted first-segment duration (µs).
pub const MAX_DURATION_US: u64 = u32::MAX as u64;

// ─── ServiceCurve ───────────────────────────────────────────────────────────

/// Configuration-facing service curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceCurve {
    /// Burst rate in bits per second.
    pub m1: u64,
    /// Length of the burst segment in microseconds.
    pub d: u64,
    /// Sustained rate in bits per second.
    pub m2: u64,
}

impl ServiceCurve {
    pub const fn new(m1: u64, d: u64, m2: u64) -> Self {
        ServiceCurve { m1, d, m2 }
    }

    /// A single-segment curve at `rate` bits per second.
    pub const fn linear(rate: u64) -> Self {
        ServiceCurve {
            m1: 0,
            d: 0,
            m2: rate,
        }
    }

    /// Both rates zero. tc treats such a curve as "not given".
    pub const fn is_zero(&self) -> bool {
        self.m1 == 0 && self.m2 == 0
    }

    /// Reject values the fixed-point representation cannot carry. A zero
    /// curve passes; callers decide whether it means "not given".
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.m1 > MAX_RATE_BPS || self.m2 > MAX_RATE_BPS {
            return Err(ConfigError::InvalidCurve {
                reason: "rate above 400 Gbit/s",
            });
        }
        if self.d > MAX_DURATION_US {
            return Err(ConfigError::InvalidCurve {
                reason: "burst duration above u32::MAX microseconds",
            });
        }
        Ok(())
    }
}

// ─── InternalCurve ──────────────────────────────────────────────────────────

/// Fixed-point service curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InternalCurve {
    /// First-segment slope, scaled.
    pub sm1: u64,
    /// First-segment inverse slope, scaled.
    pub ism1: u64,
    /// First-segment length in ticks.
    pub dx: u64,
    /// Bytes covered by the first segment.
    pub dy: u64,
    /// Second-segment slope, scaled.
    pub sm2: u64,
    /// Second-segment inverse slope, scaled.
    pub ism2: u64,
}

impl InternalCurve {
    /// `sm1 <= sm2`: the burst segment is no steeper than the sustained one.
    pub const fn is_convex(&self) -> bool {
        self.sm1 <= self.sm2
    }
}

impl From<&ServiceCurve> for InternalCurve {
    fn from(sc: &ServiceCurve) -> Self {
        to_internal(sc)
    }
}

impl From<&InternalCurve> for ServiceCurve {
    fn from(ic: &InternalCurve) -> Self {
        to_external(ic)
    }
}

/// Convert a configured curve to fixed point, rounding every quantity up.
pub fn to_internal(sc: &ServiceCurve) -> InternalCurve {
    let sm1 = rate_to_slope(sc.m1);
    let dx = duration_to_ticks(sc.d);
    InternalCurve {
        sm1,
        ism1: rate_to_inverse_slope(sc.m1),
        dx,
        dy: seg_x2y(dx, sm1),
        sm2: rate_to_slope(sc.m2),
        ism2: rate_to_inverse_slope(sc.m2),
    }
}

/// Convert back to configuration units, for reporting.
pub fn to_external(ic: &InternalCurve) -> ServiceCurve {
    ServiceCurve {
        m1: slope_to_rate(ic.sm1),
        d: ticks_to_duration(ic.dx),
        m2: slope_to_rate(ic.sm2),
    }
}

// ─── Segment evaluation ─────────────────────────────────────────────────────

/// Bytes served after `x` ticks on a segment of slope `sm`.
///
/// The multiply is split at `SM_SHIFT` so the low half never overflows.
#[inline]
pub fn seg_x2y(x: u64, sm: u64) -> u64 {
    let high = (x >> SM_SHIFT).saturating_mul(sm);
    let low = (x & SM_MASK).saturating_mul(sm) >> SM_SHIFT;
    high.saturating_add(low)
}

/// Ticks needed to serve `y` bytes on a segment of inverse slope `ism`.
#[inline]
pub fn seg_y2x(y: u64, ism: u64) -> u64 {
    if y == 0 {
        0
    } else if ism == INFINITY {
        INFINITY
    } else {
        let high = (y >> ISM_SHIFT).saturating_mul(ism);
        let low = (y & ISM_MASK).saturating_mul(ism) >> ISM_SHIFT;
        high.saturating_add(low)
    }
}

// ─── Unit conversion ────────────────────────────────────────────────────────

fn rate_to_slope(m: u64) -> u64 {
    let m = m.min(MAX_RATE_BPS);
    ((m << SM_SHIFT) + RATE_DIVISOR - 1) / RATE_DIVISOR
}

/// Inverse of a scaled slope, rounded up like the configured ones.
pub fn slope_to_inverse(sm: u64) -> u64 {
    if sm == 0 {
        INFINITY
    } else {
        (1u128 << (SM_SHIFT + ISM_SHIFT)).div_ceil(u128::from(sm)) as u64
    }
}

fn rate_to_inverse_slope(m: u64) -> u64 {
    if m == 0 {
        INFINITY
    } else {
        let m = m.min(MAX_RATE_BPS);
        ((RATE_DIVISOR << ISM_SHIFT) + m - 1) / m
    }
}

fn slope_to_rate(sm: u64) -> u64 {
    sm.saturating_mul(RATE_DIVISOR) >> SM_SHIFT
}

#[inline]
fn duration_to_ticks(d: u64) -> u64 {
    // one tick per microsecond
    d.min(MAX_DURATION_US)
}

#[inline]
fn ticks_to_duration(dx: u64) -> u64 {
    dx
}
