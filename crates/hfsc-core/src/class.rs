//! # Class Tree
//!
//! Classes live in a `slab::Slab` arena owned by the scheduler and refer to
//! each other by slot index. The externally visible name of a class is its
//! [`ClassId`], which stays stable while slots get reused.
//!
//! ```text
//!                 root (interior, never queues)
//!                /                \
//!          interior               leaf ── LeafQueue
//!          /      \
//!       leaf      leaf
//! ```
//!
//! Each class carries up to three curves. Per kind, the configured
//! [`InternalCurve`] is kept next to the runtime curves derived from it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::curve::{to_internal, InternalCurve, ServiceCurve};
use crate::error::ConfigError;
use crate::list::ActiveList;
use crate::queue::LeafQueue;
use crate::runtime_curve::RuntimeCurve;

/// Stable class identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClassId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ClassId {
    fn from(id: u32) -> Self {
        ClassId(id)
    }
}

// ─── Curve sets ─────────────────────────────────────────────────────────────

/// Curves requested for a class. `None` and all-zero curves mean
/// "not given"; on change they leave the existing curve in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassCurves {
    /// Real-time curve.
    pub rsc: Option<ServiceCurve>,
    /// Link-sharing curve.
    pub fsc: Option<ServiceCurve>,
    /// Upper-limit curve.
    pub usc: Option<ServiceCurve>,
}

impl ClassCurves {
    pub fn realtime(sc: ServiceCurve) -> Self {
        ClassCurves {
            rsc: Some(sc),
            ..Default::default()
        }
    }

    pub fn link_share(sc: ServiceCurve) -> Self {
        ClassCurves {
            fsc: Some(sc),
            ..Default::default()
        }
    }

    pub fn with_rsc(mut self, sc: ServiceCurve) -> Self {
        self.rsc = Some(sc);
        self
    }

    pub fn with_fsc(mut self, sc: ServiceCurve) -> Self {
        self.fsc = Some(sc);
        self
    }

    pub fn with_usc(mut self, sc: ServiceCurve) -> Self {
        self.usc = Some(sc);
        self
    }

    /// Drop zero curves and range-check the rest.
    pub fn normalize(&self) -> Result<ClassCurves, ConfigError> {
        fn given(sc: Option<ServiceCurve>) -> Result<Option<ServiceCurve>, ConfigError> {
            match sc {
                Some(sc) if !sc.is_zero() => {
                    sc.validate()?;
                    Ok(Some(sc))
                }
                _ => Ok(None),
            }
        }
        Ok(ClassCurves {
            rsc: given(self.rsc)?,
            fsc: given(self.fsc)?,
            usc: given(self.usc)?,
        })
    }
}

/// Real-time state: deadline curve plus the eligible curve derived from it.
#[derive(Debug, Clone, Copy)]
pub struct RealTime {
    pub curve: InternalCurve,
    pub deadline: RuntimeCurve,
    pub eligible: RuntimeCurve,
}

impl RealTime {
    /// Deadline curve anchored at `(x, y)`.
    pub fn new(curve: InternalCurve, x: u64, y: u64) -> Self {
        let mut rt = RealTime {
            curve,
            deadline: RuntimeCurve::anchor(&curve, x, y),
            eligible: RuntimeCurve::default(),
        };
        rt.derive_eligible();
        rt
    }

    /// Switch to `curve` started at `(x, y)`, keeping whatever the current
    /// deadline curve already promises less of.
    pub fn merge(&mut self, curve: InternalCurve, x: u64, y: u64) {
        self.curve = curve;
        self.deadline.compose_min(&curve, x, y);
        self.derive_eligible();
    }

    /// The eligible curve follows the deadline curve; when the deadline
    /// curve is convex it runs at the sustained rate from the anchor.
    pub fn derive_eligible(&mut self) {
        self.eligible = self.deadline;
        if self.deadline.is_convex() {
            self.eligible.flatten_first_segment();
        }
    }

    /// Eligible time for `cumul` bytes of real-time service.
    ///
    /// The eligible curve never lies below the deadline curve, so this is
    /// bounded by the deadline curve at the same point; the bound only
    /// absorbs the rounding of the inverse slopes.
    pub fn eligible_time(&self, cumul: u64) -> u64 {
        self.eligible.y2x(cumul).min(self.deadline.y2x(cumul))
    }

    /// Deadline of the next `next_len` bytes after `cumul`.
    pub fn deadline_time(&self, cumul: u64, next_len: usize) -> u64 {
        self.deadline.y2x(cumul.saturating_add(next_len as u64))
    }
}

/// Link-sharing state.
#[derive(Debug, Clone, Copy)]
pub struct LinkShare {
    pub curve: InternalCurve,
    /// Service in virtual time.
    pub virtual_curve: RuntimeCurve,
}

impl LinkShare {
    pub fn new(curve: InternalCurve, x: u64, y: u64) -> Self {
        LinkShare {
            curve,
            virtual_curve: RuntimeCurve::anchor(&curve, x, y),
        }
    }

    pub fn merge(&mut self, curve: InternalCurve, x: u64, y: u64) {
        self.curve = curve;
        self.virtual_curve.compose_min(&curve, x, y);
    }
}

/// Upper-limit state.
#[derive(Debug, Clone, Copy)]
pub struct UpperLimit {
    pub curve: InternalCurve,
    pub ulimit: RuntimeCurve,
}

impl UpperLimit {
    pub fn new(curve: InternalCurve, x: u64, y: u64) -> Self {
        UpperLimit {
            curve,
            ulimit: RuntimeCurve::anchor(&curve, x, y),
        }
    }

    pub fn merge(&mut self, curve: InternalCurve, x: u64, y: u64) {
        self.curve = curve;
        self.ulimit.compose_min(&curve, x, y);
    }
}

// ─── Class ──────────────────────────────────────────────────────────────────

/// One node of the hierarchy.
#[derive(Debug)]
pub struct Class<Q> {
    pub id: ClassId,
    /// Parent slot; `None` only for the root.
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Height: leaves are 0, a parent is one more than its tallest child.
    pub level: u32,
    /// Present exactly on leaves other than the root.
    pub queue: Option<Q>,

    pub rsc: Option<RealTime>,
    pub fsc: Option<LinkShare>,
    pub usc: Option<UpperLimit>,

    /// Bytes served through this class, any criterion.
    pub total_bytes: u64,
    /// Bytes served by the real-time criterion.
    pub cumul_bytes: u64,

    pub eligible_time: u64,
    pub deadline: u64,
    pub virtual_time: u64,
    /// Earliest time link-sharing may serve this class (own cap and children).
    pub fit_time: u64,
    /// Earliest time the upper limit allows service.
    pub own_fit_time: u64,
    /// Minimum `fit_time` over active children, 0 if any child is unlimited.
    pub child_fit_min: u64,

    /// Activation periods of this class.
    pub vt_period: u64,
    /// Parent period recorded at our last activation.
    pub parent_vt_period: u64,
    /// Smallest vt handed out among children in this period.
    pub cvt_min: u64,
    /// Largest vt of a child that went passive in this period.
    pub cvt_max: u64,
    pub vt_offset: u64,
    pub vt_adjust: u64,
    /// `virtual_time + vt_offset` when the current period began.
    pub period_start_vt: u64,
    /// Active children (leaf: 1 while backlogged with fsc).
    pub nactive: u32,
    /// Children with link-sharing backlog, by virtual time.
    pub active: ActiveList,

    pub in_eligible: bool,
    pub in_active: bool,
    pub in_droplist: bool,
    /// Filters pointing at this class.
    pub filter_refs: u32,

    pub packets: u64,
    pub drops: u64,
    pub drop_bytes: u64,
    pub periods: u64,
}

impl<Q> Class<Q> {
    pub fn new(id: ClassId, parent: Option<usize>, queue: Option<Q>) -> Self {
        Class {
            id,
            parent,
            children: Vec::new(),
            level: 0,
            queue,
            rsc: None,
            fsc: None,
            usc: None,
            total_bytes: 0,
            cumul_bytes: 0,
            eligible_time: 0,
            deadline: 0,
            virtual_time: 0,
            fit_time: 0,
            own_fit_time: 0,
            child_fit_min: 0,
            vt_period: 0,
            parent_vt_period: 0,
            cvt_min: 0,
            cvt_max: 0,
            vt_offset: 0,
            vt_adjust: 0,
            period_start_vt: 0,
            nactive: 0,
            active: ActiveList::new(),
            in_eligible: false,
            in_active: false,
            in_droplist: false,
            filter_refs: 0,
            packets: 0,
            drops: 0,
            drop_bytes: 0,
            periods: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty() && !self.is_root()
    }

    /// Install the curves named in a normalized set; absent ones stay.
    ///
    /// A curve whose criterion is currently serving this class is merged
    /// with the running one through `compose_min`; idle curves are
    /// re-anchored at the present point.
    pub fn apply_curves(&mut self, curves: &ClassCurves, now: u64) {
        let (cumul, total) = (self.cumul_bytes, self.total_bytes);

        if let Some(sc) = &curves.rsc {
            let curve = to_internal(sc);
            match &mut self.rsc {
                Some(rt) if self.in_eligible => rt.merge(curve, now, cumul),
                slot => *slot = Some(RealTime::new(curve, now, cumul)),
            }
        }

        if let Some(sc) = &curves.fsc {
            let curve = to_internal(sc);
            // inverse of vt = y2x(total) - vt_offset + vt_adjust
            let vx = self
                .virtual_time
                .saturating_add(self.vt_offset)
                .saturating_sub(self.vt_adjust);
            match &mut self.fsc {
                Some(ls) if self.in_active => ls.merge(curve, vx, total),
                slot => *slot = Some(LinkShare::new(curve, vx, total)),
            }
        }

        if let Some(sc) = &curves.usc {
            let curve = to_internal(sc);
            match &mut self.usc {
                Some(ul) if self.in_active => ul.merge(curve, now, total),
                slot => *slot = Some(UpperLimit::new(curve, now, total)),
            }
        }
    }

    /// `fit_time = max(own_fit_time, child_fit_min)`.
    pub fn refresh_fit_time(&mut self) {
        self.fit_time = self.own_fit_time.max(self.child_fit_min);
    }
}

impl<Q: LeafQueue> Class<Q> {
    /// Leaf with at least one queued packet.
    pub fn is_backlogged(&self) -> bool {
        self.queue.as_ref().is_some_and(|q| !q.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FifoQueue;

    #[test]
    fn zero_curves_count_as_absent() {
        let curves = ClassCurves {
            rsc: Some(ServiceCurve::new(0, 100, 0)),
            fsc: Some(ServiceCurve::linear(1_000)),
            usc: None,
        };
        let n = curves.normalize().unwrap();
        assert_eq!(n.rsc, None);
        assert_eq!(n.fsc, Some(ServiceCurve::linear(1_000)));
    }

    #[test]
    fn out_of_range_curve_rejected() {
        let curves = ClassCurves::link_share(ServiceCurve::linear(u64::MAX));
        assert!(matches!(
            curves.normalize(),
            Err(ConfigError::InvalidCurve { .. })
        ));
    }

    #[test]
    fn apply_curves_keeps_unmentioned() {
        let mut class: Class<FifoQueue> = Class::new(ClassId(2), Some(0), None);
        class.apply_curves(&ClassCurves::realtime(ServiceCurve::linear(8_000_000)), 0);
        class.apply_curves(&ClassCurves::link_share(ServiceCurve::linear(16_000_000)), 0);
        assert!(class.rsc.is_some());
        assert!(class.fsc.is_some());
        assert!(class.usc.is_none());
    }

    #[test]
    fn idle_curve_change_reanchors() {
        let mut class: Class<FifoQueue> = Class::new(ClassId(2), Some(0), None);
        class.cumul_bytes = 500;
        class.apply_curves(&ClassCurves::realtime(ServiceCurve::linear(8_000_000)), 1_000);
        let rt = class.rsc.unwrap();
        assert_eq!((rt.deadline.x, rt.deadline.y), (1_000, 500));
        // linear curves are convex, the eligible curve has no first segment
        assert_eq!(rt.eligible.dx, 0);
    }

    #[test]
    fn active_curve_change_keeps_lower_curve() {
        let mut class: Class<FifoQueue> = Class::new(ClassId(2), Some(0), None);
        class.apply_curves(&ClassCurves::realtime(ServiceCurve::linear(8_000_000)), 0);
        class.in_eligible = true;
        class.cumul_bytes = 2_000;
        // at 1_000 the running curve promises 1_000 bytes, already below a
        // new start at (1_000, 2_000)
        class.apply_curves(&ClassCurves::realtime(ServiceCurve::linear(16_000_000)), 1_000);
        let rt = class.rsc.unwrap();
        assert_eq!((rt.deadline.x, rt.deadline.y), (0, 0));
        assert_eq!(rt.curve.sm2, 2 << crate::curve::SM_SHIFT);
    }

    #[test]
    fn root_is_never_a_leaf() {
        let root: Class<FifoQueue> = Class::new(ClassId(1), None, None);
        assert!(root.is_root());
        assert!(!root.is_leaf());
        let leaf: Class<FifoQueue> = Class::new(ClassId(2), Some(0), Some(FifoQueue::default()));
        assert!(leaf.is_leaf());
    }
}
