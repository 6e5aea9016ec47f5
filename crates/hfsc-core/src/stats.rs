//! Per-class statistics snapshots.

use serde::Serialize;

use crate::class::{Class, ClassId};
use crate::curve::{to_external, ServiceCurve};
use crate::queue::LeafQueue;
use crate::scheduler::Scheduler;

/// Point-in-time copy of a class's curves, counters and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassStats {
    pub id: ClassId,
    pub parent: Option<ClassId>,
    pub level: u32,
    pub leaf: bool,

    pub rsc: Option<ServiceCurve>,
    pub fsc: Option<ServiceCurve>,
    pub usc: Option<ServiceCurve>,

    /// Packets waiting (leaves only).
    pub queue_len: usize,
    pub packets: u64,
    pub total_bytes: u64,
    pub cumul_bytes: u64,
    pub drops: u64,
    pub drop_bytes: u64,
    /// Backlog periods started.
    pub periods: u64,

    pub eligible_time: u64,
    pub deadline: u64,
    pub virtual_time: u64,
    pub vt_offset: u64,
    pub period_start_vt: u64,
    pub vt_period: u64,
    pub fit_time: u64,
    pub child_fit_min: u64,
    pub cvt_min: u64,
    pub cvt_max: u64,
    pub nactive: u32,
    pub filter_refs: u32,
}

impl ClassStats {
    pub(crate) fn capture<Q: LeafQueue>(class: &Class<Q>, parent: Option<ClassId>) -> Self {
        ClassStats {
            id: class.id,
            parent,
            level: class.level,
            leaf: class.is_leaf(),
            rsc: class.rsc.as_ref().map(|rt| to_external(&rt.curve)),
            fsc: class.fsc.as_ref().map(|ls| to_external(&ls.curve)),
            usc: class.usc.as_ref().map(|ul| to_external(&ul.curve)),
            queue_len: class.queue.as_ref().map_or(0, LeafQueue::len),
            packets: class.packets,
            total_bytes: class.total_bytes,
            cumul_bytes: class.cumul_bytes,
            drops: class.drops,
            drop_bytes: class.drop_bytes,
            periods: class.periods,
            eligible_time: class.eligible_time,
            deadline: class.deadline,
            virtual_time: class.virtual_time,
            vt_offset: class.vt_offset,
            period_start_vt: class.period_start_vt,
            vt_period: class.vt_period,
            fit_time: class.fit_time,
            child_fit_min: class.child_fit_min,
            cvt_min: class.cvt_min,
            cvt_max: class.cvt_max,
            nactive: class.nactive,
            filter_refs: class.filter_refs,
        }
    }
}

impl<Q: LeafQueue> Scheduler<Q> {
    pub fn class_stats(&self, id: ClassId) -> Option<ClassStats> {
        let slot = self.slot_of(id)?;
        Some(self.stats_at(slot))
    }

    pub(crate) fn stats_at(&self, slot: usize) -> ClassStats {
        let class = &self.classes[slot];
        let parent = class.parent.map(|p| self.classes[p].id);
        ClassStats::capture(class, parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassCurves;
    use bytes::Bytes;

    #[test]
    fn snapshot_reports_configured_curves() {
        let mut s = Scheduler::new(ClassId(1));
        let curves = ClassCurves::realtime(ServiceCurve::new(16_000_000, 5_000, 8_000_000))
            .with_fsc(ServiceCurve::linear(4_000_000));
        s.create_class(ClassId(5), ClassId(1), curves, 0).unwrap();
        s.enqueue(Some(ClassId(5)), Bytes::from_static(b"hello"), 0);

        let st = s.class_stats(ClassId(5)).unwrap();
        assert_eq!(st.parent, Some(ClassId(1)));
        assert!(st.leaf);
        assert_eq!(st.rsc, curves.rsc);
        assert_eq!(st.fsc, curves.fsc);
        assert_eq!(st.usc, None);
        assert_eq!(st.queue_len, 1);
        assert_eq!(st.periods, 1);

        let json = serde_json::to_value(&st).unwrap();
        assert_eq!(json["id"], 5);
        assert_eq!(json["fsc"]["m2"], 4_000_000);
        assert!(s.class_stats(ClassId(9)).is_none());
    }
}
