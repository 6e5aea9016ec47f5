//! # Scheduler Core
//!
//! Enqueue/dequeue state machine of the hierarchical fair service curve
//! scheduler.
//!
//! ```text
//!   enqueue ─► classify ─► leaf queue ─► (was empty) activate
//!                                             ├─ rsc: anchor deadline/eligible, eligible list
//!                                             └─ fsc: activate_fair_share up the tree
//!
//!   dequeue ─► eligible list: min deadline among e <= now   (real-time)
//!          └─► else descend active lists by vt, first fit   (link-sharing)
//!          └─► pop ─► update_fair_share ─► update ed / d, or deactivate
//! ```
//!
//! A leaf is *backlogged* while its queue holds packets. A class is *active*
//! for link-sharing while it sits in its parent's active list: a backlogged
//! leaf with a link-sharing curve, or an interior class with at least one
//! active child.
//!
//! Active-list removal happens only in [`Scheduler::update_fair_share`];
//! [`Scheduler::deactivate`] clears the eligible and drop lists. Every path
//! that empties a queue therefore runs `update_fair_share(slot, 0)` (or the
//! dequeue accounting) before `deactivate`.
//!
//! Time is a caller-supplied tick count in microseconds. The scheduler owns no
//! clock and no timer: when nothing may be sent yet, [`Dequeue::NotReady`]
//! says when to try again.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use slab::Slab;

use crate::class::{Class, ClassId};
use crate::list::{EligibleList, Entry};
use crate::queue::{FifoQueue, LeafQueue};

// ─── Public outcomes ────────────────────────────────────────────────────────

/// Why an enqueue did not take the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Neither the target nor the default class is a leaf.
    NoClass,
    /// The leaf queue refused the packet.
    QueueFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Queued,
    Dropped(DropReason),
}

/// Result of one transmit opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeue {
    Packet {
        class: ClassId,
        packet: Bytes,
        /// Chosen by the real-time criterion.
        realtime: bool,
    },
    /// Packets are queued but none may be sent at `now`.
    NotReady {
        /// Earliest tick at which a retry can succeed.
        wake_at: Option<u64>,
    },
    /// Nothing queued.
    Idle,
}

/// One-shot timer owned by the caller.
pub trait Watchdog {
    /// Request a wakeup at tick `wake_at`, replacing any pending one.
    fn arm(&mut self, wake_at: u64);
}

/// Builds the queue of a new leaf.
pub type QueueFactory<Q> = Box<dyn Fn(ClassId) -> Q + Send>;

// ─── Scheduler ──────────────────────────────────────────────────────────────

/// One scheduler instance: class tree, eligible list and drop list.
pub struct Scheduler<Q: LeafQueue = FifoQueue> {
    pub(crate) classes: Slab<Class<Q>>,
    pub(crate) index: HashMap<ClassId, usize>,
    pub(crate) root: usize,
    pub(crate) eligible: EligibleList,
    /// Backlogged leaves in drop-candidate order.
    pub(crate) droplist: VecDeque<usize>,
    pub(crate) default_class: Option<usize>,
    pub(crate) queue_factory: QueueFactory<Q>,
}

impl Scheduler<FifoQueue> {
    /// Scheduler whose leaves use [`FifoQueue::default`].
    pub fn new(root: ClassId) -> Self {
        Self::with_queue_factory(root, |_| FifoQueue::default())
    }

    /// Scheduler whose leaves hold at most `limit` packets.
    pub fn with_queue_limit(root: ClassId, limit: usize) -> Self {
        Self::with_queue_factory(root, move |_| FifoQueue::new(limit))
    }
}

impl<Q: LeafQueue> Scheduler<Q> {
    pub fn with_queue_factory(
        root: ClassId,
        factory: impl Fn(ClassId) -> Q + Send + 'static,
    ) -> Self {
        let mut classes = Slab::new();
        let slot = classes.insert(Class::new(root, None, None));
        let mut index = HashMap::new();
        index.insert(root, slot);
        Scheduler {
            classes,
            index,
            root: slot,
            eligible: EligibleList::new(),
            droplist: VecDeque::new(),
            default_class: None,
            queue_factory: Box::new(factory),
        }
    }

    pub fn root_id(&self) -> ClassId {
        self.classes[self.root].id
    }

    pub fn contains(&self, id: ClassId) -> bool {
        self.index.contains_key(&id)
    }

    /// Number of classes, root included.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Packets queued across all leaves.
    pub fn backlog(&self) -> usize {
        self.droplist
            .iter()
            .filter_map(|&slot| self.classes[slot].queue.as_ref())
            .map(LeafQueue::len)
            .sum()
    }

    pub(crate) fn slot_of(&self, id: ClassId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    // ─── Data path ──────────────────────────────────────────────────────

    /// Queue `packet` on `target`, or on the default class when `target` is
    /// absent or not a leaf.
    pub fn enqueue(&mut self, target: Option<ClassId>, packet: Bytes, now: u64) -> Verdict {
        let Some(slot) = self.classify(target) else {
            tracing::warn!(target_class = ?target, "no leaf class for packet");
            return Verdict::Dropped(DropReason::NoClass);
        };

        let class = &mut self.classes[slot];
        let Some(queue) = class.queue.as_mut() else {
            return Verdict::Dropped(DropReason::NoClass);
        };
        let len = packet.len();
        let was_empty = queue.is_empty();
        if !queue.push(packet) {
            class.drops += 1;
            class.drop_bytes += len as u64;
            return Verdict::Dropped(DropReason::QueueFull);
        }

        // occupancy decides, a queue may accept and still hold nothing
        if was_empty {
            if let Some(next_len) = queue.peek_len() {
                self.activate(slot, next_len, now);
            }
        }
        Verdict::Queued
    }

    fn classify(&self, target: Option<ClassId>) -> Option<usize> {
        let is_leaf = |slot: &usize| self.classes[*slot].queue.is_some();
        target
            .and_then(|id| self.slot_of(id))
            .filter(is_leaf)
            .or_else(|| self.default_class.filter(is_leaf))
    }

    /// Serve one packet if the curves allow it at `now`.
    pub fn dequeue(&mut self, now: u64) -> Dequeue {
        if self.droplist.is_empty() {
            return Dequeue::Idle;
        }

        let classes = &self.classes;
        let (slot, realtime) = match self
            .eligible
            .min_by_deadline_before(now, |slot| classes[slot].deadline)
        {
            Some(entry) => (entry.slot, true),
            None => match self.min_virtual_time_leaf(now) {
                Some(slot) => (slot, false),
                None => {
                    return Dequeue::NotReady {
                        wake_at: self.next_wake(),
                    };
                }
            },
        };

        let class = &mut self.classes[slot];
        let id = class.id;
        let Some(packet) = class.queue.as_mut().and_then(LeafQueue::pop) else {
            panic!("class {id} was scheduled but its queue is empty");
        };
        let next_len = class.queue.as_ref().and_then(LeafQueue::peek_len);
        let len = packet.len() as u64;
        class.packets += 1;

        self.update_fair_share(slot, len);
        let class = &mut self.classes[slot];
        if realtime {
            class.cumul_bytes += len;
        }

        match next_len {
            Some(next_len) if class.rsc.is_some() => {
                if realtime {
                    self.update_eligible_deadline(slot, next_len);
                } else {
                    self.update_deadline_only(slot, next_len);
                }
            }
            Some(_) => {}
            None => self.deactivate(slot),
        }

        Dequeue::Packet {
            class: id,
            packet,
            realtime,
        }
    }

    /// [`Self::dequeue`], arming `watchdog` when it reports `NotReady`.
    pub fn dequeue_or_arm(&mut self, now: u64, watchdog: &mut impl Watchdog) -> Dequeue {
        let outcome = self.dequeue(now);
        if let Dequeue::NotReady {
            wake_at: Some(wake_at),
        } = outcome
        {
            watchdog.arm(wake_at);
        }
        outcome
    }

    /// Earliest eligible time, or the root's fit time when link-sharing is
    /// held back by upper limits.
    fn next_wake(&self) -> Option<u64> {
        let eligible = self.eligible.head().map(|e| e.key);
        let cfmin = self.classes[self.root].child_fit_min;
        let fit = (cfmin != 0).then_some(cfmin);
        match (eligible, fit) {
            (Some(e), Some(f)) => Some(e.min(f)),
            (e, f) => e.or(f),
        }
    }

    /// Drop one packet from the tail of the first drop candidate that
    /// supports it. Returns the class and the bytes dropped.
    pub fn drop_one(&mut self, now: u64) -> Option<(ClassId, usize)> {
        let (pos, len) = self.droplist.iter().enumerate().find_map(|(pos, &slot)| {
            self.classes[slot]
                .queue
                .as_mut()
                .and_then(LeafQueue::drop_tail)
                .map(|len| (pos, len))
        })?;
        let slot = self.droplist[pos];
        let class = &mut self.classes[slot];
        class.drops += 1;
        class.drop_bytes += len as u64;
        let id = class.id;
        tracing::debug!(class = %id, len, now, "dropped from tail");

        if class.is_backlogged() {
            if let Some(slot) = self.droplist.remove(pos) {
                self.droplist.push_back(slot);
            }
        } else {
            self.update_fair_share(slot, 0);
            self.deactivate(slot);
        }
        Some((id, len))
    }

    /// Discard everything queued on a leaf and passivate it. Returns the
    /// bytes discarded.
    pub(crate) fn drain(&mut self, slot: usize) -> usize {
        let class = &mut self.classes[slot];
        if !class.is_backlogged() {
            return 0;
        }
        let packets = class.queue.as_ref().map_or(0, LeafQueue::len);
        let bytes = class.queue.as_mut().map_or(0, LeafQueue::purge);
        class.drops += packets as u64;
        class.drop_bytes += bytes as u64;
        tracing::debug!(class = %class.id, packets, bytes, "queue purged");
        self.update_fair_share(slot, 0);
        self.deactivate(slot);
        bytes
    }

    // ─── Activation ─────────────────────────────────────────────────────

    /// A leaf's queue went from empty to non-empty.
    pub(crate) fn activate(&mut self, slot: usize, next_len: usize, now: u64) {
        if self.classes[slot].rsc.is_some() {
            self.init_eligible_deadline(slot, next_len, now);
        }
        if self.classes[slot].fsc.is_some() {
            self.activate_fair_share(slot, next_len, now);
        }

        let class = &mut self.classes[slot];
        if !class.in_droplist {
            class.in_droplist = true;
            self.droplist.push_back(slot);
        }
        class.periods += 1;
        tracing::trace!(
            class = %class.id,
            eligible = class.eligible_time,
            deadline = class.deadline,
            vt = class.virtual_time,
            "class active"
        );
    }

    /// Remove a class from the eligible and drop lists. Active-list removal
    /// is left to [`Self::update_fair_share`].
    pub(crate) fn deactivate(&mut self, slot: usize) {
        let class = &mut self.classes[slot];
        if class.in_eligible {
            self.eligible
                .remove(&Entry::new(class.eligible_time, class.id, slot));
            class.in_eligible = false;
        }
        if class.in_droplist {
            self.droplist.retain(|&s| s != slot);
            class.in_droplist = false;
        }
        tracing::trace!(class = %class.id, "class passive");
    }

    // ─── Real-time bookkeeping ──────────────────────────────────────────

    /// Anchor the deadline curve at `(now, cumul_bytes)`, derive the
    /// eligible curve and enter the eligible list.
    pub(crate) fn init_eligible_deadline(&mut self, slot: usize, next_len: usize, now: u64) {
        let class = &mut self.classes[slot];
        let cumul = class.cumul_bytes;
        let Some(rt) = class.rsc.as_mut() else {
            return;
        };

        rt.deadline.compose_min(&rt.curve, now, cumul);
        rt.derive_eligible();

        class.eligible_time = rt.eligible_time(cumul);
        class.deadline = rt.deadline_time(cumul, next_len);

        let entry = Entry::new(class.eligible_time, class.id, slot);
        if class.in_eligible {
            self.eligible.remove(&entry);
        }
        self.eligible.insert(entry);
        class.in_eligible = true;
    }

    /// Recompute eligible time and deadline after real-time service.
    pub(crate) fn update_eligible_deadline(&mut self, slot: usize, next_len: usize) {
        let class = &mut self.classes[slot];
        let Some(rt) = class.rsc.as_ref() else {
            return;
        };
        let cumul = class.cumul_bytes;
        let old = class.eligible_time;
        let eligible_time = rt.eligible_time(cumul);

        class.eligible_time = eligible_time;
        class.deadline = rt.deadline_time(cumul, next_len);
        self.eligible.reposition(old, eligible_time, class.id, slot);
    }

    /// Recompute the deadline only; the head packet changed but real-time
    /// service did not advance.
    pub(crate) fn update_deadline_only(&mut self, slot: usize, next_len: usize) {
        let class = &mut self.classes[slot];
        let Some(rt) = class.rsc.as_ref() else {
            return;
        };
        class.deadline = rt.deadline_time(class.cumul_bytes, next_len);
    }

    // ─── Link-sharing bookkeeping ───────────────────────────────────────

    /// Walk from `slot` towards the root, making each class active in its
    /// parent's list if it is the parent's first active child.
    pub(crate) fn activate_fair_share(&mut self, slot: usize, _next_len: usize, now: u64) {
        let mut go_active = true;
        let mut cur = slot;

        while let Some(parent) = self.classes[cur].parent {
            if self.classes[cur].fsc.is_none() {
                return;
            }

            let class = &mut self.classes[cur];
            if go_active {
                class.nactive += 1;
                go_active = class.nactive == 1;
            }

            if go_active {
                self.enter_active_list(cur, parent, now);
            }

            self.classes[cur].refresh_fit_time();
            self.update_child_fit_min(parent);
            cur = parent;
        }

        if go_active {
            let root = &mut self.classes[cur];
            if root.nactive == 0 {
                root.vt_period += 1;
            }
            root.nactive += 1;
        }
    }

    /// Pick a virtual time for a class starting a new activation period and
    /// insert it into its parent's active list.
    fn enter_active_list(&mut self, cur: usize, parent: usize, now: u64) {
        let p = &self.classes[parent];
        let max_child_vt = p.active.last().map(|e| e.key);
        let (cvt_min, cvt_max) = (p.cvt_min, p.cvt_max);
        let parent_period = p.vt_period + u64::from(p.nactive == 0);
        let parent_period_now = p.vt_period;

        match max_child_vt {
            Some(mut vt) => {
                if cvt_min != 0 {
                    vt = ((u128::from(cvt_min) + u128::from(vt)) / 2) as u64;
                }
                let class = &mut self.classes[cur];
                if parent_period_now != class.parent_vt_period || vt > class.virtual_time {
                    class.virtual_time = vt;
                }
            }
            None => {
                // first child of a new parent backlog period: shift every
                // sibling past the largest vt of the period that ended
                for i in 0..self.classes[parent].children.len() {
                    let sibling = self.classes[parent].children[i];
                    let s = &mut self.classes[sibling];
                    s.vt_offset = s.vt_offset.saturating_add(cvt_max);
                }
                self.classes[cur].virtual_time = 0;
                let p = &mut self.classes[parent];
                p.cvt_max = 0;
                p.cvt_min = 0;
            }
        }

        let class = &mut self.classes[cur];
        let total = class.total_bytes;
        let start = class.virtual_time.saturating_add(class.vt_offset);
        if let Some(ls) = class.fsc.as_mut() {
            ls.virtual_curve.compose_min(&ls.curve, start, total);
        }
        debug_assert!(
            start >= class.period_start_vt,
            "class {} vt went back from {} to {}",
            class.id,
            class.period_start_vt,
            start
        );
        class.period_start_vt = start;
        class.vt_adjust = 0;
        class.vt_period += 1;
        class.parent_vt_period = parent_period;
        class.fit_time = 0;

        if let Some(ul) = class.usc.as_mut() {
            ul.ulimit.compose_min(&ul.curve, now, total);
            class.own_fit_time = ul.ulimit.y2x(total);
        }

        class.in_active = true;
        let entry = Entry::new(class.virtual_time, class.id, cur);
        self.classes[parent].active.insert(entry);
    }

    /// Account `len` bytes of service along the path to the root and
    /// advance virtual times. Classes whose backlog ended leave their
    /// parent's active list here.
    pub(crate) fn update_fair_share(&mut self, slot: usize, len: u64) {
        let mut go_passive = {
            let class = &self.classes[slot];
            class.fsc.is_some() && !class.is_backlogged()
        };
        let mut cur = slot;

        loop {
            let class = &mut self.classes[cur];
            class.total_bytes = class.total_bytes.saturating_add(len);

            let Some(parent) = class.parent else {
                if go_passive {
                    class.nactive -= 1;
                }
                return;
            };

            let Some(ls) = class.fsc else {
                go_passive = false;
                cur = parent;
                continue;
            };
            if class.nactive == 0 {
                go_passive = false;
                cur = parent;
                continue;
            }

            if go_passive {
                class.nactive -= 1;
                go_passive = class.nactive == 0;
            }

            if go_passive {
                let vt = class.virtual_time;
                let entry = Entry::new(vt, class.id, cur);
                class.in_active = false;
                let p = &mut self.classes[parent];
                p.cvt_max = p.cvt_max.max(vt);
                p.active.remove(&entry);
                self.update_child_fit_min(parent);
                cur = parent;
                continue;
            }

            let parent_cvt_min = self.classes[parent].cvt_min;
            let class = &mut self.classes[cur];
            let old_vt = class.virtual_time;
            let mut vt = ls
                .virtual_curve
                .y2x(class.total_bytes)
                .saturating_sub(class.vt_offset)
                .saturating_add(class.vt_adjust);
            // skipped earlier for not fitting: catch up with the siblings
            if vt < parent_cvt_min {
                class.vt_adjust += parent_cvt_min - vt;
                vt = parent_cvt_min;
            }
            class.virtual_time = vt;
            let id = class.id;

            if let Some(ul) = class.usc.as_ref() {
                class.own_fit_time = ul.ulimit.y2x(class.total_bytes);
            }
            let old_fit = class.fit_time;
            class.refresh_fit_time();
            let fit_changed = class.fit_time != old_fit;

            self.classes[parent]
                .active
                .reposition(old_vt, vt, id, cur);
            if fit_changed {
                self.update_child_fit_min(parent);
            }
            cur = parent;
        }
    }

    /// `child_fit_min` of `parent`: smallest fit time among its active
    /// children, 0 when none is active.
    pub(crate) fn update_child_fit_min(&mut self, parent: usize) {
        let classes = &self.classes;
        let cfmin = classes[parent]
            .active
            .iter()
            .map(|e| classes[e.slot].fit_time)
            .min()
            .unwrap_or(0);
        self.classes[parent].child_fit_min = cfmin;
    }

    /// Descend from the root to the leaf with the smallest virtual time whose
    /// upper limit allows service at `now`, raising each parent's `cvt_min`
    /// on the way.
    pub(crate) fn min_virtual_time_leaf(&mut self, now: u64) -> Option<usize> {
        let mut cur = self.root;
        if self.classes[cur].child_fit_min > now {
            return None;
        }

        while !self.classes[cur].children.is_empty() {
            let classes = &self.classes;
            let entry = classes[cur]
                .active
                .first_fit(now, |slot| classes[slot].fit_time)?;
            let parent = &mut self.classes[cur];
            parent.cvt_min = parent.cvt_min.max(entry.key);
            cur = entry.slot;
        }
        (cur != self.root).then_some(cur)
    }

    // ─── Inspection ─────────────────────────────────────────────────────

    /// Classes in the eligible list, in eligible-time order.
    pub fn eligible_classes(&self) -> Vec<ClassId> {
        self.eligible.iter().map(|e| e.id).collect()
    }

    /// Active children of `id` in virtual-time order.
    pub fn active_children(&self, id: ClassId) -> Option<Vec<ClassId>> {
        let slot = self.slot_of(id)?;
        Some(self.classes[slot].active.iter().map(|e| e.id).collect())
    }

    /// Verify list memberships, keys and counters against the class state.
    ///
    /// # Panics
    /// On the first inconsistency found.
    pub fn check_invariants(&self) {
        let mut eligible_members = 0;
        let mut droplist_members = 0;

        for (slot, class) in self.classes.iter() {
            let id = class.id;
            assert_eq!(self.index.get(&id), Some(&slot), "class {id} index");

            // tree shape
            match class.parent {
                None => assert_eq!(slot, self.root, "class {id} has no parent"),
                Some(p) => assert!(
                    self.classes[p].children.contains(&slot),
                    "class {id} missing from its parent's children"
                ),
            }
            let expected_level = class
                .children
                .iter()
                .map(|&c| self.classes[c].level + 1)
                .max()
                .unwrap_or(0);
            assert_eq!(class.level, expected_level, "class {id} level");
            assert_eq!(
                class.queue.is_some(),
                class.is_leaf(),
                "class {id} queue presence"
            );

            // eligible list
            let backlogged = class.is_backlogged();
            assert_eq!(
                class.in_eligible,
                class.rsc.is_some() && backlogged,
                "class {id} eligible membership"
            );
            if class.in_eligible {
                eligible_members += 1;
                assert!(
                    self.eligible
                        .contains(&Entry::new(class.eligible_time, id, slot)),
                    "class {id} not at its eligible time in the eligible list"
                );
                assert!(
                    class.eligible_time <= class.deadline,
                    "class {id} eligible {} after deadline {}",
                    class.eligible_time,
                    class.deadline
                );
            }

            // drop list
            assert_eq!(class.in_droplist, backlogged, "class {id} drop membership");
            if class.in_droplist {
                droplist_members += 1;
            }

            // active lists
            if let Some(p) = class.parent {
                let should_be_active = class.fsc.is_some()
                    && if class.is_leaf() {
                        backlogged
                    } else {
                        class.nactive > 0
                    };
                assert_eq!(class.in_active, should_be_active, "class {id} active membership");
                assert_eq!(
                    self.classes[p]
                        .active
                        .contains(&Entry::new(class.virtual_time, id, slot)),
                    class.in_active,
                    "class {id} not at its virtual time in its parent's list"
                );
            }
            if class.is_leaf() {
                assert_eq!(class.nactive, u32::from(class.in_active), "leaf {id} nactive");
            } else {
                assert_eq!(
                    class.nactive as usize,
                    class.active.len(),
                    "class {id} nactive vs active list"
                );
            }
            for e in class.active.iter() {
                assert_eq!(
                    self.classes[e.slot].parent,
                    Some(slot),
                    "class {} listed under a foreign parent",
                    e.id
                );
            }
        }

        assert_eq!(self.eligible.len(), eligible_members, "stray eligible entries");
        assert_eq!(self.droplist.len(), droplist_members, "stray drop entries");
    }
}
