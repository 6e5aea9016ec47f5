//! # Class Administration
//!
//! Create, change and delete classes while traffic flows. Every request is
//! checked completely before the tree is touched.
//!
//! - A class needs a real-time or a link-sharing curve.
//! - A link-sharing class must sit under the root or under another
//!   link-sharing class.
//! - A leaf that receives its first child gives up its queue, which must be
//!   empty; an interior class that loses its last child gets a fresh queue.
//! - Deleting a class discards its packets first and is refused while it
//!   has children or filters point at it.

use crate::class::{Class, ClassCurves, ClassId};
use crate::error::{BusyError, ConfigError, Result};
use crate::queue::LeafQueue;
use crate::scheduler::Scheduler;
use crate::stats::ClassStats;

impl<Q: LeafQueue> Scheduler<Q> {
    /// Add a leaf class `id` under `parent`.
    pub fn create_class(
        &mut self,
        id: ClassId,
        parent: ClassId,
        curves: ClassCurves,
        now: u64,
    ) -> Result<ClassId> {
        let curves = curves.normalize()?;
        if self.index.contains_key(&id) {
            return Err(ConfigError::DuplicateId(id).into());
        }
        let parent_slot = self
            .slot_of(parent)
            .ok_or(ConfigError::UnknownParent(parent))?;
        if curves.rsc.is_none() && curves.fsc.is_none() {
            return Err(ConfigError::NoCurveSpecified.into());
        }
        let p = &self.classes[parent_slot];
        if curves.fsc.is_some() && !p.is_root() && p.fsc.is_none() {
            return Err(ConfigError::ParentLacksLinkShare(parent).into());
        }
        if p.is_backlogged() {
            return Err(ConfigError::ParentIsLeaf(parent).into());
        }

        // an empty leaf parent becomes interior
        self.classes[parent_slot].queue = None;

        let mut class = Class::new(id, Some(parent_slot), Some((self.queue_factory)(id)));
        class.apply_curves(&curves, now);
        let slot = self.classes.insert(class);
        self.index.insert(id, slot);
        self.classes[parent_slot].children.push(slot);
        self.adjust_levels(parent_slot);

        tracing::debug!(
            class = %id,
            parent = %parent,
            rsc = ?curves.rsc,
            fsc = ?curves.fsc,
            usc = ?curves.usc,
            "class created"
        );
        Ok(id)
    }

    /// Replace the curves named in `curves`; the others stay as they are.
    pub fn change_curves(&mut self, id: ClassId, curves: ClassCurves, now: u64) -> Result<()> {
        let curves = curves.normalize()?;
        let slot = self.slot_of(id).ok_or(ConfigError::UnknownClass(id))?;
        if curves.fsc.is_some() {
            if let Some(p) = self.classes[slot].parent {
                let parent = &self.classes[p];
                if !parent.is_root() && parent.fsc.is_none() {
                    return Err(ConfigError::ParentLacksLinkShare(parent.id).into());
                }
            }
        }

        let class = &mut self.classes[slot];
        let had_rsc = class.rsc.is_some();
        let had_fsc = class.fsc.is_some();
        let next_len = class.queue.as_ref().and_then(LeafQueue::peek_len);
        class.apply_curves(&curves, now);

        if let Some(next_len) = next_len {
            if curves.rsc.is_some() {
                if had_rsc {
                    self.update_eligible_deadline(slot, next_len);
                } else {
                    self.init_eligible_deadline(slot, next_len, now);
                }
            }
            if curves.fsc.is_some() || curves.usc.is_some() {
                if had_fsc {
                    self.update_fair_share(slot, 0);
                } else if curves.fsc.is_some() {
                    self.activate_fair_share(slot, next_len, now);
                }
            }
        }

        tracing::debug!(
            class = %id,
            rsc = ?curves.rsc,
            fsc = ?curves.fsc,
            usc = ?curves.usc,
            backlogged = next_len.is_some(),
            "class curves changed"
        );
        Ok(())
    }

    /// Remove a childless, unreferenced class, discarding its packets.
    pub fn delete_class(&mut self, id: ClassId) -> Result<()> {
        let slot = self.slot_of(id).ok_or(ConfigError::UnknownClass(id))?;
        let class = &self.classes[slot];
        let Some(parent) = class.parent else {
            return Err(BusyError::Root.into());
        };
        if !class.children.is_empty() {
            return Err(BusyError::HasChildren(id).into());
        }
        if class.filter_refs > 0 {
            return Err(BusyError::Referenced(id, class.filter_refs).into());
        }

        let discarded = self.drain(slot);

        let p = &mut self.classes[parent];
        p.children.retain(|&c| c != slot);
        if p.children.is_empty() && p.parent.is_some() {
            let parent_id = p.id;
            p.queue = Some((self.queue_factory)(parent_id));
        }
        self.adjust_levels(parent);

        if self.default_class == Some(slot) {
            self.default_class = None;
        }
        self.classes.remove(slot);
        self.index.remove(&id);

        tracing::debug!(class = %id, discarded, "class deleted");
        Ok(())
    }

    /// Class that receives packets whose target is missing or not a leaf.
    pub fn set_default_class(&mut self, id: Option<ClassId>) -> Result<(), ConfigError> {
        self.default_class = match id {
            Some(id) => Some(self.slot_of(id).ok_or(ConfigError::UnknownClass(id))?),
            None => None,
        };
        tracing::debug!(class = ?id, "default class set");
        Ok(())
    }

    pub fn default_class(&self) -> Option<ClassId> {
        self.default_class.map(|slot| self.classes[slot].id)
    }

    /// Record that an external filter points at `id`.
    pub fn bind_filter(&mut self, id: ClassId) -> Result<(), ConfigError> {
        let slot = self.slot_of(id).ok_or(ConfigError::UnknownClass(id))?;
        self.classes[slot].filter_refs += 1;
        Ok(())
    }

    pub fn unbind_filter(&mut self, id: ClassId) -> Result<(), ConfigError> {
        let slot = self.slot_of(id).ok_or(ConfigError::UnknownClass(id))?;
        let class = &mut self.classes[slot];
        class.filter_refs = class.filter_refs.saturating_sub(1);
        Ok(())
    }

    /// Visit every class, parents before children.
    pub fn walk(&self, mut f: impl FnMut(&ClassStats)) {
        let mut stack = vec![self.root];
        while let Some(slot) = stack.pop() {
            f(&self.stats_at(slot));
            stack.extend(self.classes[slot].children.iter().rev());
        }
    }

    /// Recompute heights from `slot` up to the root.
    fn adjust_levels(&mut self, slot: usize) {
        let mut cur = Some(slot);
        while let Some(s) = cur {
            let level = self.classes[s]
                .children
                .iter()
                .map(|&c| self.classes[c].level + 1)
                .max()
                .unwrap_or(0);
            self.classes[s].level = level;
            cur = self.classes[s].parent;
        }
    }
}
