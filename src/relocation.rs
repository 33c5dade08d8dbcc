//! Bookkeeping for group moves that could not finish in one pass.
//!
//! A `RelocationSet` remembers where every member of a committed formation is
//! headed, which members still wait for their destination to clear, which are
//! being removed, and which roof cells were opened up on its behalf. The
//! `RelocationRegistry` owns every live set and knows how to persist them.

use crate::location::*;
use crate::structure::StructureId;
use crate::transform::Rotation;
use crate::world::WorldSource;
use fnv::{FnvHashMap, FnvHashSet};
use itertools::*;
use log::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub struct RelocationSet {
    pub id: Uuid,
    /// Members in selection order.
    pub designated: Vec<StructureId>,
    pub support_structures: FnvHashSet<StructureId>,
    /// Members whose destination could not be placed yet, in selection order.
    pub waiting: Vec<StructureId>,
    pub being_removed: FnvHashSet<StructureId>,
    pub reinstalling: FnvHashSet<StructureId>,
    pub unsupported_surfaces: FnvHashSet<Cell>,
    pub ghost_offsets: FnvHashMap<StructureId, Cell>,
    pub anchor: Cell,
    pub rotation: Rotation,
}

impl RelocationSet {
    pub fn new(
        designated: Vec<StructureId>,
        ghost_offsets: FnvHashMap<StructureId, Cell>,
        anchor: Cell,
        rotation: Rotation,
    ) -> RelocationSet {
        RelocationSet {
            id: Uuid::new_v4(),
            designated,
            support_structures: FnvHashSet::default(),
            waiting: Vec::new(),
            being_removed: FnvHashSet::default(),
            reinstalling: FnvHashSet::default(),
            unsupported_surfaces: FnvHashSet::default(),
            ghost_offsets,
            anchor,
            rotation,
        }
    }

    /// Cell a member is headed for. The anchor's level is kept.
    pub fn destination(&self, id: StructureId) -> Option<Cell> {
        self.ghost_offsets
            .get(&id)
            .map(|offset| self.anchor.offset_by(*offset))
    }

    #[inline]
    pub fn is_waiting(&self, id: StructureId) -> bool {
        self.waiting.contains(&id)
    }

    #[inline]
    pub fn has_removal_in_flight(&self) -> bool {
        !self.being_removed.is_empty()
    }

    pub fn contains(&self, id: StructureId) -> bool {
        self.designated.contains(&id) || self.support_structures.contains(&id)
    }

    /// Members the resolver treats as "in flight": removals plus authorised
    /// reinstalls of support structures.
    pub fn in_flight(&self) -> FnvHashSet<StructureId> {
        self.being_removed
            .iter()
            .chain(self.reinstalling.iter())
            .copied()
            .collect()
    }

    pub fn mark_removing(&mut self, id: StructureId) {
        if self.is_waiting(id) {
            self.being_removed.insert(id);
        }
    }

    pub fn stop_waiting(&mut self, id: StructureId) {
        self.waiting.retain(|w| *w != id);
        self.being_removed.remove(&id);
    }

    /// A removal finished; the member now lives on as `minified`.
    ///
    /// Support tracking keeps the original id, which is the id the structure
    /// comes back with once reinstalled.
    pub fn replace_with_minified(&mut self, id: StructureId, minified: StructureId) -> bool {
        if !self.designated.contains(&id) {
            return false;
        }

        for entry in self.designated.iter_mut().chain(self.waiting.iter_mut()) {
            if *entry == id {
                *entry = minified;
            }
        }

        if let Some(offset) = self.ghost_offsets.remove(&id) {
            self.ghost_offsets.insert(minified, offset);
        }

        self.being_removed.remove(&id);

        true
    }

    /// A removal job gave up; the member goes back to plain waiting.
    pub fn removal_failed(&mut self, id: StructureId) -> bool {
        self.being_removed.remove(&id)
    }

    /// Drop a member from every tracked collection. Returns whether it was a
    /// tracked support structure.
    pub fn forget(&mut self, id: StructureId) -> bool {
        self.designated.retain(|d| *d != id);
        self.stop_waiting(id);
        self.ghost_offsets.remove(&id);
        self.reinstalling.remove(&id);
        self.support_structures.remove(&id)
    }

    /// A placed member was rebuilt at its destination. It leaves `designated`
    /// so later events about it no longer reach this set. Support tracking is
    /// untouched.
    pub fn settle(&mut self, id: StructureId) -> bool {
        if self.is_waiting(id) || !self.designated.contains(&id) {
            return false;
        }

        self.designated.retain(|d| *d != id);
        self.ghost_offsets.remove(&id);
        true
    }

    pub fn purge_destroyed(&mut self, world: &dyn WorldSource) {
        let destroyed = self
            .designated
            .iter()
            .chain(self.support_structures.iter())
            .filter(|id| world.is_destroyed(**id))
            .copied()
            .unique()
            .collect_vec();

        for id in destroyed {
            debug!("Relocation {} dropping destroyed structure {}", self.id, id);
            self.forget(id);
        }
    }

    pub fn is_garbage(&self) -> bool {
        self.support_structures.is_empty()
            && self.unsupported_surfaces.is_empty()
            && self.waiting.is_empty()
    }

    pub fn to_record(&self) -> RelocationRecord {
        RelocationRecord {
            id: self.id,
            designated: self.designated.clone(),
            ghost_offsets: self
                .designated
                .iter()
                .filter_map(|id| self.ghost_offsets.get(id).map(|offset| (*id, *offset)))
                .collect(),
            rotation: self.rotation,
            anchor: self.anchor,
            waiting: self.waiting.clone(),
            being_removed: self.being_removed.iter().copied().sorted().collect(),
            support_structures: self.support_structures.iter().copied().sorted().collect(),
            reinstalling: self.reinstalling.iter().copied().sorted().collect(),
            unsupported_surfaces: self.unsupported_surfaces.iter().copied().sorted().collect(),
        }
    }

    pub fn from_record(record: RelocationRecord) -> Result<RelocationSet, SnapshotError> {
        let set = record.id;

        if let Some(id) = record.waiting.iter().find(|w| !record.designated.contains(w)) {
            return Err(SnapshotError::WaitingNotDesignated { set, structure: *id });
        }

        if let Some(id) = record.being_removed.iter().find(|b| !record.waiting.contains(b)) {
            return Err(SnapshotError::RemovingNotWaiting { set, structure: *id });
        }

        if let Some(id) = record
            .reinstalling
            .iter()
            .find(|r| !record.support_structures.contains(r))
        {
            return Err(SnapshotError::ReinstallingNotSupport { set, structure: *id });
        }

        let ghost_offsets: FnvHashMap<StructureId, Cell> =
            record.ghost_offsets.iter().copied().collect();

        if let Some(id) = record.designated.iter().find(|d| !ghost_offsets.contains_key(*d)) {
            return Err(SnapshotError::MissingOffset { set, structure: *id });
        }

        Ok(RelocationSet {
            id: record.id,
            designated: record.designated,
            support_structures: record.support_structures.into_iter().collect(),
            waiting: record.waiting,
            being_removed: record.being_removed.into_iter().collect(),
            reinstalling: record.reinstalling.into_iter().collect(),
            unsupported_surfaces: record.unsupported_surfaces.into_iter().collect(),
            ghost_offsets,
            anchor: record.anchor,
            rotation: record.rotation,
        })
    }
}

/// Serialised form of a [`RelocationSet`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationRecord {
    pub id: Uuid,
    #[serde(default)]
    pub designated: Vec<StructureId>,
    #[serde(default)]
    pub ghost_offsets: Vec<(StructureId, Cell)>,
    #[serde(default)]
    pub rotation: Rotation,
    pub anchor: Cell,
    #[serde(default)]
    pub waiting: Vec<StructureId>,
    #[serde(default)]
    pub being_removed: Vec<StructureId>,
    #[serde(default)]
    pub support_structures: Vec<StructureId>,
    #[serde(default)]
    pub reinstalling: Vec<StructureId>,
    #[serde(default)]
    pub unsupported_surfaces: Vec<Cell>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub sets: Vec<RelocationRecord>,
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("relocation {set}: waiting structure {structure} is not designated")]
    WaitingNotDesignated { set: Uuid, structure: StructureId },
    #[error("relocation {set}: structure {structure} is being removed but not waiting")]
    RemovingNotWaiting { set: Uuid, structure: StructureId },
    #[error("relocation {set}: reinstalling structure {structure} is not a support structure")]
    ReinstallingNotSupport { set: Uuid, structure: StructureId },
    #[error("relocation {set}: structure {structure} has no ghost offset")]
    MissingOffset { set: Uuid, structure: StructureId },
    #[error("relocation {0} appears more than once")]
    DuplicateSet(Uuid),
}

/// Every live group move.
#[derive(Default)]
pub struct RelocationRegistry {
    sets: Vec<RelocationSet>,
}

impl RelocationRegistry {
    pub fn new() -> RelocationRegistry {
        RelocationRegistry { sets: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelocationSet> {
        self.sets.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RelocationSet> {
        self.sets.iter_mut()
    }

    pub fn get(&self, id: Uuid) -> Option<&RelocationSet> {
        self.sets.iter().find(|s| s.id == id)
    }

    /// Register a new set. Support claims held by older sets move to it.
    pub fn insert(&mut self, set: RelocationSet) {
        for older in self.sets.iter_mut() {
            for id in set.support_structures.iter() {
                if older.support_structures.remove(id) {
                    older.reinstalling.remove(id);
                    debug!(
                        "Support claim on {} moves from relocation {} to {}",
                        id, older.id, set.id
                    );
                }
            }
        }

        self.sets.push(set);
    }

    /// The set currently claiming `id` as a support structure.
    pub fn claiming_support(&mut self, id: StructureId) -> Option<&mut RelocationSet> {
        self.sets
            .iter_mut()
            .find(|s| s.support_structures.contains(&id))
    }

    pub fn purge_destroyed(&mut self, world: &dyn WorldSource) {
        for set in self.sets.iter_mut() {
            set.purge_destroyed(world);
        }
    }

    /// Discard finished sets. Returns how many were dropped.
    pub fn collect_garbage(&mut self) -> usize {
        let before = self.sets.len();

        self.sets.retain(|set| {
            if set.is_garbage() {
                debug!("Relocation {} finished", set.id);
                false
            } else {
                true
            }
        });

        before - self.sets.len()
    }

    pub fn clear(&mut self) {
        self.sets.clear();
    }

    /// Persistable form of every live set. Destroyed references are pruned
    /// first.
    pub fn snapshot(&mut self, world: &dyn WorldSource) -> RegistrySnapshot {
        self.purge_destroyed(world);
        self.collect_garbage();

        RegistrySnapshot {
            sets: self.sets.iter().map(|s| s.to_record()).collect(),
        }
    }

    pub fn restore(snapshot: RegistrySnapshot) -> Result<RelocationRegistry, SnapshotError> {
        let mut sets: Vec<RelocationSet> = Vec::with_capacity(snapshot.sets.len());

        for record in snapshot.sets {
            if sets.iter().any(|s| s.id == record.id) {
                return Err(SnapshotError::DuplicateSet(record.id));
            }
            sets.push(RelocationSet::from_record(record)?);
        }

        Ok(RelocationRegistry { sets })
    }
}
