//! Batch placement of a moving formation.
//!
//! A placement pass walks the designated structures in selection order and
//! decides, per structure, whether its destination can get a blueprint right
//! away, whether an identical member of the batch already stands there (the
//! two are merged into a twin chain), or whether it has to wait for a sibling
//! to clear out. Whatever waits is handed to the deadlock walk, which orders
//! the one removal that lets a blocked chain make progress.

use crate::location::*;
use crate::operation::*;
use crate::relocation::RelocationSet;
use crate::structure::*;
use crate::support::SupportGraph;
use crate::transform::*;
use crate::world::*;
use fnv::{FnvHashMap, FnvHashSet};
use itertools::*;
use log::*;

/// Everything a commit produced.
pub struct ResolverOutcome {
    pub operations: Vec<MoveOperation>,
    /// Set tracking deferred work, when any is left.
    pub set: Option<RelocationSet>,
    pub placed: Vec<StructureId>,
}

/// Transient state of one placement pass.
#[derive(Default)]
struct PlacementPass {
    placed: FnvHashSet<StructureId>,
    /// `twins[a] = b`: `a` stays where it is and `b` takes over its destination.
    twins: FnvHashMap<StructureId, StructureId>,
    /// Chain tail to the footprint of the blueprint planned for it.
    blueprint_work: FnvHashMap<StructureId, CellRect>,
    /// Chain tail to the offset it waits to take over from a sibling.
    sibling_work: FnvHashMap<StructureId, Cell>,
    offsets: FnvHashMap<StructureId, Cell>,
}

impl PlacementPass {
    fn chain_tail(&self, id: StructureId) -> StructureId {
        let mut current = id;

        for _ in 0..=self.twins.len() {
            match self.twins.get(&current) {
                Some(next) => current = *next,
                None => break,
            }
        }

        current
    }

    fn overlaps_planned(&self, id: StructureId, rect: &CellRect) -> bool {
        self.blueprint_work
            .iter()
            .any(|(planned, other)| *planned != id && other.overlaps(rect))
    }
}

/// Outcome of following one chain of blockers.
#[derive(Debug, PartialEq, Eq)]
enum Walk {
    /// Nothing in the moving set blocks the chain.
    DeadEnd,
    /// A blocker is already being removed; the chain will clear by itself.
    InFlight,
    /// The chain ends on a structure that has to be removed first.
    Terminal(StructureId),
    /// The chain came back to itself; members in visit order.
    Cycle(Vec<StructureId>),
}

pub struct ConflictResolver<'a> {
    world: &'a dyn WorldSource,
    oracle: &'a dyn PlacementOracle,
    support: &'a mut SupportGraph,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(
        world: &'a dyn WorldSource,
        oracle: &'a dyn PlacementOracle,
        support: &'a mut SupportGraph,
    ) -> ConflictResolver<'a> {
        ConflictResolver {
            world,
            oracle,
            support,
        }
    }

    /// Drop the formation at `anchor`.
    pub fn resolve(
        &mut self,
        designated: &[StructureId],
        ghost_offsets: &FnvHashMap<StructureId, Cell>,
        anchor: Cell,
        rotation: Rotation,
    ) -> ResolverOutcome {
        let mut ops = Vec::new();
        let (pass, structures) = self.placement_pass(designated, ghost_offsets, anchor, rotation, &mut ops);

        let waiting = designated
            .iter()
            .filter(|id| structures.contains_key(id) && !pass.placed.contains(id))
            .copied()
            .collect_vec();

        let supports: FnvHashSet<StructureId> = designated
            .iter()
            .filter_map(|id| structures.get(id))
            .filter(|s| s.holds_roof() && !s.minified)
            .map(|s| s.id)
            .collect();

        let placed = designated
            .iter()
            .filter(|id| pass.placed.contains(id))
            .copied()
            .collect_vec();

        debug!(
            "Placement pass: {} placed, {} waiting, {} supports",
            placed.len(),
            waiting.len(),
            supports.len()
        );

        let set = if waiting.is_empty() && supports.is_empty() {
            None
        } else {
            let mut set = RelocationSet::new(designated.to_vec(), pass.offsets, anchor, rotation);
            set.waiting = waiting;
            set.support_structures = supports;

            self.resolve_deadlock(&mut set, &mut ops);

            Some(set)
        };

        ResolverOutcome {
            operations: ops,
            set,
            placed,
        }
    }

    /// Merge twins, defer siblings and plan every blueprint that can go down
    /// right away.
    fn placement_pass(
        &self,
        designated: &[StructureId],
        ghost_offsets: &FnvHashMap<StructureId, Cell>,
        anchor: Cell,
        rotation: Rotation,
        ops: &mut Vec<MoveOperation>,
    ) -> (PlacementPass, FnvHashMap<StructureId, Structure>) {
        let mut pass = PlacementPass {
            offsets: ghost_offsets.clone(),
            ..Default::default()
        };

        let structures: FnvHashMap<StructureId, Structure> = designated
            .iter()
            .filter_map(|id| self.world.structure(*id).map(|s| (*id, s)))
            .collect();

        let ctx = PlacementContext::new(BlueprintMode::Place, designated);

        for id in designated.iter().copied() {
            let subject = match structures.get(&id) {
                Some(s) => s,
                None => continue,
            };

            let destination = match pass.offsets.get(&id) {
                Some(offset) => anchor.offset_by(*offset),
                None => continue,
            };

            if self.resolve_occupants(
                &mut pass,
                subject,
                destination,
                rotation,
                designated,
                &structures,
                ops,
            ) {
                continue;
            }

            let tail = pass.chain_tail(id);
            let placing = match structures.get(&tail) {
                Some(s) => s,
                None => continue,
            };

            let tail_rotation = placing.rotated_by(rotation);
            let rect = occupied_rect(destination, tail_rotation, placing.size);

            if pass.overlaps_planned(tail, &rect) {
                debug!("{} waits: overlaps a blueprint planned this pass", tail);
                continue;
            }

            match self.oracle.can_place_at(placing, destination, tail_rotation, &ctx) {
                Ok(()) => {
                    ops.push(MoveOperation::PlaceBlueprint {
                        subject: tail,
                        cell: destination,
                        rotation: tail_rotation,
                        kind: blueprint_kind(placing),
                    });
                    pass.blueprint_work.insert(tail, rect);
                    pass.placed.insert(tail);
                }
                Err(reason) => {
                    debug!("{} waits: {}", tail, reason);
                }
            }
        }

        (pass, structures)
    }

    /// Inspect batch members standing on `destination`. Returns `true` when
    /// the subject was merged with a twin or deferred behind a sibling.
    #[allow(clippy::too_many_arguments)]
    fn resolve_occupants(
        &self,
        pass: &mut PlacementPass,
        subject: &Structure,
        destination: Cell,
        rotation: Rotation,
        designated: &[StructureId],
        structures: &FnvHashMap<StructureId, Structure>,
        ops: &mut Vec<MoveOperation>,
    ) -> bool {
        let id = subject.id;

        for occupant_id in self.world.things_at(destination) {
            if !designated.contains(&occupant_id) {
                continue;
            }

            if occupant_id == id {
                if subject.identical_with(rotation, subject) {
                    pass.placed.insert(id);
                    ops.push(MoveOperation::ClearDesignation { structure: id });
                    return true;
                }
                continue;
            }

            let occupant = match structures.get(&occupant_id) {
                Some(s) => s,
                None => continue,
            };

            let mergeable = subject.identical_with(rotation, occupant)
                && (pass.blueprint_work.contains_key(&occupant_id)
                    || pass.sibling_work.contains_key(&occupant_id)
                    || !pass.twins.contains_key(&occupant_id));

            if mergeable {
                let tail = pass.chain_tail(id);

                if let Some(rect) = pass.blueprint_work.remove(&occupant_id) {
                    ops.push(MoveOperation::RetargetBlueprint {
                        from: occupant_id,
                        to: tail,
                    });
                    pass.blueprint_work.insert(tail, rect);
                    pass.placed.insert(tail);
                    pass.placed.insert(occupant_id);
                } else if let Some(offset) = pass.sibling_work.remove(&occupant_id) {
                    pass.offsets.insert(tail, offset);
                    pass.sibling_work.insert(tail, offset);
                    pass.placed.insert(occupant_id);
                } else if tail == occupant_id {
                    // The chain already ends on the occupant; linking would close a loop.
                    pass.placed.insert(occupant_id);
                } else {
                    pass.twins.insert(occupant_id, id);
                    if let Some(offset) = pass.offsets.get(&occupant_id).copied() {
                        pass.offsets.insert(id, offset);
                    }
                    pass.placed.insert(occupant_id);
                }

                trace!("{} merged with identical {}", id, occupant_id);
                ops.push(MoveOperation::ClearDesignation {
                    structure: occupant_id,
                });
                return true;
            }

            if self.oracle.blocks_construction(subject, occupant) {
                let tail = pass.chain_tail(id);
                if let Some(offset) = pass.offsets.get(&id).copied() {
                    pass.offsets.insert(tail, offset);
                    pass.sibling_work.insert(tail, offset);
                }
                trace!("{} waits on sibling {}", tail, occupant_id);
                return true;
            }
        }

        false
    }

    /// Order the removals that unblock waiting chains of `set`.
    pub fn resolve_deadlock(&mut self, set: &mut RelocationSet, ops: &mut Vec<MoveOperation>) {
        for start in set.waiting.clone() {
            if set.being_removed.contains(&start) {
                continue;
            }

            let walk = self.walk(set, start);
            trace!("Deadlock walk from {}: {:?}", start, walk);

            let target = match walk {
                Walk::Terminal(target) => Some(target),
                Walk::Cycle(visited) => visited.into_iter().find(|id| self.is_spawned(*id)),
                Walk::DeadEnd | Walk::InFlight => None,
            };

            if let Some(target) = target {
                self.order_removal(set, target, ops);
            }
        }
    }

    fn walk(&self, set: &RelocationSet, start: StructureId) -> Walk {
        let mut visited = vec![start];
        let mut current = start;

        for _ in 0..=set.waiting.len() {
            let structure = match self.world.structure(current) {
                Some(s) => s,
                None => return Walk::DeadEnd,
            };

            let destination = match set.destination(current) {
                Some(cell) => cell,
                None => return Walk::DeadEnd,
            };

            let rotation = structure.rotated_by(set.rotation);
            let blockers = self.blockers_at(&structure, destination, rotation);

            if blockers.iter().any(|b| set.being_removed.contains(b)) {
                return Walk::InFlight;
            }

            let next = blockers.into_iter().find(|b| set.is_waiting(*b));

            let next = match next {
                Some(next) => next,
                None => {
                    return match self.adjacent_interaction_blocker(set, &structure, destination, rotation) {
                        Some(terminal) if set.being_removed.contains(&terminal) => Walk::InFlight,
                        Some(terminal) if visited.contains(&terminal) => Walk::Cycle(visited),
                        Some(terminal) => Walk::Terminal(terminal),
                        None => Walk::DeadEnd,
                    };
                }
            };

            if visited.contains(&next) {
                return Walk::Cycle(visited);
            }

            visited.push(next);
            current = next;
        }

        Walk::DeadEnd
    }

    /// Removable structures that stop `structure` from being built at
    /// `destination`, in footprint order.
    fn blockers_at(&self, structure: &Structure, destination: Cell, rotation: Rotation) -> Vec<StructureId> {
        footprint_cells(destination, rotation, structure.size, structure.interaction_offset)
            .into_iter()
            .flat_map(|cell| self.world.things_at(cell))
            .unique()
            .filter(|id| *id != structure.id)
            .filter_map(|id| self.world.structure(id))
            .filter(|s| s.is_blueprint_eligible() && s.is_minifiable())
            .filter(|s| self.oracle.blocks_construction(structure, s))
            .map(|s| s.id)
            .collect()
    }

    /// First waiting neighbour whose interaction cell the would-be footprint
    /// covers.
    fn adjacent_interaction_blocker(
        &self,
        set: &RelocationSet,
        structure: &Structure,
        destination: Cell,
        rotation: Rotation,
    ) -> Option<StructureId> {
        let rect = occupied_rect(destination, rotation, structure.size);

        adjacent_cardinal(destination, rotation, structure.size)
            .into_iter()
            .filter(|cell| self.world.in_bounds(*cell))
            .flat_map(|cell| self.world.things_at(cell))
            .filter(|id| *id != structure.id && set.is_waiting(*id))
            .filter_map(|id| self.world.structure(id))
            .find(|neighbour| {
                (structure.is_impassable() || neighbour.def == structure.def)
                    && neighbour
                        .interaction_cell()
                        .map(|cell| rect.contains(cell))
                        .unwrap_or(false)
            })
            .map(|neighbour| neighbour.id)
    }

    fn is_spawned(&self, id: StructureId) -> bool {
        self.world
            .structure(id)
            .map(|s| !s.minified)
            .unwrap_or(false)
    }

    fn order_removal(&mut self, set: &mut RelocationSet, target: StructureId, ops: &mut Vec<MoveOperation>) {
        let structure = match self.world.structure(target) {
            Some(s) if !s.minified => s,
            _ => return,
        };

        if structure.holds_roof() && !self.support.protect_surfaces(set, &structure, self.world, ops) {
            debug!("Removal of {} deferred until the roof around it is cleared", target);
            return;
        }

        info!("Relocation {}: removing {} to break a blocked chain", set.id, target);
        ops.push(MoveOperation::RequestRemoval { structure: target });
        set.mark_removing(target);
    }

    /// Retry every waiting member of `set` that is not being removed.
    pub fn place_waiting(&mut self, set: &mut RelocationSet, ops: &mut Vec<MoveOperation>) {
        let mut planned: Vec<CellRect> = Vec::new();
        let batch = set.designated.clone();
        let ctx = PlacementContext::new(BlueprintMode::Place, &batch);

        for id in set.waiting.clone() {
            if set.being_removed.contains(&id) {
                continue;
            }

            let structure = match self.world.structure(id) {
                Some(s) => s,
                None => continue,
            };

            let destination = match set.destination(id) {
                Some(cell) => cell,
                None => continue,
            };

            let rotation = structure.rotated_by(set.rotation);
            let rect = occupied_rect(destination, rotation, structure.size);

            if planned.iter().any(|other| other.overlaps(&rect)) {
                continue;
            }

            match self.oracle.can_place_at(&structure, destination, rotation, &ctx) {
                Ok(()) => {
                    ops.push(MoveOperation::PlaceBlueprint {
                        subject: id,
                        cell: destination,
                        rotation,
                        kind: blueprint_kind(&structure),
                    });
                    planned.push(rect);
                    set.stop_waiting(id);
                }
                Err(reason) => {
                    trace!("{} still waiting: {}", id, reason);
                }
            }
        }
    }
}

fn blueprint_kind(structure: &Structure) -> BlueprintKind {
    if structure.minified {
        BlueprintKind::Install
    } else {
        BlueprintKind::Reinstall
    }
}
