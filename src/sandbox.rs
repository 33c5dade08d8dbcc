//! In-memory host world.
//!
//! Implements both host traits over plain maps so the mover can be driven
//! offline: apply the returned operations, complete jobs by hand, and feed
//! the resulting events back into the controller.

use crate::location::*;
use crate::operation::*;
use crate::structure::*;
use crate::transform::*;
use crate::world::*;
use fnv::{FnvHashMap, FnvHashSet};
use itertools::*;
use log::*;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blueprint {
    pub subject: StructureId,
    pub cell: Cell,
    pub rotation: Rotation,
    pub kind: BlueprintKind,
}

pub struct Sandbox {
    width: i32,
    height: i32,
    structures: FnvHashMap<StructureId, Structure>,
    /// Minified id to the id of the structure packed inside.
    minified: FnvHashMap<StructureId, StructureId>,
    roofs: FnvHashSet<Cell>,
    no_roof: FnvHashSet<Cell>,
    markers: FnvHashSet<(StructureId, Marker)>,
    blueprints: Vec<Blueprint>,
    next_id: u64,
}

impl Sandbox {
    /// A world of `width` by `height` cells on level zero.
    pub fn new(width: i32, height: i32) -> Sandbox {
        Sandbox {
            width,
            height,
            structures: FnvHashMap::default(),
            minified: FnvHashMap::default(),
            roofs: FnvHashSet::default(),
            no_roof: FnvHashSet::default(),
            markers: FnvHashSet::default(),
            blueprints: Vec::new(),
            next_id: 1_000_000,
        }
    }

    pub fn add_structure(&mut self, structure: Structure) -> StructureId {
        let id = structure.id;
        self.structures.insert(id, structure);
        id
    }

    pub fn set_roof(&mut self, cell: Cell, roofed: bool) {
        if roofed {
            self.roofs.insert(cell);
        } else {
            self.roofs.remove(&cell);
        }
    }

    pub fn set_marker(&mut self, id: StructureId, marker: Marker) {
        self.markers.insert((id, marker));
    }

    pub fn blueprints(&self) -> &[Blueprint] {
        &self.blueprints
    }

    pub fn blueprint_for(&self, subject: StructureId) -> Option<&Blueprint> {
        self.blueprints.iter().find(|b| b.subject == subject)
    }

    pub fn is_no_roof(&self, cell: Cell) -> bool {
        self.no_roof.contains(&cell)
    }

    pub fn no_roof_cells(&self) -> Vec<Cell> {
        self.no_roof.iter().copied().sorted().collect()
    }

    /// Id of the structure packed inside a minified one.
    pub fn inner_of(&self, minified: StructureId) -> Option<StructureId> {
        self.minified.get(&minified).copied()
    }

    pub fn apply(&mut self, ops: &[MoveOperation]) {
        for op in ops {
            trace!("Sandbox applying {:?}", op);

            match op {
                MoveOperation::Designate { structure } => {
                    self.markers.insert((*structure, Marker::Move));
                }
                MoveOperation::ClearDesignation { structure } => {
                    self.markers.remove(&(*structure, Marker::Move));
                }
                MoveOperation::Claim { structure } => {
                    if let Some(s) = self.structures.get_mut(structure) {
                        s.faction = Faction::Player;
                    }
                }
                MoveOperation::PlaceBlueprint {
                    subject,
                    cell,
                    rotation,
                    kind,
                } => {
                    self.blueprints.retain(|b| b.subject != *subject);
                    self.blueprints.push(Blueprint {
                        subject: *subject,
                        cell: *cell,
                        rotation: *rotation,
                        kind: *kind,
                    });
                }
                MoveOperation::RetargetBlueprint { from, to } => {
                    for blueprint in self.blueprints.iter_mut() {
                        if blueprint.subject == *from {
                            blueprint.subject = *to;
                        }
                    }
                }
                MoveOperation::RequestRemoval { structure } => {
                    self.markers.insert((*structure, Marker::Uninstall));
                }
                MoveOperation::CancelBlueprints { structure } => {
                    self.blueprints.retain(|b| b.subject != *structure);
                }
                MoveOperation::SetNoRoof { cell, no_roof } => {
                    if *no_roof {
                        self.no_roof.insert(*cell);
                    } else {
                        self.no_roof.remove(cell);
                    }
                }
            }
        }
    }

    /// Finish a removal job. Returns the id of the minified structure.
    pub fn complete_removal(&mut self, id: StructureId) -> Option<StructureId> {
        let mut structure = self.structures.remove(&id)?;

        let minified = StructureId(self.next_id);
        self.next_id += 1;

        structure.id = minified;
        structure.minified = true;

        self.structures.insert(minified, structure);
        self.minified.insert(minified, id);
        self.markers.retain(|(marked, _)| *marked != id);

        Some(minified)
    }

    /// Build the blueprint of `subject`. Returns the id of the structure now
    /// standing on it.
    pub fn complete_blueprint(&mut self, subject: StructureId) -> Option<StructureId> {
        let index = self.blueprints.iter().position(|b| b.subject == subject)?;
        let blueprint = self.blueprints.remove(index);

        let mut structure = self.structures.remove(&subject)?;
        let spawned = self.minified.remove(&subject).unwrap_or(subject);

        structure.id = spawned;
        structure.minified = false;
        structure.position = blueprint.cell;
        structure.rotation = blueprint.rotation;

        self.structures.insert(spawned, structure);
        self.markers.retain(|(marked, _)| *marked != subject && *marked != spawned);

        Some(spawned)
    }

    /// Remove every roof marked for removal. Returns the cells that lost their
    /// roof.
    pub fn collapse_marked_roofs(&mut self) -> Vec<Cell> {
        let cells = self.no_roof.iter().copied().sorted().collect_vec();
        for cell in cells.iter() {
            self.roofs.remove(cell);
        }
        cells
    }

    pub fn destroy(&mut self, id: StructureId) {
        self.structures.remove(&id);
        self.minified.remove(&id);
        self.blueprints.retain(|b| b.subject != id);
        self.markers.retain(|(marked, _)| *marked != id);
    }

    fn blueprint_rect(&self, blueprint: &Blueprint) -> CellRect {
        let size = self
            .structures
            .get(&blueprint.subject)
            .map(|s| s.size)
            .unwrap_or((1, 1));
        occupied_rect(blueprint.cell, blueprint.rotation, size)
    }
}

impl WorldSource for Sandbox {
    fn structure(&self, id: StructureId) -> Option<Structure> {
        self.structures.get(&id).cloned()
    }

    fn things_at(&self, cell: Cell) -> Vec<StructureId> {
        self.structures
            .values()
            .filter(|s| !s.minified && s.occupied_rect().contains(cell) && s.position.y == cell.y)
            .map(|s| s.id)
            .sorted()
            .collect()
    }

    fn is_roofed(&self, cell: Cell) -> bool {
        self.roofs.contains(&cell)
    }

    fn in_bounds(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.z >= 0 && cell.x < self.width && cell.z < self.height
    }

    fn has_marker(&self, id: StructureId, marker: Marker) -> bool {
        self.markers.contains(&(id, marker))
    }

    fn is_destroyed(&self, id: StructureId) -> bool {
        !self.structures.contains_key(&id) && !self.minified.values().any(|inner| *inner == id)
    }
}

impl PlacementOracle for Sandbox {
    fn can_place_at(
        &self,
        subject: &Structure,
        cell: Cell,
        rotation: Rotation,
        ctx: &PlacementContext,
    ) -> Result<(), PlacementRejection> {
        let rect = occupied_rect(cell, rotation, subject.size);
        let inner = self.inner_of(subject.id);
        let is_self = |id: StructureId| id == subject.id || Some(id) == inner;

        for c in rect.cells() {
            if !self.in_bounds(c) {
                return Err(PlacementRejection::OutOfBounds(c));
            }

            if ctx.has_batch_twin_at(&subject.def, c, self) {
                continue;
            }

            for occupant in self.things_at(c) {
                if is_self(occupant) || ctx.is_transparent(occupant) {
                    continue;
                }

                if let Some(other) = self.structure(occupant) {
                    if self.blocks_construction(subject, &other) {
                        return Err(PlacementRejection::Occupied { cell: c, occupant });
                    }
                }
            }

            let overlaps_blueprint = self
                .blueprints
                .iter()
                .filter(|b| !is_self(b.subject))
                .any(|b| self.blueprint_rect(b).contains(c));

            if overlaps_blueprint {
                return Err(PlacementRejection::BlueprintOverlap(c));
            }
        }

        if let Some(offset) = subject.interaction_offset {
            let interaction = interaction_cell(cell, rotation, offset);

            if !self.in_bounds(interaction) {
                return Err(PlacementRejection::InteractionCellBlocked(interaction));
            }

            let blocked = self
                .things_at(interaction)
                .into_iter()
                .filter(|id| !is_self(*id) && !ctx.is_transparent(*id))
                .filter_map(|id| self.structure(id))
                .any(|s| s.is_impassable());

            if blocked {
                return Err(PlacementRejection::InteractionCellBlocked(interaction));
            }
        }

        Ok(())
    }

    fn blocks_construction(&self, subject: &Structure, occupant: &Structure) -> bool {
        if occupant.id == subject.id {
            return false;
        }

        (subject.is_building() && occupant.is_building()) || occupant.is_impassable()
    }
}
