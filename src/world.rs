use crate::flood;
use crate::location::*;
use crate::structure::*;
use crate::transform::Rotation;
use thiserror::Error;

/// Designation markers the host may carry on a structure.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Marker {
    Move,
    Deconstruct,
    Uninstall,
}

/// Trait for providing world state to the mover.
/// Implementations exist for the host game and for the in-memory sandbox.
pub trait WorldSource {
    fn structure(&self, id: StructureId) -> Option<Structure>;

    /// Things occupying `cell`, in host order.
    fn things_at(&self, cell: Cell) -> Vec<StructureId>;

    fn is_roofed(&self, cell: Cell) -> bool;

    fn in_bounds(&self, cell: Cell) -> bool;

    fn has_marker(&self, id: StructureId, marker: Marker) -> bool;

    /// Destroyed, or never existed. A minified structure is not destroyed.
    fn is_destroyed(&self, id: StructureId) -> bool {
        self.structure(id).is_none()
    }

    /// The building standing on `cell`, if any.
    fn edifice_at(&self, cell: Cell) -> Option<Structure> {
        self.things_at(cell)
            .into_iter()
            .filter_map(|id| self.structure(id))
            .find(|s| s.is_building() && !s.minified)
    }

    /// Bounded flood fill over in-bounds cells. See [`flood::flood_fill`].
    fn flood_fill(
        &self,
        roots: &[Cell],
        passable: &dyn Fn(Cell) -> bool,
        visitor: &mut dyn FnMut(Cell) -> bool,
    ) -> bool {
        flood::flood_fill(roots, |c| self.in_bounds(c) && passable(c), visitor)
    }
}

/// Whether a legality check is a dry run for preview or a real placement.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BlueprintMode {
    Check,
    Place,
}

/// Extra information handed to the legality oracle.
#[derive(Copy, Clone, Debug)]
pub struct PlacementContext<'a> {
    pub mode: BlueprintMode,
    pub batch: &'a [StructureId],
}

impl<'a> PlacementContext<'a> {
    pub fn new(mode: BlueprintMode, batch: &'a [StructureId]) -> PlacementContext<'a> {
        PlacementContext { mode, batch }
    }

    /// While previewing, structures of the moving batch do not block their
    /// own group.
    pub fn is_transparent(&self, occupant: StructureId) -> bool {
        self.mode == BlueprintMode::Check && self.batch.contains(&occupant)
    }

    /// Whether a transparent batch member of definition `def` stands on
    /// `cell`. Lets linked structures (conduits and the like) preview over
    /// their own moving twins.
    pub fn has_batch_twin_at(&self, def: &str, cell: Cell, world: &dyn WorldSource) -> bool {
        if self.mode != BlueprintMode::Check {
            return false;
        }

        world
            .things_at(cell)
            .into_iter()
            .filter(|id| self.batch.contains(id))
            .filter_map(|id| world.structure(id))
            .any(|s| s.def == def)
    }
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum PlacementRejection {
    #[error("cell {0} is out of bounds")]
    OutOfBounds(Cell),
    #[error("cell {cell} is occupied by {occupant}")]
    Occupied { cell: Cell, occupant: StructureId },
    #[error("interaction cell {0} is blocked")]
    InteractionCellBlocked(Cell),
    #[error("cell {0} overlaps a planned blueprint")]
    BlueprintOverlap(Cell),
    #[error("{0}")]
    Host(String),
}

/// Host rule set for what may be built where.
pub trait PlacementOracle {
    fn can_place_at(
        &self,
        subject: &Structure,
        cell: Cell,
        rotation: Rotation,
        ctx: &PlacementContext,
    ) -> Result<(), PlacementRejection>;

    /// Whether `occupant` standing in the way prevents building `subject`.
    fn blocks_construction(&self, subject: &Structure, occupant: &Structure) -> bool;
}
