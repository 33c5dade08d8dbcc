//! Public API for moving structure groups.
//!
//! The `MoverBuilder` provides a fluent API for configuring the mover. The
//! `RelocationController` it builds drives the interactive session (select,
//! rotate, preview, commit), keeps every committed group move alive until it
//! finishes, and reacts to host events. Every entry point returns the
//! [`MoveOperation`] values the caller should apply to the host.

use crate::constants::*;
use crate::location::*;
use crate::operation::MoveOperation;
use crate::relocation::*;
use crate::resolver::ConflictResolver;
use crate::structure::*;
use crate::support::SupportGraph;
use crate::transform::*;
use crate::world::*;
use fnv::FnvHashMap;
use itertools::*;
use log::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tunables of a [`RelocationController`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoverConfig {
    pub support_radius: f32,
    pub retry_interval: u64,
    pub cache_capacity: usize,
    /// Allow designating structures of any faction.
    pub god_mode: bool,
}

impl Default for MoverConfig {
    fn default() -> Self {
        MoverConfig {
            support_radius: ROOF_MAX_SUPPORT_DISTANCE,
            retry_interval: PLACE_RETRY_INTERVAL,
            cache_capacity: SUPPORT_CACHE_CAPACITY,
            god_mode: false,
        }
    }
}

/// Builder for configuring the mover.
#[derive(Default)]
pub struct MoverBuilder {
    config: MoverConfig,
}

impl MoverBuilder {
    pub fn new() -> Self {
        MoverBuilder::default()
    }

    pub fn from_config(config: MoverConfig) -> Self {
        MoverBuilder { config }
    }

    /// Set the roof support radius (default: 6.9).
    pub fn support_radius(mut self, radius: f32) -> Self {
        self.config.support_radius = radius;
        self
    }

    /// Set the ticks between placement retries (default: 250).
    pub fn retry_interval(mut self, ticks: u64) -> Self {
        self.config.retry_interval = ticks;
        self
    }

    /// Set how many supporters the support cache remembers (default: 64).
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    pub fn god_mode(mut self, enabled: bool) -> Self {
        self.config.god_mode = enabled;
        self
    }

    pub fn build(self) -> RelocationController {
        RelocationController::new(self.config)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Select,
    Place,
}

/// Why a structure cannot join the selection.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum Ineligible {
    #[error("not selecting")]
    NotSelecting,
    #[error("structure {0} does not exist")]
    Missing(StructureId),
    #[error("not a building")]
    NotBuilding,
    #[error("cannot be minified")]
    NotMinifiable,
    #[error("owned by another faction")]
    NotOwned,
    #[error("already marked with {0:?}")]
    Marked(Marker),
    #[error("already selected")]
    AlreadySelected,
}

/// Ghost of one selected structure at a candidate anchor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GhostPreview {
    pub structure: StructureId,
    pub cell: Cell,
    pub rotation: Rotation,
    pub acceptance: Result<(), PlacementRejection>,
}

/// Answer to a host asking whether a removal or reinstall job may start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemovalDecision {
    Allow,
    /// Not yet; apply the operations (roof removal marks) and ask again later.
    Defer(Vec<MoveOperation>),
}

struct Session {
    mode: Mode,
    designated: Vec<StructureId>,
    ghost_offsets: FnvHashMap<StructureId, Cell>,
    origin: Option<Cell>,
    rotation: Rotation,
    keep_designation: bool,
    drag_dimensions: u8,
}

impl Session {
    fn new() -> Session {
        Session {
            mode: Mode::Select,
            designated: Vec::new(),
            ghost_offsets: FnvHashMap::default(),
            origin: None,
            rotation: Rotation::North,
            keep_designation: false,
            drag_dimensions: 2,
        }
    }

    fn forget(&mut self, id: StructureId) -> bool {
        let known = self.designated.contains(&id);
        self.designated.retain(|d| *d != id);
        self.ghost_offsets.remove(&id);
        known
    }
}

pub struct RelocationController {
    config: MoverConfig,
    session: Session,
    registry: RelocationRegistry,
    support: SupportGraph,
    last_retry_tick: u64,
}

impl RelocationController {
    pub fn new(config: MoverConfig) -> RelocationController {
        let support = SupportGraph::new(config.support_radius, config.cache_capacity);

        RelocationController {
            config,
            session: Session::new(),
            registry: RelocationRegistry::new(),
            support,
            last_retry_tick: 0,
        }
    }

    pub fn config(&self) -> &MoverConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.session.mode
    }

    /// Structures selected in the current session, in selection order.
    pub fn designated(&self) -> &[StructureId] {
        &self.session.designated
    }

    pub fn ghost_offset(&self, id: StructureId) -> Option<Cell> {
        self.session.ghost_offsets.get(&id).copied()
    }

    pub fn origin(&self) -> Option<Cell> {
        self.session.origin
    }

    pub fn rotation(&self) -> Rotation {
        self.session.rotation
    }

    pub fn drag_dimensions(&self) -> u8 {
        self.session.drag_dimensions
    }

    pub fn keep_designation(&self) -> bool {
        self.session.keep_designation
    }

    pub fn set_keep_designation(&mut self, keep: bool) {
        self.session.keep_designation = keep;
    }

    pub fn registry(&self) -> &RelocationRegistry {
        &self.registry
    }

    /// Whether `occupant` should be ignored by placement checks while the
    /// operator previews the current selection.
    pub fn is_transparent(&self, occupant: StructureId) -> bool {
        self.session.mode == Mode::Place && self.session.designated.contains(&occupant)
    }

    /// Start a fresh selection.
    pub fn select(&mut self) {
        self.session = Session::new();
    }

    pub fn can_designate(&self, structure: &Structure, world: &dyn WorldSource) -> Result<(), Ineligible> {
        if self.session.mode != Mode::Select {
            return Err(Ineligible::NotSelecting);
        }

        if !structure.is_building() {
            return Err(Ineligible::NotBuilding);
        }

        if !structure.is_minifiable() {
            return Err(Ineligible::NotMinifiable);
        }

        let owned = match structure.faction {
            Faction::Player => true,
            Faction::None => structure.claimable,
            Faction::Other(_) => false,
        };

        if !owned && !self.config.god_mode {
            return Err(Ineligible::NotOwned);
        }

        for marker in [Marker::Move, Marker::Deconstruct] {
            if world.has_marker(structure.id, marker) {
                return Err(Ineligible::Marked(marker));
            }
        }

        if self.session.designated.contains(&structure.id) {
            return Err(Ineligible::AlreadySelected);
        }

        Ok(())
    }

    fn designate(&mut self, structure: &Structure, ops: &mut Vec<MoveOperation>) {
        let origin = *self.session.origin.get_or_insert(structure.position);

        if structure.faction != Faction::Player {
            ops.push(MoveOperation::Claim {
                structure: structure.id,
            });
        }

        ops.push(MoveOperation::Designate {
            structure: structure.id,
        });

        self.session.designated.push(structure.id);
        self.session
            .ghost_offsets
            .insert(structure.id, structure.position - origin);

        trace!("Designated {} at {}", structure.id, structure.position);
    }

    /// Select every eligible structure on `cell`, top-most first.
    pub fn designate_cell(&mut self, cell: Cell, world: &dyn WorldSource) -> Vec<MoveOperation> {
        let mut ops = Vec::new();

        if self.session.mode != Mode::Select {
            return ops;
        }

        let candidates = world
            .things_at(cell)
            .into_iter()
            .filter_map(|id| world.structure(id))
            .filter(|s| self.can_designate(s, world).is_ok())
            .sorted_by(|a, b| b.altitude.cmp(&a.altitude))
            .collect_vec();

        if candidates.is_empty() {
            return ops;
        }

        if self.session.origin.is_none() {
            self.session.origin = Some(cell);
        }

        for structure in candidates.iter() {
            self.designate(structure, &mut ops);
        }

        ops
    }

    pub fn designate_structure(
        &mut self,
        id: StructureId,
        world: &dyn WorldSource,
    ) -> Result<Vec<MoveOperation>, Ineligible> {
        let structure = world.structure(id).ok_or(Ineligible::Missing(id))?;
        self.can_designate(&structure, world)?;

        let mut ops = Vec::new();
        self.designate(&structure, &mut ops);

        Ok(ops)
    }

    /// Drag selection over `cells`. Moves on to placement when anything was
    /// selected.
    pub fn designate_cells(&mut self, cells: &[Cell], world: &dyn WorldSource) -> Vec<MoveOperation> {
        let ops = cells
            .iter()
            .flat_map(|cell| self.designate_cell(*cell, world))
            .collect_vec();

        self.finish_selection();

        ops
    }

    /// Leave selection for placement. Returns whether the mode changed.
    pub fn finish_selection(&mut self) -> bool {
        if self.session.mode == Mode::Select && !self.session.designated.is_empty() {
            self.session.mode = Mode::Place;
            self.session.drag_dimensions = 0;
            true
        } else {
            false
        }
    }

    /// Turn the whole formation a quarter turn.
    pub fn rotate(&mut self, direction: RotationDirection, world: &dyn WorldSource) -> bool {
        if self.session.mode != Mode::Place || direction == RotationDirection::None {
            return false;
        }

        for id in self.session.designated.iter() {
            let structure = match world.structure(*id) {
                Some(s) => s,
                None => continue,
            };

            if let Some(offset) = self.session.ghost_offsets.get_mut(id) {
                *offset = ghost_rotation(*offset, direction, &structure);
            }
        }

        self.session.rotation = self.session.rotation.rotated(direction);

        true
    }

    /// Ghosts of the selection dropped at `anchor`.
    pub fn preview(
        &self,
        anchor: Cell,
        world: &dyn WorldSource,
        oracle: &dyn PlacementOracle,
    ) -> Vec<GhostPreview> {
        let ctx = PlacementContext::new(BlueprintMode::Check, &self.session.designated);

        self.session
            .designated
            .iter()
            .filter_map(|id| {
                let structure = world.structure(*id)?;
                let offset = self.session.ghost_offsets.get(id)?;
                let cell = anchor.offset_by(*offset);
                let rotation = structure.rotated_by(self.session.rotation);

                Some(GhostPreview {
                    structure: *id,
                    cell,
                    rotation,
                    acceptance: oracle.can_place_at(&structure, cell, rotation, &ctx),
                })
            })
            .collect()
    }

    /// First reason the selection cannot be dropped at `anchor`.
    pub fn can_place_all(
        &self,
        anchor: Cell,
        world: &dyn WorldSource,
        oracle: &dyn PlacementOracle,
    ) -> Result<(), PlacementRejection> {
        self.preview(anchor, world, oracle)
            .into_iter()
            .find_map(|ghost| ghost.acceptance.err())
            .map_or(Ok(()), Err)
    }

    /// Drop the selection at `anchor` and end the session. Work that cannot
    /// finish now lives on as a relocation set.
    pub fn commit(
        &mut self,
        anchor: Cell,
        world: &dyn WorldSource,
        oracle: &dyn PlacementOracle,
    ) -> Vec<MoveOperation> {
        if self.session.mode != Mode::Place {
            return Vec::new();
        }

        let destroyed = self
            .session
            .designated
            .iter()
            .filter(|id| world.is_destroyed(**id))
            .copied()
            .collect_vec();
        for id in destroyed {
            self.session.forget(id);
        }
        self.registry.purge_destroyed(world);

        if self.session.designated.is_empty() {
            self.select();
            return Vec::new();
        }

        let outcome = ConflictResolver::new(world, oracle, &mut self.support).resolve(
            &self.session.designated,
            &self.session.ghost_offsets,
            anchor,
            self.session.rotation,
        );

        let mut ops = outcome.operations;

        if let Some(set) = outcome.set {
            info!(
                "Relocation {} started: {} structures, {} waiting",
                set.id,
                set.designated.len(),
                set.waiting.len()
            );
            self.registry.insert(set);
        }

        self.session.keep_designation = true;
        ops.extend(self.deselect());
        self.registry.collect_garbage();

        ops
    }

    /// Close the session. Unless designations are kept, every structure
    /// selected in it loses its move marker.
    pub fn deselect(&mut self) -> Vec<MoveOperation> {
        let ops = if self.session.keep_designation {
            Vec::new()
        } else {
            self.session
                .designated
                .iter()
                .map(|id| MoveOperation::ClearDesignation { structure: *id })
                .collect()
        };

        self.select();

        ops
    }

    /// Retry waiting placements once per retry interval.
    pub fn tick(&mut self, now: u64, world: &dyn WorldSource, oracle: &dyn PlacementOracle) -> Vec<MoveOperation> {
        let mut ops = Vec::new();

        if now < self.last_retry_tick.saturating_add(self.config.retry_interval) {
            return ops;
        }
        self.last_retry_tick = now;

        self.registry.purge_destroyed(world);

        let mut resolver = ConflictResolver::new(world, oracle, &mut self.support);

        for set in self.registry.iter_mut() {
            resolver.place_waiting(set, &mut ops);

            if !set.waiting.is_empty() && !set.has_removal_in_flight() {
                resolver.resolve_deadlock(set, &mut ops);
            }
        }

        self.registry.collect_garbage();

        ops
    }

    /// Called before the host starts a removal or reinstall job on `id`.
    pub fn authorize_removal(&mut self, id: StructureId, forced: bool, world: &dyn WorldSource) -> RemovalDecision {
        let structure = match world.structure(id) {
            Some(s) if !s.minified => s,
            _ => return RemovalDecision::Allow,
        };

        let set = match self.registry.claiming_support(id) {
            Some(set) => set,
            None => return RemovalDecision::Allow,
        };

        if forced || !structure.holds_roof() {
            set.reinstalling.insert(id);
            return RemovalDecision::Allow;
        }

        let mut ops = Vec::new();

        if self.support.protect_surfaces(set, &structure, world, &mut ops) {
            set.reinstalling.insert(id);
            RemovalDecision::Allow
        } else {
            RemovalDecision::Defer(ops)
        }
    }

    /// Clear tracked surfaces that hold up again in every set with one
    /// within the support radius of `cell`.
    fn release_near(&mut self, cell: Cell, world: &dyn WorldSource, ops: &mut Vec<MoveOperation>) {
        let radius = self.support.radius();

        for set in self.registry.iter_mut() {
            if set
                .unsupported_surfaces
                .iter()
                .any(|surface| surface.in_hor_dist_of(cell, radius))
            {
                self.support.release_supported(set, world, ops);
            }
        }
    }

    /// The roof on `cell` was built or removed. A new roof can connect marked
    /// surfaces to a holder again; a removed one ends tracking of that cell.
    pub fn on_roof_changed(&mut self, cell: Cell, roofed: bool, world: &dyn WorldSource) -> Vec<MoveOperation> {
        let mut ops = Vec::new();

        self.support.invalidate_near(cell);

        if roofed {
            self.release_near(cell, world, &mut ops);
        } else {
            let mut tracked = false;
            for set in self.registry.iter_mut() {
                tracked |= set.unsupported_surfaces.remove(&cell);
            }

            if tracked {
                ops.push(MoveOperation::SetNoRoof {
                    cell,
                    no_roof: false,
                });
            }
        }

        self.registry.collect_garbage();

        ops
    }

    /// A structure was (re)built. Rebuilt members settle, re-created support
    /// structures stop being tracked, and any new roof holder releases the
    /// marked surfaces it holds up.
    pub fn on_structure_spawned(&mut self, id: StructureId, world: &dyn WorldSource) -> Vec<MoveOperation> {
        let mut ops = Vec::new();

        for set in self.registry.iter_mut() {
            if set.settle(id) {
                trace!("Relocation {}: {} reached its destination", set.id, id);
            }
        }

        if let Some(set) = self.registry.claiming_support(id) {
            set.support_structures.remove(&id);
            set.reinstalling.remove(&id);
            self.support.release_supported(set, world, &mut ops);
            debug!("Relocation {}: support {} is back", set.id, id);
        }

        if let Some(structure) = world.structure(id).filter(|s| s.holds_roof() && !s.minified) {
            self.support.invalidate_near(structure.position);
            self.release_near(structure.position, world, &mut ops);
        }

        self.registry.collect_garbage();

        ops
    }

    /// The operator removed the move marker from `id` by hand.
    pub fn on_designation_removed(&mut self, id: StructureId, world: &dyn WorldSource) -> Vec<MoveOperation> {
        let mut ops = Vec::new();
        let radius = self.support.radius();

        let position = world
            .structure(id)
            .filter(|s| !s.minified)
            .map(|s| s.position);

        let mut tracked = self.session.forget(id);

        for set in self.registry.iter_mut() {
            if !set.contains(id) {
                continue;
            }
            tracked = true;

            if !set.forget(id) {
                continue;
            }

            if let Some(position) = position {
                let released = set
                    .unsupported_surfaces
                    .iter()
                    .filter(|surface| position.in_hor_dist_of(**surface, radius))
                    .copied()
                    .sorted()
                    .collect_vec();

                for surface in released {
                    set.unsupported_surfaces.remove(&surface);
                    ops.push(MoveOperation::SetNoRoof {
                        cell: surface,
                        no_roof: false,
                    });
                }
            }
        }

        if tracked {
            ops.push(MoveOperation::CancelBlueprints { structure: id });
        }

        self.registry.collect_garbage();

        ops
    }

    /// A removal job on `id` ended. `minified` is the packed structure on
    /// success and `None` when the job failed.
    pub fn on_removal_complete(&mut self, id: StructureId, minified: Option<StructureId>) -> Vec<MoveOperation> {
        for set in self.registry.iter_mut() {
            let handled = match minified {
                Some(minified) => set.replace_with_minified(id, minified),
                None => set.removal_failed(id),
            };

            if handled {
                debug!("Relocation {}: removal of {} ended ({:?})", set.id, id, minified);
            }
        }

        self.registry.collect_garbage();

        Vec::new()
    }

    pub fn on_blueprint_destroyed(&mut self, subject: StructureId) -> Vec<MoveOperation> {
        self.registry.collect_garbage();

        vec![MoveOperation::ClearDesignation { structure: subject }]
    }

    pub fn on_structure_destroyed(&mut self, id: StructureId) -> Vec<MoveOperation> {
        self.session.forget(id);

        for set in self.registry.iter_mut() {
            set.forget(id);
        }

        self.registry.collect_garbage();

        Vec::new()
    }

    /// Persistable form of every live relocation.
    pub fn snapshot(&mut self, world: &dyn WorldSource) -> RegistrySnapshot {
        self.registry.snapshot(world)
    }

    pub fn restore(&mut self, snapshot: RegistrySnapshot) -> Result<(), SnapshotError> {
        self.registry = RelocationRegistry::restore(snapshot)?;
        self.support.clear();
        Ok(())
    }

    /// Forget every relocation and the support cache.
    pub fn clear(&mut self) {
        self.registry.clear();
        self.support.clear();
        self.select();
    }
}

impl Default for RelocationController {
    fn default() -> Self {
        MoverBuilder::default().build()
    }
}
