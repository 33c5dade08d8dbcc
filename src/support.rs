//! Roof support queries.
//!
//! A roofed cell stays up while some roof-holding building can be reached
//! from it by walking over roofed cells no further than the support radius.
//! Positive answers remember the supporter that was found so repeated queries
//! over the same area stay cheap.

use crate::constants::*;
use crate::location::*;
use crate::operation::MoveOperation;
use crate::relocation::RelocationSet;
use crate::structure::*;
use crate::world::WorldSource;
use fnv::{FnvHashMap, FnvHashSet};
use itertools::*;
use log::*;
use std::collections::VecDeque;

pub struct SupportGraph {
    cache: FnvHashMap<Cell, StructureId>,
    order: VecDeque<Cell>,
    capacity: usize,
    radius: f32,
}

impl Default for SupportGraph {
    fn default() -> Self {
        SupportGraph::new(ROOF_MAX_SUPPORT_DISTANCE, SUPPORT_CACHE_CAPACITY)
    }
}

impl SupportGraph {
    pub fn new(radius: f32, capacity: usize) -> SupportGraph {
        SupportGraph {
            cache: FnvHashMap::default(),
            order: VecDeque::new(),
            capacity,
            radius,
        }
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Whether `surface` is held up by a roof holder other than those in
    /// `excluding`.
    pub fn is_supported(
        &mut self,
        surface: Cell,
        world: &dyn WorldSource,
        excluding: &FnvHashSet<StructureId>,
    ) -> bool {
        if let Some(supporter) = self.cache.get(&surface).copied() {
            if !excluding.contains(&supporter) && self.still_supports(supporter, surface, world) {
                return true;
            }

            if !excluding.contains(&supporter) {
                trace!("Stale supporter {} for {}", supporter, surface);
                self.forget(surface);
            }
        }

        let radius = self.radius;
        let mut found = None;

        world.flood_fill(
            &[surface],
            &|cell| cell == surface || (world.is_roofed(cell) && cell.in_hor_dist_of(surface, radius)),
            &mut |cell| match world.edifice_at(cell) {
                Some(edifice) if edifice.holds_roof() && !excluding.contains(&edifice.id) => {
                    found = Some(edifice.id);
                    true
                }
                _ => false,
            },
        );

        match found {
            Some(supporter) => {
                self.remember(surface, supporter);
                true
            }
            None => false,
        }
    }

    fn still_supports(&self, supporter: StructureId, surface: Cell, world: &dyn WorldSource) -> bool {
        match world.structure(supporter) {
            Some(s) if !s.minified && s.holds_roof() => s
                .occupied_rect()
                .cells()
                .any(|c| c.in_hor_dist_of(surface, self.radius)),
            _ => false,
        }
    }

    fn remember(&mut self, surface: Cell, supporter: StructureId) {
        if self.capacity == 0 {
            return;
        }

        if self.cache.insert(surface, supporter).is_none() {
            self.order.push_back(surface);

            while self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.cache.remove(&oldest);
                }
            }
        }
    }

    fn forget(&mut self, surface: Cell) {
        if self.cache.remove(&surface).is_some() {
            self.order.retain(|c| *c != surface);
        }
    }

    /// Drop remembered supporters for surfaces a roof change at `cell` may
    /// affect.
    pub fn invalidate_near(&mut self, cell: Cell) {
        let radius = self.radius;
        let stale = self
            .order
            .iter()
            .filter(|s| s.in_hor_dist_of(cell, radius))
            .copied()
            .collect_vec();

        for surface in stale {
            self.forget(surface);
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.order.clear();
    }

    /// Roofed cells within the support radius of a structure, sorted.
    pub fn surfaces_near_footprint(&self, structure: &Structure, world: &dyn WorldSource) -> Vec<Cell> {
        let origin = structure.position;
        let radius = self.radius;

        let mut roots = vec![origin];
        roots.extend(structure.occupied_rect().cells());

        let mut surfaces = Vec::new();

        world.flood_fill(
            &roots,
            &|cell| cell.in_hor_dist_of(origin, radius),
            &mut |cell| {
                if world.is_roofed(cell) {
                    surfaces.push(cell);
                }
                false
            },
        );

        surfaces.sort();
        surfaces
    }

    /// Check whether `structure` can leave without dropping a roof.
    ///
    /// Every surface near the structure that would be left without a holder
    /// is tracked on `set` and marked for roof removal. Returns `true` when
    /// nothing needed marking.
    pub fn protect_surfaces(
        &mut self,
        set: &mut RelocationSet,
        structure: &Structure,
        world: &dyn WorldSource,
        ops: &mut Vec<MoveOperation>,
    ) -> bool {
        let mut excluding = set.in_flight();
        excluding.insert(structure.id);

        let mut safe = true;

        for surface in self.surfaces_near_footprint(structure, world) {
            if !self.is_supported(surface, world, &excluding) {
                safe = false;

                if set.unsupported_surfaces.insert(surface) {
                    ops.push(MoveOperation::SetNoRoof {
                        cell: surface,
                        no_roof: true,
                    });
                }
            }
        }

        if !safe {
            debug!(
                "Relocation {}: {} would drop roof, {} surfaces marked",
                set.id,
                structure.id,
                set.unsupported_surfaces.len()
            );
        }

        safe
    }

    /// Clear every tracked surface of `set` that holds up again. Support
    /// structures the set still claims are leaving and never count.
    pub fn release_supported(
        &mut self,
        set: &mut RelocationSet,
        world: &dyn WorldSource,
        ops: &mut Vec<MoveOperation>,
    ) {
        let mut excluding = set.in_flight();
        excluding.extend(set.support_structures.iter().copied());

        let released = set
            .unsupported_surfaces
            .iter()
            .copied()
            .sorted()
            .filter(|surface| self.is_supported(*surface, world, &excluding))
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
