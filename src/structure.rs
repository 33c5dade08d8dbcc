use crate::location::*;
use crate::transform::*;
use bitflags::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque host identifier of a structure (or of a minified structure).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructureId(pub u64);

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct StructureFlags: u16 {
        const NONE = 0;
        const BUILDING = 1;
        const MINIFIABLE = 2;
        const ROTATABLE = 4;
        const HOLDS_ROOF = 8;
        const IMPASSABLE = 16;
        const BLUEPRINT_ELIGIBLE = 32;
        const WALL = 64;
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum Faction {
    Player,
    Other(u32),
    #[default]
    None,
}

/// Snapshot of a host structure as the mover sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Structure {
    pub id: StructureId,
    pub def: String,
    pub stuff: Option<String>,
    pub quality: Option<u8>,
    pub position: Cell,
    pub rotation: Rotation,
    pub size: (i32, i32),
    pub faction: Faction,
    pub claimable: bool,
    /// Draw layer; higher values are on top.
    pub altitude: u8,
    pub interaction_offset: Option<Cell>,
    pub minified: bool,
    pub flags: StructureFlags,
}

impl Structure {
    /// A 1x1 player-owned building at `position` with the given flags.
    pub fn new(id: StructureId, def: &str, position: Cell, flags: StructureFlags) -> Structure {
        Structure {
            id,
            def: def.to_owned(),
            stuff: None,
            quality: None,
            position,
            rotation: Rotation::North,
            size: (1, 1),
            faction: Faction::Player,
            claimable: false,
            altitude: 0,
            interaction_offset: None,
            minified: false,
            flags,
        }
    }

    pub fn with_size(mut self, size: (i32, i32)) -> Structure {
        self.size = size;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Structure {
        self.rotation = rotation;
        self
    }

    pub fn with_stuff(mut self, stuff: &str) -> Structure {
        self.stuff = Some(stuff.to_owned());
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Structure {
        self.quality = Some(quality);
        self
    }

    pub fn with_faction(mut self, faction: Faction, claimable: bool) -> Structure {
        self.faction = faction;
        self.claimable = claimable;
        self
    }

    pub fn with_altitude(mut self, altitude: u8) -> Structure {
        self.altitude = altitude;
        self
    }

    pub fn with_interaction_offset(mut self, offset: Cell) -> Structure {
        self.interaction_offset = Some(offset);
        self
    }

    #[inline]
    pub fn is_building(&self) -> bool {
        self.flags.contains(StructureFlags::BUILDING)
    }

    #[inline]
    pub fn is_minifiable(&self) -> bool {
        self.flags.contains(StructureFlags::MINIFIABLE)
    }

    #[inline]
    pub fn is_rotatable(&self) -> bool {
        self.flags.contains(StructureFlags::ROTATABLE)
    }

    #[inline]
    pub fn holds_roof(&self) -> bool {
        self.flags.contains(StructureFlags::HOLDS_ROOF)
    }

    #[inline]
    pub fn is_impassable(&self) -> bool {
        self.flags.contains(StructureFlags::IMPASSABLE)
    }

    #[inline]
    pub fn is_blueprint_eligible(&self) -> bool {
        self.flags.contains(StructureFlags::BLUEPRINT_ELIGIBLE)
    }

    #[inline]
    pub fn is_wall(&self) -> bool {
        self.flags.contains(StructureFlags::WALL)
    }

    /// Rotation this structure ends up with when its group turns by `delta`.
    pub fn rotated_by(&self, delta: Rotation) -> Rotation {
        if self.is_rotatable() {
            self.rotation.plus(delta)
        } else {
            self.rotation
        }
    }

    /// Whether `other` is interchangeable with this structure once the group
    /// has turned by `delta`.
    pub fn identical_with(&self, delta: Rotation, other: &Structure) -> bool {
        if self.def != other.def || self.stuff != other.stuff {
            return false;
        }

        if self.is_wall() && other.is_wall() {
            return true;
        }

        self.quality == other.quality && self.rotated_by(delta) == other.rotation
    }

    pub fn occupied_rect(&self) -> CellRect {
        occupied_rect(self.position, self.rotation, self.size)
    }

    pub fn occupied_cells(&self) -> Vec<Cell> {
        self.occupied_rect().cells().collect()
    }

    pub fn interaction_cell(&self) -> Option<Cell> {
        self.interaction_offset
            .map(|offset| interaction_cell(self.position, self.rotation, offset))
    }
}
