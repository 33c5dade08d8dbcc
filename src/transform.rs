//! Pure geometry for moving formations: quarter-turn rotations of ghost
//! offsets, occupied rectangles of footprints, interaction and adjacent cells,
//! and bounding centers.
//!
//! Nothing in here touches the world. Offsets rotate about the group origin;
//! footprints follow the usual "center cell plus size" convention where even
//! sized footprints lean towards negative coordinates once rotated.

use crate::constants::ROTATION_COUNT;
use crate::location::*;
use crate::structure::Structure;
use itertools::*;
use serde::{Deserialize, Serialize};

/// Facing of a structure or of a whole formation.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    North = 0,
    East = 1,
    South = 2,
    West = 3,
}

/// Direction of a single quarter turn requested by the operator.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum RotationDirection {
    #[default]
    None,
    Clockwise,
    Counterclockwise,
}

impl Rotation {
    pub fn from_quarter_turns(turns: i32) -> Rotation {
        match turns.rem_euclid(ROTATION_COUNT as i32) {
            0 => Rotation::North,
            1 => Rotation::East,
            2 => Rotation::South,
            _ => Rotation::West,
        }
    }

    #[inline]
    pub fn as_int(self) -> i32 {
        self as i32
    }

    #[inline]
    pub fn is_horizontal(self) -> bool {
        matches!(self, Rotation::East | Rotation::West)
    }

    /// Sum of two rotations, modulo a full turn.
    pub fn plus(self, other: Rotation) -> Rotation {
        Rotation::from_quarter_turns(self.as_int() + other.as_int())
    }

    pub fn rotated(self, direction: RotationDirection) -> Rotation {
        match direction {
            RotationDirection::Clockwise => Rotation::from_quarter_turns(self.as_int() + 1),
            RotationDirection::Counterclockwise => Rotation::from_quarter_turns(self.as_int() - 1),
            RotationDirection::None => self,
        }
    }
}

/// Rotate an offset a quarter turn about the origin.
pub fn rotate_offset(offset: Cell, direction: RotationDirection) -> Cell {
    match direction {
        RotationDirection::Clockwise => Cell::new(offset.z, offset.y, -offset.x),
        RotationDirection::Counterclockwise => Cell::new(-offset.z, offset.y, offset.x),
        RotationDirection::None => offset,
    }
}

/// Rotate an offset clockwise as many quarter turns as `rotation` holds.
pub fn rotate_by(offset: Cell, rotation: Rotation) -> Cell {
    (0..rotation.as_int()).fold(offset, |acc, _| {
        rotate_offset(acc, RotationDirection::Clockwise)
    })
}

/// Inclusive rectangle of cells on one level.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct CellRect {
    pub min_x: i32,
    pub min_z: i32,
    pub max_x: i32,
    pub max_z: i32,
    pub y: i32,
}

impl CellRect {
    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= self.min_x && cell.x <= self.max_x && cell.z >= self.min_z && cell.z <= self.max_z
    }

    pub fn cells(&self) -> impl Iterator<Item = Cell> {
        let y = self.y;
        iproduct!(self.min_z..=self.max_z, self.min_x..=self.max_x)
            .map(move |(z, x)| Cell::new(x, y, z))
    }

    pub fn corners(&self) -> [Cell; 4] {
        [
            Cell::new(self.min_x, self.y, self.min_z),
            Cell::new(self.max_x, self.y, self.min_z),
            Cell::new(self.min_x, self.y, self.max_z),
            Cell::new(self.max_x, self.y, self.max_z),
        ]
    }

    pub fn overlaps(&self, other: &CellRect) -> bool {
        self.y == other.y
            && self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_z <= other.max_z
            && other.min_z <= self.max_z
    }
}

/// Occupied rectangle of a footprint of `size` (x, z) centered at `center`.
pub fn occupied_rect(center: Cell, rotation: Rotation, size: (i32, i32)) -> CellRect {
    let (mut size_x, mut size_z) = size;
    let mut center = center;

    if size_x != 1 || size_z != 1 {
        if rotation.is_horizontal() {
            std::mem::swap(&mut size_x, &mut size_z);
        }

        match rotation {
            Rotation::North => {}
            Rotation::East => {
                if size_z % 2 == 0 {
                    center.z -= 1;
                }
            }
            Rotation::South => {
                if size_x % 2 == 0 {
                    center.x -= 1;
                }
                if size_z % 2 == 0 {
                    center.z -= 1;
                }
            }
            Rotation::West => {
                if size_x % 2 == 0 {
                    center.x -= 1;
                }
            }
        }
    }

    let min_x = center.x - (size_x - 1) / 2;
    let min_z = center.z - (size_z - 1) / 2;

    CellRect {
        min_x,
        min_z,
        max_x: min_x + size_x - 1,
        max_z: min_z + size_z - 1,
        y: center.y,
    }
}

pub fn interaction_cell(center: Cell, rotation: Rotation, offset: Cell) -> Cell {
    let rotated = rotate_by(offset, rotation);
    Cell::new(center.x + rotated.x, center.y, center.z + rotated.z)
}

/// Every cell a footprint claims, including its interaction cell.
pub fn footprint_cells(
    anchor: Cell,
    rotation: Rotation,
    size: (i32, i32),
    interaction_offset: Option<Cell>,
) -> Vec<Cell> {
    let mut cells = occupied_rect(anchor, rotation, size).cells().collect_vec();
    if let Some(offset) = interaction_offset {
        let cell = interaction_cell(anchor, rotation, offset);
        if !cells.contains(&cell) {
            cells.push(cell);
        }
    }
    cells
}

/// Cells sharing an edge with the occupied rectangle. Corners are excluded.
pub fn adjacent_cardinal(center: Cell, rotation: Rotation, size: (i32, i32)) -> Vec<Cell> {
    let rect = occupied_rect(center, rotation, size);
    let mut cells = Vec::new();

    for x in rect.min_x..=rect.max_x {
        cells.push(Cell::new(x, rect.y, rect.min_z - 1));
        cells.push(Cell::new(x, rect.y, rect.max_z + 1));
    }
    for z in rect.min_z..=rect.max_z {
        cells.push(Cell::new(rect.min_x - 1, rect.y, z));
        cells.push(Cell::new(rect.max_x + 1, rect.y, z));
    }

    cells
}

/// Midpoint of the x/z extent of `cells`; the level is taken from the first cell.
pub fn bounding_center(cells: &[Cell]) -> Option<Cell> {
    let first = cells.first()?;
    let (min_x, max_x) = cells.iter().map(|c| c.x).minmax().into_option()?;
    let (min_z, max_z) = cells.iter().map(|c| c.z).minmax().into_option()?;

    Some(Cell::new(
        (max_x - min_x) / 2 + min_x,
        first.y,
        (max_z - min_z) / 2 + min_z,
    ))
}

/// Rotate a structure's ghost offset one quarter turn.
///
/// Rotatable and single-cell structures turn about the group origin directly.
/// A multi-cell structure that cannot change its own facing keeps its
/// footprint orientation, so its new offset is the bounding center of its
/// rotated corners instead.
pub fn ghost_rotation(offset: Cell, direction: RotationDirection, structure: &Structure) -> Cell {
    if structure.is_rotatable() || structure.size == (1, 1) {
        return rotate_offset(offset, direction);
    }

    let corners = structure
        .occupied_rect()
        .corners()
        .iter()
        .map(|corner| rotate_offset(*corner - structure.position + offset, direction))
        .collect_vec();

    bounding_center(&corners).unwrap_or(offset)
}
