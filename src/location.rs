use serde::*;
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// A cell on the world grid. `y` is the level and is never rotated.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Cell {
    pub const ZERO: Cell = Cell { x: 0, y: 0, z: 0 };

    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Cell { x, y, z }
    }

    /// Horizontal cell on level zero.
    #[inline]
    pub const fn xz(x: i32, z: i32) -> Self {
        Cell { x, y: 0, z }
    }

    #[inline]
    pub fn packed_repr(self) -> (i32, i32, i32) {
        (self.x, self.y, self.z)
    }

    #[inline]
    pub fn from_packed(packed: (i32, i32, i32)) -> Self {
        Cell::new(packed.0, packed.1, packed.2)
    }

    pub fn hor_distance_squared(self, other: Self) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dz = (self.z - other.z) as i64;

        dx * dx + dz * dz
    }

    /// Euclidean horizontal distance check, ignoring `y`.
    pub fn in_hor_dist_of(self, other: Self, max_distance: f32) -> bool {
        (self.hor_distance_squared(other) as f32) <= max_distance * max_distance
    }

    pub fn cardinal_neighbors(self) -> [Cell; 4] {
        [
            Cell::new(self.x, self.y, self.z + 1),
            Cell::new(self.x + 1, self.y, self.z),
            Cell::new(self.x, self.y, self.z - 1),
            Cell::new(self.x - 1, self.y, self.z),
        ]
    }

    /// Destination of a ghost offset relative to a group anchor. The anchor's
    /// level is kept.
    #[inline]
    pub fn offset_by(self, offset: Cell) -> Cell {
        Cell::new(self.x + offset.x, self.y, self.z + offset.z)
    }
}

impl Add for Cell {
    type Output = Cell;

    fn add(self, other: Cell) -> Cell {
        Cell::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Cell {
    type Output = Cell;

    fn sub(self, other: Cell) -> Cell {
        Cell::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Neg for Cell {
    type Output = Cell;

    fn neg(self) -> Cell {
        Cell::new(-self.x, -self.y, -self.z)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl Serialize for Cell {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.packed_repr().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Cell {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        <(i32, i32, i32)>::deserialize(deserializer).map(Cell::from_packed)
    }
}
