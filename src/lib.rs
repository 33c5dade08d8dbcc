pub mod constants;
pub mod controller;
pub mod flood;
pub mod location;
pub mod operation;
pub mod relocation;
pub mod resolver;
pub mod sandbox;
pub mod structure;
pub mod support;
pub mod transform;
pub mod world;

pub use controller::*;
pub use location::Cell;
pub use operation::*;
pub use structure::*;
pub use transform::{Rotation, RotationDirection};
pub use world::*;
