use crate::location::*;
use crate::structure::StructureId;
use crate::transform::Rotation;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlueprintKind {
    /// Move a standing structure to the blueprint.
    Reinstall,
    /// Install a minified structure from wherever it is stored.
    Install,
}

/// An operation that the mover wants the caller to perform.
///
/// Every entry point of the controller returns these. The caller is
/// responsible for applying them to the host world.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveOperation {
    /// Put a move marker on the structure.
    Designate { structure: StructureId },
    /// Remove the move marker from the structure.
    ClearDesignation { structure: StructureId },
    /// Take ownership of an unowned structure.
    Claim { structure: StructureId },
    PlaceBlueprint {
        subject: StructureId,
        cell: Cell,
        rotation: Rotation,
        kind: BlueprintKind,
    },
    /// Hand the blueprint planned for `from` over to `to`.
    RetargetBlueprint { from: StructureId, to: StructureId },
    /// Start a job that removes (minifies) the structure.
    RequestRemoval { structure: StructureId },
    /// Cancel every blueprint whose subject is the structure.
    CancelBlueprints { structure: StructureId },
    SetNoRoof { cell: Cell, no_roof: bool },
}

impl MoveOperation {
    pub fn structure(&self) -> Option<StructureId> {
        match self {
            MoveOperation::Designate { structure }
            | MoveOperation::ClearDesignation { structure }
            | MoveOperation::Claim { structure }
            | MoveOperation::RequestRemoval { structure }
            | MoveOperation::CancelBlueprints { structure } => Some(*structure),
            MoveOperation::PlaceBlueprint { subject, .. } => Some(*subject),
            MoveOperation::RetargetBlueprint { to, .. } => Some(*to),
            MoveOperation::SetNoRoof { .. } => None,
        }
    }
}
