//! End-to-end group moves driven through the sandbox world.

use base_mover::relocation::RegistrySnapshot;
use base_mover::sandbox::Sandbox;
use base_mover::*;

const MOVABLE: StructureFlags = StructureFlags::BUILDING
    .union(StructureFlags::MINIFIABLE)
    .union(StructureFlags::BLUEPRINT_ELIGIBLE);

fn furniture(id: u64, def: &str, cell: Cell) -> Structure {
    Structure::new(StructureId(id), def, cell, MOVABLE)
}

fn pillar(id: u64, cell: Cell) -> Structure {
    Structure::new(
        StructureId(id),
        "pillar",
        cell,
        MOVABLE | StructureFlags::HOLDS_ROOF,
    )
}

fn removals(ops: &[MoveOperation]) -> Vec<StructureId> {
    ops.iter()
        .filter_map(|op| match op {
            MoveOperation::RequestRemoval { structure } => Some(*structure),
            _ => None,
        })
        .collect()
}

fn placements(ops: &[MoveOperation]) -> Vec<(StructureId, Cell, BlueprintKind)> {
    ops.iter()
        .filter_map(|op| match op {
            MoveOperation::PlaceBlueprint {
                subject, cell, kind, ..
            } => Some((*subject, *cell, *kind)),
            _ => None,
        })
        .collect()
}

/// Build every blueprint the operations asked for and report the spawns.
fn build_all(controller: &mut RelocationController, world: &mut Sandbox, ops: &[MoveOperation]) {
    world.apply(ops);
    for (subject, _, _) in placements(ops) {
        if let Some(spawned) = world.complete_blueprint(subject) {
            let more = controller.on_structure_spawned(spawned, world);
            world.apply(&more);
        }
    }
}

#[test]
fn test_identical_group_shifts_onto_empty_ground() {
    let mut world = Sandbox::new(20, 20);
    for (i, x) in [1, 2, 3].iter().enumerate() {
        world.add_structure(furniture(i as u64 + 1, "lamp", Cell::xz(*x, 1)));
    }

    let mut controller = RelocationController::default();
    let ops = controller.designate_cells(&[Cell::xz(1, 1), Cell::xz(2, 1), Cell::xz(3, 1)], &world);
    world.apply(&ops);

    let ops = controller.commit(Cell::xz(1, 5), &world, &world);

    assert_eq!(
        placements(&ops),
        vec![
            (StructureId(1), Cell::xz(1, 5), BlueprintKind::Reinstall),
            (StructureId(2), Cell::xz(2, 5), BlueprintKind::Reinstall),
            (StructureId(3), Cell::xz(3, 5), BlueprintKind::Reinstall),
        ]
    );
    assert!(removals(&ops).is_empty());
    assert!(controller.registry().is_empty(), "nothing should be left waiting");
    assert_eq!(controller.mode(), Mode::Select);
}

#[test]
fn test_direct_swap_needs_one_removal() {
    let mut world = Sandbox::new(10, 10);
    let a = world.add_structure(furniture(1, "crate", Cell::xz(0, 0)));
    let b = world.add_structure(furniture(2, "shelf", Cell::xz(1, 0)));

    let mut controller = RelocationController::default();
    let ops = controller.designate_cells(&[Cell::xz(0, 0), Cell::xz(1, 0)], &world);
    world.apply(&ops);

    assert!(controller.rotate(RotationDirection::Clockwise, &world));
    assert!(controller.rotate(RotationDirection::Clockwise, &world));

    let ops = controller.commit(Cell::xz(1, 0), &world, &world);
    assert_eq!(removals(&ops), vec![a], "exactly one removal breaks the swap");
    assert!(placements(&ops).is_empty());
    assert_eq!(controller.registry().len(), 1);
    world.apply(&ops);

    let minified = world.complete_removal(a).unwrap();
    controller.on_removal_complete(a, Some(minified));

    let ops = controller.tick(250, &world, &world);
    assert_eq!(
        placements(&ops),
        vec![(b, Cell::xz(0, 0), BlueprintKind::Reinstall)]
    );
    assert!(removals(&ops).is_empty());
    build_all(&mut controller, &mut world, &ops);

    let ops = controller.tick(500, &world, &world);
    assert_eq!(
        placements(&ops),
        vec![(minified, Cell::xz(1, 0), BlueprintKind::Install)]
    );
    assert!(controller.registry().is_empty());

    build_all(&mut controller, &mut world, &ops);
    assert_eq!(world.things_at(Cell::xz(1, 0)), vec![a]);
    assert_eq!(world.things_at(Cell::xz(0, 0)), vec![b]);
}

#[test]
fn test_rotating_ring_settles() {
    let mut world = Sandbox::new(10, 10);
    let cells = [Cell::xz(0, 0), Cell::xz(1, 0), Cell::xz(0, 1), Cell::xz(1, 1)];
    for (i, cell) in cells.iter().enumerate() {
        world.add_structure(furniture(i as u64 + 1, &format!("thing{}", i), *cell));
    }

    let mut controller = RelocationController::default();
    let ops = controller.designate_cells(&cells, &world);
    world.apply(&ops);
    controller.rotate(RotationDirection::Clockwise, &world);

    let ops = controller.commit(Cell::xz(0, 1), &world, &world);
    assert_eq!(removals(&ops), vec![StructureId(1)]);
    world.apply(&ops);

    let minified = world.complete_removal(StructureId(1)).unwrap();
    controller.on_removal_complete(StructureId(1), Some(minified));

    let mut now = 0;
    for _ in 0..8 {
        if controller.registry().is_empty() {
            break;
        }
        now += 250;
        let ops = controller.tick(now, &world, &world);
        assert!(removals(&ops).is_empty(), "no further removals are needed");
        build_all(&mut controller, &mut world, &ops);
    }

    assert!(controller.registry().is_empty(), "every member reached its spot");
    assert_eq!(world.things_at(Cell::xz(0, 1)), vec![StructureId(1)]);
    assert_eq!(world.things_at(Cell::xz(0, 0)), vec![StructureId(2)]);
    assert_eq!(world.things_at(Cell::xz(1, 1)), vec![StructureId(3)]);
    assert_eq!(world.things_at(Cell::xz(1, 0)), vec![StructureId(4)]);
}

fn roofed_room() -> Sandbox {
    let mut world = Sandbox::new(12, 12);
    for cell in [Cell::xz(2, 2), Cell::xz(3, 2), Cell::xz(2, 3), Cell::xz(3, 3)] {
        world.set_roof(cell, true);
    }
    world.add_structure(pillar(1, Cell::xz(2, 2)));
    world
}

#[test]
fn test_sole_support_marks_its_roof() {
    let mut world = roofed_room();
    let support = StructureId(1);

    let mut controller = RelocationController::default();
    let ops = controller.designate_cells(&[Cell::xz(2, 2)], &world);
    world.apply(&ops);

    let ops = controller.commit(Cell::xz(8, 8), &world, &world);
    assert_eq!(
        placements(&ops),
        vec![(support, Cell::xz(8, 8), BlueprintKind::Reinstall)]
    );
    assert_eq!(controller.registry().len(), 1, "support structures stay tracked");
    world.apply(&ops);

    let marks = match controller.authorize_removal(support, false, &world) {
        RemovalDecision::Defer(ops) => ops,
        RemovalDecision::Allow => panic!("removal should wait for the roof"),
    };
    assert_eq!(marks.len(), 4);
    assert!(marks
        .iter()
        .all(|op| matches!(op, MoveOperation::SetNoRoof { no_roof: true, .. })));
    world.apply(&marks);

    // Asking again does not mark anything twice.
    assert_eq!(
        controller.authorize_removal(support, false, &world),
        RemovalDecision::Defer(Vec::new())
    );

    for cell in world.collapse_marked_roofs() {
        let ops = controller.on_roof_changed(cell, false, &world);
        assert_eq!(ops, vec![MoveOperation::SetNoRoof { cell, no_roof: false }]);
        world.apply(&ops);
    }
    assert!(world.no_roof_cells().is_empty());

    assert_eq!(
        controller.authorize_removal(support, false, &world),
        RemovalDecision::Allow
    );

    let spawned = world.complete_blueprint(support).unwrap();
    controller.on_structure_spawned(spawned, &world);
    assert!(controller.registry().is_empty());
}

#[test]
fn test_second_support_prevents_marks() {
    let mut world = roofed_room();
    world.add_structure(pillar(2, Cell::xz(3, 3)));

    let mut controller = RelocationController::default();
    let ops = controller.designate_cells(&[Cell::xz(2, 2)], &world);
    world.apply(&ops);
    let ops = controller.commit(Cell::xz(8, 8), &world, &world);
    world.apply(&ops);

    assert_eq!(
        controller.authorize_removal(StructureId(1), false, &world),
        RemovalDecision::Allow
    );
    assert!(world.no_roof_cells().is_empty());
}

fn marked_sole_support() -> (Sandbox, RelocationController) {
    let mut world = roofed_room();

    let mut controller = RelocationController::default();
    let ops = controller.designate_cells(&[Cell::xz(2, 2)], &world);
    world.apply(&ops);
    let ops = controller.commit(Cell::xz(8, 8), &world, &world);
    world.apply(&ops);

    match controller.authorize_removal(StructureId(1), false, &world) {
        RemovalDecision::Defer(marks) => world.apply(&marks),
        RemovalDecision::Allow => panic!("removal should wait for the roof"),
    }
    assert_eq!(world.no_roof_cells().len(), 4);

    (world, controller)
}

#[test]
fn test_new_supporter_releases_marked_roof() {
    let (mut world, mut controller) = marked_sole_support();

    let second = world.add_structure(pillar(2, Cell::xz(3, 3)));
    let ops = controller.on_structure_spawned(second, &world);
    assert_eq!(ops.len(), 4);
    assert!(ops
        .iter()
        .all(|op| matches!(op, MoveOperation::SetNoRoof { no_roof: false, .. })));
    world.apply(&ops);

    assert!(world.no_roof_cells().is_empty());
    assert_eq!(
        controller.authorize_removal(StructureId(1), false, &world),
        RemovalDecision::Allow
    );
}

#[test]
fn test_unrelated_building_keeps_roof_marks() {
    let (mut world, mut controller) = marked_sole_support();

    let chair = world.add_structure(furniture(2, "chair", Cell::xz(3, 3)));
    assert!(controller.on_structure_spawned(chair, &world).is_empty());
    assert_eq!(world.no_roof_cells().len(), 4);
}

#[test]
fn test_new_roof_links_marked_cells_to_a_holder() {
    let (mut world, mut controller) = marked_sole_support();

    // A pillar just outside the room holds nothing until the roof reaches it.
    world.add_structure(pillar(2, Cell::xz(4, 2)));
    assert!(controller.on_structure_spawned(StructureId(2), &world).is_empty());

    world.set_roof(Cell::xz(4, 2), true);
    let ops = controller.on_roof_changed(Cell::xz(4, 2), true, &world);
    assert_eq!(ops.len(), 4);
    world.apply(&ops);
    assert!(world.no_roof_cells().is_empty());
}

#[test]
fn test_forced_jobs_skip_support_checks() {
    let mut world = roofed_room();

    let mut controller = RelocationController::default();
    let ops = controller.designate_cells(&[Cell::xz(2, 2)], &world);
    world.apply(&ops);
    controller.commit(Cell::xz(8, 8), &world, &world);

    assert_eq!(
        controller.authorize_removal(StructureId(1), true, &world),
        RemovalDecision::Allow
    );
}

#[test]
fn test_deselect_only_clears_the_session() {
    let mut world = Sandbox::new(10, 10);
    world.add_structure(furniture(1, "crate", Cell::xz(1, 1)));
    let mut rock = furniture(9, "rock", Cell::xz(6, 6));
    rock.flags.remove(StructureFlags::MINIFIABLE);
    world.add_structure(rock);
    world.add_structure(furniture(2, "chair", Cell::xz(3, 3)));
    world.add_structure(furniture(3, "chair", Cell::xz(4, 3)));

    let mut controller = RelocationController::default();

    // A committed move blocked by the rock stays alive.
    let ops = controller.designate_cells(&[Cell::xz(1, 1)], &world);
    world.apply(&ops);
    controller.commit(Cell::xz(6, 6), &world, &world);
    assert_eq!(controller.registry().len(), 1);

    let mut ops = controller.designate_cell(Cell::xz(3, 3), &world);
    ops.extend(controller.designate_cell(Cell::xz(4, 3), &world));
    world.apply(&ops);
    assert!(world.has_marker(StructureId(2), Marker::Move));

    let ops = controller.deselect();
    assert_eq!(
        ops,
        vec![
            MoveOperation::ClearDesignation {
                structure: StructureId(2)
            },
            MoveOperation::ClearDesignation {
                structure: StructureId(3)
            },
        ]
    );
    world.apply(&ops);

    assert!(world.has_marker(StructureId(1), Marker::Move));
    assert!(!world.has_marker(StructureId(2), Marker::Move));
    assert_eq!(controller.registry().len(), 1);
    assert!(controller.designated().is_empty());
}

#[test]
fn test_kept_designations_survive_deselect() {
    let mut world = Sandbox::new(10, 10);
    world.add_structure(furniture(1, "crate", Cell::xz(1, 1)));

    let mut controller = RelocationController::default();
    controller.designate_cell(Cell::xz(1, 1), &world);
    controller.set_keep_designation(true);

    assert!(controller.deselect().is_empty());
    assert!(!controller.keep_designation());
}

#[test]
fn test_manual_cancel_leaves_the_group() {
    let mut world = Sandbox::new(10, 10);
    let a = world.add_structure(furniture(1, "crate", Cell::xz(0, 0)));
    world.add_structure(furniture(2, "shelf", Cell::xz(1, 0)));

    let mut controller = RelocationController::default();
    let ops = controller.designate_cells(&[Cell::xz(0, 0), Cell::xz(1, 0)], &world);
    world.apply(&ops);
    controller.rotate(RotationDirection::Clockwise, &world);
    controller.rotate(RotationDirection::Clockwise, &world);
    controller.commit(Cell::xz(1, 0), &world, &world);

    let ops = controller.on_designation_removed(a, &world);
    assert_eq!(ops, vec![MoveOperation::CancelBlueprints { structure: a }]);

    let set = controller.registry().iter().next().unwrap();
    assert!(!set.designated.contains(&a));
    assert!(!set.waiting.contains(&a));
    assert!(set.being_removed.is_empty());

    // With the crate out of the group the shelf's destination is still taken
    // by it, so the shelf keeps waiting.
    let ops = controller.tick(250, &world, &world);
    assert!(placements(&ops).is_empty());
    assert_eq!(controller.registry().len(), 1);
}

#[test]
fn test_failed_removal_is_retried() {
    let mut world = Sandbox::new(10, 10);
    let a = world.add_structure(furniture(1, "crate", Cell::xz(0, 0)));
    world.add_structure(furniture(2, "shelf", Cell::xz(1, 0)));

    let mut controller = RelocationController::default();
    let ops = controller.designate_cells(&[Cell::xz(0, 0), Cell::xz(1, 0)], &world);
    world.apply(&ops);
    controller.rotate(RotationDirection::Clockwise, &world);
    controller.rotate(RotationDirection::Clockwise, &world);
    controller.commit(Cell::xz(1, 0), &world, &world);

    controller.on_removal_complete(a, None);
    let set = controller.registry().iter().next().unwrap();
    assert!(set.being_removed.is_empty());
    assert!(set.waiting.contains(&a));

    let ops = controller.tick(250, &world, &world);
    assert_eq!(removals(&ops), vec![a], "the walk orders the removal again");
}

#[test]
fn test_destroyed_members_are_purged() {
    let mut world = Sandbox::new(10, 10);
    let a = world.add_structure(furniture(1, "crate", Cell::xz(0, 0)));
    let b = world.add_structure(furniture(2, "shelf", Cell::xz(1, 0)));

    let mut controller = RelocationController::default();
    let ops = controller.designate_cells(&[Cell::xz(0, 0), Cell::xz(1, 0)], &world);
    world.apply(&ops);
    controller.rotate(RotationDirection::Clockwise, &world);
    controller.rotate(RotationDirection::Clockwise, &world);
    controller.commit(Cell::xz(1, 0), &world, &world);

    world.destroy(a);
    controller.on_structure_destroyed(a);

    let ops = controller.tick(250, &world, &world);
    assert_eq!(
        placements(&ops),
        vec![(b, Cell::xz(0, 0), BlueprintKind::Reinstall)]
    );
    assert!(controller.registry().is_empty());
}

#[test]
fn test_snapshot_resumes_a_swap() {
    let mut world = Sandbox::new(10, 10);
    let a = world.add_structure(furniture(1, "crate", Cell::xz(0, 0)));
    let b = world.add_structure(furniture(2, "shelf", Cell::xz(1, 0)));

    let mut controller = RelocationController::default();
    let ops = controller.designate_cells(&[Cell::xz(0, 0), Cell::xz(1, 0)], &world);
    world.apply(&ops);
    controller.rotate(RotationDirection::Clockwise, &world);
    controller.rotate(RotationDirection::Clockwise, &world);
    let ops = controller.commit(Cell::xz(1, 0), &world, &world);
    world.apply(&ops);

    let json = serde_json::to_string(&controller.snapshot(&world)).unwrap();
    let snapshot: RegistrySnapshot = serde_json::from_str(&json).unwrap();

    let mut resumed = RelocationController::default();
    resumed.restore(snapshot).unwrap();
    assert_eq!(resumed.registry().len(), 1);

    let minified = world.complete_removal(a).unwrap();
    resumed.on_removal_complete(a, Some(minified));

    let ops = resumed.tick(250, &world, &world);
    assert_eq!(
        placements(&ops),
        vec![(b, Cell::xz(0, 0), BlueprintKind::Reinstall)]
    );
}
