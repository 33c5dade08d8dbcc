use crate::location::*;
use fnv::FnvHashSet;
use std::collections::VecDeque;

/// Breadth-first, 4-connected flood fill from several roots.
///
/// Roots that are not passable are skipped. `visitor` is called once per
/// reached cell in BFS order and returns `true` to stop the fill early.
/// Returns whether the visitor stopped the fill.
///
/// `passable` must bound the region (the fill has no other limit).
pub fn flood_fill<P, V>(roots: &[Cell], passable: P, mut visitor: V) -> bool
where
    P: Fn(Cell) -> bool,
    V: FnMut(Cell) -> bool,
{
    let mut seen: FnvHashSet<Cell> = FnvHashSet::default();
    let mut queue = VecDeque::new();

    for root in roots {
        if passable(*root) && seen.insert(*root) {
            queue.push_back(*root);
        }
    }

    while let Some(cell) = queue.pop_front() {
        if visitor(cell) {
            return true;
        }

        for neighbor in cell.cardinal_neighbors() {
            if !seen.contains(&neighbor) && passable(neighbor) {
                seen.insert(neighbor);
                queue.push_back(neighbor);
            }
        }
    }

    false
}
