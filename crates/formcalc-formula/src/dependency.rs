//! Dependency tracking for bulk resolution
//!
//! Nodes are formula cells of the table fields in a value snapshot. Table fields are
//! numbered by the caller (their position in a sorted field list), so the graph itself
//! never holds field names.

use ahash::{AHashMap, AHashSet};
use formcalc_core::CellIndex;

/// Unique key for a cell (table index + position)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub table: usize,
    pub row: i64,
    pub col: i64,
}

impl CellKey {
    /// Create a new cell key
    pub fn new(table: usize, row: i64, col: i64) -> Self {
        Self { table, row, col }
    }

    /// Create from table index and cell position
    pub fn from_index(table: usize, idx: CellIndex) -> Self {
        Self::new(table, idx.row, idx.col)
    }

    /// Position of the cell inside its table
    pub fn index(&self) -> CellIndex {
        CellIndex::new(self.row, self.col)
    }
}

/// Dependency graph for formula cells
///
/// Tracks which cells depend on which other cells, so a snapshot can be resolved
/// with each formula evaluated after everything it reads.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Cell → Cells that depend on it (dependents)
    dependents: AHashMap<CellKey, AHashSet<CellKey>>,
    /// Cell → Cells it depends on (precedents)
    precedents: AHashMap<CellKey, AHashSet<CellKey>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency: dependent depends on precedent
    pub fn add_dependency(&mut self, precedent: CellKey, dependent: CellKey) {
        self.dependents
            .entry(precedent)
            .or_default()
            .insert(dependent);
        self.precedents
            .entry(dependent)
            .or_default()
            .insert(precedent);
    }

    /// Cells reachable from `changed` through dependents, each after all of its
    /// reachable dependents (reverse it for evaluation order). Cycles are cut at
    /// the first repeated cell.
    ///
    /// The walk keeps its own stack, so chain length is not limited by the thread's.
    pub fn get_recalc_order(&self, changed: &[CellKey]) -> Vec<CellKey> {
        let mut result = Vec::new();
        let mut visited = AHashSet::new();
        // (cell, its dependents, position of the next one to visit)
        let mut stack: Vec<(CellKey, Vec<CellKey>, usize)> = Vec::new();

        for &start in changed {
            if !visited.insert(start) {
                continue;
            }
            stack.push((start, self.sorted_dependents(start), 0));

            while let Some((cell, dependents, next)) = stack.last_mut() {
                let cell = *cell;
                let dependent = dependents.get(*next).copied();
                *next += 1;

                match dependent {
                    Some(dependent) => {
                        if visited.insert(dependent) {
                            stack.push((dependent, self.sorted_dependents(dependent), 0));
                        }
                    }
                    None => {
                        stack.pop();
                        result.push(cell);
                    }
                }
            }
        }

        result
    }

    /// Dependents of `cell`, sorted so the order does not depend on hash iteration
    fn sorted_dependents(&self, cell: CellKey) -> Vec<CellKey> {
        let mut dependents: Vec<_> = self
            .dependents
            .get(&cell)
            .into_iter()
            .flatten()
            .copied()
            .collect();
        dependents.sort_unstable();
        dependents
    }

    /// Detect circular references involving a cell
    pub fn has_circular_reference(&self, cell: CellKey) -> bool {
        let mut visited = AHashSet::new();
        let mut pending: Vec<CellKey> = self.precedents_of(cell).collect();

        while let Some(next) = pending.pop() {
            if next == cell {
                return true;
            }
            if visited.insert(next) {
                pending.extend(self.precedents_of(next));
            }
        }
        false
    }

    fn precedents_of(&self, cell: CellKey) -> impl Iterator<Item = CellKey> + '_ {
        self.precedents.get(&cell).into_iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_dependency() {
        let mut graph = DependencyGraph::new();

        let a1 = CellKey::new(0, 0, 0);
        let b1 = CellKey::new(0, 0, 1);

        graph.add_dependency(a1, b1);

        assert!(graph.dependents[&a1].contains(&b1));
        assert!(graph.precedents[&b1].contains(&a1));
    }

    #[test]
    fn test_circular_reference() {
        let mut graph = DependencyGraph::new();

        let a1 = CellKey::new(0, 0, 0);
        let b1 = CellKey::new(0, 0, 1);
        let c1 = CellKey::new(0, 0, 2);
        let d1 = CellKey::new(0, 0, 3);

        // A1 -> B1 -> C1 -> A1 (circular), D1 reads C1 without being part of it
        graph.add_dependency(a1, b1);
        graph.add_dependency(b1, c1);
        graph.add_dependency(c1, a1);
        graph.add_dependency(c1, d1);

        assert!(graph.has_circular_reference(a1));
        assert!(graph.has_circular_reference(b1));
        assert!(graph.has_circular_reference(c1));
        assert!(!graph.has_circular_reference(d1));
    }

    #[test]
    fn test_cross_table_cycle() {
        let mut graph = DependencyGraph::new();
        let t1 = CellKey::new(0, 0, 0);
        let t2 = CellKey::new(1, 0, 0);

        graph.add_dependency(t1, t2);
        graph.add_dependency(t2, t1);

        assert!(graph.has_circular_reference(t1));
        assert!(graph.has_circular_reference(t2));
    }

    #[test]
    fn test_recalc_order_reversed_puts_precedents_first() {
        let mut graph = DependencyGraph::new();

        let a1 = CellKey::new(0, 0, 0);
        let b1 = CellKey::new(0, 0, 1);
        let c1 = CellKey::new(1, 0, 0);

        // C1 (other table) reads B1, B1 reads A1
        graph.add_dependency(b1, c1);
        graph.add_dependency(a1, b1);

        let mut order = graph.get_recalc_order(&[c1, b1, a1]);
        order.reverse();
        assert_eq!(order, vec![a1, b1, c1]);
    }

    #[test]
    fn test_long_chain() {
        // Each cell reads the one before it
        let mut graph = DependencyGraph::new();
        let cells: Vec<_> = (0..100_000).map(|row| CellKey::new(0, row, 0)).collect();
        for pair in cells.windows(2) {
            graph.add_dependency(pair[0], pair[1]);
        }

        let mut order = graph.get_recalc_order(&[cells[0]]);
        order.reverse();
        assert_eq!(order, cells);
        assert!(!graph.has_circular_reference(cells[99_999]));

        graph.add_dependency(cells[99_999], cells[0]);
        assert!(graph.has_circular_reference(cells[50_000]));
    }

    #[test]
    fn test_key_index_round_trip() {
        let idx = CellIndex::new(4, 27);
        let key = CellKey::from_index(2, idx);
        assert_eq!(key, CellKey::new(2, 4, 27));
        assert_eq!(key.index(), idx);
    }
}
