//! Bulk resolution of table formulas
//!
//! Before a submission is stored, every formula cell of every table field is replaced
//! by its result, so the stored values (and the documents rendered from them) hold
//! numbers rather than formula text.
//!
//! # Example
//!
//! ```rust
//! use formcalc::calculation::{resolve_form_values, CalculationOptions};
//! use std::collections::BTreeMap;
//!
//! let mut values = BTreeMap::new();
//! values.insert("t1".to_string(), r#"[["2","=A1*5"]]"#.to_string());
//! values.insert("t2".to_string(), r#"[["={t1:B1}+1"]]"#.to_string());
//!
//! let resolution = resolve_form_values(values, &CalculationOptions::default());
//! assert_eq!(resolution.values["t1"], r#"[["2","[number:10]"]]"#);
//! assert_eq!(resolution.values["t2"], r#"[["[number:11]"]]"#);
//! assert_eq!(resolution.stats.cells_calculated, 2);
//! ```

use ahash::AHashMap;
use formcalc_core::{CellIndex, Table};
use formcalc_formula::{
    parse_formula, CellKey, DependencyGraph, Evaluator, FormulaError, FormulaOutcome, Reference,
    TableScope,
};
use std::collections::BTreeMap;

/// How bulk resolution orders formula evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolveStrategy {
    /// Build the reference graph across all tables once and evaluate each formula cell
    /// once, after everything it references
    #[default]
    Topological,
    /// Re-evaluate every table `n` times in field order, each pass reading the
    /// results of the previous one. Chains longer than `n` table-to-table hops stay
    /// partially resolved.
    FixedPasses(usize),
}

/// Options for bulk resolution
#[derive(Debug, Clone)]
pub struct CalculationOptions {
    /// Evaluation order (default: topological)
    pub strategy: ResolveStrategy,
    /// Store numeric results as `[number:<n>]` (default: true)
    pub wrap_numbers: bool,
}

impl Default for CalculationOptions {
    fn default() -> Self {
        Self {
            strategy: ResolveStrategy::Topological,
            wrap_numbers: true,
        }
    }
}

impl CalculationOptions {
    /// The historical three-pass resolution
    pub fn legacy() -> Self {
        Self {
            strategy: ResolveStrategy::FixedPasses(3),
            ..Self::default()
        }
    }
}

/// Statistics from a resolution run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalculationStats {
    /// Total number of formula cells
    pub formula_count: usize,
    /// Number of formula evaluations performed
    pub cells_calculated: usize,
    /// Number of formula cells on a reference cycle
    pub circular_references: usize,
    /// Number of formula cells that resolved to `ERR`
    pub errors: usize,
    /// Number of passes over the tables
    pub passes: usize,
}

/// Field values with every table formula resolved
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// All input values; table fields hold their evaluated copy
    pub values: BTreeMap<String, String>,
    /// What the run did
    pub stats: CalculationStats,
}

/// Resolve every table formula in `values`.
///
/// Values that are not JSON arrays pass through unchanged.
pub fn resolve_form_values(
    values: BTreeMap<String, String>,
    options: &CalculationOptions,
) -> Resolution {
    let resolution = match options.strategy {
        ResolveStrategy::Topological => CalculationEngine::new(values).resolve(options),
        ResolveStrategy::FixedPasses(passes) => resolve_in_passes(values, passes, options),
    };

    log::debug!(
        "resolved {} formula cells ({} evaluations, {} circular, {} errors, {} passes)",
        resolution.stats.formula_count,
        resolution.stats.cells_calculated,
        resolution.stats.circular_references,
        resolution.stats.errors,
        resolution.stats.passes
    );
    resolution
}

/// One table field in the input
struct TableEntry {
    id: String,
    table: Table,
}

/// The topological resolver
struct CalculationEngine {
    values: BTreeMap<String, String>,
    /// Table fields in id order; a `CellKey::table` indexes this list
    tables: Vec<TableEntry>,
    table_index: AHashMap<String, usize>,
    /// Dependency graph built from formula references
    dependency_graph: DependencyGraph,
    /// Formula text of every formula cell
    formulas: AHashMap<CellKey, String>,
}

impl CalculationEngine {
    fn new(values: BTreeMap<String, String>) -> Self {
        let tables: Vec<_> = values
            .iter()
            .filter_map(|(id, value)| {
                Table::from_json(value).ok().map(|table| TableEntry {
                    id: id.clone(),
                    table,
                })
            })
            .collect();
        let table_index = tables
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.id.clone(), i))
            .collect();

        Self {
            values,
            tables,
            table_index,
            dependency_graph: DependencyGraph::new(),
            formulas: AHashMap::new(),
        }
    }

    fn resolve(mut self, options: &CalculationOptions) -> Resolution {
        let mut stats = CalculationStats::default();

        // Phase 1: collect formulas and build the dependency graph
        self.collect_formulas(&mut stats);

        if stats.formula_count == 0 {
            return Resolution {
                values: self.values,
                stats,
            };
        }

        // Phase 2: detect circular references
        stats.circular_references = self
            .formulas
            .keys()
            .filter(|key| self.dependency_graph.has_circular_reference(**key))
            .count();

        // Phase 3: evaluate in dependency order
        let order = self.get_calculation_order();
        let mut resolved: Vec<Table> = self.tables.iter().map(|entry| entry.table.clone()).collect();
        {
            let mut evaluator = Evaluator::with_memo(&self.values);
            for key in order {
                let formula = match self.formulas.get(&key) {
                    Some(formula) => formula,
                    None => continue,
                };
                let entry = &self.tables[key.table];
                let scope = TableScope::for_field(&entry.id, &entry.table).at(key.index());

                let outcome = evaluator.formula_outcome(formula, Some(scope));
                count_outcome(&outcome, &mut stats);
                stats.cells_calculated += 1;

                if let Some((row, col)) = key.index().to_usize() {
                    resolved[key.table].set_cell(row, col, outcome.to_cell(options.wrap_numbers));
                }
            }
        }
        stats.passes = 1;

        for (entry, table) in self.tables.iter().zip(resolved) {
            self.values.insert(entry.id.clone(), table.to_json());
        }

        Resolution {
            values: self.values,
            stats,
        }
    }

    /// Collect all formula cells and the references between them
    fn collect_formulas(&mut self, stats: &mut CalculationStats) {
        for (table_idx, entry) in self.tables.iter().enumerate() {
            for (idx, formula) in entry.table.formula_cells() {
                let cell_key = CellKey::from_index(table_idx, idx);
                self.formulas.insert(cell_key, formula.to_string());
                stats.formula_count += 1;

                // Unparsable formulas still get evaluated (to ERR), they just have no edges
                let ast = match parse_formula(formula) {
                    Ok(ast) => ast,
                    Err(e) => {
                        log::warn!("{} {}: {}", entry.id, idx, e);
                        continue;
                    }
                };

                for reference in ast.references() {
                    if let Some(precedent) = self.reference_key(reference, table_idx) {
                        self.dependency_graph.add_dependency(precedent, cell_key);
                    }
                }
            }
        }
    }

    /// The cell a reference reads, when it is a cell of a table field
    fn reference_key(&self, reference: &Reference, current_table: usize) -> Option<CellKey> {
        match reference {
            Reference::Field(_) => None,
            Reference::FieldCell { field, cell } => {
                let table = *self.table_index.get(field)?;
                Some(CellKey::from_index(table, CellIndex::parse(cell)?))
            }
            Reference::Cell(cell) => Some(CellKey::from_index(
                current_table,
                CellIndex::parse(cell)?,
            )),
        }
    }

    /// Get the calculation order via topological sort
    fn get_calculation_order(&self) -> Vec<CellKey> {
        let mut all_cells: Vec<CellKey> = self.formulas.keys().copied().collect();
        all_cells.sort_unstable();

        let mut order = self.dependency_graph.get_recalc_order(&all_cells);

        // Reverse to get correct order (dependencies first)
        order.reverse();
        order.retain(|k| self.formulas.contains_key(k));
        order
    }
}

fn count_outcome(outcome: &FormulaOutcome, stats: &mut CalculationStats) {
    match outcome.error() {
        Some(FormulaError::CircularReference) | None => {}
        Some(_) => stats.errors += 1,
    }
}

/// Bounded-pass resolution.
///
/// Tables are visited in id order. In every pass each formula cell is evaluated
/// against the table as resolved so far, then the table's field value is replaced by
/// that copy so later tables (and the next pass) read its results.
fn resolve_in_passes(
    mut values: BTreeMap<String, String>,
    passes: usize,
    options: &CalculationOptions,
) -> Resolution {
    let mut stats = CalculationStats {
        passes,
        ..CalculationStats::default()
    };

    let ids: Vec<String> = values.keys().cloned().collect();
    for id in ids {
        let table = match values.get(&id).map(|value| Table::from_json(value)) {
            Some(Ok(table)) => table,
            _ => continue,
        };

        let formulas: Vec<(CellIndex, String)> = table
            .formula_cells()
            .map(|(idx, formula)| (idx, formula.to_string()))
            .collect();
        stats.formula_count += formulas.len();
        if formulas.is_empty() {
            continue;
        }

        let mut resolved = table;
        for pass in 0..passes {
            let last_pass = pass + 1 == passes;
            for (idx, formula) in &formulas {
                let outcome = {
                    let scope = TableScope::for_field(&id, &resolved).at(*idx);
                    Evaluator::new(&values).formula_outcome(formula, Some(scope))
                };
                stats.cells_calculated += 1;
                if last_pass {
                    count_outcome(&outcome, &mut stats);
                    if outcome.error().map_or(false, FormulaError::is_circular) {
                        stats.circular_references += 1;
                    }
                }
                if let Some((row, col)) = idx.to_usize() {
                    resolved.set_cell(row, col, outcome.to_cell(options.wrap_numbers));
                }
            }
            values.insert(id.clone(), resolved.to_json());
        }
    }

    Resolution { values, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_simple_resolution() {
        let input = values(&[("t", r#"[["10","20","=A1+B1"]]"#), ("name", "Ada")]);
        let resolution = resolve_form_values(input, &CalculationOptions::default());

        assert_eq!(resolution.values["t"], r#"[["10","20","[number:30]"]]"#);
        assert_eq!(resolution.values["name"], "Ada");
        assert_eq!(resolution.stats.formula_count, 1);
        assert_eq!(resolution.stats.cells_calculated, 1);
        assert_eq!(resolution.stats.errors, 0);
    }

    #[test]
    fn test_chain_resolution() {
        let input = values(&[("t", r#"[["5","=A1*2","=B1+10","=C1*A1"]]"#)]);
        let resolution = resolve_form_values(input, &CalculationOptions::default());

        assert_eq!(
            resolution.values["t"],
            r#"[["5","[number:10]","[number:20]","[number:100]"]]"#
        );
        assert_eq!(resolution.stats.formula_count, 3);
        assert_eq!(resolution.stats.cells_calculated, 3);
    }

    #[test]
    fn test_long_cross_table_chain() {
        // a5 reads a4, which reads a3, ... down to a1
        let input = values(&[
            ("a5", r#"[["={a4:A1}+1"]]"#),
            ("a4", r#"[["={a3:A1}+1"]]"#),
            ("a3", r#"[["={a2:A1}+1"]]"#),
            ("a2", r#"[["={a1:A1}+1"]]"#),
            ("a1", r#"[["=1"]]"#),
        ]);

        let resolution = resolve_form_values(input.clone(), &CalculationOptions::default());
        assert_eq!(resolution.values["a5"], r#"[["[number:5]"]]"#);

        let resolution = resolve_form_values(input, &CalculationOptions::legacy());
        assert_eq!(resolution.values["a5"], r#"[["[number:5]"]]"#);
        assert_eq!(resolution.stats.passes, 3);
    }

    #[test]
    fn test_long_reversed_chain() {
        // Each row reads the row below it
        let mut rows: Vec<Vec<String>> = (1..3000)
            .map(|row| vec![format!("=A{}+1", row + 1)])
            .collect();
        rows.push(vec!["1".to_string()]);
        let input = values(&[("t", Table::from_strings(&rows).to_json().as_str())]);

        let resolution = resolve_form_values(input, &CalculationOptions::default());
        let resolved = Table::from_json(&resolution.values["t"]).unwrap();
        assert_eq!(resolved.cell(CellIndex::new(0, 0)).unwrap().to_string(), "[number:3000]");
        assert_eq!(resolution.stats.cells_calculated, 2999);
        assert_eq!(resolution.stats.errors, 0);
    }

    #[test]
    fn test_circular_references() {
        let input = values(&[("t", r#"[["=B1","=A1","=1+1","=C1+1"]]"#)]);
        let resolution = resolve_form_values(input, &CalculationOptions::default());

        assert_eq!(
            resolution.values["t"],
            r#"[["CIRC","CIRC","[number:2]","[number:3]"]]"#
        );
        assert_eq!(resolution.stats.circular_references, 2);
        assert_eq!(resolution.stats.errors, 0);
    }

    #[test]
    fn test_errors_are_counted() {
        let input = values(&[("t", r#"[["=1/0","=(","=A1+1"]]"#)]);
        let resolution = resolve_form_values(input, &CalculationOptions::default());

        assert_eq!(resolution.values["t"], r#"[["ERR","ERR","ERR"]]"#);
        assert_eq!(resolution.stats.errors, 3);
    }

    #[test]
    fn test_unwrapped_numbers() {
        let input = values(&[("t", r#"[["=6*7","=1>0"]]"#)]);
        let options = CalculationOptions {
            wrap_numbers: false,
            ..CalculationOptions::default()
        };
        let resolution = resolve_form_values(input, &options);
        assert_eq!(resolution.values["t"], r#"[["42","true"]]"#);
    }

    #[test]
    fn test_no_formulas() {
        let input = values(&[("t", r#"[["1","2"]]"#), ("x", "[number:3]")]);
        let resolution = resolve_form_values(input.clone(), &CalculationOptions::default());
        assert_eq!(resolution.values, input);
        assert_eq!(resolution.stats, CalculationStats::default());
    }

    #[test]
    fn test_fixed_passes_reads_previous_pass() {
        let input = values(&[("t", r#"[["=B1+1","=2"]]"#)]);
        let resolution = resolve_form_values(input, &CalculationOptions::legacy());

        assert_eq!(resolution.values["t"], r#"[["[number:3]","[number:2]"]]"#);
        assert_eq!(resolution.stats.cells_calculated, 6);
        assert_eq!(resolution.stats.passes, 3);
    }

    #[test]
    fn test_zero_passes_leave_formulas() {
        let input = values(&[("t", r#"[["=1"]]"#)]);
        let resolution = resolve_form_values(input.clone(), &CalculationOptions {
            strategy: ResolveStrategy::FixedPasses(0),
            wrap_numbers: true,
        });
        assert_eq!(resolution.values, input);
        assert_eq!(resolution.stats.formula_count, 1);
    }

    #[test]
    fn test_fixed_passes_lose_cycles() {
        // The first pass finds the cycle, later passes read the CIRC text as 0
        let input = values(&[("t", r#"[["=B1","=A1"]]"#)]);
        let resolution = resolve_form_values(input, &CalculationOptions::legacy());
        assert_eq!(resolution.values["t"], r#"[["[number:0]","[number:0]"]]"#);
        assert_eq!(resolution.stats.circular_references, 0);
    }

    proptest! {
        #[test]
        fn prop_tables_without_formulas_pass_through(
            cells in prop::collection::vec(prop::collection::vec("[a-z0-9 ]{0,6}", 1..4), 1..4)
        ) {
            let json = Table::from_strings(&cells).to_json();
            let input = values(&[("t", json.as_str()), ("f", "12")]);
            let resolution = resolve_form_values(input.clone(), &CalculationOptions::default());
            prop_assert_eq!(resolution.values, input);
            prop_assert_eq!(resolution.stats.formula_count, 0);
        }
    }
}
