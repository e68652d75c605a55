//! Push-based recomputation of derived outputs
//!
//! A calculation field or a table field is mounted against a [`FormValueStore`]. It
//! computes its value once at mount and again on every store notification, and
//! writes back only when the value changed. Writing back notifies the store again,
//! so chains of dependent outputs settle within the call that started them.
//!
//! ```rust
//! use formcalc::{CalculationField, FormValueStore, Table, TableField};
//!
//! let store = FormValueStore::new();
//! let total = CalculationField::mount(&store, "total", "={grid:B1} * 2", None, None);
//! let grid = TableField::mount(
//!     &store,
//!     "grid",
//!     Table::from_strings([["[number:4]", "=A1+1"]]),
//!     None,
//!     None,
//! );
//!
//! assert_eq!(total.value(), "10");
//! grid.edit_cell(0, 0, "[number:10]");
//! assert_eq!(total.value(), "22");
//! ```

use formcalc_core::{CellIndex, CellValue, CheckboxState, FormValueStore, Subscription, Table};
use formcalc_core::CIRCULAR_SENTINEL;
use formcalc_formula::{
    evaluate_formula, parse_formula, CellKey, DependencyGraph, EvaluationContext, Evaluator,
    Reference, ReferenceSource, TableScope,
};
use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

/// Forwards a computed value to whatever collects submitted values
pub type SubmitFn = Rc<dyn Fn(&str, &str)>;

/// Receives the raw table (formulas intact) after every edit
pub type PersistTableFn = Rc<dyn Fn(&str, &Table)>;

/// Rounds an output may keep changing within one update before it is treated as
/// part of a feedback cycle
pub const MAX_SETTLE_ROUNDS: usize = 16;

/// Publishing state of one derived output
struct DerivedOutput {
    id: String,
    last: RefCell<String>,
    publishing: Cell<bool>,
    dirty: Cell<bool>,
    circular: Cell<bool>,
    submit: Option<SubmitFn>,
}

impl DerivedOutput {
    fn new(id: String, initial: String, submit: Option<SubmitFn>) -> Self {
        Self {
            id,
            last: RefCell::new(initial),
            publishing: Cell::new(false),
            dirty: Cell::new(false),
            circular: Cell::new(false),
            submit,
        }
    }

    fn is_current(&self, value: &str) -> bool {
        *self.last.borrow() == value
    }

    /// Store `value` as the displayed value and write it to the store
    fn write(&self, store: &FormValueStore, value: String) {
        self.last.replace(value.clone());
        let was_publishing = self.publishing.replace(true);
        store.set_value(self.id.as_str(), value);
        self.publishing.set(was_publishing);
    }
}

/// An output recomputed from the store
trait Derived {
    fn output(&self) -> &DerivedOutput;

    /// The value to publish for the current store contents
    fn compute(&self, store: &FormValueStore) -> String;

    /// The value published instead of `candidate` once the output is cut from a cycle
    fn break_cycle(&self, candidate: String) -> String;
}

/// Bring a derived output up to date with the store.
///
/// A notification that arrives while the output's own write is still being
/// delivered only marks it dirty; the output recomputes once that write returns.
/// An output still changing after [`MAX_SETTLE_ROUNDS`] rounds (one round if it was
/// cut before) feeds back into itself and publishes its cycle-breaking value.
fn settle(derived: &impl Derived, store: &FormValueStore) {
    let output = derived.output();

    if output.publishing.get() {
        if !output.is_current(&derived.compute(store)) {
            output.dirty.set(true);
        }
        return;
    }

    let before = output.last.borrow().clone();
    let limit = if output.circular.get() { 1 } else { MAX_SETTLE_ROUNDS };
    let mut rounds = 0;

    loop {
        output.dirty.set(false);
        let mut value = derived.compute(store);
        if output.is_current(&value) {
            break;
        }

        let cut = rounds >= limit;
        if cut {
            log::warn!(
                "{} still changing after {} rounds, publishing {}",
                output.id,
                rounds,
                CIRCULAR_SENTINEL
            );
            value = derived.break_cycle(value);
            if output.is_current(&value) {
                break;
            }
        }

        log::debug!("{} = {}", output.id, value);
        output.write(store, value);

        if cut || !output.dirty.get() {
            output.circular.set(cut);
            break;
        }
        rounds += 1;
    }

    let after = output.last.borrow().clone();
    if after != before {
        if let Some(submit) = &output.submit {
            submit(&output.id, &after);
        }
    }
}

/// Treat a legacy calculation formula written without `=` as an expression
fn normalize_formula(formula: &str) -> String {
    let trimmed = formula.trim();
    if trimmed.is_empty() || trimmed.starts_with('=') {
        trimmed.to_string()
    } else {
        format!("={}", trimmed)
    }
}

struct CalculationState {
    output: DerivedOutput,
    formula: String,
}

impl Derived for CalculationState {
    fn output(&self) -> &DerivedOutput {
        &self.output
    }

    fn compute(&self, store: &FormValueStore) -> String {
        let snapshot = store.get_values();
        evaluate_formula(&self.formula, &EvaluationContext::new(&snapshot))
    }

    fn break_cycle(&self, _candidate: String) -> String {
        CIRCULAR_SENTINEL.to_string()
    }
}

/// A calculation field bound to a store
///
/// Dropping the field unsubscribes it.
pub struct CalculationField {
    state: Rc<CalculationState>,
    _subscription: Subscription,
}

impl CalculationField {
    /// Mount a calculation field.
    ///
    /// `default` is a previously persisted value; it is written to the store only when
    /// the store has no entry for `id` yet. The formula is then evaluated once, and
    /// again after every store write.
    pub fn mount(
        store: &FormValueStore,
        id: impl Into<String>,
        formula: &str,
        default: Option<&str>,
        submit: Option<SubmitFn>,
    ) -> Self {
        let id = id.into();
        let default = default.filter(|d| !d.is_empty());
        if let Some(default) = default {
            store.set_default(&id, default);
        }

        let state = Rc::new(CalculationState {
            output: DerivedOutput::new(id, default.unwrap_or_default().to_string(), submit),
            formula: normalize_formula(formula),
        });

        let listener = Rc::clone(&state);
        let subscription = store.subscribe(move |store| settle(&*listener, store));
        settle(&*state, store);

        Self {
            state,
            _subscription: subscription,
        }
    }

    /// Field identifier
    pub fn id(&self) -> &str {
        &self.state.output.id
    }

    /// The formula as evaluated (with a leading `=`)
    pub fn formula(&self) -> &str {
        &self.state.formula
    }

    /// The displayed value
    pub fn value(&self) -> String {
        self.state.output.last.borrow().clone()
    }

    /// Whether the last update was cut from a feedback cycle
    pub fn is_circular(&self) -> bool {
        self.state.output.circular.get()
    }

    /// Recompute against the current store values
    pub fn recompute(&self, store: &FormValueStore) {
        settle(&*self.state, store);
    }
}

impl fmt::Debug for CalculationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculationField")
            .field("id", &self.id())
            .field("formula", &self.formula())
            .field("value", &self.value())
            .finish()
    }
}

/// Copy of `raw` with every formula cell replaced by its evaluated result.
///
/// Numbers are stored as `[number:<n>]`, other results as plain text. Cells are
/// evaluated after the cells they read, so a chain of any length is resolved one
/// cached hop at a time.
pub fn evaluate_table(id: &str, raw: &Table, values: &dyn ReferenceSource) -> Table {
    let scope = TableScope::for_field(id, raw);
    let mut evaluator = Evaluator::with_memo(values);
    let mut evaluated = raw.clone();

    for (idx, formula) in evaluation_order(raw) {
        let outcome = evaluator.formula_outcome(formula, Some(scope.at(idx)));
        if let Some((row, col)) = idx.to_usize() {
            evaluated.set_cell(row, col, outcome.to_cell(true));
        }
    }

    evaluated
}

/// Formula cells of `raw`, each after the formula cells of the same table it reads
fn evaluation_order(raw: &Table) -> Vec<(CellIndex, &str)> {
    let mut graph = DependencyGraph::new();
    let mut cells = Vec::new();

    for (idx, formula) in raw.formula_cells() {
        let key = CellKey::from_index(0, idx);
        cells.push(key);

        let ast = match parse_formula(formula) {
            Ok(ast) => ast,
            Err(_) => continue,
        };
        for reference in ast.references() {
            if let Reference::Cell(cell) = reference {
                if let Some(precedent) = CellIndex::parse(cell) {
                    graph.add_dependency(CellKey::from_index(0, precedent), key);
                }
            }
        }
    }

    let mut order = graph.get_recalc_order(&cells);
    order.reverse();
    order
        .into_iter()
        .filter_map(|key| {
            let idx = key.index();
            raw.cell(idx)
                .and_then(CellValue::formula_text)
                .map(|formula| (idx, formula))
        })
        .collect()
}

struct TableState {
    output: DerivedOutput,
    raw: RefCell<Table>,
    persist: Option<PersistTableFn>,
}

impl TableState {
    fn edit(&self, store: &FormValueStore, change: impl FnOnce(&mut Table)) {
        change(&mut self.raw.borrow_mut());
        if let Some(persist) = &self.persist {
            persist(&self.output.id, &self.raw.borrow());
        }
        settle(self, store);
    }

    fn evaluated(&self) -> Table {
        Table::from_json(&self.output.last.borrow()).unwrap_or_default()
    }
}

impl Derived for TableState {
    fn output(&self) -> &DerivedOutput {
        &self.output
    }

    fn compute(&self, store: &FormValueStore) -> String {
        let snapshot = store.get_values();
        evaluate_table(&self.output.id, &self.raw.borrow(), &snapshot).to_json()
    }

    /// Formula cells that still differ from the last published copy become `CIRC`
    fn break_cycle(&self, candidate: String) -> String {
        let mut candidate = match Table::from_json(&candidate) {
            Ok(table) => table,
            Err(_) => return candidate,
        };
        let previous = self.evaluated();

        let changed: Vec<_> = self
            .raw
            .borrow()
            .formula_cells()
            .map(|(idx, _)| idx)
            .filter(|idx| candidate.cell(*idx) != previous.cell(*idx))
            .collect();

        for idx in changed {
            if let Some((row, col)) = idx.to_usize() {
                candidate.set_cell(row, col, CellValue::Text(CIRCULAR_SENTINEL.to_string()));
            }
        }
        candidate.to_json()
    }
}

/// A table field bound to a store
///
/// The table keeps its raw cells (formula text intact) for editing; the store holds
/// the evaluated copy, so `{table:A1}` references elsewhere read results rather than
/// formulas. Dropping the field unsubscribes it.
pub struct TableField {
    store: FormValueStore,
    state: Rc<TableState>,
    _subscription: Subscription,
}

impl TableField {
    /// Mount a table field with its initial raw data and publish the evaluated copy
    pub fn mount(
        store: &FormValueStore,
        id: impl Into<String>,
        raw: Table,
        submit: Option<SubmitFn>,
        persist: Option<PersistTableFn>,
    ) -> Self {
        let state = Rc::new(TableState {
            output: DerivedOutput::new(id.into(), String::new(), submit),
            raw: RefCell::new(raw),
            persist,
        });

        let listener = Rc::clone(&state);
        let subscription = store.subscribe(move |store| settle(&*listener, store));
        settle(&*state, store);

        Self {
            store: store.clone(),
            state,
            _subscription: subscription,
        }
    }

    /// Field identifier
    pub fn id(&self) -> &str {
        &self.state.output.id
    }

    /// Set the raw text of one cell (the table grows as needed)
    pub fn edit_cell(&self, row: usize, col: usize, text: &str) {
        log::trace!("edit {} row {} col {}: {:?}", self.id(), row, col, text);
        self.state.edit(&self.store, |table| {
            table.set_cell(row, col, CellValue::parse(text))
        });
    }

    /// Set a checkbox cell
    pub fn set_checkbox(&self, row: usize, col: usize, state: CheckboxState) {
        self.state.edit(&self.store, |table| {
            table.set_cell(row, col, CellValue::checkbox(state))
        });
    }

    /// Replace all raw data
    pub fn replace_data(&self, raw: Table) {
        self.state.edit(&self.store, |table| *table = raw);
    }

    /// The raw table as edited
    pub fn raw(&self) -> Ref<'_, Table> {
        self.state.raw.borrow()
    }

    /// The evaluated copy last written to the store
    pub fn evaluated(&self) -> Table {
        self.state.evaluated()
    }

    /// Whether the last update was cut from a feedback cycle
    pub fn is_circular(&self) -> bool {
        self.state.output.circular.get()
    }

    /// Re-evaluate against the current store values
    pub fn refresh(&self) {
        settle(&*self.state, &self.store);
    }
}

impl fmt::Debug for TableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableField")
            .field("id", &self.id())
            .field("shape", &self.raw().shape())
            .finish()
    }
}
