//! A filled-in form
//!
//! [`FormSession`] owns the value store of one form, mounts its calculation and table
//! fields in declaration order and collects what they submit. When the form is
//! submitted, [`FormSession::resolve_for_submission`] produces the values to store.

use crate::calculation::{resolve_form_values, CalculationOptions, Resolution};
use crate::form::{ElementKind, FormElement};
use crate::recompute::{CalculationField, PersistTableFn, SubmitFn, TableField};
use formcalc_core::{CheckboxState, Error, FormValueStore, Result, Table};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

type Collected = Rc<RefCell<BTreeMap<String, String>>>;

/// A form being filled in
pub struct FormSession {
    store: FormValueStore,
    calculations: Vec<CalculationField>,
    tables: Vec<TableField>,
    submitted: Collected,
    raw_tables: Rc<RefCell<BTreeMap<String, Table>>>,
    options: CalculationOptions,
}

impl FormSession {
    /// Mount every derived field of `elements`.
    ///
    /// `defaults` are previously saved values by field id. Saved values of plain fields
    /// are loaded first. A saved table value replaces the element's own data when it
    /// parses as a table.
    pub fn new(elements: &[FormElement], defaults: &BTreeMap<String, String>) -> Result<Self> {
        let store = FormValueStore::new();
        let submitted: Collected = Rc::default();
        let raw_tables: Rc<RefCell<BTreeMap<String, Table>>> = Rc::default();

        for element in elements.iter().filter(|e| !e.is_derived()) {
            if let Some(value) = defaults.get(&element.id) {
                store.set_default(&element.id, value);
            }
        }

        let sink = Rc::clone(&submitted);
        let submit: SubmitFn = Rc::new(move |id: &str, value: &str| {
            sink.borrow_mut().insert(id.to_string(), value.to_string());
        });
        let raw_sink = Rc::clone(&raw_tables);
        let persist: PersistTableFn = Rc::new(move |id: &str, raw: &Table| {
            raw_sink.borrow_mut().insert(id.to_string(), raw.clone());
        });

        let mut calculations = Vec::new();
        let mut tables = Vec::new();
        for element in elements {
            match element.kind() {
                ElementKind::Calculation => {
                    let default = defaults.get(&element.id).map(String::as_str);
                    calculations.push(CalculationField::mount(
                        &store,
                        element.id.as_str(),
                        element.formula(),
                        default,
                        Some(Rc::clone(&submit)),
                    ));
                }
                ElementKind::Table => {
                    let raw = match defaults.get(&element.id).map(|d| Table::from_json(d)) {
                        Some(Ok(saved)) => saved,
                        _ => element.initial_table()?,
                    };
                    raw_tables.borrow_mut().insert(element.id.clone(), raw.clone());
                    tables.push(TableField::mount(
                        &store,
                        element.id.as_str(),
                        raw,
                        Some(Rc::clone(&submit)),
                        Some(Rc::clone(&persist)),
                    ));
                }
                ElementKind::Other => {}
            }
        }

        log::debug!(
            "mounted {} calculation and {} table fields",
            calculations.len(),
            tables.len()
        );

        Ok(Self {
            store,
            calculations,
            tables,
            submitted,
            raw_tables,
            options: CalculationOptions::default(),
        })
    }

    /// Use `options` for [`FormSession::resolve_for_submission`]
    pub fn with_options(mut self, options: CalculationOptions) -> Self {
        self.options = options;
        self
    }

    /// Write a plain field value, as typing into an input does
    pub fn set_value(&self, id: &str, value: &str) {
        self.store.set_value(id, value);
    }

    /// Edit the raw text of a table cell
    pub fn edit_cell(&self, table: &str, row: usize, col: usize, text: &str) -> Result<()> {
        self.table(table)?.edit_cell(row, col, text);
        Ok(())
    }

    /// Set a checkbox cell of a table
    pub fn set_checkbox(
        &self,
        table: &str,
        row: usize,
        col: usize,
        state: CheckboxState,
    ) -> Result<()> {
        self.table(table)?.set_checkbox(row, col, state);
        Ok(())
    }

    /// Current store value of a field
    pub fn value(&self, id: &str) -> Option<String> {
        self.store.get_value(id)
    }

    /// Values submitted by derived fields so far
    pub fn submitted(&self) -> BTreeMap<String, String> {
        self.submitted.borrow().clone()
    }

    /// Last persisted raw data of each table field
    pub fn raw_tables(&self) -> BTreeMap<String, Table> {
        self.raw_tables.borrow().clone()
    }

    /// A mounted table field
    pub fn table(&self, id: &str) -> Result<&TableField> {
        self.tables
            .iter()
            .find(|t| t.id() == id)
            .ok_or_else(|| Error::other(format!("No table field named {}", id)))
    }

    /// A mounted calculation field
    pub fn calculation(&self, id: &str) -> Option<&CalculationField> {
        self.calculations.iter().find(|c| c.id() == id)
    }

    /// The session's value store
    pub fn store(&self) -> &FormValueStore {
        &self.store
    }

    /// Values to store for this submission.
    ///
    /// Table fields contribute their raw data, so each formula is resolved once
    /// against the final values of everything it references.
    pub fn resolve_for_submission(&self) -> Resolution {
        let mut values: BTreeMap<String, String> = self
            .store
            .get_values()
            .iter()
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect();
        values.extend(self.submitted());
        for (id, raw) in self.raw_tables.borrow().iter() {
            values.insert(id.clone(), raw.to_json());
        }

        resolve_form_values(values, &self.options)
    }
}

impl std::fmt::Debug for FormSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormSession")
            .field("calculations", &self.calculations)
            .field("tables", &self.tables)
            .field("store", &self.store)
            .finish()
    }
}
