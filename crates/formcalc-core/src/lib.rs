//! # formcalc-core
//!
//! Core data structures for the formcalc formula engine.
//!
//! This crate provides the fundamental types used throughout formcalc:
//! - [`FormValueStore`] - The per-session field value store with change notification
//! - [`CellIndex`] and [`cell_ref_to_indexes`] - A1-style cell addressing
//! - [`CellValue`] - Tagged table cell values (numbers, dates, checkboxes, merges, formulas)
//! - [`Table`] - A table field's 2D grid and its JSON wire format
//! - [`cell_numeric_value`] - The total numeric decoder used by formulas
//!
//! ## Example
//!
//! ```rust
//! use formcalc_core::{cell_numeric_value, FormValueStore, Table};
//!
//! let store = FormValueStore::new();
//! store.set_value("qty", "4");
//! store.set_value("grid", r#"[["[number:3]","=A1*2"]]"#);
//!
//! let values = store.get_values();
//! assert_eq!(cell_numeric_value(values.get("qty").map(String::as_str)), 4.0);
//!
//! let table = Table::from_json(&values["grid"]).unwrap();
//! assert_eq!(table.shape(), (1, 2));
//! ```

pub mod cell;
pub mod error;
pub mod number;
pub mod store;
pub mod table;

// Re-exports for convenience
pub use cell::{
    cell_numeric_value, cell_ref_to_indexes, CellIndex, CellValue, CheckboxState, MergeDirection,
};
pub use error::{Error, Result};
pub use number::{format_number, parse_float_prefix};
pub use store::{FieldValues, FormValueStore, Snapshot, Subscription};
pub use table::{looks_like_table, MergedRegion, Table};

/// Sentinel written in place of a formula result that could not be evaluated
pub const ERROR_SENTINEL: &str = "ERR";

/// Sentinel written in place of a formula result that is part of a reference cycle
pub const CIRCULAR_SENTINEL: &str = "CIRC";
