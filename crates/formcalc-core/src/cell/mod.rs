//! Cell-related types and utilities
//!
//! This module contains:
//! - [`CellValue`] - The tagged value stored in a table cell
//! - [`CellIndex`] - A cell's zero-based location (e.g., "A1" is `(0, 0)`)
//! - [`cell_numeric_value`] - The numeric decoder formulas use for referenced values

mod address;
mod decode;
mod value;

pub use address::{cell_ref_to_indexes, column_to_letters, letters_to_column, CellIndex};
pub use decode::cell_numeric_value;
pub use value::{CellValue, CheckboxState, MergeDirection};
