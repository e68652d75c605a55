//! Prelude module - common imports for formcalc users
//!
//! ```rust
//! use formcalc::prelude::*;
//! ```

pub use crate::{
    // Cell types
    cell_numeric_value,
    CellIndex,
    CellValue,
    CheckboxState,

    // Recomputation
    CalculationField,
    FormValueStore,
    TableField,

    // Forms
    parse_form,
    FormElement,
    FormSession,

    // Bulk resolution
    resolve_form_values,
    CalculationOptions,
    ResolveStrategy,

    // Formulas
    evaluate_formula,
    EvaluationContext,

    // Error types
    Error,
    Result,

    Table,
};
