//! # formcalc
//!
//! A reactive formula engine for form fields.
//!
//! Fields of a form share one [`FormValueStore`]. Calculation fields and table fields
//! recompute whenever the store changes and write their results back, so dependent
//! outputs settle within the edit that started them. When a form is submitted, every
//! table formula is resolved once more in dependency order.
//!
//! ## Features
//!
//! - Formulas over field values (`{price}`), other tables' cells (`{grid:B2}`) and
//!   cells of the same table (`A1`)
//! - Tagged cell values: `[number:…]`, `[date:…]`, `[checkbox:…]`, `[select:…]`
//! - Cycle detection, with `CIRC` in place of the result
//! - Bulk resolution of a saved value snapshot
//!
//! ## Example
//!
//! ```rust
//! use formcalc::prelude::*;
//!
//! let form = parse_form(r#"[
//!     {"id": "qty", "type": "NumberField"},
//!     {"id": "total", "type": "CalculationField", "extraAttributes": {"formula": "={qty} * 3"}}
//! ]"#).unwrap();
//!
//! let session = FormSession::new(&form, &Default::default()).unwrap();
//! session.set_value("qty", "4");
//! assert_eq!(session.value("total").as_deref(), Some("12"));
//! ```

pub mod calculation;
pub mod form;
pub mod prelude;
pub mod recompute;
pub mod session;

// Re-export calculation types
pub use calculation::{
    resolve_form_values, CalculationOptions, CalculationStats, Resolution, ResolveStrategy,
};
pub use form::{parse_form, ElementKind, ExtraAttributes, FormElement};
pub use recompute::{
    evaluate_table, CalculationField, PersistTableFn, SubmitFn, TableField, MAX_SETTLE_ROUNDS,
};
pub use session::FormSession;

// Re-export core types
pub use formcalc_core::{
    cell_numeric_value, cell_ref_to_indexes, format_number, looks_like_table, CellIndex,
    CellValue, CheckboxState, Error, FieldValues, FormValueStore, MergeDirection, MergedRegion,
    Result, Snapshot, Subscription, Table, CIRCULAR_SENTINEL, ERROR_SENTINEL,
};

// Re-export formula types
pub use formcalc_formula::{
    evaluate, evaluate_formula, evaluate_formula_outcome, parse_formula, EvaluationContext,
    Evaluator, FormulaError, FormulaExpr, FormulaOutcome, FormulaResult, FormulaValue, Reference,
    ReferenceSource, TableScope,
};
