//! # formcalc-formula
//!
//! Formula parser and evaluator for formcalc.
//!
//! This crate provides:
//! - Formula parsing (text → AST)
//! - Formula evaluation (AST → value) with field, field-cell and in-table references
//! - The helper allow-list: `ROUND`, `DEG`, `RAD` and the `Math.*` namespace
//! - Cycle detection on the reference path, and a dependency graph for bulk resolution
//!
//! ## Example
//!
//! ```rust
//! use formcalc_formula::{evaluate_formula, parse_formula, EvaluationContext, Reference};
//! use std::collections::HashMap;
//!
//! let mut values = HashMap::new();
//! values.insert("price".to_string(), "[number:2.5]".to_string());
//! values.insert("qty".to_string(), "4".to_string());
//! let ctx = EvaluationContext::new(&values);
//!
//! assert_eq!(evaluate_formula("=ROUND({price} * {qty}, 1)", &ctx), "10");
//!
//! let ast = parse_formula("={price} * {qty}").unwrap();
//! assert_eq!(ast.references(), vec![&Reference::Field("price".into()), &Reference::Field("qty".into())]);
//! ```

pub mod ast;
pub mod dependency;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod parser;

pub use ast::{BinaryOperator, FormulaExpr, Reference, UnaryOperator};
pub use dependency::{CellKey, DependencyGraph};
pub use error::{FormulaError, FormulaResult};
pub use evaluator::{
    evaluate, evaluate_formula, evaluate_formula_outcome, EvaluationContext, Evaluator,
    FormulaOutcome, FormulaValue, ReferenceKey, ReferenceSource, Resolved, TableScope,
    UnresolvedReason,
};
pub use functions::{registry, FunctionRegistry};
pub use parser::parse_formula;
