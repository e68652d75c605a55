//! Formula evaluator
//!
//! Evaluates formula ASTs against the current values of a form. References are looked
//! up through a [`ReferenceSource`]. A formula cell reached through a reference is
//! evaluated recursively; the cells on the current resolution path are tracked so a
//! cycle ends in [`FormulaError::CircularReference`] instead of recursing forever.
//! Expression nesting and reference chains share one depth budget; past it the
//! evaluation fails with [`FormulaError::NestingTooDeep`].

use crate::ast::{BinaryOperator, FormulaExpr, Reference, UnaryOperator};
use crate::error::{FormulaError, FormulaResult};
use crate::functions::registry;
use crate::parser::parse_formula;
use ahash::{AHashMap, AHashSet};
use formcalc_core::{
    cell_numeric_value, cell_ref_to_indexes, format_number, looks_like_table, CellIndex,
    CellValue, Table,
};
use lazy_regex::regex_is_match;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::BuildHasher;
use std::rc::Rc;

/// Value types during formula evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    Number(f64),
    String(String),
    Boolean(bool),
}

impl FormulaValue {
    /// Numeric conversion used by arithmetic (`""` is 0, `"abc"` is NaN, `true` is 1)
    pub fn to_number(&self) -> f64 {
        match self {
            FormulaValue::Number(n) => *n,
            FormulaValue::Boolean(b) => f64::from(u8::from(*b)),
            FormulaValue::String(s) => string_to_number(s),
        }
    }

    /// Truthiness used by `!`, `&&`, `||` and `?:`
    pub fn is_truthy(&self) -> bool {
        match self {
            FormulaValue::Number(n) => *n != 0.0 && !n.is_nan(),
            FormulaValue::String(s) => !s.is_empty(),
            FormulaValue::Boolean(b) => *b,
        }
    }

    /// Type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            FormulaValue::Number(_) => "number",
            FormulaValue::String(_) => "string",
            FormulaValue::Boolean(_) => "boolean",
        }
    }

    /// The number substituted when another formula references a cell holding this result
    fn reference_number(&self) -> f64 {
        match self {
            FormulaValue::Number(n) if n.is_finite() => *n,
            other => cell_numeric_value(other.to_string().as_str()),
        }
    }
}

impl fmt::Display for FormulaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaValue::Number(n) => f.write_str(&format_number(*n)),
            FormulaValue::String(s) => f.write_str(s),
            FormulaValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if regex_is_match!(r"^[+-]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?$", trimmed) {
        return trimmed.parse().unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => f64::NAN,
    }
}

/// Read access to the current externalized field values
pub trait ReferenceSource {
    /// Raw value of a field, or `None` if the field has no entry
    fn field_value(&self, field_id: &str) -> Option<&str>;

    /// The field's value parsed as a table, or `None` when it is missing or not a JSON array
    fn field_table(&self, field_id: &str) -> Option<Cow<'_, Table>> {
        Table::from_json(self.field_value(field_id)?)
            .ok()
            .map(Cow::Owned)
    }
}

impl<S: BuildHasher> ReferenceSource for HashMap<String, String, S> {
    fn field_value(&self, field_id: &str) -> Option<&str> {
        self.get(field_id).map(String::as_str)
    }
}

impl ReferenceSource for AHashMap<String, String> {
    fn field_value(&self, field_id: &str) -> Option<&str> {
        self.get(field_id).map(String::as_str)
    }
}

impl ReferenceSource for BTreeMap<String, String> {
    fn field_value(&self, field_id: &str) -> Option<&str> {
        self.get(field_id).map(String::as_str)
    }
}

impl<T: ReferenceSource + ?Sized> ReferenceSource for Rc<T> {
    fn field_value(&self, field_id: &str) -> Option<&str> {
        (**self).field_value(field_id)
    }

    fn field_table(&self, field_id: &str) -> Option<Cow<'_, Table>> {
        (**self).field_table(field_id)
    }
}

impl<T: ReferenceSource + ?Sized> ReferenceSource for &T {
    fn field_value(&self, field_id: &str) -> Option<&str> {
        (**self).field_value(field_id)
    }

    fn field_table(&self, field_id: &str) -> Option<Cow<'_, Table>> {
        (**self).field_table(field_id)
    }
}

static NO_VALUES: BTreeMap<String, String> = BTreeMap::new();

/// The table a formula lives in, for bare `A1` references
#[derive(Debug, Clone, Copy)]
pub struct TableScope<'a> {
    /// Field identifier of the table, when it belongs to a form field
    pub field_id: Option<&'a str>,
    /// The raw table, formulas included
    pub table: &'a Table,
    /// Position of the formula being evaluated, when it is a cell of `table`
    pub cell: Option<CellIndex>,
}

impl<'a> TableScope<'a> {
    /// A table that is not (yet) stored under a field
    pub fn new(table: &'a Table) -> Self {
        Self {
            field_id: None,
            table,
            cell: None,
        }
    }

    /// The table stored under `field_id`
    pub fn for_field(field_id: &'a str, table: &'a Table) -> Self {
        Self {
            field_id: Some(field_id),
            table,
            cell: None,
        }
    }

    /// The same table, evaluating the formula in `cell`
    pub fn at(self, cell: CellIndex) -> Self {
        Self {
            cell: Some(cell),
            ..self
        }
    }

    fn key(&self, cell: CellIndex) -> ReferenceKey {
        ReferenceKey {
            field: self.field_id.map(str::to_string),
            cell,
        }
    }
}

/// Context for formula evaluation
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// Snapshot of all field values
    pub values: &'a dyn ReferenceSource,
    /// The table being evaluated, if any
    pub table: Option<TableScope<'a>>,
}

impl<'a> EvaluationContext<'a> {
    /// Create a new evaluation context
    pub fn new(values: &'a dyn ReferenceSource) -> Self {
        Self {
            values,
            table: None,
        }
    }

    /// Create a simple context without field values (for testing)
    pub fn simple() -> EvaluationContext<'static> {
        EvaluationContext::new(&NO_VALUES)
    }

    /// Evaluate inside `scope`
    pub fn with_table(self, scope: TableScope<'a>) -> Self {
        Self {
            table: Some(scope),
            ..self
        }
    }
}

/// Identity of a referenceable formula cell
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceKey {
    /// Table field, `None` for the anonymous table of the current scope
    pub field: Option<String>,
    /// Cell inside the table
    pub cell: CellIndex,
}

/// Outcome of looking up one reference
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved {
    /// The number substituted for the reference
    Literal(f64),
    /// Nothing to read; the reference counts as `0`
    Unresolved(UnresolvedReason),
}

impl Resolved {
    /// The substituted number
    pub fn value(self) -> f64 {
        match self {
            Resolved::Literal(n) => n,
            Resolved::Unresolved(_) => 0.0,
        }
    }
}

/// Why a reference did not resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// No value stored under the field
    MissingField,
    /// `{field:A1}` where the field's value is not a JSON array
    NotATable,
    /// `{field}` where the field holds a table
    TableWithoutCell,
    /// Cell part is not letters followed by digits
    MalformedCell,
    /// Position outside the stored rows and columns
    OutsideTable,
    /// Bare cell reference with no table being evaluated
    NoTable,
}

/// Result of evaluating one formula string, as shown to the user
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaOutcome {
    /// Input did not start with `=`; returned unchanged
    Literal(String),
    /// Successfully evaluated
    Value(FormulaValue),
    /// Evaluation failed; renders as `ERR` or `CIRC`
    Error(FormulaError),
}

impl FormulaOutcome {
    /// The error, if evaluation failed
    pub fn error(&self) -> Option<&FormulaError> {
        match self {
            FormulaOutcome::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }

    /// The numeric result, if any
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FormulaOutcome::Value(FormulaValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Encode for storage in a table cell.
    ///
    /// Numbers become `[number:<n>]` when `wrap_numbers` is set; text, booleans and the
    /// error sentinels are stored as plain text.
    pub fn to_cell(&self, wrap_numbers: bool) -> CellValue {
        match self {
            FormulaOutcome::Literal(text) => CellValue::parse(text),
            FormulaOutcome::Value(FormulaValue::Number(n)) if wrap_numbers => CellValue::number(*n),
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for FormulaOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaOutcome::Literal(text) => f.write_str(text),
            FormulaOutcome::Value(value) => value.fmt(f),
            FormulaOutcome::Error(e) => f.write_str(e.sentinel()),
        }
    }
}

impl From<FormulaResult<FormulaValue>> for FormulaOutcome {
    fn from(result: FormulaResult<FormulaValue>) -> Self {
        match result {
            Ok(value) => FormulaOutcome::Value(value),
            Err(e) => FormulaOutcome::Error(e),
        }
    }
}

/// Evaluate a formula expression
pub fn evaluate(expr: &FormulaExpr, ctx: &EvaluationContext) -> FormulaResult<FormulaValue> {
    Evaluator::new(ctx.values).evaluate(expr, ctx.table)
}

/// Evaluate formula text to the string shown in a field or cell.
///
/// Text not starting with `=` is returned unchanged. Errors come back as `"ERR"`,
/// reference cycles as `"CIRC"`, unresolvable references count as `0`.
///
/// # Example
/// ```rust
/// use formcalc_formula::{evaluate_formula, EvaluationContext};
/// use std::collections::HashMap;
///
/// let mut values = HashMap::new();
/// values.insert("f1".to_string(), "10".to_string());
/// values.insert("f2".to_string(), "[number:5]".to_string());
/// values.insert("t1".to_string(), r#"[["[number:3]","[number:4]"]]"#.to_string());
/// let ctx = EvaluationContext::new(&values);
///
/// assert_eq!(evaluate_formula("={f1} + {f2}", &ctx), "15");
/// assert_eq!(evaluate_formula("={t1:A1} + {t1:B1}", &ctx), "7");
/// assert_eq!(evaluate_formula("={missing} + 1", &ctx), "1");
/// assert_eq!(evaluate_formula("=1 +", &ctx), "ERR");
/// assert_eq!(evaluate_formula("plain text", &ctx), "plain text");
/// ```
pub fn evaluate_formula(formula: &str, ctx: &EvaluationContext) -> String {
    evaluate_formula_outcome(formula, ctx).to_string()
}

/// Evaluate formula text, keeping the typed result
pub fn evaluate_formula_outcome(formula: &str, ctx: &EvaluationContext) -> FormulaOutcome {
    Evaluator::new(ctx.values).formula_outcome(formula, ctx.table)
}

/// Deepest chain of nested expressions and formula cells followed in one evaluation
const MAX_EVALUATION_DEPTH: usize = 384;

/// Formula evaluator holding the state of one top-level evaluation
///
/// The set of formula cells on the current resolution path is the cycle breaker. With
/// [`Evaluator::with_memo`] each formula cell's result is also cached, so evaluating
/// every cell of many tables visits each cell once; the cache is only valid while the
/// values it was built from stay unchanged.
pub struct Evaluator<'a> {
    values: &'a dyn ReferenceSource,
    visiting: AHashSet<ReferenceKey>,
    memo: Option<AHashMap<ReferenceKey, FormulaResult<FormulaValue>>>,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    /// Create an evaluator over `values`
    pub fn new(values: &'a dyn ReferenceSource) -> Self {
        Self {
            values,
            visiting: AHashSet::new(),
            memo: None,
            depth: 0,
        }
    }

    /// Create an evaluator that caches formula cell results
    pub fn with_memo(values: &'a dyn ReferenceSource) -> Self {
        Self {
            memo: Some(AHashMap::new()),
            ..Self::new(values)
        }
    }

    /// Number of formula cells evaluated and cached so far
    pub fn cached_cells(&self) -> usize {
        self.memo.as_ref().map_or(0, |memo| memo.len())
    }

    /// Evaluate formula text; `scope.cell`, when set, must be the cell holding `formula`
    pub fn formula_outcome(&mut self, formula: &str, scope: Option<TableScope<'_>>) -> FormulaOutcome {
        if !formula.starts_with('=') {
            return FormulaOutcome::Literal(formula.to_string());
        }

        let result = match scope {
            Some(scope) => match scope.cell {
                Some(cell) => self.evaluate_cell(scope.key(cell), formula, scope),
                None => self.evaluate_text(formula, Some(scope)),
            },
            None => self.evaluate_text(formula, None),
        };

        FormulaOutcome::from(result)
    }

    /// Evaluate a formula expression
    pub fn evaluate(
        &mut self,
        expr: &FormulaExpr,
        scope: Option<TableScope<'_>>,
    ) -> FormulaResult<FormulaValue> {
        if self.depth >= MAX_EVALUATION_DEPTH {
            return Err(FormulaError::NestingTooDeep);
        }
        self.depth += 1;
        let result = self.evaluate_node(expr, scope);
        self.depth -= 1;
        result
    }

    fn evaluate_node(
        &mut self,
        expr: &FormulaExpr,
        scope: Option<TableScope<'_>>,
    ) -> FormulaResult<FormulaValue> {
        match expr {
            // === Literals ===
            FormulaExpr::Number(n) => Ok(FormulaValue::Number(*n)),
            FormulaExpr::String(s) => Ok(FormulaValue::String(s.clone())),
            FormulaExpr::Boolean(b) => Ok(FormulaValue::Boolean(*b)),

            // === References ===
            FormulaExpr::Reference(reference) => Ok(FormulaValue::Number(
                self.resolve_reference(reference, scope)?.value(),
            )),

            FormulaExpr::Name(name) => registry()
                .constant(name)
                .map(FormulaValue::Number)
                .ok_or_else(|| FormulaError::UnknownName(name.clone())),

            // === Operators ===
            FormulaExpr::BinaryOp { op, left, right } => {
                self.evaluate_binary_op(*op, left, right, scope)
            }

            FormulaExpr::UnaryOp { op, operand } => {
                let value = self.evaluate(operand, scope)?;
                Ok(match op {
                    UnaryOperator::Negate => FormulaValue::Number(-value.to_number()),
                    UnaryOperator::Plus => FormulaValue::Number(value.to_number()),
                    UnaryOperator::Not => FormulaValue::Boolean(!value.is_truthy()),
                })
            }

            FormulaExpr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                if self.evaluate(condition, scope)?.is_truthy() {
                    self.evaluate(then, scope)
                } else {
                    self.evaluate(otherwise, scope)
                }
            }

            // === Functions ===
            FormulaExpr::Function { name, args } => self.evaluate_function(name, args, scope),
        }
    }

    /// Look up the number a reference stands for.
    ///
    /// Formula cells reached through the reference are evaluated first; their errors and
    /// circular references propagate. Everything else that cannot be read resolves to
    /// [`Resolved::Unresolved`].
    pub fn resolve_reference(
        &mut self,
        reference: &Reference,
        scope: Option<TableScope<'_>>,
    ) -> FormulaResult<Resolved> {
        let values = self.values;

        let resolved = match reference {
            Reference::Field(field) => match values.field_value(field) {
                None => Resolved::Unresolved(UnresolvedReason::MissingField),
                Some(raw) if looks_like_table(raw) => {
                    Resolved::Unresolved(UnresolvedReason::TableWithoutCell)
                }
                Some(raw) => Resolved::Literal(cell_numeric_value(raw)),
            },

            Reference::FieldCell { field, cell } => {
                match (cell_ref_to_indexes(cell), values.field_table(field)) {
                    (None, _) => Resolved::Unresolved(UnresolvedReason::MalformedCell),
                    (Some(_), None) if values.field_value(field).is_none() => {
                        Resolved::Unresolved(UnresolvedReason::MissingField)
                    }
                    (Some(_), None) => Resolved::Unresolved(UnresolvedReason::NotATable),
                    (Some(idx), Some(table)) => {
                        self.resolve_cell(TableScope::for_field(field, &table), idx)?
                    }
                }
            }

            Reference::Cell(cell) => match (scope, cell_ref_to_indexes(cell)) {
                (None, _) => Resolved::Unresolved(UnresolvedReason::NoTable),
                (Some(_), None) => Resolved::Unresolved(UnresolvedReason::MalformedCell),
                (Some(scope), Some(idx)) => self.resolve_cell(scope, idx)?,
            },
        };

        log::trace!("resolved {} -> {:?}", reference, resolved);
        Ok(resolved)
    }

    fn resolve_cell(&mut self, scope: TableScope<'_>, idx: CellIndex) -> FormulaResult<Resolved> {
        let cell = match scope.table.cell(idx) {
            Some(cell) => cell,
            None => return Ok(Resolved::Unresolved(UnresolvedReason::OutsideTable)),
        };

        match cell.formula_text() {
            Some(formula) => {
                let value = self.evaluate_cell(scope.key(idx), formula, scope)?;
                Ok(Resolved::Literal(value.reference_number()))
            }
            None => Ok(Resolved::Literal(cell.numeric_value())),
        }
    }

    fn evaluate_cell(
        &mut self,
        key: ReferenceKey,
        formula: &str,
        scope: TableScope<'_>,
    ) -> FormulaResult<FormulaValue> {
        if let Some(cached) = self.memo.as_ref().and_then(|memo| memo.get(&key)) {
            return cached.clone();
        }

        if self.depth >= MAX_EVALUATION_DEPTH {
            log::debug!("reference chain too deep at {:?}", key);
            return Err(FormulaError::NestingTooDeep);
        }
        if !self.visiting.insert(key.clone()) {
            log::trace!("circular reference through {:?}", key);
            return Err(FormulaError::CircularReference);
        }

        self.depth += 1;
        let result = self.evaluate_text(formula, Some(scope.at(key.cell)));
        self.depth -= 1;
        self.visiting.remove(&key);

        // A depth failure depends on where the chain was entered, not on the cell
        let depth_failure = matches!(result, Err(FormulaError::NestingTooDeep));
        if let (Some(memo), false) = (self.memo.as_mut(), depth_failure) {
            memo.insert(key, result.clone());
        }
        result
    }

    fn evaluate_text(
        &mut self,
        formula: &str,
        scope: Option<TableScope<'_>>,
    ) -> FormulaResult<FormulaValue> {
        let expr = parse_formula(formula)?;
        match self.evaluate(&expr, scope)? {
            FormulaValue::Number(n) if !n.is_finite() => Err(FormulaError::Evaluation(format!(
                "result is {}",
                format_number(n)
            ))),
            value => Ok(value),
        }
    }

    /// Evaluate a binary operation
    fn evaluate_binary_op(
        &mut self,
        op: BinaryOperator,
        left: &FormulaExpr,
        right: &FormulaExpr,
        scope: Option<TableScope<'_>>,
    ) -> FormulaResult<FormulaValue> {
        let left_val = self.evaluate(left, scope)?;

        // Short-circuit: the right operand is only evaluated when it decides the result
        match op {
            BinaryOperator::And if !left_val.is_truthy() => return Ok(left_val),
            BinaryOperator::Or if left_val.is_truthy() => return Ok(left_val),
            _ => {}
        }

        let right_val = self.evaluate(right, scope)?;
        Ok(apply_binary_op(op, left_val, right_val))
    }

    /// Evaluate a function call
    fn evaluate_function(
        &mut self,
        name: &str,
        args: &[FormulaExpr],
        scope: Option<TableScope<'_>>,
    ) -> FormulaResult<FormulaValue> {
        let func = registry()
            .get(name)
            .ok_or_else(|| FormulaError::UnknownFunction(name.to_string()))?;

        // Check argument count
        if args.len() < func.min_args {
            return Err(FormulaError::ArgumentCount {
                function: func.name.to_string(),
                expected: format!("at least {}", func.min_args),
                actual: args.len(),
            });
        }

        if let Some(max) = func.max_args {
            if args.len() > max {
                return Err(FormulaError::ArgumentCount {
                    function: func.name.to_string(),
                    expected: format!("at most {}", max),
                    actual: args.len(),
                });
            }
        }

        // Evaluate arguments
        let mut numbers = Vec::with_capacity(args.len());
        for arg in args {
            numbers.push(self.evaluate(arg, scope)?.to_number());
        }

        func.call(&numbers).map(FormulaValue::Number)
    }
}

fn apply_binary_op(op: BinaryOperator, left: FormulaValue, right: FormulaValue) -> FormulaValue {
    use FormulaValue::{Boolean, Number};

    match op {
        // `+` concatenates as soon as either side is text
        BinaryOperator::Add => match (&left, &right) {
            (FormulaValue::String(_), _) | (_, FormulaValue::String(_)) => {
                FormulaValue::String(format!("{}{}", left, right))
            }
            _ => Number(left.to_number() + right.to_number()),
        },
        BinaryOperator::Subtract => Number(left.to_number() - right.to_number()),
        BinaryOperator::Multiply => Number(left.to_number() * right.to_number()),
        BinaryOperator::Divide => Number(left.to_number() / right.to_number()),
        BinaryOperator::Modulo => Number(left.to_number() % right.to_number()),
        BinaryOperator::Power => Number(crate::functions::math::pow(
            left.to_number(),
            right.to_number(),
        )),

        BinaryOperator::Equal => Boolean(loose_equals(&left, &right)),
        BinaryOperator::NotEqual => Boolean(!loose_equals(&left, &right)),
        BinaryOperator::StrictEqual => Boolean(left == right),
        BinaryOperator::StrictNotEqual => Boolean(left != right),

        BinaryOperator::LessThan => Boolean(compare_values(&left, &right) == Some(Ordering::Less)),
        BinaryOperator::LessEqual => Boolean(matches!(
            compare_values(&left, &right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOperator::GreaterThan => {
            Boolean(compare_values(&left, &right) == Some(Ordering::Greater))
        }
        BinaryOperator::GreaterEqual => Boolean(matches!(
            compare_values(&left, &right),
            Some(Ordering::Greater | Ordering::Equal)
        )),

        BinaryOperator::And => {
            if left.is_truthy() {
                right
            } else {
                left
            }
        }
        BinaryOperator::Or => {
            if left.is_truthy() {
                left
            } else {
                right
            }
        }
    }
}

/// `==`: same-typed values compare directly, mixed types compare as numbers
fn loose_equals(left: &FormulaValue, right: &FormulaValue) -> bool {
    match (left, right) {
        (FormulaValue::String(l), FormulaValue::String(r)) => l == r,
        (FormulaValue::Boolean(l), FormulaValue::Boolean(r)) => l == r,
        _ => left.to_number() == right.to_number(),
    }
}

/// Ordering for `<` and friends: two strings compare as text, anything else as numbers.
/// `None` when a `NaN` is involved, which makes every comparison false.
fn compare_values(left: &FormulaValue, right: &FormulaValue) -> Option<Ordering> {
    match (left, right) {
        (FormulaValue::String(l), FormulaValue::String(r)) => Some(l.cmp(r)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn eval(formula: &str) -> String {
        evaluate_formula(formula, &EvaluationContext::simple())
    }

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn eval_with(formula: &str, pairs: &[(&str, &str)]) -> String {
        let values = values(pairs);
        evaluate_formula(formula, &EvaluationContext::new(&values))
    }

    fn eval_in_table(formula: &str, table: &Table) -> String {
        let ctx = EvaluationContext::simple().with_table(TableScope::new(table));
        evaluate_formula(formula, &ctx)
    }

    fn eval_cell(table: &Table, a1: &str) -> String {
        let idx = CellIndex::parse(a1).unwrap();
        let formula = table.cell(idx).unwrap().to_string();
        let ctx = EvaluationContext::simple().with_table(TableScope::new(table).at(idx));
        evaluate_formula(&formula, &ctx)
    }

    #[test]
    fn test_literals_are_returned_unchanged() {
        assert_eq!(eval("hello"), "hello");
        assert_eq!(eval(""), "");
        assert_eq!(eval("12"), "12");
        assert_eq!(eval(" =1+1"), " =1+1");
        assert_eq!(eval("[number:5]"), "[number:5]");
    }

    #[test]
    fn test_evaluate_arithmetic() {
        assert_eq!(eval("=1+2*3"), "7");
        assert_eq!(eval("=(1+2)*3"), "9");
        assert_eq!(eval("=10/4"), "2.5");
        assert_eq!(eval("=2^10"), "1024");
        assert_eq!(eval("=2**3**2"), "512");
        assert_eq!(eval("=-2^2"), "-4");
        assert_eq!(eval("=2^-1"), "0.5");
        assert_eq!(eval("=7 % 3"), "1");
        assert_eq!(eval("=-7 % 3"), "-1");
        assert_eq!(eval("=0.1 + 0.2"), "0.30000000000000004");
        assert_eq!(eval("=--5"), "5");
    }

    #[test]
    fn test_non_finite_results_are_errors() {
        assert_eq!(eval("=1/0"), "ERR");
        assert_eq!(eval("=0/0"), "ERR");
        assert_eq!(eval("=Math.sqrt(-1)"), "ERR");
        assert_eq!(eval("=Math.max()"), "ERR");
        // Intermediate infinities are fine
        assert_eq!(eval("=1/(1/0)"), "0");
    }

    #[test]
    fn test_evaluate_comparison() {
        assert_eq!(eval("=1 < 2"), "true");
        assert_eq!(eval("=2 <= 1"), "false");
        assert_eq!(eval("=\"a\" < \"b\""), "true");
        assert_eq!(eval("=\"10\" == 10"), "true");
        assert_eq!(eval("=\"10\" === 10"), "false");
        assert_eq!(eval("=true == 1"), "true");
        assert_eq!(eval("=1 != 2"), "true");
        assert_eq!(eval("=\"abc\" < 5"), "false");
        assert_eq!(eval("=\"abc\" >= 5"), "false");
    }

    #[test]
    fn test_evaluate_logical() {
        assert_eq!(eval("=0 || 5"), "5");
        assert_eq!(eval("=2 && 3"), "3");
        assert_eq!(eval("=0 and 5"), "0");
        assert_eq!(eval("=1 OR 0"), "1");
        assert_eq!(eval("=!0"), "true");
        assert_eq!(eval("=!\"\""), "true");
        // The right operand is never evaluated
        assert_eq!(eval("=1 or NOPE()"), "1");
        assert_eq!(eval("=0 and NOPE()"), "0");
        assert_eq!(eval("=1 and NOPE()"), "ERR");
    }

    #[test]
    fn test_evaluate_ternary() {
        let pairs = [("a", "10")];
        assert_eq!(eval_with("={a} > 5 ? \"big\" : \"small\"", &pairs), "big");
        assert_eq!(eval_with("={a} > 50 ? \"big\" : \"small\"", &pairs), "small");
        assert_eq!(eval("=0 ? 1 : 0 ? 2 : 3"), "3");
        // Only the chosen branch is evaluated
        assert_eq!(eval("=1 ? 2 : NOPE()"), "2");
    }

    #[test]
    fn test_evaluate_strings() {
        assert_eq!(eval("=\"a\" + 1"), "a1");
        assert_eq!(eval("=1 + 2 + \"x\""), "3x");
        assert_eq!(eval("='total: ' + 2 * 3"), "total: 6");
        assert_eq!(eval("=\"6\" * \"7\""), "42");
        assert_eq!(eval("=\"\""), "");
    }

    #[test]
    fn test_round_helper() {
        assert_eq!(eval("=ROUND(10.456, 2)"), "10.46");
        assert_eq!(eval("=ROUND(1.005*100,0)/100"), "1");
        assert_eq!(eval("=ROUND(2.5)"), "3");
        assert_eq!(eval("=ROUND(-2.5)"), "-2");
        assert_eq!(eval("=round(1234.5678, -2)"), "1200");
        assert_eq!(eval("=ROUND()"), "ERR");
        assert_eq!(eval("=ROUND(1, 2, 3)"), "ERR");
    }

    #[test]
    fn test_angle_helpers() {
        assert_eq!(eval("=DEG(Math.PI)"), "180");
        assert_eq!(eval("=RAD(180)"), "3.141592653589793");
        assert_eq!(eval("=ROUND(Math.sin(RAD(30)), 4)"), "0.5");
    }

    #[test]
    fn test_math_namespace() {
        assert_eq!(eval("=Math.sqrt(16)"), "4");
        assert_eq!(eval("=Math.max(1, 5, 3)"), "5");
        assert_eq!(eval("=Math.min(4, -2)"), "-2");
        assert_eq!(eval("=Math.abs(-3)"), "3");
        assert_eq!(eval("=Math.pow(2, 3)"), "8");
        assert_eq!(eval("=Math.sign(-4)"), "-1");
        assert_eq!(eval("=Math.floor(2.7)"), "2");
        assert_eq!(eval("=Math.hypot(3, 4)"), "5");
        assert_eq!(eval("=Math.round(-0.5)"), "0");
        assert_eq!(eval("=Math.PI"), "3.141592653589793");
        assert_eq!(eval("=Math.SQRT2"), "1.4142135623730951");
        assert_eq!(eval("=Math.LN2"), "0.6931471805599453");
        assert_eq!(eval("=math.pi"), "3.141592653589793");

        let r: f64 = eval("=Math.random()").parse().unwrap();
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn test_unknown_names_and_functions() {
        assert_eq!(eval("=FOO(1)"), "ERR");
        assert_eq!(eval("=PI"), "ERR");
        assert_eq!(eval("=window"), "ERR");
        assert_eq!(eval("=Math.sqrt(1, 2)"), "ERR");
        assert_eq!(eval("=LOG10(100)"), "ERR");
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(eval("="), "ERR");
        assert_eq!(eval("=(1+2"), "ERR");
        assert_eq!(eval("=1 +"), "ERR");
        assert_eq!(eval("=x = 1"), "ERR");
        assert_eq!(eval("=1; 2"), "ERR");
    }

    #[test]
    fn test_field_references() {
        let pairs = [
            ("f1", "10"),
            ("f2", "[number:5]"),
            ("weight", "12 kg"),
            ("empty", ""),
            ("t1", r#"[["[number:3]","[number:4]"]]"#),
        ];
        assert_eq!(eval_with("={f1} + {f2}", &pairs), "15");
        assert_eq!(eval_with("={weight} * 2", &pairs), "24");
        assert_eq!(eval_with("={empty} + 1", &pairs), "1");
        assert_eq!(eval_with("={missingField} + 1", &pairs), "1");
        // A table referenced without a cell counts as 0
        assert_eq!(eval_with("={t1} + 1", &pairs), "1");
    }

    #[test]
    fn test_field_cell_references() {
        let pairs = [
            ("t1", r#"[["[number:3]","[number:4]"],["x","=A1+B1"]]"#),
            ("scalar", "5"),
            ("broken", "[[1,"),
        ];
        assert_eq!(eval_with("={t1:A1} + {t1:B1}", &pairs), "7");
        assert_eq!(eval_with("={t1:b2} * 10", &pairs), "70");
        assert_eq!(eval_with("={t1:A2} + 1", &pairs), "1");
        assert_eq!(eval_with("={t1:Z9} + 1", &pairs), "1");
        assert_eq!(eval_with("={t1:A0} + 1", &pairs), "1");
        assert_eq!(eval_with("={t1:1A} + 2", &pairs), "2");
        assert_eq!(eval_with("={scalar:A1} + 2", &pairs), "2");
        assert_eq!(eval_with("={broken:A1} + 2", &pairs), "2");
        assert_eq!(eval_with("={nothing:A1} + 2", &pairs), "2");
    }

    #[test]
    fn test_resolve_reference_reasons() {
        let values = values(&[("t1", r#"[["1"]]"#), ("n", "5")]);
        let mut evaluator = Evaluator::new(&values);
        let mut resolve = |reference: Reference| evaluator.resolve_reference(&reference, None);

        assert_eq!(
            resolve(Reference::Field("n".into())),
            Ok(Resolved::Literal(5.0))
        );
        assert_eq!(
            resolve(Reference::Field("t1".into())),
            Ok(Resolved::Unresolved(UnresolvedReason::TableWithoutCell))
        );
        assert_eq!(
            resolve(Reference::FieldCell {
                field: "n".into(),
                cell: "A1".into()
            }),
            Ok(Resolved::Unresolved(UnresolvedReason::NotATable))
        );
        assert_eq!(
            resolve(Reference::FieldCell {
                field: "t1".into(),
                cell: "B1".into()
            }),
            Ok(Resolved::Unresolved(UnresolvedReason::OutsideTable))
        );
        assert_eq!(
            resolve(Reference::Cell("A1".into())),
            Ok(Resolved::Unresolved(UnresolvedReason::NoTable))
        );
    }

    #[test]
    fn test_bare_cell_references() {
        let table = Table::from_strings([["2", "3", "=A1*B1"], ["[checkbox:true]", "", "=C1+1"]]);
        assert_eq!(eval_in_table("=A1+B1", &table), "5");
        assert_eq!(eval_in_table("=C1+1", &table), "7");
        assert_eq!(eval_in_table("=C2*2", &table), "14");
        assert_eq!(eval_in_table("=A2+B2+1", &table), "1");
        assert_eq!(eval_in_table("=A0+1", &table), "1");
        // Without a table, bare references count as 0
        assert_eq!(eval("=A1 + 1"), "1");
    }

    #[test]
    fn test_cross_table_formula_cells() {
        let pairs = [
            ("t1", r#"[["=B1*2","[number:4]"]]"#),
            ("t2", r#"[["={t1:A1}+1"]]"#),
        ];
        assert_eq!(eval_with("={t1:A1}", &pairs), "8");
        assert_eq!(eval_with("={t2:A1}", &pairs), "9");
    }

    #[test]
    fn test_cycles_terminate() {
        let table = Table::from_strings([["=B1", "=A1"]]);
        assert_eq!(eval_cell(&table, "A1"), "CIRC");
        assert_eq!(eval_cell(&table, "B1"), "CIRC");
        assert_eq!(eval_in_table("=A1", &table), "CIRC");

        let table = Table::from_strings([["=A1"]]);
        assert_eq!(eval_cell(&table, "A1"), "CIRC");

        let table = Table::from_strings([["=B1+1", "=C1+1", "=A1+1"]]);
        assert_eq!(eval_cell(&table, "A1"), "CIRC");

        let pairs = [("t1", r#"[["={t2:A1}"]]"#), ("t2", r#"[["={t1:A1}"]]"#)];
        assert_eq!(eval_with("={t1:A1} + 1", &pairs), "CIRC");
    }

    #[test]
    fn test_identical_formulas_are_not_cycles() {
        let table = Table::from_strings([["=C1", "=C1", "3", "=A1+B1"]]);
        assert_eq!(eval_cell(&table, "D1"), "6");

        let table = Table::from_strings([["4", "=A1*2", "=A1*2", "=B1+C1"]]);
        assert_eq!(eval_cell(&table, "D1"), "16");
    }

    #[test]
    fn test_referenced_errors_propagate() {
        let table = Table::from_strings([["=1/0", "=A1+1", "=NOPE", "=C1*0"]]);
        assert_eq!(eval_cell(&table, "B1"), "ERR");
        assert_eq!(eval_cell(&table, "D1"), "ERR");
    }

    #[test]
    fn test_referenced_non_numbers_decode() {
        let table = Table::from_strings([["=1<2", "=A1+1", "=\"5\"", "=C1*2", "='x'", "=E1+3"]]);
        assert_eq!(eval_cell(&table, "A1"), "true");
        assert_eq!(eval_cell(&table, "B1"), "1");
        assert_eq!(eval_cell(&table, "D1"), "10");
        assert_eq!(eval_cell(&table, "F1"), "3");
    }

    #[test]
    fn test_memo_evaluator_matches_fresh_evaluation() {
        let table = Table::from_strings([["1", "=A1+1", "=B1+A1", "=C1*B1", "=D1+D1"]]);
        let scope = TableScope::new(&table);
        let mut evaluator = Evaluator::with_memo(&NO_VALUES);

        for (idx, formula) in table.formula_cells() {
            let memoized = evaluator.formula_outcome(formula, Some(scope.at(idx)));
            assert_eq!(memoized.to_string(), eval_cell(&table, &idx.to_string()));
        }
        assert_eq!(evaluator.cached_cells(), 4);
    }

    /// Row n reads row n + 1; the last row holds 1
    fn reversed_chain(rows: usize) -> Table {
        let mut cells: Vec<Vec<String>> = (1..rows)
            .map(|row| vec![format!("=A{}+1", row + 1)])
            .collect();
        cells.push(vec!["1".to_string()]);
        Table::from_strings(&cells)
    }

    #[test]
    fn test_deep_nesting_is_an_error() {
        let parens = format!("={}1{}", "(".repeat(20_000), ")".repeat(20_000));
        assert_eq!(eval(&parens), "ERR");
        assert_eq!(eval(&format!("={}1", "-".repeat(50_000))), "ERR");
        assert_eq!(eval(&format!("={}1", "-".repeat(10))), "1");
    }

    #[test]
    fn test_long_reference_chains_are_errors() {
        let table = reversed_chain(3000);
        assert_eq!(eval_cell(&table, "A1"), "ERR");
        assert_eq!(eval_cell(&table, "A2990"), "11");

        let json = table.to_json();
        assert_eq!(eval_with("={t:A1}", &[("t", json.as_str())]), "ERR");
        assert_eq!(eval_with("={t:A2999}", &[("t", json.as_str())]), "2");
    }

    #[test]
    fn test_depth_failures_are_not_cached() {
        let table = reversed_chain(3000);
        let scope = TableScope::new(&table);
        let mut evaluator = Evaluator::with_memo(&NO_VALUES);

        let top = CellIndex::new(0, 0);
        let outcome = evaluator.formula_outcome("=A2+1", Some(scope.at(top)));
        assert_eq!(outcome.to_string(), "ERR");
        assert_eq!(evaluator.cached_cells(), 0);

        // Evaluated bottom-up, every cell is one hop from a cached result
        for row in (0..2999).rev() {
            let idx = CellIndex::new(row, 0);
            let formula = table.cell(idx).unwrap().to_string();
            evaluator.formula_outcome(&formula, Some(scope.at(idx)));
        }
        let outcome = evaluator.formula_outcome("=A2+1", Some(scope.at(top)));
        assert_eq!(outcome.to_string(), "3000");
        assert_eq!(evaluator.cached_cells(), 2999);
    }

    #[test]
    fn test_outcome_to_cell() {
        let ctx = EvaluationContext::simple();
        let outcome = evaluate_formula_outcome("=2*3", &ctx);
        assert_eq!(outcome.as_number(), Some(6.0));
        assert_eq!(outcome.to_cell(true).to_string(), "[number:6]");
        assert_eq!(outcome.to_cell(false).to_string(), "6");

        let outcome = evaluate_formula_outcome("=1/0", &ctx);
        assert!(outcome.is_error());
        assert_eq!(outcome.to_cell(true).to_string(), "ERR");

        let outcome = evaluate_formula_outcome("=1 > 0", &ctx);
        assert_eq!(outcome.to_cell(true).to_string(), "true");

        let outcome = evaluate_formula_outcome("[checkbox:true]", &ctx);
        assert_eq!(outcome, FormulaOutcome::Literal("[checkbox:true]".into()));
        assert_eq!(outcome.to_cell(true).to_string(), "[checkbox:true]");
    }

    #[test]
    fn test_evaluate_expression_directly() {
        let values = values(&[("a", "2")]);
        let expr = parse_formula("={a} * 21").unwrap();
        assert_eq!(
            evaluate(&expr, &EvaluationContext::new(&values)),
            Ok(FormulaValue::Number(42.0))
        );
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(FormulaValue::String(" 12 ".into()).to_number(), 12.0);
        assert_eq!(FormulaValue::String("".into()).to_number(), 0.0);
        assert!(FormulaValue::String("12 kg".into()).to_number().is_nan());
        assert_eq!(
            FormulaValue::String("-Infinity".into()).to_number(),
            f64::NEG_INFINITY
        );
        assert!(FormulaValue::String("inf".into()).to_number().is_nan());
        assert_eq!(FormulaValue::Boolean(true).to_number(), 1.0);
        assert!(!FormulaValue::Number(f64::NAN).is_truthy());
        assert!(FormulaValue::String("0".into()).is_truthy());
        assert_eq!(FormulaValue::Number(1e21).to_string(), "1e+21");
        assert_eq!(FormulaValue::Boolean(false).to_string(), "false");
    }

    proptest! {
        #[test]
        fn prop_literals_are_idempotent(s in "[^=].{0,40}") {
            prop_assert_eq!(eval(&s), s);
        }

        #[test]
        fn prop_evaluation_never_panics(body in "[ -~]{0,40}") {
            let formula = format!("={}", body);
            let table = Table::from_strings([["=B1", "1"], ["=A1+A2", "x"]]);
            let _ = eval_in_table(&formula, &table);
        }
    }
}
