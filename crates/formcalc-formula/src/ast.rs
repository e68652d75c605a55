//! Formula Abstract Syntax Tree types

use std::fmt;

/// Formula expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum FormulaExpr {
    // === Literals ===
    /// Numeric literal
    Number(f64),
    /// String literal
    String(String),
    /// Boolean literal
    Boolean(bool),

    // === References ===
    /// Field or cell reference
    Reference(Reference),
    /// Named constant such as `Math.PI`
    Name(String),

    // === Operators ===
    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<FormulaExpr>,
        right: Box<FormulaExpr>,
    },
    /// Unary operation
    UnaryOp {
        op: UnaryOperator,
        operand: Box<FormulaExpr>,
    },
    /// `condition ? then : otherwise`
    Ternary {
        condition: Box<FormulaExpr>,
        then: Box<FormulaExpr>,
        otherwise: Box<FormulaExpr>,
    },

    // === Function call ===
    Function {
        name: String,
        args: Vec<FormulaExpr>,
    },
}

/// A value lookup inside a formula
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// `{fieldId}`
    Field(String),
    /// `{fieldId:A1}`: a cell of another table field
    FieldCell { field: String, cell: String },
    /// Bare `A1`: a cell of the table the formula lives in
    Cell(String),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Field(field) => write!(f, "{{{}}}", field),
            Reference::FieldCell { field, cell } => write!(f, "{{{}:{}}}", field, cell),
            Reference::Cell(cell) => f.write_str(cell),
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,

    // Comparison
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,

    // Logical (short-circuit, yield an operand)
    And,
    Or,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Plus,
    Not,
}

impl FormulaExpr {
    /// Every reference in the expression, in source order
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a Reference>) {
        match self {
            FormulaExpr::Reference(r) => refs.push(r),
            FormulaExpr::BinaryOp { left, right, .. } => {
                left.collect_references(refs);
                right.collect_references(refs);
            }
            FormulaExpr::UnaryOp { operand, .. } => operand.collect_references(refs),
            FormulaExpr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_references(refs);
                then.collect_references(refs);
                otherwise.collect_references(refs);
            }
            FormulaExpr::Function { args, .. } => {
                for arg in args {
                    arg.collect_references(refs);
                }
            }
            FormulaExpr::Number(_)
            | FormulaExpr::String(_)
            | FormulaExpr::Boolean(_)
            | FormulaExpr::Name(_) => {}
        }
    }
}
