//! Built-in helper functions and constants
//!
//! The registry is the complete allow-list of what a formula can call or name:
//! `ROUND`, `DEG`, `RAD` and the `Math.*` namespace. Lookups are case-insensitive.

pub mod math;

use crate::error::FormulaResult;
use ahash::AHashMap;
use once_cell::sync::Lazy;
use std::f64::consts;

/// Function implementation signature
///
/// Arguments arrive already converted to numbers; an argument the caller left out reads
/// as `NaN`.
#[derive(Clone, Copy)]
pub enum FunctionImpl {
    /// Exactly one argument
    Unary(fn(f64) -> f64),
    /// Exactly two arguments
    Binary(fn(f64, f64) -> f64),
    /// Any number of arguments within the declared bounds
    Variadic(fn(&[f64]) -> FormulaResult<f64>),
}

/// Function definition
pub struct FunctionDef {
    /// Function name as written in formulas
    pub name: &'static str,
    /// Minimum arguments
    pub min_args: usize,
    /// Maximum arguments (None = unlimited)
    pub max_args: Option<usize>,
    /// Implementation
    pub implementation: FunctionImpl,
}

impl FunctionDef {
    /// Call the function with already-checked arguments
    pub fn call(&self, args: &[f64]) -> FormulaResult<f64> {
        match self.implementation {
            FunctionImpl::Unary(f) => Ok(f(math::arg(args, 0))),
            FunctionImpl::Binary(f) => Ok(f(math::arg(args, 0), math::arg(args, 1))),
            FunctionImpl::Variadic(f) => f(args),
        }
    }
}

/// Function registry
pub struct FunctionRegistry {
    functions: AHashMap<String, FunctionDef>,
    constants: AHashMap<String, f64>,
}

static REGISTRY: Lazy<FunctionRegistry> = Lazy::new(FunctionRegistry::new);

/// The shared registry of built-in helpers
pub fn registry() -> &'static FunctionRegistry {
    &REGISTRY
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Create a new registry with all built-in functions
    pub fn new() -> Self {
        let mut registry = Self {
            functions: AHashMap::new(),
            constants: AHashMap::new(),
        };

        registry.register_form_helpers();
        registry.register_math_namespace();
        registry.register_math_constants();

        registry
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(&name.to_uppercase())
    }

    /// Look up a named constant
    pub fn constant(&self, name: &str) -> Option<f64> {
        self.constants.get(&name.to_uppercase()).copied()
    }

    /// Register a function
    pub fn register(&mut self, def: FunctionDef) {
        self.functions.insert(def.name.to_uppercase(), def);
    }

    /// Register a named constant
    pub fn register_constant(&mut self, name: &str, value: f64) {
        self.constants.insert(name.to_uppercase(), value);
    }

    /// Names of all registered functions, sorted
    pub fn function_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.values().map(|def| def.name).collect();
        names.sort_unstable();
        names
    }

    fn register_unary(&mut self, name: &'static str, f: fn(f64) -> f64) {
        self.register(FunctionDef {
            name,
            min_args: 1,
            max_args: Some(1),
            implementation: FunctionImpl::Unary(f),
        });
    }

    fn register_binary(&mut self, name: &'static str, f: fn(f64, f64) -> f64) {
        self.register(FunctionDef {
            name,
            min_args: 2,
            max_args: Some(2),
            implementation: FunctionImpl::Binary(f),
        });
    }

    fn register_variadic(
        &mut self,
        name: &'static str,
        min_args: usize,
        max_args: Option<usize>,
        f: fn(&[f64]) -> FormulaResult<f64>,
    ) {
        self.register(FunctionDef {
            name,
            min_args,
            max_args,
            implementation: FunctionImpl::Variadic(f),
        });
    }

    fn register_form_helpers(&mut self) {
        // ROUND(value, decimals = 0)
        self.register_variadic("ROUND", 1, Some(2), math::fn_round);
        self.register_unary("DEG", math::deg);
        self.register_unary("RAD", math::rad);
    }

    fn register_math_namespace(&mut self) {
        self.register_unary("Math.abs", f64::abs);
        self.register_unary("Math.acos", f64::acos);
        self.register_unary("Math.acosh", f64::acosh);
        self.register_unary("Math.asin", f64::asin);
        self.register_unary("Math.asinh", f64::asinh);
        self.register_unary("Math.atan", f64::atan);
        self.register_binary("Math.atan2", f64::atan2);
        self.register_unary("Math.atanh", f64::atanh);
        self.register_unary("Math.cbrt", f64::cbrt);
        self.register_unary("Math.ceil", f64::ceil);
        self.register_unary("Math.cos", f64::cos);
        self.register_unary("Math.cosh", f64::cosh);
        self.register_unary("Math.exp", f64::exp);
        self.register_unary("Math.expm1", f64::exp_m1);
        self.register_unary("Math.floor", f64::floor);
        self.register_variadic("Math.hypot", 0, None, math::fn_hypot);
        self.register_unary("Math.log", f64::ln);
        self.register_unary("Math.log10", f64::log10);
        self.register_unary("Math.log1p", f64::ln_1p);
        self.register_unary("Math.log2", f64::log2);
        self.register_variadic("Math.max", 0, None, math::fn_max);
        self.register_variadic("Math.min", 0, None, math::fn_min);
        self.register_binary("Math.pow", math::pow);
        self.register_variadic("Math.random", 0, Some(0), math::fn_random);
        self.register_unary("Math.round", math::round_half_up);
        self.register_unary("Math.sign", math::sign);
        self.register_unary("Math.sin", f64::sin);
        self.register_unary("Math.sinh", f64::sinh);
        self.register_unary("Math.sqrt", f64::sqrt);
        self.register_unary("Math.tan", f64::tan);
        self.register_unary("Math.tanh", f64::tanh);
        self.register_unary("Math.trunc", f64::trunc);
    }

    fn register_math_constants(&mut self) {
        self.register_constant("Math.E", consts::E);
        self.register_constant("Math.LN2", consts::LN_2);
        self.register_constant("Math.LN10", consts::LN_10);
        self.register_constant("Math.LOG2E", consts::LOG2_E);
        self.register_constant("Math.LOG10E", consts::LOG10_E);
        self.register_constant("Math.PI", consts::PI);
        self.register_constant("Math.SQRT1_2", consts::FRAC_1_SQRT_2);
        self.register_constant("Math.SQRT2", consts::SQRT_2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = registry();
        assert!(registry.get("round").is_some());
        assert!(registry.get("MATH.SQRT").is_some());
        assert!(registry.get("math.Sqrt").is_some());
        assert_eq!(registry.constant("math.pi"), Some(consts::PI));
    }

    #[test]
    fn test_nothing_outside_the_allow_list() {
        let registry = registry();
        assert!(registry.get("SUM").is_none());
        assert!(registry.get("eval").is_none());
        assert!(registry.get("Math").is_none());
        assert!(registry.constant("PI").is_none());
        assert!(registry.constant("Infinity").is_none());
    }

    #[test]
    fn test_registered_names() {
        let names = registry().function_names();
        assert_eq!(names.len(), 35);
        assert!(names.contains(&"DEG"));
        assert!(names.contains(&"Math.trunc"));
    }

    #[test]
    fn test_call_fills_missing_arguments_with_nan() {
        let sqrt = registry().get("Math.sqrt").unwrap();
        assert_eq!(sqrt.call(&[9.0]).unwrap(), 3.0);
        assert!(sqrt.call(&[]).unwrap().is_nan());
    }
}
