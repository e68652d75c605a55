//! Math functions

use crate::error::{FormulaError, FormulaResult};
use std::f64::consts::PI;

/// Argument `index`, or `NaN` when it was not supplied
pub fn arg(args: &[f64], index: usize) -> f64 {
    args.get(index).copied().unwrap_or(f64::NAN)
}

/// Round to the nearest integer, ties towards positive infinity (`2.5` -> `3`, `-2.5` -> `-2`)
pub fn round_half_up(x: f64) -> f64 {
    let floor = x.floor();
    if x - floor >= 0.5 {
        floor + 1.0
    } else {
        floor
    }
}

/// Power with the `Math.pow` special cases (`1^NaN` and `(±1)^±Infinity` are `NaN`)
pub fn pow(base: f64, exponent: f64) -> f64 {
    if exponent.is_nan() || (base.abs() == 1.0 && exponent.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exponent)
}

/// Sign of `x` as `-1`, `0` or `1`; zero and `NaN` pass through
pub fn sign(x: f64) -> f64 {
    if x == 0.0 || x.is_nan() {
        x
    } else {
        x.signum()
    }
}

/// Radians to degrees
pub fn deg(radians: f64) -> f64 {
    radians * 180.0 / PI
}

/// Degrees to radians
pub fn rad(degrees: f64) -> f64 {
    degrees * PI / 180.0
}

/// ROUND function: scale by `10^decimals`, round half up, scale back
pub fn fn_round(args: &[f64]) -> FormulaResult<f64> {
    let value = arg(args, 0);
    let decimals = args.get(1).copied().unwrap_or(0.0);

    if decimals.is_nan() {
        return Err(FormulaError::Argument(
            "ROUND decimals must be a number".into(),
        ));
    }

    let factor = pow(10.0, decimals);
    Ok(round_half_up(value * factor) / factor)
}

/// Math.max; `-Infinity` without arguments, `NaN` if any argument is `NaN`
pub fn fn_max(args: &[f64]) -> FormulaResult<f64> {
    if args.iter().any(|n| n.is_nan()) {
        return Ok(f64::NAN);
    }
    Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

/// Math.min; `Infinity` without arguments, `NaN` if any argument is `NaN`
pub fn fn_min(args: &[f64]) -> FormulaResult<f64> {
    if args.iter().any(|n| n.is_nan()) {
        return Ok(f64::NAN);
    }
    Ok(args.iter().copied().fold(f64::INFINITY, f64::min))
}

/// Math.hypot
pub fn fn_hypot(args: &[f64]) -> FormulaResult<f64> {
    Ok(args.iter().copied().fold(0.0, f64::hypot))
}

/// Math.random (volatile)
pub fn fn_random(_args: &[f64]) -> FormulaResult<f64> {
    Ok(rand::random::<f64>())
}
