//! Number text conventions shared by the decoder, the evaluator and the wire format
//!
//! Field values and cell payloads are free text typed by users, so decoding reads the
//! longest leading decimal literal (`"12 kg"` is 12) and formatting produces the
//! shortest text that reads back to the same `f64`.

use lazy_regex::regex;

/// Parse the longest leading decimal literal of `text` (after trimming whitespace).
///
/// Returns `None` when there is no such prefix or when the literal overflows to infinity.
///
/// # Examples
/// ```
/// use formcalc_core::parse_float_prefix;
///
/// assert_eq!(parse_float_prefix("42"), Some(42.0));
/// assert_eq!(parse_float_prefix("  -1.5e3xyz"), Some(-1500.0));
/// assert_eq!(parse_float_prefix(".5"), Some(0.5));
/// assert_eq!(parse_float_prefix("abc"), None);
/// ```
pub fn parse_float_prefix(text: &str) -> Option<f64> {
    let re = regex!(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?");
    let literal = re.find(text.trim())?.as_str();
    let value: f64 = literal.parse().ok()?;
    value.is_finite().then_some(value)
}

/// Format a number the way formula results are displayed and persisted.
///
/// Integers print without a fractional part, other values print the shortest
/// round-trip digits, and magnitudes outside `[1e-6, 1e21)` use exponent form
/// (`1e+21`, `1.5e-7`). Negative zero prints as `0`.
///
/// # Examples
/// ```
/// use formcalc_core::format_number;
///
/// assert_eq!(format_number(15.0), "15");
/// assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
/// assert_eq!(format_number(1e21), "1e+21");
/// assert_eq!(format_number(f64::NAN), "NaN");
/// ```
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let magnitude = value.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let text = format!("{:e}", value);
        return match text.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => text,
        };
    }

    format!("{}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_float_prefix() {
        assert_eq!(parse_float_prefix("10"), Some(10.0));
        assert_eq!(parse_float_prefix(" 3.25 "), Some(3.25));
        assert_eq!(parse_float_prefix("12 kg"), Some(12.0));
        assert_eq!(parse_float_prefix("1e3"), Some(1000.0));
        assert_eq!(parse_float_prefix("5."), Some(5.0));
        assert_eq!(parse_float_prefix("+7"), Some(7.0));
        assert_eq!(parse_float_prefix("1e"), Some(1.0));
    }

    #[test]
    fn test_parse_float_prefix_rejects() {
        assert_eq!(parse_float_prefix(""), None);
        assert_eq!(parse_float_prefix("   "), None);
        assert_eq!(parse_float_prefix("-"), None);
        assert_eq!(parse_float_prefix("Infinity"), None);
        assert_eq!(parse_float_prefix("NaN"), None);
        assert_eq!(parse_float_prefix("1e999"), None);
        assert_eq!(parse_float_prefix("[number:5]"), None);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(-2.5), "-2.5");
        assert_eq!(format_number(10.46), "10.46");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(1.5e21), "1.5e+21");
        assert_eq!(format_number(0.000001), "0.000001");
        assert_eq!(format_number(1.5e-7), "1.5e-7");
        assert_eq!(format_number(f64::INFINITY), "Infinity");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }
}
