//! Numeric decoding of raw field and cell text

use super::value::CellValue;

/// Decode the raw text of a field or cell into the number a formula sees.
///
/// Accepts `&str` or `Option<&str>` (a missing value). The result is always finite:
/// - missing, empty or whitespace-only text is `0`
/// - an unevaluated formula (`=...`) is `0`
/// - `[number:<n>]` is `n` when `n` parses, otherwise `0`
/// - any other bracketed tag (date, checkbox, select, camera, image, merge) is `0`
/// - other text is its leading decimal literal, or `0` when there is none
///
/// # Examples
/// ```
/// use formcalc_core::cell_numeric_value;
///
/// assert_eq!(cell_numeric_value("[number:5]"), 5.0);
/// assert_eq!(cell_numeric_value(" 10 "), 10.0);
/// assert_eq!(cell_numeric_value("[checkbox:true]"), 0.0);
/// assert_eq!(cell_numeric_value(None), 0.0);
/// ```
pub fn cell_numeric_value<'a>(raw: impl Into<Option<&'a str>>) -> f64 {
    match raw.into() {
        Some(raw) => CellValue::parse(raw.trim()).numeric_value(),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_blank_values() {
        assert_eq!(cell_numeric_value(""), 0.0);
        assert_eq!(cell_numeric_value("   "), 0.0);
        assert_eq!(cell_numeric_value(None), 0.0);
    }

    #[test]
    fn test_formula_text_is_zero() {
        assert_eq!(cell_numeric_value("=1+2"), 0.0);
        assert_eq!(cell_numeric_value(" =5"), 0.0);
    }

    #[test]
    fn test_tagged_values() {
        assert_eq!(cell_numeric_value("[number:42]"), 42.0);
        assert_eq!(cell_numeric_value(" [number:-1.25] "), -1.25);
        assert_eq!(cell_numeric_value("[number:]"), 0.0);
        assert_eq!(cell_numeric_value("[number:Infinity]"), 0.0);
        assert_eq!(cell_numeric_value("[date:2024-05-01]"), 0.0);
        assert_eq!(cell_numeric_value("[select:\"3\":[\"3\"]]"), 0.0);
        assert_eq!(cell_numeric_value("[camera]"), 0.0);
        assert_eq!(cell_numeric_value("[merge:down:1]9"), 0.0);
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(cell_numeric_value("3.5"), 3.5);
        assert_eq!(cell_numeric_value("-7"), -7.0);
        assert_eq!(cell_numeric_value("20%"), 20.0);
        assert_eq!(cell_numeric_value("abc"), 0.0);
        assert_eq!(cell_numeric_value("CIRC"), 0.0);
    }

    proptest! {
        #[test]
        fn prop_decoder_is_total_and_finite(raw in any::<String>()) {
            prop_assert!(cell_numeric_value(raw.as_str()).is_finite());
        }

        #[test]
        fn prop_number_tags_decode_their_payload(n in -1.0e12f64..1.0e12) {
            let raw = CellValue::number(n).to_string();
            prop_assert_eq!(cell_numeric_value(raw.as_str()), n);
        }
    }
}
