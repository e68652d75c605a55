//! Tagged table cell values
//!
//! Table cells persist as plain strings. Bracketed prefixes such as `[number:5]` or
//! `[merge:right:2]` carry a type hint for the editing surface and the renderers.
//! [`CellValue`] is the parsed form; parsing and [`fmt::Display`] are exact inverses,
//! so a cell read from storage writes back byte-for-byte.

use crate::number::{format_number, parse_float_prefix};
use chrono::NaiveDate;
use lazy_regex::regex_captures;
use std::fmt;

/// State carried by a `[checkbox:...]` cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CheckboxState {
    Checked,
    Unchecked,
    Neutral,
}

impl CheckboxState {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "true" => Some(CheckboxState::Checked),
            "false" => Some(CheckboxState::Unchecked),
            "neutral" => Some(CheckboxState::Neutral),
            _ => None,
        }
    }

    fn as_tag(&self) -> &'static str {
        match self {
            CheckboxState::Checked => "true",
            CheckboxState::Unchecked => "false",
            CheckboxState::Neutral => "neutral",
        }
    }
}

/// Direction a merged cell extends in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MergeDirection {
    Right,
    Down,
}

impl MergeDirection {
    fn as_tag(&self) -> &'static str {
        match self {
            MergeDirection::Right => "right",
            MergeDirection::Down => "down",
        }
    }
}

/// The value stored in a table cell
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CellValue {
    /// Empty cell
    Empty,

    /// Plain literal text (including plain numerals)
    Text(String),

    /// Unevaluated formula, stored exactly as typed (e.g. `"=A1+B1"`)
    Formula(String),

    /// `[number:<payload>]` - a number entered through a number input
    Number { payload: String },

    /// `[date:<iso>]`
    Date { payload: String },

    /// `[checkbox]` (no state chosen yet) or `[checkbox:true|false|neutral]`
    Checkbox(Option<CheckboxState>),

    /// `[select:"<selected>":<options>]` where options is a JSON list
    Select { selected: String, options: String },

    /// `[camera]` - a photo has been requested but not taken
    Camera,

    /// `[image:<data>]` - captured image, usually a data URL
    Image { payload: String },

    /// `[merge:right:<n>]` / `[merge:down:<n>]` prefix followed by the cell content
    Merge {
        direction: MergeDirection,
        span: u32,
        content: Box<CellValue>,
    },

    /// Any other bracketed marker (`[PASS]`, `[FAIL]`, ...), kept verbatim
    Tag(String),
}

impl CellValue {
    /// Parse the persisted text of a cell
    ///
    /// # Examples
    /// ```
    /// use formcalc_core::{CellValue, CheckboxState};
    ///
    /// assert_eq!(CellValue::parse("[checkbox:true]"), CellValue::Checkbox(Some(CheckboxState::Checked)));
    /// assert!(CellValue::parse("=A1*2").is_formula());
    /// assert_eq!(CellValue::parse("[number:4]").to_string(), "[number:4]");
    /// ```
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return CellValue::Empty;
        }
        if raw.starts_with('=') {
            return CellValue::Formula(raw.to_string());
        }
        if raw.starts_with('[') {
            return Self::parse_tagged(raw);
        }
        CellValue::Text(raw.to_string())
    }

    fn parse_tagged(raw: &str) -> Self {
        if let Some((_, direction, span, rest)) =
            regex_captures!(r"^\[merge:(right|down):(0|[1-9][0-9]*)\](.*)$"s, raw)
        {
            if let Ok(span) = span.parse::<u32>() {
                let direction = if direction == "right" {
                    MergeDirection::Right
                } else {
                    MergeDirection::Down
                };
                return CellValue::Merge {
                    direction,
                    span,
                    content: Box::new(CellValue::parse(rest)),
                };
            }
        }

        if let Some((_, payload)) = regex_captures!(r"^\[number:(.*)\]$"s, raw) {
            return CellValue::Number {
                payload: payload.to_string(),
            };
        }
        if let Some((_, payload)) = regex_captures!(r"^\[date:(.*)\]$"s, raw) {
            return CellValue::Date {
                payload: payload.to_string(),
            };
        }
        if raw == "[checkbox]" {
            return CellValue::Checkbox(None);
        }
        if let Some((_, state)) = regex_captures!(r"^\[checkbox:(true|false|neutral)\]$", raw) {
            return CellValue::Checkbox(CheckboxState::from_tag(state));
        }
        if let Some((_, selected, options)) = regex_captures!(r#"^\[select:"(.*?)":(.*)\]$"#s, raw)
        {
            return CellValue::Select {
                selected: selected.to_string(),
                options: options.to_string(),
            };
        }
        if raw == "[camera]" {
            return CellValue::Camera;
        }
        if let Some((_, payload)) = regex_captures!(r"^\[image:(.*)\]$"s, raw) {
            return CellValue::Image {
                payload: payload.to_string(),
            };
        }

        CellValue::Tag(raw.to_string())
    }

    /// A `[number:<n>]` cell holding `value`
    pub fn number(value: f64) -> Self {
        CellValue::Number {
            payload: format_number(value),
        }
    }

    /// A `[checkbox:...]` cell in the given state
    pub fn checkbox(state: CheckboxState) -> Self {
        CellValue::Checkbox(Some(state))
    }

    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Check if the cell contains a formula
    pub fn is_formula(&self) -> bool {
        matches!(self, CellValue::Formula(_))
    }

    /// Get the formula text if this is a formula cell
    pub fn formula_text(&self) -> Option<&str> {
        match self {
            CellValue::Formula(text) => Some(text.trim()),
            _ => None,
        }
    }

    /// Numeric value used when the cell is referenced from a formula.
    ///
    /// Total: anything without a numeric meaning (blank, formula text, date, checkbox,
    /// select, camera, image, merge, unknown tag, non-numeric text) is `0`, and the result
    /// is always finite.
    pub fn numeric_value(&self) -> f64 {
        match self {
            CellValue::Text(text) => parse_float_prefix(text).unwrap_or(0.0),
            CellValue::Number { payload } => parse_float_prefix(payload).unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// The options list of a select cell, parsed from its JSON text
    pub fn select_options(&self) -> Option<Vec<String>> {
        match self {
            CellValue::Select { options, .. } => serde_json::from_str(options).ok(),
            _ => None,
        }
    }

    /// Human-readable text for table and document renderers
    ///
    /// # Examples
    /// ```
    /// use formcalc_core::CellValue;
    ///
    /// assert_eq!(CellValue::parse("[date:2024-03-07]").display_text(), "07.03.2024");
    /// assert_eq!(CellValue::parse("[checkbox:false]").display_text(), "✖");
    /// assert_eq!(CellValue::parse(r#"[select:"B":["A","B"]]"#).display_text(), "B");
    /// ```
    pub fn display_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(text) | CellValue::Formula(text) => text.clone(),
            CellValue::Number { payload } => payload.clone(),
            CellValue::Date { payload } => format_date(payload).unwrap_or_else(|| "-".into()),
            CellValue::Checkbox(Some(CheckboxState::Checked)) => "✔".into(),
            CellValue::Checkbox(Some(CheckboxState::Unchecked)) => "✖".into(),
            CellValue::Checkbox(_) => "-".into(),
            CellValue::Select { selected, .. } if selected.is_empty() => "-".into(),
            CellValue::Select { selected, .. } => selected.clone(),
            CellValue::Camera => "No picture was taken".into(),
            CellValue::Image { .. } => "[image]".into(),
            CellValue::Merge { content, .. } => content.display_text(),
            CellValue::Tag(tag) => match tag.as_str() {
                "[PASS]" => "PASS".into(),
                "[FAIL]" => "FAIL".into(),
                _ => tag.clone(),
            },
        }
    }
}

/// Render an ISO date payload as `dd.mm.yyyy`
fn format_date(payload: &str) -> Option<String> {
    let date_part = payload.get(..10).unwrap_or(payload);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some(date.format("%d.%m.%Y").to_string())
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(text) | CellValue::Formula(text) | CellValue::Tag(text) => {
                f.write_str(text)
            }
            CellValue::Number { payload } => write!(f, "[number:{}]", payload),
            CellValue::Date { payload } => write!(f, "[date:{}]", payload),
            CellValue::Checkbox(None) => f.write_str("[checkbox]"),
            CellValue::Checkbox(Some(state)) => write!(f, "[checkbox:{}]", state.as_tag()),
            CellValue::Select { selected, options } => {
                write!(f, "[select:\"{}\":{}]", selected, options)
            }
            CellValue::Camera => f.write_str("[camera]"),
            CellValue::Image { payload } => write!(f, "[image:{}]", payload),
            CellValue::Merge {
                direction,
                span,
                content,
            } => write!(f, "[merge:{}:{}]{}", direction.as_tag(), span, content),
        }
    }
}

impl From<&str> for CellValue {
    fn from(raw: &str) -> Self {
        CellValue::parse(raw)
    }
}

impl From<String> for CellValue {
    fn from(raw: String) -> Self {
        CellValue::parse(&raw)
    }
}
