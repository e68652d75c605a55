//! Form definitions
//!
//! A form is stored as a JSON array of elements. Only calculation and table fields
//! take part in recomputation; every other element type is carried through as-is.

use formcalc_core::{CellValue, Error, Result, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One element of a form definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormElement {
    pub id: String,
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default, rename = "extraAttributes")]
    pub extra_attributes: ExtraAttributes,
}

/// Element attributes used by derived fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Calculation formula
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<usize>,
    /// Initial table data, either rows of strings or the JSON text of them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_row_indexes: Option<Vec<usize>>,
    /// Attributes of other element types
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// Role of an element in recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Calculation,
    Table,
    Other,
}

impl FormElement {
    /// Create a calculation field element
    pub fn calculation(id: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            element_type: "CalculationField".to_string(),
            extra_attributes: ExtraAttributes {
                formula: Some(formula.into()),
                ..ExtraAttributes::default()
            },
        }
    }

    /// Create a table field element with initial rows
    pub fn table(id: impl Into<String>, data: &Table) -> Self {
        let (rows, columns) = data.shape();
        Self {
            id: id.into(),
            element_type: "TableField".to_string(),
            extra_attributes: ExtraAttributes {
                rows: Some(rows),
                columns: Some(columns),
                data: serde_json::from_str(&data.to_json()).ok(),
                ..ExtraAttributes::default()
            },
        }
    }

    /// How this element takes part in recomputation
    pub fn kind(&self) -> ElementKind {
        match self.element_type.as_str() {
            "CalculationField" => ElementKind::Calculation,
            "TableField" => ElementKind::Table,
            _ => ElementKind::Other,
        }
    }

    /// Whether the element's value is computed rather than typed
    pub fn is_derived(&self) -> bool {
        self.kind() != ElementKind::Other
    }

    /// The calculation formula, empty when none is configured
    pub fn formula(&self) -> &str {
        self.extra_attributes.formula.as_deref().unwrap_or_default()
    }

    /// Initial raw table from the element's `data` attribute.
    ///
    /// Without data, a blank grid of the configured size is returned.
    pub fn initial_table(&self) -> Result<Table> {
        let attrs = &self.extra_attributes;
        match &attrs.data {
            Some(Value::String(text)) => Table::from_json(text),
            Some(value @ Value::Array(_)) => Table::from_json(&value.to_string()),
            Some(Value::Null) | None => {
                let rows = attrs.rows.unwrap_or(0);
                let columns = attrs.columns.unwrap_or(0);
                Ok(Table::from_rows(vec![vec![CellValue::Empty; columns]; rows]))
            }
            Some(_) => Err(Error::NotATable("non-array data attribute")),
        }
    }
}

/// Parse a form definition (a JSON array of elements)
pub fn parse_form(text: &str) -> Result<Vec<FormElement>> {
    serde_json::from_str(text).map_err(|e| Error::other(format!("Invalid form definition: {}", e)))
}
