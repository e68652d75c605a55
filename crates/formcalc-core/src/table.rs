//! Table field grids and their JSON wire format
//!
//! A table field's value is persisted as a JSON array of rows, each row an array of
//! cell strings. Rows may be ragged; addressing outside the stored cells reads blank.

use crate::cell::{CellIndex, CellValue, MergeDirection};
use crate::error::{Error, Result};
use serde_json::Value;

/// The grid of a table field
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    rows: Vec<Vec<CellValue>>,
}

/// Display region declared by a `[merge:...]` cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedRegion {
    /// The cell carrying the merge prefix
    pub anchor: CellIndex,
    /// Number of rows covered, including the anchor row
    pub rows: usize,
    /// Number of columns covered, including the anchor column
    pub cols: usize,
}

impl MergedRegion {
    /// Whether `idx` lies inside this region
    pub fn contains(&self, idx: CellIndex) -> bool {
        let (row, col) = (self.anchor.row, self.anchor.col);
        idx.row >= row
            && idx.col >= col
            && idx.row < row + self.rows as i64
            && idx.col < col + self.cols as i64
    }
}

impl Table {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table from parsed rows
    pub fn from_rows(rows: Vec<Vec<CellValue>>) -> Self {
        Self { rows }
    }

    /// Create a table from raw cell strings
    pub fn from_strings<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|cell| CellValue::parse(cell.as_ref()))
                        .collect()
                })
                .collect(),
        }
    }

    /// Parse the persisted JSON form of a table.
    ///
    /// String cells are parsed as [`CellValue`]s, other scalars are stringified, `null` is
    /// blank and a row that is not an array is an empty row. Fails when the text is not
    /// JSON or not an array.
    ///
    /// # Examples
    /// ```
    /// use formcalc_core::{CellIndex, CellValue, Table};
    ///
    /// let table = Table::from_json(r#"[["a", "=A1"], [1, null]]"#).unwrap();
    /// assert!(table.cell(CellIndex::new(0, 1)).unwrap().is_formula());
    /// assert_eq!(table.cell(CellIndex::new(1, 0)), Some(&CellValue::Text("1".into())));
    /// assert!(Table::from_json("42").is_err());
    /// ```
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let rows = match value {
            Value::Array(rows) => rows,
            other => return Err(Error::NotATable(json_kind(&other))),
        };

        let rows = rows
            .into_iter()
            .map(|row| match row {
                Value::Array(cells) => cells.into_iter().map(json_cell).collect(),
                _ => Vec::new(),
            })
            .collect();

        Ok(Self { rows })
    }

    /// Serialize to the persisted JSON form (an array of arrays of strings)
    pub fn to_json(&self) -> String {
        let rows: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect();
        Value::from(rows).to_string()
    }

    /// Rows of the table
    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    /// `(row count, widest row)`
    pub fn shape(&self) -> (usize, usize) {
        let cols = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        (self.rows.len(), cols)
    }

    /// The cell at `idx`, or `None` when the position holds no stored cell
    pub fn cell(&self, idx: CellIndex) -> Option<&CellValue> {
        let (row, col) = idx.to_usize()?;
        self.rows.get(row)?.get(col)
    }

    /// Replace the cell at `(row, col)`, growing the grid with blank cells as needed
    pub fn set_cell(&mut self, row: usize, col: usize, value: CellValue) {
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            cells.resize_with(col + 1, CellValue::default);
        }
        cells[col] = value;
    }

    /// Positions and formula text of every formula cell, row-major
    pub fn formula_cells(&self) -> impl Iterator<Item = (CellIndex, &str)> + '_ {
        self.rows.iter().enumerate().flat_map(|(r, row)| {
            row.iter().enumerate().filter_map(move |(c, cell)| {
                cell.formula_text()
                    .map(|text| (CellIndex::new(r as i64, c as i64), text))
            })
        })
    }

    /// Whether any cell holds a formula
    pub fn has_formulas(&self) -> bool {
        self.formula_cells().next().is_some()
    }

    /// Display regions declared by `[merge:...]` prefixes.
    ///
    /// Spans are clipped to the declared `rows` x `columns` shape of the field. Spanned
    /// cells stay addressable by formulas; only rendering hides them.
    pub fn merged_regions(&self, rows: usize, columns: usize) -> Vec<MergedRegion> {
        let mut regions = Vec::new();
        for (r, row) in self.rows.iter().enumerate().take(rows) {
            for (c, cell) in row.iter().enumerate().take(columns) {
                if let CellValue::Merge {
                    direction, span, ..
                } = cell
                {
                    let span = *span as usize;
                    let (height, width) = match direction {
                        MergeDirection::Right => (1, (span + 1).min(columns - c)),
                        MergeDirection::Down => ((span + 1).min(rows - r), 1),
                    };
                    regions.push(MergedRegion {
                        anchor: CellIndex::new(r as i64, c as i64),
                        rows: height,
                        cols: width,
                    });
                }
            }
        }
        regions
    }

    /// Whether `idx` is hidden behind another cell's merge region
    pub fn is_covered(&self, idx: CellIndex, rows: usize, columns: usize) -> bool {
        self.merged_regions(rows, columns)
            .iter()
            .any(|region| region.anchor != idx && region.contains(idx))
    }
}

/// Whether `text` is a JSON array, i.e. a table value rather than a scalar field value
pub fn looks_like_table(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('[') && matches!(serde_json::from_str(text), Ok(Value::Array(_)))
}

fn json_cell(value: Value) -> CellValue {
    match value {
        Value::String(s) => CellValue::parse(&s),
        Value::Null => CellValue::Empty,
        other => CellValue::parse(&other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
