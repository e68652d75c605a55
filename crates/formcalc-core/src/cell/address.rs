//! A1-style cell references inside table fields

use lazy_regex::regex_captures;
use std::fmt;

/// Zero-based position of a cell inside a table field.
///
/// Indices are signed: `"A0"` addresses row `-1`, which no table contains. Lookups
/// treat such positions as blank rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellIndex {
    /// Row index (0-based internally, 1-based in display)
    pub row: i64,
    /// Column index (0-based, A=0, B=1, ..., Z=25, AA=26)
    pub col: i64,
}

impl CellIndex {
    /// Create a new cell index
    pub fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }

    /// Parse an A1-style reference, see [`cell_ref_to_indexes`]
    pub fn parse(reference: &str) -> Option<Self> {
        cell_ref_to_indexes(reference)
    }

    /// Row and column as `usize`, or `None` when either is negative
    pub fn to_usize(&self) -> Option<(usize, usize)> {
        Some((usize::try_from(self.row).ok()?, usize::try_from(self.col).ok()?))
    }

    /// Format as A1-style string.
    ///
    /// Returns `None` for positions with no A1 spelling (negative column, row below `0`
    /// which would need a negative row number).
    pub fn to_a1_string(&self) -> Option<String> {
        if self.col < 0 || self.row < -1 {
            return None;
        }
        Some(format!("{}{}", column_to_letters(self.col), self.row + 1))
    }
}

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_a1_string() {
            Some(a1) => f.write_str(&a1),
            None => write!(f, "R{}C{}", self.row, self.col),
        }
    }
}

/// Parse a reference such as `"B3"` into zero-based `(row, col)` indices.
///
/// Letters are case-insensitive and read as a bijective base-26 numeral
/// (A=1 ... Z=26, AA=27). The digit run is a 1-based row number. Returns `None`
/// when the text is not letters followed by digits. Very long letter or digit runs
/// saturate instead of failing; they simply address a cell no table has.
///
/// # Examples
/// ```
/// use formcalc_core::{cell_ref_to_indexes, CellIndex};
///
/// assert_eq!(cell_ref_to_indexes("A1"), Some(CellIndex::new(0, 0)));
/// assert_eq!(cell_ref_to_indexes("ab12"), Some(CellIndex::new(11, 27)));
/// assert_eq!(cell_ref_to_indexes("A0"), Some(CellIndex::new(-1, 0)));
/// assert_eq!(cell_ref_to_indexes("1A"), None);
/// ```
pub fn cell_ref_to_indexes(reference: &str) -> Option<CellIndex> {
    let (_, letters, digits) = regex_captures!(r"^([A-Za-z]+)([0-9]+)$", reference)?;

    let row = digits.bytes().fold(0i64, |acc, b| {
        acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
    });

    Some(CellIndex {
        row: row - 1,
        col: letters_to_column(letters),
    })
}

/// Convert column letters to index (A = 0, Z = 25, AA = 26, etc.)
///
/// The caller guarantees `letters` is non-empty ASCII alphabetic.
pub fn letters_to_column(letters: &str) -> i64 {
    let col = letters.bytes().fold(0i64, |acc, b| {
        let digit = i64::from(b.to_ascii_uppercase() - b'A' + 1);
        acc.saturating_mul(26).saturating_add(digit)
    });
    col - 1
}

/// Convert column index to letters (0 = A, 25 = Z, 26 = AA, etc.)
pub fn column_to_letters(col: i64) -> String {
    let mut result = Vec::new();
    let mut n = col + 1; // 1-based for calculation

    while n > 0 {
        n -= 1;
        result.push((n % 26) as u8 + b'A');
        n /= 26;
    }

    result.reverse();
    String::from_utf8(result).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_column_conversion() {
        assert_eq!(letters_to_column("A"), 0);
        assert_eq!(letters_to_column("Z"), 25);
        assert_eq!(letters_to_column("AA"), 26);
        assert_eq!(letters_to_column("az"), 51);
        assert_eq!(letters_to_column("XFD"), 16383);

        assert_eq!(column_to_letters(0), "A");
        assert_eq!(column_to_letters(25), "Z");
        assert_eq!(column_to_letters(26), "AA");
        assert_eq!(column_to_letters(51), "AZ");
        assert_eq!(column_to_letters(16383), "XFD");
    }

    #[test]
    fn test_parse_references() {
        assert_eq!(cell_ref_to_indexes("A1"), Some(CellIndex::new(0, 0)));
        assert_eq!(cell_ref_to_indexes("C10"), Some(CellIndex::new(9, 2)));
        assert_eq!(cell_ref_to_indexes("aa3"), Some(CellIndex::new(2, 26)));
        assert_eq!(cell_ref_to_indexes("A0"), Some(CellIndex::new(-1, 0)));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(cell_ref_to_indexes(""), None);
        assert_eq!(cell_ref_to_indexes("A"), None);
        assert_eq!(cell_ref_to_indexes("12"), None);
        assert_eq!(cell_ref_to_indexes("A1B"), None);
        assert_eq!(cell_ref_to_indexes("$A$1"), None);
        assert_eq!(cell_ref_to_indexes(" A1"), None);
    }

    #[test]
    fn test_oversized_references_saturate() {
        let idx = cell_ref_to_indexes("ZZZZZZZZZZZZZZZZZZZZ1").unwrap();
        assert_eq!(idx.row, 0);
        assert!(idx.col > 1_000_000);

        let idx = cell_ref_to_indexes("A99999999999999999999999").unwrap();
        assert_eq!(idx.row, i64::MAX - 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(CellIndex::new(0, 0).to_string(), "A1");
        assert_eq!(CellIndex::new(4, 27).to_string(), "AB5");
        assert_eq!(CellIndex::new(-1, 0).to_string(), "A0");
        assert_eq!(CellIndex::new(0, -1).to_string(), "R0C-1");
        assert_eq!(CellIndex::new(-1, 2).to_usize(), None);
    }

    proptest! {
        #[test]
        fn prop_a1_round_trip(row in 0i64..100, col in 0i64..52) {
            let a1 = CellIndex::new(row, col).to_a1_string().unwrap();
            prop_assert_eq!(cell_ref_to_indexes(&a1), Some(CellIndex::new(row, col)));
        }
    }
}
