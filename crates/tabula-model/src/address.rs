use core::fmt;

use serde::{Deserialize, Serialize};

use crate::cell::{EXCEL_MAX_COLS, EXCEL_MAX_ROWS};

/// A reference to a single cell within a worksheet.
///
/// Rows and columns are **0-indexed**:
/// - `row = 0` is the first row
/// - `col = 0` is the first column
///
/// Ordering is row-major, which is the order cells are stored and emitted in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    /// 0-indexed row.
    pub row: u32,
    /// 0-indexed column.
    pub col: u32,
}

impl CellRef {
    /// Construct a new [`CellRef`].
    #[inline]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Returns true if the coordinate lies inside the sheet grid.
    #[inline]
    pub const fn in_bounds(self) -> bool {
        self.row < EXCEL_MAX_ROWS && self.col < EXCEL_MAX_COLS
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// A rectangular region within a worksheet.
///
/// The range is inclusive and always normalized such that:
/// - `start.row <= end.row`
/// - `start.col <= end.col`
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub start: CellRef,
    pub end: CellRef,
}

impl Range {
    /// Construct a new range, normalizing coordinates if needed.
    pub const fn new(a: CellRef, b: CellRef) -> Self {
        let start_row = if a.row <= b.row { a.row } else { b.row };
        let end_row = if a.row <= b.row { b.row } else { a.row };
        let start_col = if a.col <= b.col { a.col } else { b.col };
        let end_col = if a.col <= b.col { b.col } else { a.col };
        Self {
            start: CellRef::new(start_row, start_col),
            end: CellRef::new(end_row, end_col),
        }
    }

    /// Shorthand for `Range::new(CellRef::new(r1, c1), CellRef::new(r2, c2))`.
    pub const fn from_coords(r1: u32, c1: u32, r2: u32, c2: u32) -> Self {
        Self::new(CellRef::new(r1, c1), CellRef::new(r2, c2))
    }

    /// A range covering exactly one cell.
    pub const fn single(cell: CellRef) -> Self {
        Self {
            start: cell,
            end: cell,
        }
    }

    /// Whole rows `start..=end` across every column.
    pub const fn rows(start: u32, end: u32) -> Self {
        Self::from_coords(start, 0, end, EXCEL_MAX_COLS - 1)
    }

    /// Whole columns `start..=end` across every row.
    pub const fn cols(start: u32, end: u32) -> Self {
        Self::from_coords(0, start, EXCEL_MAX_ROWS - 1, end)
    }

    /// Returns true if `cell` lies within this range.
    #[inline]
    pub const fn contains(&self, cell: CellRef) -> bool {
        cell.row >= self.start.row
            && cell.row <= self.end.row
            && cell.col >= self.start.col
            && cell.col <= self.end.col
    }

    /// Returns true if the two ranges share at least one cell.
    #[inline]
    pub const fn intersects(&self, other: &Range) -> bool {
        self.start.row <= other.end.row
            && other.start.row <= self.end.row
            && self.start.col <= other.end.col
            && other.start.col <= self.end.col
    }

    /// Number of columns in the range.
    #[inline]
    pub const fn width(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    /// Number of rows in the range.
    #[inline]
    pub const fn height(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    /// Returns true if the range is exactly one cell.
    #[inline]
    pub const fn is_single_cell(&self) -> bool {
        self.start.row == self.end.row && self.start.col == self.end.col
    }

    /// Returns true if the range spans every column (a whole-row reference).
    #[inline]
    pub const fn is_full_rows(&self) -> bool {
        self.start.col == 0 && self.end.col == EXCEL_MAX_COLS - 1
    }

    /// Returns true if the range spans every row (a whole-column reference).
    #[inline]
    pub const fn is_full_cols(&self) -> bool {
        self.start.row == 0 && self.end.row == EXCEL_MAX_ROWS - 1
    }

    /// Iterate the cells of the range in row-major order.
    pub fn iter(&self) -> RangeIter {
        RangeIter {
            range: *self,
            next: Some(self.start),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Row-major iterator over a [`Range`].
#[derive(Clone, Debug)]
pub struct RangeIter {
    range: Range,
    next: Option<CellRef>,
}

impl Iterator for RangeIter {
    type Item = CellRef;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = if current.col < self.range.end.col {
            Some(CellRef::new(current.row, current.col + 1))
        } else if current.row < self.range.end.row {
            Some(CellRef::new(current.row + 1, self.range.start.col))
        } else {
            None
        };
        Some(current)
    }
}

/// An inclusive span of row or column indices (used for print titles).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub const fn new(a: u32, b: u32) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }
}

/// A range qualified by the sheet it lives on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SheetRange {
    pub sheet: crate::SheetId,
    pub range: Range,
}

impl SheetRange {
    pub const fn new(sheet: crate::SheetId, range: Range) -> Self {
        Self { sheet, range }
    }
}
