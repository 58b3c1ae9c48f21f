use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::{CellRef, Range, Span};
use crate::cell::{Cell, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};
use crate::error::ModelError;
use crate::merge::MergedRegions;
use crate::print::PrintSettings;
use crate::value::CellValue;
use crate::view::{FrozenPane, SheetVisibility};
use crate::SheetId;

/// Maximum column width in character units.
pub const EXCEL_MAX_COL_WIDTH: f64 = 255.0;
/// Maximum row height in points.
pub const EXCEL_MAX_ROW_HEIGHT: f64 = 409.0;

static EMPTY: CellValue = CellValue::Empty;

/// Column formatting overrides.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnProps {
    /// Width in character units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default)]
    pub hidden: bool,
    /// Default style for empty cells in the column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_id: Option<u32>,
}

impl ColumnProps {
    pub fn is_default(&self) -> bool {
        self.width.is_none() && !self.hidden && self.style_id.is_none()
    }
}

/// Row formatting overrides.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RowProps {
    /// Height in points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default)]
    pub hidden: bool,
    /// Default style for empty cells in the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_id: Option<u32>,
}

impl RowProps {
    pub fn is_default(&self) -> bool {
        self.height.is_none() && !self.hidden && self.style_id.is_none()
    }
}

/// A worksheet owned by a [`crate::Workbook`].
///
/// Reads are public; writes that involve workbook tables (values, styles, merges) go through the
/// workbook so style and string references can be validated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Worksheet {
    id: SheetId,
    name: String,
    #[serde(default)]
    visibility: SheetVisibility,
    #[serde(with = "cell_entries")]
    cells: BTreeMap<CellRef, Cell>,
    #[serde(default)]
    merges: MergedRegions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    frozen_panes: Option<FrozenPane>,
    #[serde(default)]
    columns: BTreeMap<u32, ColumnProps>,
    #[serde(default)]
    rows: BTreeMap<u32, RowProps>,
    #[serde(default)]
    print: PrintSettings,
}

impl Worksheet {
    pub(crate) fn new(id: SheetId, name: String) -> Self {
        Self {
            id,
            name,
            visibility: SheetVisibility::Visible,
            cells: BTreeMap::new(),
            merges: MergedRegions::new(),
            frozen_panes: None,
            columns: BTreeMap::new(),
            rows: BTreeMap::new(),
            print: PrintSettings::default(),
        }
    }

    pub fn id(&self) -> SheetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_id(&mut self, id: SheetId) {
        self.id = id;
    }

    pub fn visibility(&self) -> SheetVisibility {
        self.visibility
    }

    pub fn set_visibility(&mut self, visibility: SheetVisibility) {
        self.visibility = visibility;
    }

    pub fn cell(&self, cell: CellRef) -> Option<&Cell> {
        self.cells.get(&cell)
    }

    /// Value at `cell`; unset cells read as [`CellValue::Empty`].
    pub fn value(&self, cell: CellRef) -> &CellValue {
        self.cells.get(&cell).map(|c| &c.value).unwrap_or(&EMPTY)
    }

    pub fn style_id(&self, cell: CellRef) -> u32 {
        self.cells.get(&cell).map(|c| c.style_id).unwrap_or(0)
    }

    /// Stored cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (CellRef, &Cell)> {
        self.cells.iter().map(|(k, v)| (*k, v))
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Smallest range covering every stored cell and merge.
    pub fn used_range(&self) -> Option<Range> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        let cells = self.cells.keys().map(|c| Range::single(*c));
        for r in cells.chain(self.merges.iter().copied()) {
            bounds = Some(match bounds {
                None => (r.start.row, r.start.col, r.end.row, r.end.col),
                Some((r1, c1, r2, c2)) => (
                    r1.min(r.start.row),
                    c1.min(r.start.col),
                    r2.max(r.end.row),
                    c2.max(r.end.col),
                ),
            });
        }
        bounds.map(|(r1, c1, r2, c2)| Range::from_coords(r1, c1, r2, c2))
    }

    pub fn merged_regions(&self) -> &MergedRegions {
        &self.merges
    }

    pub fn merge_containing(&self, cell: CellRef) -> Option<Range> {
        self.merges.containing(cell)
    }

    pub fn frozen_panes(&self) -> Option<FrozenPane> {
        self.frozen_panes
    }

    /// Freeze the first `rows` rows and `cols` columns; `None` (or `0, 0`) unfreezes.
    pub fn set_frozen_panes(&mut self, pane: Option<FrozenPane>) -> Result<(), ModelError> {
        if let Some(p) = pane {
            if p.rows >= EXCEL_MAX_ROWS || p.cols >= EXCEL_MAX_COLS {
                return Err(ModelError::OutOfBounds(format!(
                    "frozen pane {} rows x {} cols",
                    p.rows, p.cols
                )));
            }
        }
        self.frozen_panes = pane.filter(|p| !p.is_empty());
        Ok(())
    }

    pub fn column(&self, col: u32) -> Option<&ColumnProps> {
        self.columns.get(&col)
    }

    pub fn columns(&self) -> impl Iterator<Item = (u32, &ColumnProps)> {
        self.columns.iter().map(|(k, v)| (*k, v))
    }

    pub fn column_width(&self, col: u32) -> Option<f64> {
        self.columns.get(&col).and_then(|c| c.width)
    }

    pub fn set_column_width(&mut self, col: u32, width: Option<f64>) -> Result<(), ModelError> {
        check_col(col)?;
        if let Some(w) = width {
            if !(0.0..=EXCEL_MAX_COL_WIDTH).contains(&w) {
                return Err(ModelError::OutOfBounds(format!("column width {w}")));
            }
        }
        self.update_column(col, |c| c.width = width);
        Ok(())
    }

    pub fn set_column_hidden(&mut self, col: u32, hidden: bool) -> Result<(), ModelError> {
        check_col(col)?;
        self.update_column(col, |c| c.hidden = hidden);
        Ok(())
    }

    pub(crate) fn set_column_style(&mut self, col: u32, style_id: Option<u32>) {
        self.update_column(col, |c| c.style_id = style_id);
    }

    fn update_column(&mut self, col: u32, f: impl FnOnce(&mut ColumnProps)) {
        let props = self.columns.entry(col).or_default();
        f(props);
        if props.is_default() {
            self.columns.remove(&col);
        }
    }

    pub fn row(&self, row: u32) -> Option<&RowProps> {
        self.rows.get(&row)
    }

    pub fn rows(&self) -> impl Iterator<Item = (u32, &RowProps)> {
        self.rows.iter().map(|(k, v)| (*k, v))
    }

    pub fn row_height(&self, row: u32) -> Option<f64> {
        self.rows.get(&row).and_then(|r| r.height)
    }

    pub fn set_row_height(&mut self, row: u32, height: Option<f64>) -> Result<(), ModelError> {
        check_row(row)?;
        if let Some(h) = height {
            if !(0.0..=EXCEL_MAX_ROW_HEIGHT).contains(&h) {
                return Err(ModelError::OutOfBounds(format!("row height {h}")));
            }
        }
        self.update_row(row, |r| r.height = height);
        Ok(())
    }

    pub fn set_row_hidden(&mut self, row: u32, hidden: bool) -> Result<(), ModelError> {
        check_row(row)?;
        self.update_row(row, |r| r.hidden = hidden);
        Ok(())
    }

    pub(crate) fn set_row_style(&mut self, row: u32, style_id: Option<u32>) {
        self.update_row(row, |r| r.style_id = style_id);
    }

    fn update_row(&mut self, row: u32, f: impl FnOnce(&mut RowProps)) {
        let props = self.rows.entry(row).or_default();
        f(props);
        if props.is_default() {
            self.rows.remove(&row);
        }
    }

    pub fn print_settings(&self) -> &PrintSettings {
        &self.print
    }

    pub fn set_print_area(&mut self, areas: Vec<Range>) -> Result<(), ModelError> {
        if let Some(bad) = areas.iter().find(|r| !r.end.in_bounds()) {
            return Err(ModelError::OutOfBounds(format!("print area {bad}")));
        }
        self.print.print_area = areas;
        Ok(())
    }

    pub fn set_print_titles(
        &mut self,
        rows: Option<Span>,
        cols: Option<Span>,
    ) -> Result<(), ModelError> {
        if rows.is_some_and(|r| r.end >= EXCEL_MAX_ROWS) || cols.is_some_and(|c| c.end >= EXCEL_MAX_COLS)
        {
            return Err(ModelError::OutOfBounds("print titles".to_string()));
        }
        self.print.repeat_rows = rows;
        self.print.repeat_cols = cols;
        Ok(())
    }

    /// Fails if `cell` is a non-anchor member of a merge.
    pub fn check_writable(&self, cell: CellRef) -> Result<(), ModelError> {
        match self.merges.containing(cell) {
            Some(range) if range.start != cell => Err(ModelError::MergedCellWriteConflict {
                cell,
                anchor: range.start,
            }),
            _ => Ok(()),
        }
    }

    /// Store `cell` as-is. Callers validate table references and merge membership.
    pub(crate) fn put_cell(&mut self, at: CellRef, cell: Cell) {
        if cell.is_truly_empty() {
            self.cells.remove(&at);
        } else {
            self.cells.insert(at, cell);
        }
    }

    pub(crate) fn take_cell(&mut self, at: CellRef) -> Option<Cell> {
        self.cells.remove(&at)
    }

    /// Add a merge and clear the values of its non-anchor cells (their styles are kept).
    pub(crate) fn merge(&mut self, range: Range) -> Result<usize, ModelError> {
        self.merges.add(range)?;
        let covered: Vec<CellRef> = self
            .cells
            .range(range.start..=range.end)
            .map(|(k, _)| *k)
            .filter(|k| range.contains(*k) && *k != range.start)
            .collect();
        let mut cleared = 0;
        for at in covered {
            if let Some(mut cell) = self.cells.remove(&at) {
                if !cell.value.is_empty() {
                    cleared += 1;
                    cell.value = CellValue::Empty;
                }
                self.put_cell(at, cell);
            }
        }
        if cleared > 0 {
            log::warn!(
                "merging {range} on sheet {:?} discarded {cleared} non-anchor value(s)",
                self.name
            );
        }
        Ok(cleared)
    }

    pub(crate) fn unmerge(&mut self, range: &Range) -> bool {
        self.merges.remove(range)
    }

    pub(crate) fn cells_mut(&mut self) -> &mut BTreeMap<CellRef, Cell> {
        &mut self.cells
    }

    pub(crate) fn merges_mut(&mut self) -> &mut MergedRegions {
        &mut self.merges
    }

    pub(crate) fn columns_mut(&mut self) -> &mut BTreeMap<u32, ColumnProps> {
        &mut self.columns
    }

    pub(crate) fn rows_mut(&mut self) -> &mut BTreeMap<u32, RowProps> {
        &mut self.rows
    }

    pub(crate) fn print_mut(&mut self) -> &mut PrintSettings {
        &mut self.print
    }

    pub(crate) fn frozen_panes_mut(&mut self) -> &mut Option<FrozenPane> {
        &mut self.frozen_panes
    }
}

fn check_row(row: u32) -> Result<(), ModelError> {
    if row >= EXCEL_MAX_ROWS {
        return Err(ModelError::OutOfBounds(format!("row {row}")));
    }
    Ok(())
}

fn check_col(col: u32) -> Result<(), ModelError> {
    if col >= EXCEL_MAX_COLS {
        return Err(ModelError::OutOfBounds(format!("column {col}")));
    }
    Ok(())
}

/// Cells serialize as a list of `(coordinate, cell)` pairs so the model stays JSON friendly.
mod cell_entries {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::address::CellRef;
    use crate::cell::Cell;

    #[derive(Serialize, Deserialize)]
    struct Entry<C> {
        at: CellRef,
        cell: C,
    }

    pub fn serialize<S: Serializer>(
        cells: &BTreeMap<CellRef, Cell>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(cells.iter().map(|(at, cell)| Entry { at: *at, cell }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<CellRef, Cell>, D::Error> {
        let entries = Vec::<Entry<Cell>>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|e| (e.at, e.cell)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_cells_read_as_empty() {
        let sheet = Worksheet::new(1, "Sheet1".into());
        assert_eq!(sheet.value(CellRef::new(10, 10)), &CellValue::Empty);
        assert_eq!(sheet.used_range(), None);
    }

    #[test]
    fn merge_clears_non_anchor_values_but_keeps_styles() {
        let mut sheet = Worksheet::new(1, "Sheet1".into());
        sheet.put_cell(CellRef::new(0, 0), Cell::new(CellValue::Number(1.0)));
        sheet.put_cell(CellRef::new(0, 1), Cell::with_style(CellValue::Number(2.0), 3));
        sheet.put_cell(CellRef::new(0, 2), Cell::new(CellValue::Number(3.0)));

        let cleared = sheet.merge(Range::from_coords(0, 0, 0, 1)).unwrap();
        assert_eq!(cleared, 1);
        assert_eq!(sheet.value(CellRef::new(0, 0)), &CellValue::Number(1.0));
        assert_eq!(sheet.value(CellRef::new(0, 1)), &CellValue::Empty);
        assert_eq!(sheet.style_id(CellRef::new(0, 1)), 3);
        assert_eq!(sheet.value(CellRef::new(0, 2)), &CellValue::Number(3.0));
    }

    #[test]
    fn non_anchor_cells_are_not_writable() {
        let mut sheet = Worksheet::new(1, "Sheet1".into());
        sheet.merge(Range::from_coords(1, 0, 1, 2)).unwrap();
        assert!(sheet.check_writable(CellRef::new(1, 0)).is_ok());
        assert_eq!(
            sheet.check_writable(CellRef::new(1, 2)),
            Err(ModelError::MergedCellWriteConflict {
                cell: CellRef::new(1, 2),
                anchor: CellRef::new(1, 0),
            })
        );
    }

    #[test]
    fn default_props_are_not_stored() {
        let mut sheet = Worksheet::new(1, "Sheet1".into());
        sheet.set_column_width(2, Some(20.0)).unwrap();
        assert_eq!(sheet.column_width(2), Some(20.0));
        sheet.set_column_width(2, None).unwrap();
        assert!(sheet.column(2).is_none());
        assert!(sheet.set_row_height(0, Some(500.0)).is_err());
    }

    #[test]
    fn used_range_includes_merges() {
        let mut sheet = Worksheet::new(1, "Sheet1".into());
        sheet.put_cell(CellRef::new(2, 1), Cell::new(CellValue::Boolean(true)));
        sheet.merge(Range::from_coords(4, 0, 5, 3)).unwrap();
        assert_eq!(sheet.used_range(), Some(Range::from_coords(2, 0, 5, 3)));
    }

    #[test]
    fn serializes_to_json_and_back() {
        let mut sheet = Worksheet::new(7, "Data".into());
        sheet.put_cell(CellRef::new(0, 0), Cell::new(CellValue::Number(1.5)));
        sheet.set_row_height(0, Some(30.0)).unwrap();
        let json = serde_json::to_string(&sheet).unwrap();
        let back: Worksheet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sheet);
    }
}
