//! Row and column insertion/deletion.
//!
//! A structural edit moves everything that lives on the edited sheet's grid (cells, row and
//! column properties, merges, print settings, frozen panes) and rewrites every reference to that
//! sheet (defined names and formulas on any sheet). Edits never fail because content would fall
//! off the grid or because a range loses part of its extent: the affected object is truncated or
//! removed and a [`LossyEdit`] is recorded instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::{CellRef, Range, Span};
use crate::cell::{Cell, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};
use crate::changes::SheetChange;
use crate::error::ModelError;
use crate::formula_rewrite;
use crate::names::{NameScope, NameTarget};
use crate::value::CellValue;
use crate::view::FrozenPane;
use crate::workbook::Workbook;
use crate::SheetId;

/// A row or column insertion/deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuralEdit {
    InsertRows { row: u32, count: u32 },
    DeleteRows { row: u32, count: u32 },
    InsertCols { col: u32, count: u32 },
    DeleteCols { col: u32, count: u32 },
}

/// How a span of indices along the edited axis fared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanShift {
    /// Moved (or grown/shrunk around the edit) with both edges intact.
    Kept(u32, u32),
    /// Lost one of its edges.
    Truncated(u32, u32),
    /// Every index of the span was deleted or pushed off the grid.
    Removed,
}

/// How a rectangular range fared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeShift {
    Kept(Range),
    Truncated(Range),
    Removed,
}

impl StructuralEdit {
    pub fn is_rows(&self) -> bool {
        matches!(
            self,
            StructuralEdit::InsertRows { .. } | StructuralEdit::DeleteRows { .. }
        )
    }

    pub fn is_insert(&self) -> bool {
        matches!(
            self,
            StructuralEdit::InsertRows { .. } | StructuralEdit::InsertCols { .. }
        )
    }

    /// First row/column index touched by the edit.
    pub fn start(&self) -> u32 {
        match *self {
            StructuralEdit::InsertRows { row, .. } | StructuralEdit::DeleteRows { row, .. } => row,
            StructuralEdit::InsertCols { col, .. } | StructuralEdit::DeleteCols { col, .. } => col,
        }
    }

    pub fn count(&self) -> u32 {
        match *self {
            StructuralEdit::InsertRows { count, .. }
            | StructuralEdit::DeleteRows { count, .. }
            | StructuralEdit::InsertCols { count, .. }
            | StructuralEdit::DeleteCols { count, .. } => count,
        }
    }

    /// Grid size along the edited axis.
    pub fn limit(&self) -> u32 {
        if self.is_rows() {
            EXCEL_MAX_ROWS
        } else {
            EXCEL_MAX_COLS
        }
    }

    /// The edit that reverses this one.
    pub fn inverse(&self) -> StructuralEdit {
        match *self {
            StructuralEdit::InsertRows { row, count } => StructuralEdit::DeleteRows { row, count },
            StructuralEdit::DeleteRows { row, count } => StructuralEdit::InsertRows { row, count },
            StructuralEdit::InsertCols { col, count } => StructuralEdit::DeleteCols { col, count },
            StructuralEdit::DeleteCols { col, count } => StructuralEdit::InsertCols { col, count },
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        let (start, count, limit) = (self.start(), self.count(), self.limit());
        let axis = if self.is_rows() { "row" } else { "column" };
        if start >= limit {
            return Err(ModelError::OutOfBounds(format!("{axis} {start}")));
        }
        if !self.is_insert() && u64::from(start) + u64::from(count) > u64::from(limit) {
            return Err(ModelError::OutOfBounds(format!(
                "deleting {count} {axis}(s) at {start}"
            )));
        }
        Ok(())
    }

    /// New position of a single index; `None` when it is deleted or pushed off the grid.
    pub fn shift_index(&self, index: u32) -> Option<u32> {
        let (start, count, limit) = (self.start(), self.count(), self.limit());
        if self.is_insert() {
            if index < start {
                return Some(index);
            }
            let moved = u64::from(index) + u64::from(count);
            (moved < u64::from(limit)).then_some(moved as u32)
        } else if index < start {
            Some(index)
        } else if index - start < count {
            None
        } else {
            Some(index - count)
        }
    }

    /// New extent of the inclusive span `start..=end`.
    ///
    /// A span covering the whole axis is never changed. Insertion strictly inside a span (or at
    /// its last index) grows it; deletion strictly inside shrinks it. Both are lossless.
    pub fn shift_span(&self, start: u32, end: u32) -> SpanShift {
        let limit = self.limit();
        if start == 0 && end == limit - 1 {
            return SpanShift::Kept(start, end);
        }
        let (at, count) = (self.start(), self.count());
        let last = limit - 1;
        if self.is_insert() {
            let push = |i: u32| u64::from(i) + u64::from(count);
            if end < at {
                SpanShift::Kept(start, end)
            } else if start >= at {
                if push(start) > u64::from(last) {
                    SpanShift::Removed
                } else if push(end) > u64::from(last) {
                    SpanShift::Truncated(push(start) as u32, last)
                } else {
                    SpanShift::Kept(push(start) as u32, push(end) as u32)
                }
            } else if push(end) > u64::from(last) {
                SpanShift::Truncated(start, last)
            } else {
                SpanShift::Kept(start, push(end) as u32)
            }
        } else {
            let del_end = at + (count - 1);
            if end < at {
                SpanShift::Kept(start, end)
            } else if start > del_end {
                SpanShift::Kept(start - count, end - count)
            } else if start >= at && end <= del_end {
                SpanShift::Removed
            } else if start < at && end > del_end {
                SpanShift::Kept(start, end - count)
            } else if start < at {
                SpanShift::Truncated(start, at - 1)
            } else {
                SpanShift::Truncated(at, end - count)
            }
        }
    }

    pub fn shift_cell(&self, cell: CellRef) -> Option<CellRef> {
        if self.is_rows() {
            self.shift_index(cell.row).map(|row| CellRef::new(row, cell.col))
        } else {
            self.shift_index(cell.col).map(|col| CellRef::new(cell.row, col))
        }
    }

    pub fn shift_range(&self, range: Range) -> RangeShift {
        let (s, e) = if self.is_rows() {
            (range.start.row, range.end.row)
        } else {
            (range.start.col, range.end.col)
        };
        let rebuild = |s: u32, e: u32| {
            if self.is_rows() {
                Range::from_coords(s, range.start.col, e, range.end.col)
            } else {
                Range::from_coords(range.start.row, s, range.end.row, e)
            }
        };
        match self.shift_span(s, e) {
            SpanShift::Kept(s, e) => RangeShift::Kept(rebuild(s, e)),
            SpanShift::Truncated(s, e) => RangeShift::Truncated(rebuild(s, e)),
            SpanShift::Removed => RangeShift::Removed,
        }
    }
}

/// An edit that could not preserve something exactly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossyEdit {
    /// Sheet the affected object lives on (for names, the sheet the target pointed at).
    pub sheet: SheetId,
    pub kind: LossyEditKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LossyEditKind {
    MergeTruncated { from: Range, to: Range },
    MergeRemoved { range: Range },
    NameTargetTruncated { name: String, from: Range, to: Range },
    NameTargetRemoved { name: String, range: Range },
    /// The name lost its last target and was deleted.
    NameRemoved { name: String },
    /// A formula-valued name now contains `#REF!`.
    NameReferenceInvalidated { name: String },
    FormulaReferenceInvalidated { cell: CellRef, count: usize },
    FormulaRangeTruncated { cell: CellRef, count: usize },
    PrintRangeTruncated { from: Range, to: Range },
    PrintRangeRemoved { range: Range },
    /// Non-empty cells pushed past the last row or column by an insertion.
    CellsShiftedOffSheet { count: usize },
    /// A preserved sheet element (conditional formatting, data validation, ...) was clipped.
    AttachedRangeTruncated { element: String, from: Range, to: Range },
    AttachedRangeRemoved { element: String, range: Range },
    /// A preserved element whose references could not be rewritten was dropped.
    AttachedContentDropped { element: String },
}

/// Outcome of a structural operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditReport {
    pub diagnostics: Vec<LossyEdit>,
    /// Formulas (cells and names) whose text changed.
    pub formulas_rewritten: usize,
}

impl EditReport {
    pub fn is_lossless(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Record a diagnostic and log it.
    pub fn push(&mut self, sheet: SheetId, kind: LossyEditKind) {
        log::warn!("lossy edit on sheet {sheet}: {kind:?}");
        self.diagnostics.push(LossyEdit { sheet, kind });
    }

    pub fn extend(&mut self, other: EditReport) {
        self.diagnostics.extend(other.diagnostics);
        self.formulas_rewritten += other.formulas_rewritten;
    }
}

impl Workbook {
    /// Insert `count` empty rows before row `row` of `sheet`.
    pub fn insert_rows(
        &mut self,
        sheet: SheetId,
        row: u32,
        count: u32,
    ) -> Result<EditReport, ModelError> {
        self.apply_structural_edit(sheet, StructuralEdit::InsertRows { row, count })
    }

    /// Delete rows `row..row + count` of `sheet`.
    pub fn delete_rows(
        &mut self,
        sheet: SheetId,
        row: u32,
        count: u32,
    ) -> Result<EditReport, ModelError> {
        self.apply_structural_edit(sheet, StructuralEdit::DeleteRows { row, count })
    }

    pub fn insert_cols(
        &mut self,
        sheet: SheetId,
        col: u32,
        count: u32,
    ) -> Result<EditReport, ModelError> {
        self.apply_structural_edit(sheet, StructuralEdit::InsertCols { col, count })
    }

    pub fn delete_cols(
        &mut self,
        sheet: SheetId,
        col: u32,
        count: u32,
    ) -> Result<EditReport, ModelError> {
        self.apply_structural_edit(sheet, StructuralEdit::DeleteCols { col, count })
    }

    /// Apply `edit` to `sheet` and every reference to it.
    pub fn apply_structural_edit(
        &mut self,
        sheet: SheetId,
        edit: StructuralEdit,
    ) -> Result<EditReport, ModelError> {
        let sheet_name = self
            .sheet(sheet)
            .ok_or(ModelError::SheetNotFound(sheet))?
            .name()
            .to_string();
        edit.validate()?;
        let mut report = EditReport::default();
        if edit.count() == 0 {
            return Ok(report);
        }
        log::debug!("applying {edit:?} to sheet {sheet_name:?}");

        let ws = self
            .sheet_mut(sheet)
            .ok_or(ModelError::SheetNotFound(sheet))?;

        let cells = std::mem::take(ws.cells_mut());
        let mut off_sheet = 0;
        let mut moved = BTreeMap::new();
        for (at, mut cell) in cells {
            let Some(to) = edit.shift_cell(at) else {
                if edit.is_insert() && !cell.value.is_empty() {
                    off_sheet += 1;
                }
                continue;
            };
            shift_array_range(&mut cell, &edit);
            moved.insert(to, cell);
        }
        *ws.cells_mut() = moved;
        if off_sheet > 0 {
            report.push(sheet, LossyEditKind::CellsShiftedOffSheet { count: off_sheet });
        }

        if edit.is_rows() {
            shift_keys(ws.rows_mut(), &edit);
        } else {
            shift_keys(ws.columns_mut(), &edit);
        }

        let merges: Vec<Range> = ws.merged_regions().iter().copied().collect();
        let mut kept = Vec::with_capacity(merges.len());
        for range in merges {
            match edit.shift_range(range) {
                RangeShift::Kept(to) => kept.push(to),
                RangeShift::Truncated(to) if to.is_single_cell() => {
                    report.push(sheet, LossyEditKind::MergeRemoved { range });
                }
                RangeShift::Truncated(to) => {
                    report.push(sheet, LossyEditKind::MergeTruncated { from: range, to });
                    kept.push(to);
                }
                RangeShift::Removed => {
                    report.push(sheet, LossyEditKind::MergeRemoved { range });
                }
            }
        }
        ws.merges_mut().replace_all(kept);

        if let Some(pane) = *ws.frozen_panes_mut() {
            let shifted = shift_pane(pane, &edit);
            *ws.frozen_panes_mut() = Some(shifted).filter(|p| !p.is_empty());
        }

        let print = ws.print_mut();
        let areas = std::mem::take(&mut print.print_area);
        for range in areas {
            match edit.shift_range(range) {
                RangeShift::Kept(to) => print.print_area.push(to),
                RangeShift::Truncated(to) => {
                    report.push(sheet, LossyEditKind::PrintRangeTruncated { from: range, to });
                    print.print_area.push(to);
                }
                RangeShift::Removed => {
                    report.push(sheet, LossyEditKind::PrintRangeRemoved { range });
                }
            }
        }
        let titles = if edit.is_rows() {
            &mut print.repeat_rows
        } else {
            &mut print.repeat_cols
        };
        if let Some(span) = *titles {
            let as_range = |s: Span| {
                if edit.is_rows() {
                    Range::rows(s.start, s.end)
                } else {
                    Range::cols(s.start, s.end)
                }
            };
            match edit.shift_span(span.start, span.end) {
                SpanShift::Kept(s, e) => *titles = Some(Span::new(s, e)),
                SpanShift::Truncated(s, e) => {
                    *titles = Some(Span::new(s, e));
                    report.push(
                        sheet,
                        LossyEditKind::PrintRangeTruncated {
                            from: as_range(span),
                            to: as_range(Span::new(s, e)),
                        },
                    );
                }
                SpanShift::Removed => {
                    *titles = None;
                    report.push(
                        sheet,
                        LossyEditKind::PrintRangeRemoved {
                            range: as_range(span),
                        },
                    );
                }
            }
        }

        self.shift_defined_names(sheet, &sheet_name, &edit, &mut report);
        self.rewrite_cell_formulas(&sheet_name, &edit, &mut report);
        self.record_change(SheetChange::Edited { sheet, edit });
        Ok(report)
    }

    fn shift_defined_names(
        &mut self,
        sheet: SheetId,
        sheet_name: &str,
        edit: &StructuralEdit,
        report: &mut EditReport,
    ) {
        let scope_names: BTreeMap<SheetId, String> = self
            .sheets()
            .iter()
            .map(|ws| (ws.id(), ws.name().to_string()))
            .collect();
        let mut removed = Vec::new();
        for (idx, name) in self.defined_names_mut().iter_mut().enumerate() {
            match &mut name.target {
                NameTarget::Ranges(targets) => {
                    let before = std::mem::take(targets);
                    for mut target in before {
                        if target.sheet != sheet {
                            targets.push(target);
                            continue;
                        }
                        match edit.shift_range(target.range) {
                            RangeShift::Kept(to) => {
                                target.range = to;
                                targets.push(target);
                            }
                            RangeShift::Truncated(to) => {
                                report.push(
                                    sheet,
                                    LossyEditKind::NameTargetTruncated {
                                        name: name.name.clone(),
                                        from: target.range,
                                        to,
                                    },
                                );
                                target.range = to;
                                targets.push(target);
                            }
                            RangeShift::Removed => report.push(
                                sheet,
                                LossyEditKind::NameTargetRemoved {
                                    name: name.name.clone(),
                                    range: target.range,
                                },
                            ),
                        }
                    }
                    if targets.is_empty() {
                        removed.push(idx);
                    }
                }
                NameTarget::Formula(formula) => {
                    let host = match name.scope {
                        NameScope::Sheet(id) => scope_names.get(&id).map(String::as_str),
                        NameScope::Workbook => None,
                    };
                    let outcome = formula_rewrite::rewrite_for_edit(formula, host, sheet_name, edit);
                    if outcome.changed {
                        report.formulas_rewritten += 1;
                        *formula = outcome.formula;
                    }
                    if outcome.invalidated > 0 {
                        report.push(
                            sheet,
                            LossyEditKind::NameReferenceInvalidated {
                                name: name.name.clone(),
                            },
                        );
                    }
                }
            }
        }
        for idx in removed.into_iter().rev() {
            let name = self.defined_names_mut().remove(idx);
            report.push(sheet, LossyEditKind::NameRemoved { name: name.name });
        }
    }

    fn rewrite_cell_formulas(
        &mut self,
        sheet_name: &str,
        edit: &StructuralEdit,
        report: &mut EditReport,
    ) {
        for ws in self.sheets_mut() {
            let host = ws.name().to_string();
            let id = ws.id();
            for (at, cell) in ws.cells_mut().iter_mut() {
                let CellValue::Formula(formula) = &mut cell.value else {
                    continue;
                };
                let outcome =
                    formula_rewrite::rewrite_for_edit(&formula.expr, Some(&host), sheet_name, edit);
                if !outcome.changed {
                    continue;
                }
                formula.expr = outcome.formula;
                report.formulas_rewritten += 1;
                if outcome.invalidated > 0 {
                    report.push(
                        id,
                        LossyEditKind::FormulaReferenceInvalidated {
                            cell: *at,
                            count: outcome.invalidated,
                        },
                    );
                }
                if outcome.truncated > 0 {
                    report.push(
                        id,
                        LossyEditKind::FormulaRangeTruncated {
                            cell: *at,
                            count: outcome.truncated,
                        },
                    );
                }
            }
        }
    }
}

fn shift_array_range(cell: &mut Cell, edit: &StructuralEdit) {
    if let CellValue::Formula(formula) = &mut cell.value {
        if let Some(range) = formula.array_range {
            formula.array_range = match edit.shift_range(range) {
                RangeShift::Kept(to) | RangeShift::Truncated(to) => Some(to),
                RangeShift::Removed => None,
            };
        }
    }
}

fn shift_keys<V>(map: &mut BTreeMap<u32, V>, edit: &StructuralEdit) {
    let old = std::mem::take(map);
    *map = old
        .into_iter()
        .filter_map(|(k, v)| edit.shift_index(k).map(|k| (k, v)))
        .collect();
}

/// Frozen rows/columns `0..n` grow when rows are inserted inside them and shrink by the number
/// of frozen rows deleted.
fn shift_pane(pane: FrozenPane, edit: &StructuralEdit) -> FrozenPane {
    let frozen = if edit.is_rows() { pane.rows } else { pane.cols };
    let (at, count) = (edit.start(), edit.count());
    let adjusted = if frozen == 0 {
        0
    } else if edit.is_insert() {
        if at < frozen {
            frozen.saturating_add(count).min(edit.limit() - 1)
        } else {
            frozen
        }
    } else {
        let overlap_end = frozen.min(at.saturating_add(count));
        frozen - overlap_end.saturating_sub(at).min(frozen)
    };
    if edit.is_rows() {
        FrozenPane::new(adjusted, pane.cols)
    } else {
        FrozenPane::new(pane.rows, adjusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_grows_spans_containing_the_insertion_point() {
        let edit = StructuralEdit::InsertRows { row: 3, count: 2 };
        assert_eq!(edit.shift_span(0, 2), SpanShift::Kept(0, 2));
        assert_eq!(edit.shift_span(1, 3), SpanShift::Kept(1, 5));
        assert_eq!(edit.shift_span(3, 4), SpanShift::Kept(5, 6));
    }

    #[test]
    fn insert_near_the_grid_edge_truncates() {
        let last = EXCEL_MAX_ROWS - 1;
        let edit = StructuralEdit::InsertRows { row: 0, count: 2 };
        assert_eq!(edit.shift_span(last - 3, last - 1), SpanShift::Truncated(last - 1, last));
        assert_eq!(edit.shift_span(last - 1, last), SpanShift::Removed);
        assert_eq!(edit.shift_index(last), None);
    }

    #[test]
    fn delete_classifies_overlaps() {
        let edit = StructuralEdit::DeleteRows { row: 2, count: 3 };
        assert_eq!(edit.shift_span(0, 1), SpanShift::Kept(0, 1));
        assert_eq!(edit.shift_span(5, 6), SpanShift::Kept(2, 3));
        assert_eq!(edit.shift_span(2, 4), SpanShift::Removed);
        assert_eq!(edit.shift_span(1, 6), SpanShift::Kept(1, 3));
        assert_eq!(edit.shift_span(0, 3), SpanShift::Truncated(0, 1));
        assert_eq!(edit.shift_span(3, 7), SpanShift::Truncated(2, 4));
    }

    #[test]
    fn whole_axis_spans_are_unchanged() {
        let edit = StructuralEdit::DeleteCols { col: 0, count: 5 };
        assert_eq!(
            edit.shift_range(Range::cols(0, EXCEL_MAX_COLS - 1)),
            RangeShift::Kept(Range::cols(0, EXCEL_MAX_COLS - 1))
        );
        assert_eq!(
            edit.shift_range(Range::from_coords(4, 2, 9, 7)),
            RangeShift::Truncated(Range::from_coords(4, 0, 9, 2))
        );
    }

    #[test]
    fn frozen_panes_track_edits() {
        let pane = FrozenPane::new(3, 1);
        assert_eq!(
            shift_pane(pane, &StructuralEdit::InsertRows { row: 1, count: 2 }),
            FrozenPane::new(5, 1)
        );
        assert_eq!(
            shift_pane(pane, &StructuralEdit::InsertRows { row: 3, count: 2 }),
            pane
        );
        assert_eq!(
            shift_pane(pane, &StructuralEdit::DeleteRows { row: 2, count: 4 }),
            FrozenPane::new(2, 1)
        );
        assert_eq!(
            shift_pane(pane, &StructuralEdit::DeleteCols { col: 0, count: 1 }),
            FrozenPane::new(3, 0)
        );
    }

    #[test]
    fn inverse_round_trips() {
        let edit = StructuralEdit::InsertCols { col: 4, count: 2 };
        assert_eq!(edit.inverse().inverse(), edit);
    }
}
