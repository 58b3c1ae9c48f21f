use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tabula_model::{
    CellRef, CellValue, DefinedName, Formula, FrozenPane, LossyEditKind, NameScope, NameTarget,
    Range, SheetChange, SheetId, SheetRange, Span, StructuralEdit, Workbook,
};

fn ten_rows() -> (Workbook, SheetId) {
    let mut wb = Workbook::new();
    let s = wb.add_sheet("Data").unwrap();
    for row in 0..10 {
        wb.set(s, CellRef::new(row, 0), f64::from(row)).unwrap();
        wb.set_string(s, CellRef::new(row, 1), format!("row {row}").as_str())
            .unwrap();
    }
    (wb, s)
}

#[test]
fn deleting_rows_moves_later_rows_up() {
    let (mut wb, s) = ten_rows();
    let report = wb.delete_rows(s, 2, 3).unwrap();
    assert!(report.is_lossless());

    assert_eq!(wb.get(s, CellRef::new(2, 0)).unwrap(), &CellValue::Number(5.0));
    assert_eq!(
        wb.text(s, CellRef::new(2, 1)).unwrap().as_deref(),
        Some("row 5")
    );
    assert_eq!(wb.get(s, CellRef::new(1, 0)).unwrap(), &CellValue::Number(1.0));
    assert_eq!(wb.get(s, CellRef::new(6, 0)).unwrap(), &CellValue::Number(9.0));
    assert_eq!(wb.get(s, CellRef::new(7, 0)).unwrap(), &CellValue::Empty);
}

#[test]
fn insert_rows_shifts_merges_names_print_and_panes() {
    let (mut wb, s) = ten_rows();
    let sheet = wb.sheet_mut(s).unwrap();
    sheet.set_frozen_panes(Some(FrozenPane::new(3, 0))).unwrap();
    sheet.set_row_height(4, Some(30.0)).unwrap();
    sheet.set_print_area(vec![Range::from_coords(0, 0, 9, 1)]).unwrap();
    sheet.set_print_titles(Some(Span::new(0, 0)), None).unwrap();
    wb.merge(s, Range::from_coords(4, 2, 5, 3)).unwrap();
    wb.add_defined_name(DefinedName::ranges(
        "Body",
        vec![SheetRange::new(s, Range::from_coords(1, 0, 9, 0))],
    ))
    .unwrap();

    let report = wb.insert_rows(s, 2, 2).unwrap();
    assert!(report.is_lossless());

    let sheet = wb.sheet(s).unwrap();
    assert_eq!(sheet.frozen_panes(), Some(FrozenPane::new(5, 0)));
    assert_eq!(sheet.row_height(6), Some(30.0));
    assert_eq!(sheet.row_height(4), None);
    assert_eq!(
        sheet.print_settings().print_area,
        vec![Range::from_coords(0, 0, 11, 1)]
    );
    assert_eq!(sheet.print_settings().repeat_rows, Some(Span::new(0, 0)));
    assert_eq!(
        sheet.merged_regions().iter().copied().collect::<Vec<_>>(),
        vec![Range::from_coords(6, 2, 7, 3)]
    );
    assert_eq!(
        wb.defined_name("Body", NameScope::Workbook).unwrap().target,
        NameTarget::Ranges(vec![SheetRange::new(s, Range::from_coords(1, 0, 11, 0))])
    );
    assert_eq!(wb.get(s, CellRef::new(2, 0)).unwrap(), &CellValue::Empty);
    assert_eq!(wb.get(s, CellRef::new(4, 0)).unwrap(), &CellValue::Number(2.0));
}

#[test]
fn formulas_on_other_sheets_follow_the_edit() {
    let (mut wb, s) = ten_rows();
    let summary = wb.add_sheet("Summary").unwrap();
    wb.set(summary, CellRef::new(0, 0), Formula::new("SUM(Data!A1:A10)"))
        .unwrap();
    wb.set(summary, CellRef::new(1, 0), Formula::new("Data!A4*2"))
        .unwrap();
    wb.set(summary, CellRef::new(2, 0), Formula::new("A4"))
        .unwrap();

    let report = wb.delete_rows(s, 3, 1).unwrap();
    let formula = |row| {
        wb.get(summary, CellRef::new(row, 0))
            .unwrap()
            .as_formula()
            .unwrap()
            .expr
            .clone()
    };
    assert_eq!(formula(0), "SUM(Data!A1:A9)");
    assert_eq!(formula(1), "Data!#REF!*2");
    assert_eq!(formula(2), "A4");
    assert_eq!(report.formulas_rewritten, 2);
    assert!(report.diagnostics.iter().any(|d| matches!(
        d.kind,
        LossyEditKind::FormulaReferenceInvalidated { cell, .. } if cell == CellRef::new(1, 0)
    )));
}

#[test]
fn partial_overlaps_truncate_and_report() {
    let (mut wb, s) = ten_rows();
    wb.merge(s, Range::from_coords(1, 3, 3, 3)).unwrap();
    wb.merge(s, Range::from_coords(5, 3, 6, 3)).unwrap();
    wb.add_defined_name(DefinedName::ranges(
        "Gone",
        vec![SheetRange::new(s, Range::from_coords(3, 0, 4, 0))],
    ))
    .unwrap();

    let report = wb.delete_rows(s, 3, 3).unwrap();
    let merges: Vec<Range> = wb.sheet(s).unwrap().merged_regions().iter().copied().collect();
    assert_eq!(merges, vec![Range::from_coords(1, 3, 2, 3)]);
    assert!(wb.defined_names().is_empty());

    let kinds: Vec<&LossyEditKind> = report.diagnostics.iter().map(|d| &d.kind).collect();
    assert!(kinds.contains(&&LossyEditKind::MergeTruncated {
        from: Range::from_coords(1, 3, 3, 3),
        to: Range::from_coords(1, 3, 2, 3),
    }));
    assert!(kinds.contains(&&LossyEditKind::MergeRemoved {
        range: Range::from_coords(5, 3, 6, 3),
    }));
    assert!(kinds.contains(&&LossyEditKind::NameRemoved {
        name: "Gone".to_string()
    }));
}

#[test]
fn inserting_past_the_last_row_drops_content_with_a_diagnostic() {
    let mut wb = Workbook::new();
    let s = wb.add_sheet("Edge").unwrap();
    let last = tabula_model::EXCEL_MAX_ROWS - 1;
    wb.set(s, CellRef::new(last, 0), 1.0).unwrap();

    let report = wb.insert_rows(s, 0, 1).unwrap();
    assert_eq!(wb.sheet(s).unwrap().cell_count(), 0);
    assert_eq!(
        report.diagnostics[0].kind,
        LossyEditKind::CellsShiftedOffSheet { count: 1 }
    );
}

#[test]
fn column_edits_mirror_row_edits() {
    let mut wb = Workbook::new();
    let s = wb.add_sheet("Cols").unwrap();
    for col in 0..5 {
        wb.set(s, CellRef::new(0, col), f64::from(col)).unwrap();
    }
    wb.sheet_mut(s).unwrap().set_column_width(3, Some(20.0)).unwrap();
    wb.set(s, CellRef::new(1, 0), Formula::new("SUM(A1:E1)")).unwrap();

    wb.delete_cols(s, 1, 2).unwrap();
    assert_eq!(wb.get(s, CellRef::new(0, 1)).unwrap(), &CellValue::Number(3.0));
    assert_eq!(wb.sheet(s).unwrap().column_width(1), Some(20.0));
    assert_eq!(
        wb.get(s, CellRef::new(1, 0)).unwrap().as_formula().unwrap().expr,
        "SUM(A1:C1)"
    );

    wb.insert_cols(s, 0, 1).unwrap();
    assert_eq!(wb.get(s, CellRef::new(0, 1)).unwrap(), &CellValue::Number(0.0));
    assert_eq!(
        wb.get(s, CellRef::new(1, 1)).unwrap().as_formula().unwrap().expr,
        "SUM(B1:D1)"
    );
}

#[test]
fn tracked_workbooks_record_sheet_changes_in_order() {
    let (mut wb, s) = ten_rows();
    wb.insert_rows(s, 0, 1).unwrap();
    assert!(wb.pending_sheet_changes().is_empty());

    wb.track_sheet_changes();
    wb.insert_rows(s, 3, 2).unwrap();
    wb.delete_cols(s, 0, 0).unwrap();
    wb.rename_sheet(s, "Raw").unwrap();
    let copy = wb.copy_sheet(s).unwrap();
    wb.remove_sheet(copy).unwrap();

    assert_eq!(
        wb.take_sheet_changes(),
        vec![
            SheetChange::Edited {
                sheet: s,
                edit: StructuralEdit::InsertRows { row: 3, count: 2 },
            },
            SheetChange::Renamed {
                sheet: s,
                old: "Data".into(),
                new: "Raw".into(),
            },
            SheetChange::Copied {
                from: s,
                to: copy,
                from_name: "Raw".into(),
                to_name: "Raw (2)".into(),
            },
            SheetChange::Removed {
                sheet: copy,
                name: "Raw (2)".into(),
                previous: Some(s),
            },
        ]
    );
    assert!(wb.pending_sheet_changes().is_empty());
    wb.insert_cols(s, 0, 1).unwrap();
    assert_eq!(wb.pending_sheet_changes().len(), 1);
}

#[test]
fn bad_arguments_are_rejected_before_any_change() {
    let (mut wb, s) = ten_rows();
    let before = wb.clone();
    assert!(wb.delete_rows(s, tabula_model::EXCEL_MAX_ROWS - 1, 2).is_err());
    assert!(wb.insert_cols(s, tabula_model::EXCEL_MAX_COLS, 1).is_err());
    assert!(wb.insert_rows(99, 0, 1).is_err());
    assert_eq!(wb, before);
}

#[derive(Debug, Clone)]
struct Seed {
    cells: Vec<(u32, u32, i32)>,
    merges: Vec<(u32, u32)>,
    formulas: Vec<(u32, u32, u32)>,
    frozen: u32,
}

fn seed() -> impl Strategy<Value = Seed> {
    (
        prop::collection::vec((0u32..40, 0u32..6, -1000i32..1000), 0..30),
        prop::collection::vec((0u32..38, 0u32..3), 0..4),
        prop::collection::vec((0u32..40, 0u32..40, 0u32..40), 0..5),
        0u32..6,
    )
        .prop_map(|(cells, merges, formulas, frozen)| Seed {
            cells,
            merges,
            formulas,
            frozen,
        })
}

fn build(seed: &Seed) -> (Workbook, SheetId) {
    let mut wb = Workbook::new();
    let s = wb.add_sheet("Grid").unwrap();
    let other = wb.add_sheet("Other").unwrap();
    for (row, band) in &seed.merges {
        // Merges sit in columns 10..16, clear of the value cells; overlapping picks are skipped.
        let col = 10 + band * 2;
        let _ = wb.merge(s, Range::from_coords(*row, col, row + 2, col + 1));
    }
    for (row, col, value) in &seed.cells {
        let _ = wb.set(s, CellRef::new(*row, *col), f64::from(*value));
    }
    for (idx, (a, b, c)) in seed.formulas.iter().enumerate() {
        let (top, bottom) = (a.min(b), a.max(b));
        let expr = format!("SUM(A{}:B{})+Grid!C{}", top + 1, bottom + 1, c + 1);
        wb.set(s, CellRef::new(60 + idx as u32, 0), Formula::new(expr.as_str()))
            .unwrap();
        wb.set(other, CellRef::new(idx as u32, 0), Formula::new(format!("Grid!A{}", a + 1)))
            .unwrap();
    }
    wb.sheet_mut(s)
        .unwrap()
        .set_frozen_panes(Some(FrozenPane::new(seed.frozen, 1)))
        .unwrap();
    wb.add_defined_name(DefinedName::ranges(
        "Block",
        vec![SheetRange::new(s, Range::from_coords(2, 0, 30, 3))],
    ))
    .unwrap();
    (wb, s)
}

proptest! {
    #[test]
    fn insert_then_delete_restores_rows(seed in seed(), at in 0u32..50, count in 1u32..8) {
        let (original, s) = build(&seed);
        let mut wb = original.clone();
        let inserted = wb.insert_rows(s, at, count).unwrap();
        prop_assert!(inserted.is_lossless());
        let deleted = wb.delete_rows(s, at, count).unwrap();
        prop_assert!(deleted.is_lossless());
        prop_assert_eq!(wb, original);
    }

    #[test]
    fn insert_then_delete_restores_cols(seed in seed(), at in 0u32..20, count in 1u32..4) {
        let (original, s) = build(&seed);
        let mut wb = original.clone();
        wb.insert_cols(s, at, count).unwrap();
        wb.delete_cols(s, at, count).unwrap();
        prop_assert_eq!(wb, original);
    }
}
