use pretty_assertions::assert_eq;
use tabula_model::{CellRef, CellValue, ErrorKind, ModelError, Range, Workbook};

#[test]
fn merge_keeps_the_anchor_and_rejects_non_anchor_writes() {
    let mut wb = Workbook::new();
    let s = wb.add_sheet("Sheet1").unwrap();

    wb.set_string(s, CellRef::new(0, 0), "Q1").unwrap();
    wb.set(s, CellRef::new(0, 1), 42.0).unwrap();
    wb.merge(s, Range::from_coords(1, 0, 1, 2)).unwrap();
    wb.set_string(s, CellRef::new(1, 0), "Total").unwrap();

    let err = wb.set(s, CellRef::new(1, 1), 7.0).unwrap_err();
    assert_eq!(
        err,
        ModelError::MergedCellWriteConflict {
            cell: CellRef::new(1, 1),
            anchor: CellRef::new(1, 0),
        }
    );
    assert_eq!(err.kind(), ErrorKind::StructuralConflict);
    assert_eq!(wb.get(s, CellRef::new(1, 1)).unwrap(), &CellValue::Empty);
    assert_eq!(
        wb.text(s, CellRef::new(1, 0)).unwrap().as_deref(),
        Some("Total")
    );
    assert_eq!(
        wb.merge_containing(s, CellRef::new(1, 2)).unwrap(),
        Some(Range::from_coords(1, 0, 1, 2))
    );
}

#[test]
fn merging_clears_covered_values_but_keeps_their_styles() {
    let mut wb = Workbook::new();
    let s = wb.add_sheet("Sheet1").unwrap();
    wb.set(s, CellRef::new(0, 0), 1.0).unwrap();
    wb.set(s, CellRef::new(0, 1), 2.0).unwrap();
    let bold = wb
        .update_style(s, CellRef::new(0, 1), |st| st.font.bold = true)
        .unwrap();

    wb.merge(s, Range::from_coords(0, 0, 0, 1)).unwrap();
    let sheet = wb.sheet(s).unwrap();
    assert_eq!(sheet.value(CellRef::new(0, 0)), &CellValue::Number(1.0));
    assert_eq!(sheet.value(CellRef::new(0, 1)), &CellValue::Empty);
    assert_eq!(sheet.style_id(CellRef::new(0, 1)), bold);
}

#[test]
fn overlapping_merge_leaves_the_workbook_unchanged() {
    let mut wb = Workbook::new();
    let s = wb.add_sheet("Sheet1").unwrap();
    wb.set(s, CellRef::new(2, 2), 5.0).unwrap();
    wb.merge(s, Range::from_coords(0, 0, 1, 1)).unwrap();
    let before = wb.clone();

    let err = wb.merge(s, Range::from_coords(1, 1, 2, 2)).unwrap_err();
    assert!(matches!(err, ModelError::OverlappingMerge { .. }));
    assert_eq!(wb, before);

    assert!(matches!(
        wb.merge(s, Range::single(CellRef::new(5, 5))),
        Err(ModelError::InvalidMerge(_))
    ));
}

#[test]
fn unmerge_requires_an_exact_range_and_keeps_values() {
    let mut wb = Workbook::new();
    let s = wb.add_sheet("Sheet1").unwrap();
    wb.set(s, CellRef::new(0, 0), 1.0).unwrap();
    wb.merge(s, Range::from_coords(0, 0, 1, 1)).unwrap();

    assert!(!wb.unmerge(s, Range::from_coords(0, 0, 0, 1)).unwrap());
    assert!(wb.unmerge(s, Range::from_coords(0, 0, 1, 1)).unwrap());
    assert_eq!(wb.get(s, CellRef::new(0, 0)).unwrap(), &CellValue::Number(1.0));
    wb.set(s, CellRef::new(1, 1), 2.0).unwrap();
}
