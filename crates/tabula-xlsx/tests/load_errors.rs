mod support;

use pretty_assertions::assert_eq;
use support::{zip_entries, FixtureBuilder};
use tabula_model::{CellRef, CellValue, ErrorKind, NameScope, Range};
use tabula_xlsx::{ArchiveError, LoadError, LoadOptions, LoadWarning, PackageLimits, XlsxDocument};

fn strict() -> LoadOptions {
    LoadOptions {
        strict_names: true,
        ..LoadOptions::default()
    }
}

#[test]
fn non_zip_input_is_an_archive_error() {
    let err = XlsxDocument::from_bytes(b"definitely not a zip").unwrap_err();
    assert!(matches!(err, LoadError::Archive(ArchiveError::NotAZip(_))), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Archive);
}

#[test]
fn a_zip_without_package_relationships_is_rejected() {
    let bytes = zip_entries(&[
        (
            "[Content_Types].xml".to_string(),
            br#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#
                .to_vec(),
        ),
        ("hello.txt".to_string(), b"hi".to_vec()),
    ]);
    let err = XlsxDocument::from_bytes(&bytes).unwrap_err();
    match err {
        LoadError::Archive(ArchiveError::MissingRequiredPart(part)) => {
            assert_eq!(part, "_rels/.rels")
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn a_missing_worksheet_part_is_rejected() {
    let bytes = FixtureBuilder::new().sheet("Sheet1", "<sheetData/>").build();
    let mut entries = Vec::new();
    let package = tabula_xlsx::Package::from_bytes(&bytes).unwrap();
    for name in package.part_names() {
        if name != "xl/worksheets/sheet1.xml" {
            entries.push((name.to_string(), package.get(name).unwrap().to_vec()));
        }
    }
    let err = XlsxDocument::from_bytes(&zip_entries(&entries)).unwrap_err();
    assert!(
        matches!(&err, LoadError::Archive(ArchiveError::MissingRequiredPart(p)) if p == "xl/worksheets/sheet1.xml"),
        "{err:?}"
    );
}

#[test]
fn malformed_worksheet_xml_names_the_part() {
    let bytes = FixtureBuilder::new()
        .sheet("Sheet1", "<sheetData><row r=\"1\"><c r=\"A1\"><v>1</v></row></sheetData>")
        .build();
    let err = XlsxDocument::from_bytes(&bytes).unwrap_err();
    match &err {
        LoadError::Xml { part, .. } => assert_eq!(part, "xl/worksheets/sheet1.xml"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Xml);
}

#[test]
fn oversized_parts_are_refused() {
    let bytes = FixtureBuilder::new().sheet("Sheet1", "<sheetData/>").build();
    let options = LoadOptions {
        limits: PackageLimits {
            max_part_bytes: 64,
            ..PackageLimits::default()
        },
        ..LoadOptions::default()
    };
    let err = XlsxDocument::from_bytes_with_options(&bytes, &options).unwrap_err();
    assert!(
        matches!(err, LoadError::Archive(ArchiveError::PartTooLarge { .. })),
        "{err:?}"
    );
}

fn dangling_name_workbook() -> Vec<u8> {
    FixtureBuilder::new()
        .sheet("Sheet1", r#"<sheetData><row r="1"><c r="A1"><v>1</v></c></row></sheetData>"#)
        .defined_name(r#"<definedName name="Good">Sheet1!$A$1:$A$4</definedName>"#)
        .defined_name(r#"<definedName name="Lost">Gone!$B$2</definedName>"#)
        .defined_name(r#"<definedName name="Tax">0.2</definedName>"#)
        .build()
}

#[test]
fn dangling_names_are_dropped_with_a_warning() {
    let doc = XlsxDocument::from_bytes(&dangling_name_workbook()).unwrap();
    assert_eq!(
        doc.warnings(),
        &[LoadWarning::DanglingDefinedName {
            name: "Lost".to_string(),
            sheet: "Gone".to_string(),
        }]
    );
    let wb = doc.workbook();
    assert!(wb.defined_name("Good", NameScope::Workbook).is_some());
    assert!(wb.defined_name("Tax", NameScope::Workbook).is_some());
    assert!(wb.defined_name("Lost", NameScope::Workbook).is_none());
}

#[test]
fn strict_loading_rejects_dangling_names() {
    let err = XlsxDocument::from_bytes_with_options(&dangling_name_workbook(), &strict()).unwrap_err();
    assert!(matches!(err, LoadError::Reference(_)), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::Reference);
}

#[test]
fn recoverable_sheet_problems_become_warnings() {
    let bytes = FixtureBuilder::new()
        .shared_strings(&["only"])
        .sheet(
            "Sheet1",
            r#"<sheetData><row r="1"><c r="A1" s="9"><v>1</v></c><c r="B1" t="s"><v>5</v></c><c r="C1" t="s"><v>0</v></c></row></sheetData><mergeCells count="3"><mergeCell ref="A3:B4"/><mergeCell ref="B4:C5"/><mergeCell ref="E1"/></mergeCells>"#,
        )
        .build();
    let doc = XlsxDocument::from_bytes(&bytes).unwrap();
    assert_eq!(
        doc.warnings(),
        &[
            LoadWarning::InvalidStyleIndex {
                sheet: "Sheet1".to_string(),
                index: 9,
            },
            LoadWarning::InvalidStringIndex {
                sheet: "Sheet1".to_string(),
                cell: CellRef::new(0, 1),
                index: 5,
            },
            LoadWarning::OverlappingMerge {
                sheet: "Sheet1".to_string(),
                range: Range::from_coords(3, 1, 4, 2),
            },
            LoadWarning::InvalidMerge {
                sheet: "Sheet1".to_string(),
                range: Range::from_coords(0, 4, 0, 4),
            },
        ]
    );

    let wb = doc.workbook();
    let s = wb.sheet_by_name("Sheet1").unwrap().id();
    let sheet = wb.sheet(s).unwrap();
    assert_eq!(sheet.style_id(CellRef::new(0, 0)), 0);
    assert_eq!(sheet.value(CellRef::new(0, 0)), &CellValue::Number(1.0));
    assert_eq!(sheet.value(CellRef::new(0, 1)), &CellValue::Empty);
    assert_eq!(wb.text(s, CellRef::new(0, 2)).unwrap().as_deref(), Some("only"));
    let merges: Vec<Range> = sheet.merged_regions().iter().copied().collect();
    assert_eq!(merges, vec![Range::from_coords(2, 0, 3, 1)]);
}

#[test]
fn merges_over_filled_cells_warn_about_cleared_values() {
    let bytes = FixtureBuilder::new()
        .sheet(
            "Sheet1",
            r#"<sheetData><row r="1"><c r="A1"><v>1</v></c><c r="B1"><v>2</v></c></row><row r="2"><c r="A2" t="b"><v>1</v></c><c r="B2"/></row></sheetData><mergeCells count="1"><mergeCell ref="A1:B2"/></mergeCells>"#,
        )
        .build();
    let doc = XlsxDocument::from_bytes(&bytes).unwrap();
    assert_eq!(
        doc.warnings(),
        &[LoadWarning::MergeClearedCells {
            sheet: "Sheet1".to_string(),
            range: Range::from_coords(0, 0, 1, 1),
            count: 2,
        }]
    );
    assert_eq!(
        doc.warnings()[0].to_string(),
        "Sheet1: merge A1:B2 cleared 2 value(s) outside its top-left cell"
    );
    let sheet = doc.workbook().sheet_by_name("Sheet1").unwrap();
    assert_eq!(sheet.value(CellRef::new(0, 0)), &CellValue::Number(1.0));
    assert_eq!(sheet.value(CellRef::new(0, 1)), &CellValue::Empty);
}
