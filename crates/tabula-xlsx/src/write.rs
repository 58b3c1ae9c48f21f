//! Model → package.
//!
//! The source package is copied and only the owned parts are regenerated: the workbook, its
//! worksheets, styles and shared strings. Relationship and content-type parts are rewritten only
//! when a sheet or table part was added or removed, so every other part keeps its exact bytes.

use std::collections::{BTreeMap, BTreeSet};

use tabula_model::{
    a1, CellValue, DateSystem, DefinedName, NameScope, NameTarget, Range, SheetId, Workbook,
    Worksheet, XLNM_PRINT_AREA, XLNM_PRINT_TITLES,
};

use crate::codec::PartCodec;
use crate::content_types::{ContentTypes, CT_SHARED_STRINGS, CT_STYLES, CT_WORKBOOK, CT_WORKSHEET};
use crate::document::{SheetPart, XlsxDocument};
use crate::error::SaveError;
use crate::package::{Package, CONTENT_TYPES_PART, PACKAGE_RELS_PART};
use crate::path::{rels_for_part, relative_target};
use crate::preserve::{PartFragments, PartKey};
use crate::relationships::{
    role, Relationships, REL_TYPE_OFFICE_DOCUMENT, REL_TYPE_SHARED_STRINGS, REL_TYPE_STYLES,
    REL_TYPE_WORKSHEET,
};
use crate::shared_strings::{SharedStringsCodec, SharedStringsRecord};
use crate::styles::{StylesCodec, StylesRecord};
use crate::workbook_part::{DefinedNameEntry, SheetEntry, WorkbookCodec, WorkbookRecord};
use crate::worksheet::{CellData, CellRecord, WorksheetCodec, WorksheetRecord};

const DEFAULT_STYLES_PART: &str = "xl/styles.xml";
const DEFAULT_SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaveOptions {
    /// Drop unreferenced styles and strings from the written tables. The document's own tables
    /// are never modified.
    pub compact_tables: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            compact_tables: true,
        }
    }
}

/// A `.rels` or content-types part being edited, written back only if it changed.
struct Tracked<T> {
    value: T,
    changed: bool,
}

impl<T> Tracked<T> {
    fn mark(&mut self, changed: bool) {
        self.changed |= changed;
    }
}

fn read_rels(package: &Package, part: &str) -> Result<Tracked<Relationships>, SaveError> {
    Ok(match package.get(part) {
        Some(bytes) => Tracked {
            value: Relationships::parse(bytes).map_err(SaveError::xml(part))?,
            changed: false,
        },
        None => Tracked {
            value: Relationships::new(),
            changed: true,
        },
    })
}

pub(crate) fn save(doc: &XlsxDocument, options: &SaveOptions) -> Result<Package, SaveError> {
    if doc.workbook.sheets().is_empty() {
        return Err(SaveError::NoSheets);
    }
    let mut workbook = doc.workbook.clone();
    if options.compact_tables {
        workbook.compact();
    }

    let mut package = doc.package.clone();
    let workbook_part = doc.parts.workbook.clone();
    let mut types = match package.get(CONTENT_TYPES_PART) {
        Some(bytes) => Tracked {
            value: ContentTypes::parse(bytes).map_err(SaveError::xml(CONTENT_TYPES_PART))?,
            changed: false,
        },
        None => Tracked {
            value: ContentTypes::minimal(),
            changed: true,
        },
    };
    if types.value.content_type(&workbook_part).is_none() {
        let changed = types.value.set_override(&workbook_part, CT_WORKBOOK);
        types.mark(changed);
    }

    let mut root_rels = read_rels(&package, PACKAGE_RELS_PART)?;
    if root_rels.value.first_with_role(role::OFFICE_DOCUMENT).is_none() {
        root_rels
            .value
            .push(REL_TYPE_OFFICE_DOCUMENT, &relative_target("", &workbook_part));
        root_rels.changed = true;
    }

    let workbook_rels_part = rels_for_part(&workbook_part);
    let mut rels = read_rels(&package, &workbook_rels_part)?;

    remove_deleted_sheets(doc, &workbook, &mut package, &mut types, &mut rels);
    let placements = place_sheets(doc, &workbook, &workbook_part, &package, &mut types, &mut rels);

    // Tables.
    let styles_part = match &doc.parts.styles {
        Some(part) => part.clone(),
        None => {
            let part = DEFAULT_STYLES_PART.to_string();
            attach_part(&workbook_part, &part, REL_TYPE_STYLES, CT_STYLES, &mut types, &mut rels);
            part
        }
    };
    let styles = StylesRecord {
        cell_formats: workbook.styles().iter().map(|(_, s)| s.clone()).collect(),
        named_styles: workbook.named_styles().to_vec(),
    };
    let bytes = StylesCodec::encode(&styles, fragments(doc, PartKey::Styles))
        .map_err(SaveError::xml(&styles_part))?;
    package.set_part(styles_part, bytes);

    if !workbook.shared_strings().is_empty() || doc.parts.shared_strings.is_some() {
        let strings_part = match &doc.parts.shared_strings {
            Some(part) => part.clone(),
            None => {
                let part = DEFAULT_SHARED_STRINGS_PART.to_string();
                attach_part(
                    &workbook_part,
                    &part,
                    REL_TYPE_SHARED_STRINGS,
                    CT_SHARED_STRINGS,
                    &mut types,
                    &mut rels,
                );
                part
            }
        };
        let record = SharedStringsRecord {
            entries: workbook.shared_strings().iter().cloned().collect(),
            references: count_string_references(&workbook),
        };
        let bytes = SharedStringsCodec::encode(&record, fragments(doc, PartKey::SharedStrings))
            .map_err(SaveError::xml(&strings_part))?;
        package.set_part(strings_part, bytes);
    }

    // Worksheets.
    let active = workbook.active_sheet();
    for ws in workbook.sheets() {
        let Some(placement) = placements.get(&ws.id()) else {
            continue;
        };
        let record = worksheet_record(ws, active == Some(ws.id()));
        let bytes = WorksheetCodec::encode(&record, fragments(doc, PartKey::Worksheet(ws.id())))
            .map_err(SaveError::xml(&placement.part))?;
        package.set_part(placement.part.clone(), bytes);
    }

    let record = workbook_record(doc, &workbook, &placements);
    let bytes = WorkbookCodec::encode(&record, fragments(doc, PartKey::Workbook))
        .map_err(SaveError::xml(&workbook_part))?;
    package.set_part(workbook_part, bytes);

    if rels.changed {
        package.set_part(workbook_rels_part, rels.value.to_xml());
    }
    if root_rels.changed {
        package.set_part(PACKAGE_RELS_PART, root_rels.value.to_xml());
    }
    if types.changed {
        package.set_part(CONTENT_TYPES_PART, types.value.to_xml());
    }
    log::debug!(
        "saved {} sheet(s), {} style(s), {} string(s); {} part(s) in package",
        workbook.sheets().len(),
        workbook.styles().len(),
        workbook.shared_strings().len(),
        package.len()
    );
    Ok(package)
}

static EMPTY_FRAGMENTS: PartFragments = PartFragments::new();

fn fragments(doc: &XlsxDocument, key: PartKey) -> &PartFragments {
    doc.fragments.get(key).unwrap_or(&EMPTY_FRAGMENTS)
}

/// Register a new part of the workbook: relationship and content-type override.
fn attach_part(
    workbook_part: &str,
    part: &str,
    rel_type: &str,
    content_type: &str,
    types: &mut Tracked<ContentTypes>,
    rels: &mut Tracked<Relationships>,
) -> String {
    let id = rels
        .value
        .push(rel_type, &relative_target(workbook_part, part));
    rels.changed = true;
    let changed = types.value.set_override(part, content_type);
    types.mark(changed);
    id
}

/// Drop the parts of worksheets the model no longer has.
fn remove_deleted_sheets(
    doc: &XlsxDocument,
    workbook: &Workbook,
    package: &mut Package,
    types: &mut Tracked<ContentTypes>,
    rels: &mut Tracked<Relationships>,
) {
    for (id, placement) in &doc.sheet_parts {
        if workbook.sheet(*id).is_some() {
            continue;
        }
        package.remove_part(&placement.part);
        package.remove_part(&rels_for_part(&placement.part));
        let changed = types.value.remove_override(&placement.part);
        types.mark(changed);
        let before = rels.value.len();
        rels.value.retain(|r| r.id != placement.rel_id);
        rels.mark(rels.value.len() != before);
        log::debug!("removed {} of a deleted sheet", placement.part);
    }
}

/// Part, relationship and `sheetId` of every worksheet, allocating them for new sheets.
fn place_sheets(
    doc: &XlsxDocument,
    workbook: &Workbook,
    workbook_part: &str,
    package: &Package,
    types: &mut Tracked<ContentTypes>,
    rels: &mut Tracked<Relationships>,
) -> BTreeMap<SheetId, SheetPart> {
    let mut placements = BTreeMap::new();
    let mut taken_ids: BTreeSet<u32> = doc
        .opaque_sheets
        .iter()
        .map(|o| o.entry.sheet_id)
        .collect();
    for ws in workbook.sheets() {
        if let Some(existing) = doc.sheet_parts.get(&ws.id()) {
            taken_ids.insert(existing.xml_sheet_id);
            placements.insert(ws.id(), existing.clone());
        }
    }

    let worksheet_dir = match doc.sheet_parts.values().next() {
        Some(p) => p.part.rsplit_once('/').map(|(dir, _)| dir.to_string()),
        None => None,
    }
    .unwrap_or_else(|| "xl/worksheets".to_string());
    let mut next_file = 1u32;
    let mut next_id = taken_ids.iter().next_back().map_or(1, |max| max + 1);
    for ws in workbook.sheets() {
        if placements.contains_key(&ws.id()) {
            continue;
        }
        let part = loop {
            let candidate = format!("{worksheet_dir}/sheet{next_file}.xml");
            next_file += 1;
            let in_use = package.contains(&candidate)
                || placements.values().any(|p: &SheetPart| p.part.eq_ignore_ascii_case(&candidate));
            if !in_use {
                break candidate;
            }
        };
        let rel_id = attach_part(workbook_part, &part, REL_TYPE_WORKSHEET, CT_WORKSHEET, types, rels);
        log::debug!("new sheet {:?} written to {part}", ws.name());
        placements.insert(
            ws.id(),
            SheetPart {
                part,
                rel_id,
                xml_sheet_id: next_id,
            },
        );
        next_id += 1;
    }
    placements
}

fn count_string_references(workbook: &Workbook) -> usize {
    workbook
        .sheets()
        .iter()
        .flat_map(|ws| ws.cells())
        .filter(|(_, cell)| matches!(cell.value, CellValue::SharedString(_)))
        .count()
}

fn worksheet_record(ws: &Worksheet, tab_selected: bool) -> WorksheetRecord {
    WorksheetRecord {
        cells: ws
            .cells()
            .map(|(cell, c)| CellRecord {
                cell,
                style: c.style_id,
                data: CellData::Value(c.value.clone()),
            })
            .collect(),
        columns: ws.columns().map(|(col, p)| (col, p.clone())).collect(),
        rows: ws.rows().map(|(row, p)| (row, p.clone())).collect(),
        merges: ws.merged_regions().iter().copied().collect(),
        frozen: ws.frozen_panes(),
        tab_selected,
    }
}

fn workbook_record(
    doc: &XlsxDocument,
    workbook: &Workbook,
    placements: &BTreeMap<SheetId, SheetPart>,
) -> WorkbookRecord {
    // Opaque sheets follow the worksheet they were loaded after; orphans go last.
    let mut sheets = Vec::new();
    let mut tab_of = BTreeMap::new();
    let opaque_after = |anchor: Option<SheetId>| {
        doc.opaque_sheets
            .iter()
            .filter(move |o| o.after == anchor)
            .map(|o| o.entry.clone())
    };
    sheets.extend(opaque_after(None));
    for ws in workbook.sheets() {
        let Some(placement) = placements.get(&ws.id()) else {
            continue;
        };
        tab_of.insert(ws.id(), sheets.len() as u32);
        sheets.push(SheetEntry {
            name: ws.name().to_string(),
            sheet_id: placement.xml_sheet_id,
            state: ws.visibility(),
            rel_id: placement.rel_id.clone(),
        });
        sheets.extend(opaque_after(Some(ws.id())));
    }
    sheets.extend(
        doc.opaque_sheets
            .iter()
            .filter(|o| o.after.is_some_and(|id| workbook.sheet(id).is_none()))
            .map(|o| o.entry.clone()),
    );

    let mut defined_names = Vec::new();
    for name in workbook.defined_names() {
        if let Some(entry) = defined_name_entry(workbook, &tab_of, name) {
            defined_names.push(entry);
        }
    }
    for ws in workbook.sheets() {
        let Some(&tab) = tab_of.get(&ws.id()) else {
            continue;
        };
        let print = ws.print_settings();
        if !print.print_area.is_empty() {
            defined_names.push(builtin_name(
                XLNM_PRINT_AREA,
                tab,
                a1::format_area_list(print.print_area.iter().map(|r| (ws.name(), *r))),
            ));
        }
        let titles: Vec<Range> = print
            .repeat_cols
            .map(|span| Range::cols(span.start, span.end))
            .into_iter()
            .chain(print.repeat_rows.map(|span| Range::rows(span.start, span.end)))
            .collect();
        if !titles.is_empty() {
            defined_names.push(builtin_name(
                XLNM_PRINT_TITLES,
                tab,
                a1::format_area_list(titles.into_iter().map(|r| (ws.name(), r))),
            ));
        }
    }

    WorkbookRecord {
        date1904: workbook.date_system() == DateSystem::Excel1904,
        active_tab: workbook
            .active_sheet()
            .and_then(|id| tab_of.get(&id).copied())
            .unwrap_or(0),
        sheets,
        defined_names,
    }
}

fn builtin_name(name: &str, tab: u32, formula: String) -> DefinedNameEntry {
    DefinedNameEntry {
        name: name.to_string(),
        local_sheet_id: Some(tab),
        hidden: false,
        comment: None,
        formula,
    }
}

fn defined_name_entry(
    workbook: &Workbook,
    tab_of: &BTreeMap<SheetId, u32>,
    name: &DefinedName,
) -> Option<DefinedNameEntry> {
    let local_sheet_id = match name.scope {
        NameScope::Workbook => None,
        NameScope::Sheet(id) => Some(*tab_of.get(&id)?),
    };
    let formula = match &name.target {
        NameTarget::Formula(formula) => formula.clone(),
        NameTarget::Ranges(targets) => {
            let areas: Option<Vec<(&str, Range)>> = targets
                .iter()
                .map(|t| workbook.sheet(t.sheet).map(|ws| (ws.name(), t.range)))
                .collect();
            let Some(areas) = areas else {
                log::warn!("skipping defined name {:?} with a missing target sheet", name.name);
                return None;
            };
            a1::format_area_list(areas)
        }
    };
    Some(DefinedNameEntry {
        name: name.name.clone(),
        local_sheet_id,
        hidden: name.hidden,
        comment: name.comment.clone(),
        formula,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tabula_model::{CellRef, Span};

    fn doc_with_two_sheets() -> XlsxDocument {
        let mut wb = Workbook::new();
        let a = wb.add_sheet("Data").unwrap();
        wb.add_sheet("Other Sheet").unwrap();
        wb.set(a, CellRef::new(0, 0), 1.0).unwrap();
        XlsxDocument::new(wb)
    }

    #[test]
    fn a_workbook_without_sheets_is_not_saved() {
        let doc = XlsxDocument::new(Workbook::new());
        assert!(matches!(doc.save(), Err(SaveError::NoSheets)));
    }

    #[test]
    fn new_documents_get_every_required_part() {
        let package = doc_with_two_sheets().save().unwrap();
        let names: Vec<&str> = package.part_names().collect();
        for expected in [
            "[Content_Types].xml",
            "_rels/.rels",
            "xl/workbook.xml",
            "xl/_rels/workbook.xml.rels",
            "xl/worksheets/sheet1.xml",
            "xl/worksheets/sheet2.xml",
            "xl/styles.xml",
        ] {
            assert!(names.contains(&expected), "missing {expected}: {names:?}");
        }
        // No strings were written, so no table part either.
        assert!(!names.contains(&"xl/sharedStrings.xml"));

        let types = ContentTypes::parse(package.get(CONTENT_TYPES_PART).unwrap()).unwrap();
        assert_eq!(types.content_type("xl/workbook.xml"), Some(CT_WORKBOOK));
        assert_eq!(types.content_type("/xl/worksheets/sheet2.xml"), Some(CT_WORKSHEET));
        let rels = Relationships::parse(package.get("xl/_rels/workbook.xml.rels").unwrap()).unwrap();
        let targets: Vec<&str> = rels.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["worksheets/sheet1.xml", "worksheets/sheet2.xml", "styles.xml"]);
    }

    #[test]
    fn print_settings_become_builtin_names() {
        let mut doc = doc_with_two_sheets();
        let sheet = doc.workbook().sheets()[1].id();
        let ws = doc.workbook_mut().sheet_mut(sheet).unwrap();
        ws.set_print_area(vec![Range::from_coords(0, 0, 9, 2)]).unwrap();
        ws.set_print_titles(Some(Span::new(0, 1)), Some(Span::new(0, 0)))
            .unwrap();

        let placements = BTreeMap::from([
            (
                doc.workbook().sheets()[0].id(),
                SheetPart {
                    part: "xl/worksheets/sheet1.xml".into(),
                    rel_id: "rId1".into(),
                    xml_sheet_id: 1,
                },
            ),
            (
                sheet,
                SheetPart {
                    part: "xl/worksheets/sheet2.xml".into(),
                    rel_id: "rId2".into(),
                    xml_sheet_id: 2,
                },
            ),
        ]);
        let record = workbook_record(&doc, doc.workbook(), &placements);
        let names: Vec<(&str, Option<u32>, &str)> = record
            .defined_names
            .iter()
            .map(|n| (n.name.as_str(), n.local_sheet_id, n.formula.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("_xlnm.Print_Area", Some(1), "'Other Sheet'!$A$1:$C$10"),
                ("_xlnm.Print_Titles", Some(1), "'Other Sheet'!$A:$A,'Other Sheet'!$1:$2"),
            ]
        );
    }

    #[test]
    fn saving_leaves_the_document_tables_alone() {
        let mut doc = doc_with_two_sheets();
        let sheet = doc.workbook().sheets()[0].id();
        doc.workbook_mut()
            .set_string(sheet, CellRef::new(1, 0), "kept")
            .unwrap();
        doc.workbook_mut()
            .set_string(sheet, CellRef::new(2, 0), "orphan")
            .unwrap();
        doc.workbook_mut().clear(sheet, CellRef::new(2, 0)).unwrap();
        let before = doc.workbook().clone();

        let package = doc.save().unwrap();
        assert_eq!(doc.workbook(), &before);
        assert_eq!(doc.workbook().shared_strings().len(), 2);
        let xml = std::str::from_utf8(package.get("xl/sharedStrings.xml").unwrap()).unwrap();
        assert!(xml.contains("kept"));
        assert!(!xml.contains("orphan"));
    }
}
