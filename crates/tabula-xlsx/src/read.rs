//! Package → model.
//!
//! Parts are located through relationships only: the package's `officeDocument` relationship
//! names the workbook part, and the workbook's relationships name the styles, shared strings and
//! worksheet parts. Problems inside otherwise readable parts (bad style indices, overlapping
//! merges, names pointing at missing sheets) are recovered from and reported as
//! [`LoadWarning`]s; unreadable required parts abort the load.

use std::collections::BTreeMap;
use std::fmt;

use tabula_model::{
    a1, CellRef, CellValue, DateSystem, DefinedName, IndexRemap, ModelError, NameScope,
    NameTarget, Range, RichText, SharedStringTable, SheetId, SheetRange, Span, StyleTable,
    Workbook, XLNM_PRINT_AREA, XLNM_PRINT_TITLES,
};

use crate::codec::PartCodec;
use crate::document::{OpaqueSheet, OwnedParts, SheetPart, XlsxDocument};
use crate::error::{ArchiveError, LoadError};
use crate::package::{Package, PackageLimits, PACKAGE_RELS_PART};
use crate::path::{rels_for_part, resolve_target};
use crate::preserve::{FragmentStore, PartFragments, PartKey};
use crate::relationships::{role, RelationshipGraph, Relationships};
use crate::shared_strings::SharedStringsCodec;
use crate::styles::{StylesCodec, StylesRecord};
use crate::workbook_part::{DefinedNameEntry, WorkbookCodec};
use crate::worksheet::{parse_iso_datetime, CellData, WorksheetCodec, WorksheetRecord};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub limits: PackageLimits,
    /// Fail with [`LoadError::Reference`] instead of dropping defined names that target sheets
    /// the workbook does not contain.
    pub strict_names: bool,
}

/// A problem the loader recovered from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadWarning {
    /// Dropped: the name refers to a sheet that does not exist.
    DanglingDefinedName { name: String, sheet: String },
    /// Dropped: the name is malformed, duplicated or empty.
    InvalidDefinedName { name: String, reason: String },
    /// Dropped: the merge intersects an earlier one.
    OverlappingMerge { sheet: String, range: Range },
    /// Dropped: single-cell or out-of-grid merge.
    InvalidMerge { sheet: String, range: Range },
    /// The merge was kept and the values of `count` cells under it, other than its top-left
    /// cell, were cleared.
    MergeClearedCells { sheet: String, range: Range, count: usize },
    /// The cell (or row/column) fell back to the default style.
    InvalidStyleIndex { sheet: String, index: u32 },
    /// The cell's value was dropped.
    InvalidStringIndex { sheet: String, cell: CellRef, index: u32 },
    /// A `t="d"` cell that could not be converted; its text is kept as an inline string.
    InvalidDate { sheet: String, cell: CellRef, text: String },
    /// A row, column, pane or cell setting outside the model's limits was ignored.
    InvalidSheetSetting { sheet: String, detail: String },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::DanglingDefinedName { name, sheet } => {
                write!(f, "defined name {name:?} refers to missing sheet {sheet:?}")
            }
            LoadWarning::InvalidDefinedName { name, reason } => {
                write!(f, "defined name {name:?} ignored: {reason}")
            }
            LoadWarning::OverlappingMerge { sheet, range } => {
                write!(f, "{sheet}: merge {} overlaps another merge", a1::format_range(*range))
            }
            LoadWarning::InvalidMerge { sheet, range } => {
                write!(f, "{sheet}: invalid merge {}", a1::format_range(*range))
            }
            LoadWarning::MergeClearedCells { sheet, range, count } => write!(
                f,
                "{sheet}: merge {} cleared {count} value(s) outside its top-left cell",
                a1::format_range(*range)
            ),
            LoadWarning::InvalidStyleIndex { sheet, index } => {
                write!(f, "{sheet}: style index {index} does not exist")
            }
            LoadWarning::InvalidStringIndex { sheet, cell, index } => write!(
                f,
                "{sheet}!{}: shared string index {index} does not exist",
                a1::format_cell_ref(*cell)
            ),
            LoadWarning::InvalidDate { sheet, cell, text } => write!(
                f,
                "{sheet}!{}: unreadable date {text:?}",
                a1::format_cell_ref(*cell)
            ),
            LoadWarning::InvalidSheetSetting { sheet, detail } => write!(f, "{sheet}: {detail}"),
        }
    }
}

pub fn load(package: &Package) -> Result<XlsxDocument, LoadError> {
    load_with_options(package, &LoadOptions::default())
}

/// `options.limits` only applies when the package is read from bytes.
pub fn load_with_options(
    package: &Package,
    options: &LoadOptions,
) -> Result<XlsxDocument, LoadError> {
    load_package(package.clone(), options)
}

pub(crate) fn load_package(
    package: Package,
    options: &LoadOptions,
) -> Result<XlsxDocument, LoadError> {
    let workbook_part = locate_workbook(&package)?;
    let workbook_rels = rels_for_part(&workbook_part);
    if let Some(bytes) = package.get(&workbook_rels) {
        // The graph skips malformed parts; this one is required.
        Relationships::parse(bytes).map_err(LoadError::xml(&workbook_rels))?;
    }
    let graph = RelationshipGraph::build(&package);

    let mut loader = Loader {
        package: &package,
        graph: &graph,
        options,
        workbook: Workbook::new(),
        fragments: FragmentStore::new(),
        warnings: Vec::new(),
        xf_map: Vec::new(),
        string_map: IndexRemap::default(),
    };

    let mut workbook_fragments = PartFragments::new();
    let record = WorkbookCodec::decode(
        package.part(&workbook_part)?,
        &mut workbook_fragments,
    )
    .map_err(LoadError::xml(&workbook_part))?;
    loader.fragments.insert(PartKey::Workbook, workbook_fragments);
    loader.workbook.set_date_system(if record.date1904 {
        DateSystem::Excel1904
    } else {
        DateSystem::Excel1900
    });

    let styles = loader.load_styles(&workbook_part)?;
    let shared_strings = loader.load_shared_strings(&workbook_part)?;

    let mut sheet_parts = BTreeMap::new();
    let mut opaque_sheets = Vec::new();
    // Tab index → worksheet id (`None` for sheets the model does not represent).
    let mut tabs: Vec<Option<SheetId>> = Vec::with_capacity(record.sheets.len());
    let mut last_worksheet = None;
    for entry in record.sheets {
        let edge = graph
            .edges(&workbook_part)
            .iter()
            .find(|e| e.rel.id == entry.rel_id)
            .ok_or_else(|| {
                LoadError::Reference(format!(
                    "sheet {:?} refers to missing relationship {}",
                    entry.name, entry.rel_id
                ))
            })?;
        let target = match (&edge.target_part, edge.rel.has_role(role::WORKSHEET)) {
            (Some(target), true) => target.clone(),
            _ => {
                log::debug!("keeping non-worksheet sheet {:?} opaque", entry.name);
                tabs.push(None);
                opaque_sheets.push(OpaqueSheet {
                    entry,
                    after: last_worksheet,
                });
                continue;
            }
        };
        let part = package
            .resolve_name(&target)
            .ok_or_else(|| ArchiveError::MissingRequiredPart(target.clone()))?
            .to_string();

        let id = loader.workbook.add_sheet(entry.name.clone())?;
        let mut fragments = PartFragments::new();
        let sheet = WorksheetCodec::decode(package.part(&part)?, &mut fragments)
            .map_err(LoadError::xml(&part))?;
        loader.populate_sheet(id, &entry.name, sheet)?;
        if let Some(ws) = loader.workbook.sheet_mut(id) {
            ws.set_visibility(entry.state);
        }
        loader.fragments.insert(PartKey::Worksheet(id), fragments);
        sheet_parts.insert(
            id,
            SheetPart {
                part,
                rel_id: entry.rel_id,
                xml_sheet_id: entry.sheet_id,
            },
        );
        tabs.push(Some(id));
        last_worksheet = Some(id);
    }

    if let Some(Some(active)) = tabs.get(record.active_tab as usize) {
        loader.workbook.set_active_sheet(*active)?;
    }
    for entry in record.defined_names {
        loader.load_defined_name(entry, &tabs)?;
    }

    log::debug!(
        "loaded {} worksheet(s), {} other sheet(s), {} warning(s) from {workbook_part}",
        sheet_parts.len(),
        opaque_sheets.len(),
        loader.warnings.len()
    );
    let mut workbook = loader.workbook;
    workbook.track_sheet_changes();
    Ok(XlsxDocument {
        workbook,
        fragments: loader.fragments,
        warnings: loader.warnings,
        parts: OwnedParts {
            workbook: workbook_part,
            styles,
            shared_strings,
        },
        sheet_parts,
        opaque_sheets,
        package,
    })
}

/// Resolve the workbook part through the package relationships.
fn locate_workbook(package: &Package) -> Result<String, LoadError> {
    let bytes = package
        .get(PACKAGE_RELS_PART)
        .ok_or_else(|| ArchiveError::MissingRequiredPart(PACKAGE_RELS_PART.to_string()))?;
    let rels = Relationships::parse(bytes).map_err(LoadError::xml(PACKAGE_RELS_PART))?;
    let rel = rels
        .iter()
        .find(|r| r.has_role(role::OFFICE_DOCUMENT) && !r.is_external())
        .ok_or_else(|| {
            ArchiveError::MissingRequiredPart("officeDocument relationship".to_string())
        })?;
    let target = resolve_target("", &rel.target);
    let part = package
        .resolve_name(&target)
        .ok_or(ArchiveError::MissingRequiredPart(target.clone()))?;
    Ok(part.to_string())
}

struct Loader<'a> {
    package: &'a Package,
    graph: &'a RelationshipGraph,
    options: &'a LoadOptions,
    workbook: Workbook,
    fragments: FragmentStore,
    warnings: Vec<LoadWarning>,
    /// `cellXfs` index → style id.
    xf_map: Vec<u32>,
    /// File string index → table id.
    string_map: IndexRemap,
}

impl Loader<'_> {
    fn warn(&mut self, warning: LoadWarning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    fn load_styles(&mut self, workbook_part: &str) -> Result<Option<String>, LoadError> {
        let part = self
            .graph
            .workbook_styles(workbook_part)
            .and_then(|name| self.package.resolve_name(name))
            .map(str::to_string);
        let record = match &part {
            Some(part) => {
                let mut fragments = PartFragments::new();
                let record = StylesCodec::decode(self.package.part(part)?, &mut fragments)
                    .map_err(LoadError::xml(part))?;
                self.fragments.insert(PartKey::Styles, fragments);
                record
            }
            None => StylesRecord::default(),
        };

        let mut styles = match record.cell_formats.first() {
            Some(default) => StyleTable::with_default(default.clone()),
            None => StyleTable::new(),
        };
        self.xf_map = record
            .cell_formats
            .into_iter()
            .map(|style| styles.intern(style))
            .collect();
        for named in record.named_styles {
            if let Err(err) = self.workbook.add_named_style(named) {
                log::warn!("ignoring named style: {err}");
            }
        }
        log::debug!(
            "styles: {} cell format(s) folded into {} style(s)",
            self.xf_map.len(),
            styles.len()
        );
        let strings = self.workbook.shared_strings().clone();
        self.workbook.set_tables(styles, strings)?;
        Ok(part)
    }

    fn load_shared_strings(&mut self, workbook_part: &str) -> Result<Option<String>, LoadError> {
        let Some(part) = self
            .graph
            .workbook_shared_strings(workbook_part)
            .and_then(|name| self.package.resolve_name(name))
            .map(str::to_string)
        else {
            return Ok(None);
        };
        let mut fragments = PartFragments::new();
        let record = SharedStringsCodec::decode(self.package.part(&part)?, &mut fragments)
            .map_err(LoadError::xml(&part))?;
        self.fragments.insert(PartKey::SharedStrings, fragments);
        let (table, remap) = SharedStringTable::from_entries(record.entries);
        log::debug!("shared strings: {} unique entr(ies)", table.len());
        let styles = self.workbook.styles().clone();
        self.workbook.set_tables(styles, table)?;
        self.string_map = remap;
        Ok(Some(part))
    }

    fn style_id(&mut self, sheet: &str, xf: u32) -> u32 {
        match self.xf_map.get(xf as usize) {
            Some(id) => *id,
            None if xf == 0 => 0,
            None => {
                self.warn(LoadWarning::InvalidStyleIndex {
                    sheet: sheet.to_string(),
                    index: xf,
                });
                0
            }
        }
    }

    fn populate_sheet(
        &mut self,
        id: SheetId,
        name: &str,
        record: WorksheetRecord,
    ) -> Result<(), LoadError> {
        let date_system = self.workbook.date_system();
        for cell in record.cells {
            let style = self.style_id(name, cell.style);
            let value = match cell.data {
                CellData::Value(CellValue::SharedString(index)) => {
                    match self.string_map.get(index) {
                        Some(id) => CellValue::SharedString(id),
                        None => {
                            self.warn(LoadWarning::InvalidStringIndex {
                                sheet: name.to_string(),
                                cell: cell.cell,
                                index,
                            });
                            CellValue::Empty
                        }
                    }
                }
                CellData::Value(value) => value,
                CellData::Date(text) => {
                    match parse_iso_datetime(&text).and_then(|dt| date_system.to_serial(dt)) {
                        Some(serial) => CellValue::Number(serial),
                        None => {
                            let value = CellValue::InlineString(RichText::plain(text.as_str()));
                            self.warn(LoadWarning::InvalidDate {
                                sheet: name.to_string(),
                                cell: cell.cell,
                                text,
                            });
                            value
                        }
                    }
                }
            };
            if let Err(err) = self.workbook.set_styled(id, cell.cell, value, style) {
                self.warn(LoadWarning::InvalidSheetSetting {
                    sheet: name.to_string(),
                    detail: format!("cell {}: {err}", a1::format_cell_ref(cell.cell)),
                });
            }
        }

        for range in record.merges {
            let covered = self.workbook.sheet(id).map_or(0, |ws| {
                ws.cells()
                    .filter(|(at, cell)| {
                        range.contains(*at) && *at != range.start && !cell.value.is_empty()
                    })
                    .count()
            });
            match self.workbook.merge(id, range) {
                Ok(()) if covered > 0 => self.warn(LoadWarning::MergeClearedCells {
                    sheet: name.to_string(),
                    range,
                    count: covered,
                }),
                Ok(()) => {}
                Err(ModelError::OverlappingMerge { .. }) => {
                    self.warn(LoadWarning::OverlappingMerge {
                        sheet: name.to_string(),
                        range,
                    });
                }
                Err(ModelError::InvalidMerge(_)) => self.warn(LoadWarning::InvalidMerge {
                    sheet: name.to_string(),
                    range,
                }),
                Err(err) => return Err(err.into()),
            }
        }

        let mut problems = Vec::new();
        for (col, props) in record.columns {
            let style = props.style_id.map(|xf| self.style_id(name, xf));
            let Some(ws) = self.workbook.sheet_mut(id) else {
                return Err(ModelError::SheetNotFound(id).into());
            };
            if let Err(err) = ws.set_column_width(col, props.width) {
                problems.push(err.to_string());
            }
            if let Err(err) = ws.set_column_hidden(col, props.hidden) {
                problems.push(err.to_string());
            }
            if let Err(err) = self.workbook.set_column_style(id, col, style) {
                problems.push(err.to_string());
            }
        }
        for (row, props) in record.rows {
            let style = props.style_id.map(|xf| self.style_id(name, xf));
            let Some(ws) = self.workbook.sheet_mut(id) else {
                return Err(ModelError::SheetNotFound(id).into());
            };
            if let Err(err) = ws.set_row_height(row, props.height) {
                problems.push(err.to_string());
            }
            if let Err(err) = ws.set_row_hidden(row, props.hidden) {
                problems.push(err.to_string());
            }
            if let Err(err) = self.workbook.set_row_style(id, row, style) {
                problems.push(err.to_string());
            }
        }
        if let Some(ws) = self.workbook.sheet_mut(id) {
            if let Err(err) = ws.set_frozen_panes(record.frozen) {
                problems.push(err.to_string());
            }
        }
        for detail in problems {
            self.warn(LoadWarning::InvalidSheetSetting {
                sheet: name.to_string(),
                detail,
            });
        }
        Ok(())
    }

    fn load_defined_name(
        &mut self,
        entry: DefinedNameEntry,
        tabs: &[Option<SheetId>],
    ) -> Result<(), LoadError> {
        let scope = match entry.local_sheet_id {
            None => NameScope::Workbook,
            Some(index) => match tabs.get(index as usize) {
                Some(Some(id)) => NameScope::Sheet(*id),
                _ => {
                    return self.dangling(&entry.name, &format!("#{index}"));
                }
            },
        };

        if let NameScope::Sheet(sheet) = scope {
            if entry.name.eq_ignore_ascii_case(XLNM_PRINT_AREA) {
                if let Some(areas) = self.print_areas(sheet, &entry.formula) {
                    if let Some(ws) = self.workbook.sheet_mut(sheet) {
                        ws.set_print_area(areas)?;
                    }
                    return Ok(());
                }
            } else if entry.name.eq_ignore_ascii_case(XLNM_PRINT_TITLES) {
                if let Some((rows, cols)) = self.print_titles(sheet, &entry.formula) {
                    if let Some(ws) = self.workbook.sheet_mut(sheet) {
                        ws.set_print_titles(rows, cols)?;
                    }
                    return Ok(());
                }
            }
        }

        let target = match a1::parse_area_list(&entry.formula) {
            Some(areas) => {
                let mut targets = Vec::with_capacity(areas.len());
                for (sheet_name, range) in areas {
                    match self.workbook.sheet_by_name(&sheet_name) {
                        Some(ws) => targets.push(SheetRange::new(ws.id(), range)),
                        None => return self.dangling(&entry.name, &sheet_name),
                    }
                }
                NameTarget::Ranges(targets)
            }
            None => NameTarget::Formula(entry.formula),
        };
        let name = DefinedName {
            name: entry.name,
            scope,
            target,
            hidden: entry.hidden,
            comment: entry.comment,
        };
        let label = name.name.clone();
        if let Err(err) = self.workbook.add_defined_name(name) {
            self.warn(LoadWarning::InvalidDefinedName {
                name: label,
                reason: err.to_string(),
            });
        }
        Ok(())
    }

    fn dangling(&mut self, name: &str, sheet: &str) -> Result<(), LoadError> {
        if self.options.strict_names {
            return Err(LoadError::Reference(format!(
                "defined name {name:?} refers to missing sheet {sheet:?}"
            )));
        }
        self.warn(LoadWarning::DanglingDefinedName {
            name: name.to_string(),
            sheet: sheet.to_string(),
        });
        Ok(())
    }

    /// Areas of a print-area name when every area is on `sheet`.
    fn print_areas(&self, sheet: SheetId, formula: &str) -> Option<Vec<Range>> {
        a1::parse_area_list(formula)?
            .into_iter()
            .map(|(name, range)| self.on_sheet(sheet, &name).then_some(range))
            .collect()
    }

    /// Repeated rows and columns of a print-titles name (`Sheet!$A:$B,Sheet!$1:$2`).
    fn print_titles(&self, sheet: SheetId, formula: &str) -> Option<(Option<Span>, Option<Span>)> {
        let mut rows = None;
        let mut cols = None;
        for (name, range) in a1::parse_area_list(formula)? {
            if !self.on_sheet(sheet, &name) {
                return None;
            }
            if range.is_full_rows() && rows.is_none() {
                rows = Some(Span::new(range.start.row, range.end.row));
            } else if range.is_full_cols() && cols.is_none() {
                cols = Some(Span::new(range.start.col, range.end.col));
            } else {
                return None;
            }
        }
        Some((rows, cols))
    }

    fn on_sheet(&self, sheet: SheetId, name: &str) -> bool {
        self.workbook
            .sheet_by_name(name)
            .is_some_and(|ws| ws.id() == sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn warnings_render_a1_coordinates() {
        let warning = LoadWarning::InvalidStringIndex {
            sheet: "Data".to_string(),
            cell: CellRef::new(2, 1),
            index: 99,
        };
        assert_eq!(
            warning.to_string(),
            "Data!B3: shared string index 99 does not exist"
        );
        let warning = LoadWarning::OverlappingMerge {
            sheet: "Data".to_string(),
            range: Range::from_coords(0, 0, 1, 1),
        };
        assert_eq!(warning.to_string(), "Data: merge A1:B2 overlaps another merge");
    }

    #[test]
    fn a_package_without_relationships_is_rejected() {
        let err = load(&Package::new()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Archive(ArchiveError::MissingRequiredPart(ref part)) if part == PACKAGE_RELS_PART
        ));
    }
}
