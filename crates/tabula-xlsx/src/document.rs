//! [`XlsxDocument`]: a workbook plus everything needed to write it back into the package it was
//! read from.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use tabula_model::{EditReport, ModelError, SheetChange, SheetId, StructuralEdit, Workbook};

use crate::content_types::ContentTypes;
use crate::error::{ArchiveError, LoadError, SaveError};
use crate::package::{Package, CONTENT_TYPES_PART, PACKAGE_RELS_PART};
use crate::path::rels_for_part;
use crate::preserve::{FragmentStore, PartKey};
use crate::read::{self, LoadOptions, LoadWarning};
use crate::relationships::{RelationshipGraph, Relationships};
use crate::workbook_part::SheetEntry;
use crate::write::{self, SaveOptions};

/// Part name used for the workbook of a document created from scratch.
pub(crate) const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

/// Where a worksheet lives in the package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SheetPart {
    pub part: String,
    pub rel_id: String,
    /// `sheetId` of the workbook's `<sheet>` entry.
    pub xml_sheet_id: u32,
}

/// A `<sheet>` entry the model does not represent (chart sheet, dialog sheet, macro sheet).
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct OpaqueSheet {
    pub entry: SheetEntry,
    /// Worksheet the entry follows in tab order; `None` places it before every worksheet.
    pub after: Option<SheetId>,
}

/// Parts rewritten from the model on every save.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct OwnedParts {
    pub workbook: String,
    pub styles: Option<String>,
    pub shared_strings: Option<String>,
}

/// A loaded (or new) spreadsheet document.
///
/// Edit the [`Workbook`] through [`XlsxDocument::workbook_mut`]. The document tracks the
/// workbook's sheet changes, so row/column edits and sheet renames, copies and removals made
/// there reach preserved sheet content (conditional formats, validations, hyperlinks, ...) by
/// the next save or document-level edit. The wrappers on this type do the same at once and also
/// report what happened to that content.
#[derive(Clone, Debug)]
pub struct XlsxDocument {
    pub(crate) workbook: Workbook,
    /// The package as read; parts the model does not own are written back from here unopened.
    pub(crate) package: Package,
    pub(crate) fragments: FragmentStore,
    pub(crate) parts: OwnedParts,
    pub(crate) sheet_parts: BTreeMap<SheetId, SheetPart>,
    pub(crate) opaque_sheets: Vec<OpaqueSheet>,
    pub(crate) warnings: Vec<LoadWarning>,
}

impl XlsxDocument {
    /// A document with no source package. Saving generates every part.
    pub fn new(mut workbook: Workbook) -> Self {
        workbook.track_sheet_changes();
        let stale = workbook.take_sheet_changes();
        if !stale.is_empty() {
            log::debug!("ignoring {} sheet change(s) made before the document existed", stale.len());
        }
        Self {
            workbook,
            package: Package::new(),
            fragments: FragmentStore::new(),
            parts: OwnedParts {
                workbook: DEFAULT_WORKBOOK_PART.to_string(),
                styles: None,
                shared_strings: None,
            },
            sheet_parts: BTreeMap::new(),
            opaque_sheets: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        Self::from_bytes_with_options(bytes, &LoadOptions::default())
    }

    pub fn from_bytes_with_options(bytes: &[u8], options: &LoadOptions) -> Result<Self, LoadError> {
        let package = Package::from_bytes_limited(bytes, options.limits)?;
        read::load_package(package, options)
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    /// Structural edits made through the returned reference are carried over to preserved
    /// sheet content by [`XlsxDocument::sync_preserved`], which saving runs on its own.
    pub fn workbook_mut(&mut self) -> &mut Workbook {
        &mut self.workbook
    }

    pub fn into_workbook(self) -> Workbook {
        self.workbook
    }

    /// Replay the sheet changes recorded by the workbook since the last sync against preserved
    /// sheet content.
    pub fn sync_preserved(&mut self) -> EditReport {
        let changes = self.workbook.take_sheet_changes();
        let mut report = EditReport::default();
        if changes.is_empty() {
            return report;
        }
        log::debug!("replaying {} sheet change(s) on preserved content", changes.len());

        // Sheet names as they were before the first change.
        let mut names = self.sheet_names();
        for change in changes.iter().rev() {
            match change {
                SheetChange::Edited { .. } => {}
                SheetChange::Renamed { sheet, old, .. } => {
                    names.insert(*sheet, old.clone());
                }
                SheetChange::Copied { to, .. } => {
                    names.remove(to);
                }
                SheetChange::Removed { sheet, name, .. } => {
                    names.insert(*sheet, name.clone());
                }
            }
        }

        for change in changes {
            match change {
                SheetChange::Edited { sheet, edit } => {
                    report.extend(self.fragments.apply_structural_edit(&names, sheet, &edit));
                }
                SheetChange::Renamed { sheet, old, new } => {
                    let rewritten = self.fragments.rename_sheet(&old, &new);
                    report.formulas_rewritten += rewritten;
                    log::debug!("rewrote {rewritten} preserved formula(s) after renaming {old:?}");
                    names.insert(sheet, new);
                }
                SheetChange::Copied {
                    from,
                    to,
                    from_name,
                    to_name,
                } => {
                    report.extend(self.fragments.copy_sheet(from, to, &from_name, &to_name));
                    for opaque in &mut self.opaque_sheets {
                        if opaque.after == Some(from) {
                            opaque.after = Some(to);
                        }
                    }
                    names.insert(to, to_name);
                }
                SheetChange::Removed {
                    sheet,
                    name,
                    previous,
                } => {
                    report.extend(self.fragments.remove_sheet(sheet, &name));
                    for opaque in &mut self.opaque_sheets {
                        if opaque.after == Some(sheet) {
                            opaque.after = previous;
                        }
                    }
                    names.remove(&sheet);
                }
            }
        }
        report
    }

    /// Problems recovered from while loading.
    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    /// The source package. Owned parts in it are stale once the workbook is edited.
    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn fragments(&self) -> &FragmentStore {
        &self.fragments
    }

    /// Whether `part` is regenerated from the model on save (as opposed to copied unopened).
    pub fn is_owned_part(&self, part: &str) -> bool {
        let part = part.trim_start_matches('/');
        let same = |name: &str| name.eq_ignore_ascii_case(part);
        same(CONTENT_TYPES_PART)
            || same(PACKAGE_RELS_PART)
            || same(&self.parts.workbook)
            || same(&rels_for_part(&self.parts.workbook))
            || self.parts.styles.as_deref().is_some_and(same)
            || self.parts.shared_strings.as_deref().is_some_and(same)
            || self.sheet_parts.values().any(|p| same(&p.part))
    }

    /// Parts carried through saves without being interpreted, in archive order.
    pub fn preserved_parts(&self) -> Vec<&str> {
        self.package
            .part_names()
            .filter(|name| !self.is_owned_part(name))
            .collect()
    }

    pub fn save(&self) -> Result<Package, SaveError> {
        self.save_with_options(&SaveOptions::default())
    }

    pub fn save_with_options(&self, options: &SaveOptions) -> Result<Package, SaveError> {
        if self.workbook.pending_sheet_changes().is_empty() {
            return write::save(self, options);
        }
        let mut synced = self.clone();
        synced.sync_preserved();
        write::save(&synced, options)
    }

    pub fn save_to_bytes(&self) -> Result<Vec<u8>, SaveError> {
        Ok(self.save()?.write()?)
    }

    // ----- structural edits -----

    pub fn insert_rows(&mut self, sheet: SheetId, row: u32, count: u32) -> Result<EditReport, ModelError> {
        self.apply_structural_edit(sheet, StructuralEdit::InsertRows { row, count })
    }

    pub fn delete_rows(&mut self, sheet: SheetId, row: u32, count: u32) -> Result<EditReport, ModelError> {
        self.apply_structural_edit(sheet, StructuralEdit::DeleteRows { row, count })
    }

    pub fn insert_cols(&mut self, sheet: SheetId, col: u32, count: u32) -> Result<EditReport, ModelError> {
        self.apply_structural_edit(sheet, StructuralEdit::InsertCols { col, count })
    }

    pub fn delete_cols(&mut self, sheet: SheetId, col: u32, count: u32) -> Result<EditReport, ModelError> {
        self.apply_structural_edit(sheet, StructuralEdit::DeleteCols { col, count })
    }

    /// Apply `edit` to the model, then to the ranges and formulas of preserved sheet content.
    pub fn apply_structural_edit(
        &mut self,
        sheet: SheetId,
        edit: StructuralEdit,
    ) -> Result<EditReport, ModelError> {
        let mut report = self.sync_preserved();
        report.extend(self.workbook.apply_structural_edit(sheet, edit)?);
        report.extend(self.sync_preserved());
        Ok(report)
    }

    pub fn rename_sheet(&mut self, sheet: SheetId, name: impl Into<String>) -> Result<(), ModelError> {
        self.workbook.rename_sheet(sheet, name)?;
        self.sync_preserved();
        Ok(())
    }

    /// Duplicate a sheet right after the source. Preserved content bound to other package parts
    /// (drawings, tables, hyperlinks with a relationship id) is not copied and is reported.
    pub fn copy_sheet(&mut self, sheet: SheetId) -> Result<(SheetId, EditReport), ModelError> {
        self.sync_preserved();
        let copy = self.workbook.copy_sheet(sheet)?;
        Ok((copy, self.sync_preserved()))
    }

    /// Remove a sheet. Its part is dropped from the package on the next save.
    pub fn remove_sheet(&mut self, sheet: SheetId) -> Result<EditReport, ModelError> {
        let mut report = self.sync_preserved();
        report.extend(self.workbook.remove_sheet(sheet)?);
        report.extend(self.sync_preserved());
        Ok(report)
    }

    /// Remove a preserved part, its own relationships part, its content-type override and every
    /// relationship that targets it. Owned parts cannot be removed; returns whether anything was.
    pub fn remove_preserved_part(&mut self, part: &str) -> Result<bool, ArchiveError> {
        self.sync_preserved();
        if self.is_owned_part(part) {
            log::warn!("refusing to remove owned part {part}");
            return Ok(false);
        }
        let Some(stored) = self.package.resolve_name(part).map(str::to_string) else {
            return Ok(false);
        };

        let graph = RelationshipGraph::build(&self.package);
        let mut by_source: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (source, id) in graph.sources_of(&stored) {
            by_source
                .entry(source.to_string())
                .or_default()
                .push(id.to_string());
        }
        for (source, ids) in &by_source {
            let rels_part = rels_for_part(source);
            if let Some(bytes) = self.package.get(&rels_part) {
                let mut rels = Relationships::parse(bytes)
                    .map_err(|err| ArchiveError::CorruptArchive(format!("{rels_part}: {err}")))?;
                rels.retain(|r| !ids.contains(&r.id));
                self.package.set_part(rels_part, rels.to_xml());
            }
            if let Some(key) = self.part_key(source) {
                let fragments = self.fragments.entry(key);
                let dropped = fragments.retain_children(|f| !references_any(&f.xml, ids));
                if dropped > 0 {
                    log::warn!("dropped {dropped} preserved element(s) of {source} that referenced {stored}");
                }
            }
        }

        self.package.remove_part(&stored);
        self.package.remove_part(&rels_for_part(&stored));
        if let Some(bytes) = self.package.get(CONTENT_TYPES_PART) {
            let mut types = ContentTypes::parse(bytes)
                .map_err(|err| ArchiveError::CorruptArchive(format!("{CONTENT_TYPES_PART}: {err}")))?;
            if types.remove_override(&stored) {
                self.package.set_part(CONTENT_TYPES_PART, types.to_xml());
            }
        }
        log::debug!("removed preserved part {stored}");
        Ok(true)
    }

    fn part_key(&self, part: &str) -> Option<PartKey> {
        if part.eq_ignore_ascii_case(&self.parts.workbook) {
            return Some(PartKey::Workbook);
        }
        self.sheet_parts
            .iter()
            .find(|(_, p)| p.part.eq_ignore_ascii_case(part))
            .map(|(id, _)| PartKey::Worksheet(*id))
    }

    fn sheet_names(&self) -> BTreeMap<SheetId, String> {
        self.workbook
            .sheets()
            .iter()
            .map(|ws| (ws.id(), ws.name().to_string()))
            .collect()
    }
}

/// Whether any element of `xml` carries a namespaced attribute (`r:id`, `r:embed`, ...) whose
/// value is one of `ids`.
fn references_any(xml: &str, ids: &[String]) -> bool {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let hit = e.attributes().with_checks(false).flatten().any(|attr| {
                    attr.key.prefix().is_some()
                        && attr
                            .unescape_value()
                            .is_ok_and(|value| ids.iter().any(|id| *id == value))
                });
                if hit {
                    return true;
                }
            }
            Ok(Event::Eof) | Err(_) => return false,
            Ok(_) => {}
        }
    }
}
