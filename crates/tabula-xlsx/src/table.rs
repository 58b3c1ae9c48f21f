//! Worksheet tables (`xl/tables/tableN.xml`): listing the tables of a document and adding new
//! ones.
//!
//! A table is its own part, reached from the worksheet through a relationship and referenced
//! from the worksheet's `<tableParts>`. The worksheet keeps that element as a preserved
//! fragment; the table part itself is carried through saves unopened like any other part.

use std::collections::BTreeSet;

use roxmltree::Node;
use tabula_model::{a1, validate_defined_name, CellRef, CellValue, ModelError, Range, SheetId};

use crate::content_types::{ContentTypes, CT_TABLE, CT_WORKSHEET};
use crate::document::{SheetPart, XlsxDocument};
use crate::error::{TableError, XmlError};
use crate::package::CONTENT_TYPES_PART;
use crate::path::{rels_for_part, relative_target};
use crate::preserve::PartKey;
use crate::relationships::{role, RelationshipGraph, Relationships, REL_TYPE_TABLE, REL_TYPE_WORKSHEET};
use crate::worksheet::ORDER;
use crate::xml::{self, format_number, push_attr, NS_MAIN, XML_DECLARATION};

const TABLE_DIR: &str = "xl/tables";
const DEFAULT_TABLE_STYLE: &str = "TableStyleMedium2";

/// A table found in (or added to) a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableInfo {
    /// Part holding the table definition.
    pub part: String,
    pub sheet: SheetId,
    /// Workbook-wide `id` of the table.
    pub id: u32,
    pub name: String,
    /// Name used in structured references.
    pub display_name: String,
    /// Header row included.
    pub range: Range,
    pub columns: Vec<String>,
}

fn parse_table(part: &str, sheet: SheetId, bytes: &[u8]) -> Result<TableInfo, XmlError> {
    let (_, doc) = xml::parse_document(bytes)?;
    let root = xml::expect_root(&doc, "table")?;
    let id = xml::attr_u32(root, "id")?.ok_or_else(|| XmlError::missing("table", "id"))?;
    let name = xml::required_attr(root, "name")?.to_string();
    let display_name = root.attribute("displayName").unwrap_or(&name).to_string();
    let reference = xml::required_attr(root, "ref")?;
    let range = a1::parse_range(reference).map_err(|_| XmlError::invalid("table@ref", reference))?;
    let columns = xml::child_named(root, "tableColumns")
        .map(|cols| {
            xml::children_named(cols, "tableColumn")
                .filter_map(|c: Node<'_, '_>| c.attribute("name"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(TableInfo {
        part: part.to_string(),
        sheet,
        id,
        name,
        display_name,
        range,
        columns,
    })
}

fn table_xml(table: &TableInfo) -> Vec<u8> {
    let reference = a1::format_range(table.range);
    let mut out = String::with_capacity(512 + 48 * table.columns.len());
    out.push_str(XML_DECLARATION);
    out.push_str("\n<table");
    push_attr(&mut out, "xmlns", NS_MAIN);
    push_attr(&mut out, "id", &table.id.to_string());
    push_attr(&mut out, "name", &table.name);
    push_attr(&mut out, "displayName", &table.display_name);
    push_attr(&mut out, "ref", &reference);
    push_attr(&mut out, "totalsRowShown", "0");
    out.push_str("><autoFilter");
    push_attr(&mut out, "ref", &reference);
    out.push_str("/><tableColumns");
    push_attr(&mut out, "count", &table.columns.len().to_string());
    out.push('>');
    for (i, column) in table.columns.iter().enumerate() {
        out.push_str("<tableColumn");
        push_attr(&mut out, "id", &(i + 1).to_string());
        push_attr(&mut out, "name", column);
        out.push_str("/>");
    }
    out.push_str("</tableColumns><tableStyleInfo");
    push_attr(&mut out, "name", DEFAULT_TABLE_STYLE);
    for (flag, value) in [
        ("showFirstColumn", "0"),
        ("showLastColumn", "0"),
        ("showRowStripes", "1"),
        ("showColumnStripes", "0"),
    ] {
        push_attr(&mut out, flag, value);
    }
    out.push_str("/></table>");
    out.into_bytes()
}

fn read_rels(doc: &XlsxDocument, part: &str) -> Result<Relationships, TableError> {
    match doc.package.get(part) {
        Some(bytes) => Relationships::parse(bytes).map_err(TableError::xml(part)),
        None => Ok(Relationships::new()),
    }
}

/// A header cell and the column name it ends up with.
struct Header {
    cell: CellRef,
    name: String,
    /// The cell is rewritten to hold `name` as text.
    write: bool,
}

impl XlsxDocument {
    /// Tables of the document's worksheets, in sheet and relationship order. Table parts that
    /// cannot be read are skipped.
    pub fn tables(&self) -> Vec<TableInfo> {
        let graph = RelationshipGraph::build(&self.package);
        let mut tables = Vec::new();
        for ws in self.workbook.sheets() {
            let Some(placement) = self.sheet_parts.get(&ws.id()) else {
                continue;
            };
            for edge in graph.edges(&placement.part) {
                if !edge.rel.has_role(role::TABLE) {
                    continue;
                }
                let Some(target) = edge.target_part.as_deref() else {
                    continue;
                };
                let Some(bytes) = self.package.get(target) else {
                    log::warn!("{} refers to missing table part {target}", placement.part);
                    continue;
                };
                match parse_table(target, ws.id(), bytes) {
                    Ok(table) => tables.push(table),
                    Err(err) => log::warn!("skipping unreadable table part {target}: {err}"),
                }
            }
        }
        tables
    }

    /// Turn `range` of `sheet` into a table called `name`. The first row of the range is the
    /// header row: empty header cells become `ColumnN`, numbers become text and repeated names
    /// get a numeric suffix, all written back into the cells.
    pub fn add_table(
        &mut self,
        sheet: SheetId,
        range: Range,
        name: &str,
    ) -> Result<TableInfo, TableError> {
        self.sync_preserved();
        validate_defined_name(name).map_err(|reason| TableError::InvalidName {
            name: name.to_string(),
            reason,
        })?;
        if self.workbook.sheet(sheet).is_none() {
            return Err(ModelError::SheetNotFound(sheet).into());
        }
        if !range.end.in_bounds() {
            return Err(TableError::InvalidRange {
                range,
                reason: "outside the sheet grid".to_string(),
            });
        }
        if range.height() < 2 {
            return Err(TableError::InvalidRange {
                range,
                reason: "a table needs a header row and at least one data row".to_string(),
            });
        }

        let existing = self.tables();
        let duplicate = existing
            .iter()
            .any(|t| t.name.eq_ignore_ascii_case(name) || t.display_name.eq_ignore_ascii_case(name))
            || self
                .workbook
                .defined_names()
                .iter()
                .any(|d| d.name.eq_ignore_ascii_case(name));
        if duplicate {
            return Err(TableError::DuplicateName(name.to_string()));
        }
        if let Some(other) = existing
            .iter()
            .find(|t| t.sheet == sheet && t.range.intersects(&range))
        {
            return Err(TableError::Overlap {
                range,
                table: other.name.clone(),
            });
        }
        if let Some(merge) = self
            .workbook
            .merged_regions(sheet)?
            .iter()
            .find(|m| m.intersects(&range))
        {
            return Err(TableError::MergedCells {
                range,
                merge: *merge,
            });
        }
        let headers = self.header_names(sheet, range)?;

        // Everything fallible is read before the document is touched.
        let mut types = match self.package.get(CONTENT_TYPES_PART) {
            Some(bytes) => ContentTypes::parse(bytes).map_err(TableError::xml(CONTENT_TYPES_PART))?,
            None => ContentTypes::minimal(),
        };
        let workbook_rels_part = rels_for_part(&self.parts.workbook);
        let mut workbook_rels = read_rels(self, &workbook_rels_part)?;
        let placement = match self.sheet_parts.get(&sheet) {
            Some(placement) => placement.clone(),
            None => self.new_sheet_part(&mut workbook_rels, &mut types),
        };
        let sheet_rels_part = rels_for_part(&placement.part);
        let mut sheet_rels = read_rels(self, &sheet_rels_part)?;
        let slot = ORDER.slot("tableParts").unwrap_or(ORDER.len());
        let mut fragments = self
            .fragments
            .get(PartKey::Worksheet(sheet))
            .cloned()
            .unwrap_or_default();

        let table_part = (1u32..)
            .map(|n| format!("{TABLE_DIR}/table{n}.xml"))
            .find(|candidate| !self.package.contains(candidate))
            .unwrap_or_else(|| format!("{TABLE_DIR}/table.xml"));
        let rel_id = sheet_rels.push(REL_TYPE_TABLE, &relative_target(&placement.part, &table_part));
        fragments
            .push_table_part(slot, &rel_id)
            .map_err(TableError::xml(&placement.part))?;

        for header in headers.iter().filter(|h| h.write) {
            self.workbook.set_string(sheet, header.cell, header.name.as_str())?;
        }
        let table = TableInfo {
            part: table_part,
            sheet,
            id: existing.iter().map(|t| t.id).max().unwrap_or(0) + 1,
            name: name.to_string(),
            display_name: name.to_string(),
            range,
            columns: headers.into_iter().map(|h| h.name).collect(),
        };
        types.set_override(&table.part, CT_TABLE);
        self.package.set_part(table.part.clone(), table_xml(&table));
        self.package.set_part(sheet_rels_part, sheet_rels.to_xml());
        self.package.set_part(CONTENT_TYPES_PART, types.to_xml());
        if !self.sheet_parts.contains_key(&sheet) {
            self.package.set_part(workbook_rels_part, workbook_rels.to_xml());
            self.sheet_parts.insert(sheet, placement);
        }
        self.fragments.insert(PartKey::Worksheet(sheet), fragments);
        log::debug!(
            "added table {:?} over {} in {}",
            table.name,
            a1::format_range(range),
            table.part
        );
        Ok(table)
    }

    fn header_names(&self, sheet: SheetId, range: Range) -> Result<Vec<Header>, TableError> {
        let mut used: BTreeSet<String> = BTreeSet::new();
        let mut headers = Vec::with_capacity(range.width() as usize);
        for (i, col) in (range.start.col..=range.end.col).enumerate() {
            let cell = CellRef::new(range.start.row, col);
            let (base, mut write) = match self.workbook.get(sheet, cell)? {
                CellValue::Empty => (format!("Column{}", i + 1), true),
                CellValue::Number(n) => (format_number(*n), true),
                CellValue::SharedString(_) | CellValue::InlineString(_) => {
                    let text = self.workbook.text(sheet, cell)?.unwrap_or_default();
                    if text.trim().is_empty() {
                        (format!("Column{}", i + 1), true)
                    } else {
                        (text.into_owned(), false)
                    }
                }
                _ => return Err(TableError::InvalidHeader { cell }),
            };
            let mut name = base.clone();
            let mut suffix = 2;
            while !used.insert(name.to_lowercase()) {
                name = format!("{base}{suffix}");
                suffix += 1;
                write = true;
            }
            headers.push(Header { cell, name, write });
        }
        Ok(headers)
    }

    /// Part, relationship and `sheetId` for a sheet that has never been saved.
    fn new_sheet_part(&self, rels: &mut Relationships, types: &mut ContentTypes) -> SheetPart {
        let dir = self
            .sheet_parts
            .values()
            .next()
            .and_then(|p| p.part.rsplit_once('/').map(|(dir, _)| dir.to_string()))
            .unwrap_or_else(|| "xl/worksheets".to_string());
        let part = (1u32..)
            .map(|n| format!("{dir}/sheet{n}.xml"))
            .find(|candidate| {
                !self.package.contains(candidate)
                    && !self
                        .sheet_parts
                        .values()
                        .any(|p| p.part.eq_ignore_ascii_case(candidate))
            })
            .unwrap_or_else(|| format!("{dir}/sheet.xml"));
        let rel_id = rels.push(REL_TYPE_WORKSHEET, &relative_target(&self.parts.workbook, &part));
        types.set_override(&part, CT_WORKSHEET);
        let xml_sheet_id = self
            .sheet_parts
            .values()
            .map(|p| p.xml_sheet_id)
            .chain(self.opaque_sheets.iter().map(|o| o.entry.sheet_id))
            .max()
            .map_or(1, |max| max + 1);
        log::debug!("reserved {part} for a sheet that has not been saved yet");
        SheetPart {
            part,
            rel_id,
            xml_sheet_id,
        }
    }
}
