//! Round-trip preservation of XML the model does not represent.
//!
//! Each owned part (workbook, worksheets, styles, shared strings) keeps a [`PartFragments`]
//! side table: the root element's attributes, leftover attributes of partially modeled elements
//! and every unmodeled child element as raw text anchored to a slot in the part's schema order.
//! Worksheets also keep per-cell and per-row markup keyed by position, and the parts of
//! `<sheetViews>` the model has no field for.
//! Structural edits rewrite the ranges and formulas inside worksheet fragments so they keep
//! pointing at the same cells.

use std::collections::BTreeMap;
use std::mem::Discriminant;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use tabula_model::formula_rewrite;
use tabula_model::{
    a1, CellRef, CellValue, EditReport, FrozenPane, LossyEditKind, Range, RangeShift, SheetId,
    StructuralEdit,
};

use crate::error::XmlError;
use crate::xml::{escape_attr, escape_text, parse_raw_attrs, RawAttr, NS_REL};

/// Owned parts whose unmodeled content is preserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartKey {
    Workbook,
    Worksheet(SheetId),
    Styles,
    SharedStrings,
}

/// An unmodeled child element of a part's root, kept as source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    /// Index into the part's schema child order; emitted after the modeled content of that slot.
    pub slot: usize,
    /// Qualified element name as written (`hyperlinks`, `mc:AlternateContent`).
    pub name: String,
    pub xml: String,
}

/// Markup of one cell the model does not represent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellMarkup {
    /// Kind of value the cell was read with. The markup is written back only while the cell
    /// still holds a value of that kind.
    pub kind: Discriminant<CellValue>,
    /// Unmodeled `<c>` attributes (`cm`, `vm`, `ph`, ...).
    pub attrs: Vec<RawAttr>,
    /// Unmodeled `<f>` attributes (`ca`, `aca`, ...).
    pub formula_attrs: Vec<RawAttr>,
    /// A formula with no model counterpart (what-if data tables), as written.
    pub opaque_formula: Option<String>,
}

impl CellMarkup {
    pub fn new(kind: Discriminant<CellValue>) -> Self {
        Self {
            kind,
            attrs: Vec::new(),
            formula_attrs: Vec::new(),
            opaque_formula: None,
        }
    }

    pub fn applies_to(&self, value: &CellValue) -> bool {
        std::mem::discriminant(value) == self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty() && self.formula_attrs.is_empty() && self.opaque_formula.is_none()
    }
}

/// The parts of `<sheetViews>` the model does not represent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SheetViewMarkup {
    /// Frozen pane the view was read with. The children below are written back verbatim while
    /// the sheet still has exactly this pane.
    pub frozen: Option<FrozenPane>,
    /// Child elements of the first `<sheetView>` as `(local name, markup)`.
    pub children: Vec<(String, String)>,
    /// Further `<sheetView>` elements and the `extLst` of `<sheetViews>`.
    pub trailing: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartFragments {
    root_attrs: Option<String>,
    element_attrs: BTreeMap<String, Vec<Vec<RawAttr>>>,
    children: Vec<Fragment>,
    cells: BTreeMap<CellRef, CellMarkup>,
    rows: BTreeMap<u32, Vec<RawAttr>>,
    sheet_view: Option<SheetViewMarkup>,
}

impl PartFragments {
    pub const fn new() -> Self {
        Self {
            root_attrs: None,
            element_attrs: BTreeMap::new(),
            children: Vec::new(),
            cells: BTreeMap::new(),
            rows: BTreeMap::new(),
            sheet_view: None,
        }
    }

    pub fn set_cell_markup(&mut self, cell: CellRef, markup: CellMarkup) {
        if markup.is_empty() {
            self.cells.remove(&cell);
        } else {
            self.cells.insert(cell, markup);
        }
    }

    pub fn cell_markup(&self, cell: CellRef) -> Option<&CellMarkup> {
        self.cells.get(&cell)
    }

    /// Unmodeled `<row>` attributes (`spans`, `x14ac:dyDescent`, `outlineLevel`, ...).
    pub fn set_row_attrs(&mut self, row: u32, attrs: Vec<RawAttr>) {
        if attrs.is_empty() {
            self.rows.remove(&row);
        } else {
            self.rows.insert(row, attrs);
        }
    }

    pub fn row_attrs(&self, row: u32) -> &[RawAttr] {
        self.rows.get(&row).map(Vec::as_slice).unwrap_or_default()
    }

    /// Rows that carry unmodeled attributes.
    pub fn marked_rows(&self) -> impl Iterator<Item = u32> + '_ {
        self.rows.keys().copied()
    }

    pub fn set_sheet_view(&mut self, markup: SheetViewMarkup) {
        self.sheet_view = Some(markup);
    }

    pub fn sheet_view(&self) -> Option<&SheetViewMarkup> {
        self.sheet_view.as_ref()
    }

    /// Prefix bound to the relationships namespace on the part's root, if any.
    pub fn relationship_prefix(&self) -> Option<String> {
        let Some(raw) = self.root_attrs.as_deref() else {
            return Some("r".to_string());
        };
        let attrs = parse_raw_attrs(&format!("<root{raw}>")).ok()?;
        attrs
            .into_iter()
            .find(|a| a.value == NS_REL && a.name.starts_with("xmlns:"))
            .map(|a| a.name["xmlns:".len()..].to_string())
    }

    /// Reference relationship `rel_id` from the part's `<tableParts>`, creating the element at
    /// `slot` when the part has none.
    pub(crate) fn push_table_part(&mut self, slot: usize, rel_id: &str) -> Result<(), XmlError> {
        let new_part = match self.relationship_prefix() {
            Some(prefix) => format!("<tablePart {prefix}:id=\"{}\"/>", escape_attr(rel_id)),
            None => format!(
                "<tablePart xmlns:r=\"{NS_REL}\" r:id=\"{}\"/>",
                escape_attr(rel_id)
            ),
        };
        let existing = self
            .children
            .iter()
            .position(|f| local_name(&f.name) == "tableParts");
        let mut parts = Vec::new();
        if let Some(index) = existing {
            let mut reader = Reader::from_str(&self.children[index].xml);
            loop {
                match reader.read_event()? {
                    Event::Empty(e) if e.local_name().as_ref() == b"tablePart" => {
                        parts.push(format!("<{}/>", String::from_utf8_lossy(&e)));
                    }
                    Event::Eof => break,
                    _ => {}
                }
            }
        }
        parts.push(new_part);
        let xml = format!(
            "<tableParts count=\"{}\">{}</tableParts>",
            parts.len(),
            parts.concat()
        );
        match existing {
            Some(index) => {
                self.children[index].xml = xml;
                self.children[index].name = "tableParts".to_string();
            }
            None => self.push_child(slot, "tableParts", &xml),
        }
        Ok(())
    }

    /// Move cell and row markup along with the cells of the edited sheet.
    fn shift_grid(&mut self, edit: &StructuralEdit) {
        let cells = std::mem::take(&mut self.cells);
        self.cells = cells
            .into_iter()
            .filter_map(|(at, markup)| edit.shift_cell(at).map(|to| (to, markup)))
            .collect();
        if edit.is_rows() {
            let rows = std::mem::take(&mut self.rows);
            self.rows = rows
                .into_iter()
                .filter_map(|(row, attrs)| edit.shift_index(row).map(|to| (to, attrs)))
                .collect();
        } else {
            // Column spans describe the old grid.
            for attrs in self.rows.values_mut() {
                attrs.retain(|a| a.name != "spans");
            }
            self.rows.retain(|_, attrs| !attrs.is_empty());
        }
    }

    /// Raw root attribute text (leading space included), if the part was read from a file.
    pub fn root_attrs(&self) -> Option<&str> {
        self.root_attrs.as_deref()
    }

    pub fn set_root_attrs(&mut self, attrs: String) {
        self.root_attrs = Some(attrs);
    }

    /// Record the unmodeled attributes of the next occurrence of `element`.
    pub fn push_element_attrs(&mut self, element: &str, attrs: Vec<RawAttr>) {
        self.element_attrs
            .entry(element.to_string())
            .or_default()
            .push(attrs);
    }

    /// Unmodeled attributes of the `index`-th occurrence of `element`.
    pub fn element_attrs(&self, element: &str, index: usize) -> &[RawAttr] {
        self.element_attrs
            .get(element)
            .and_then(|all| all.get(index))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn push_child(&mut self, slot: usize, name: &str, xml: &str) {
        self.children.push(Fragment {
            slot,
            name: name.to_string(),
            xml: xml.to_string(),
        });
    }

    pub fn children(&self) -> &[Fragment] {
        &self.children
    }

    pub fn children_at(&self, slot: usize) -> impl Iterator<Item = &Fragment> {
        self.children.iter().filter(move |f| f.slot == slot)
    }

    /// Keep the child fragments matching `keep`; returns how many were dropped.
    pub fn retain_children(&mut self, mut keep: impl FnMut(&Fragment) -> bool) -> usize {
        let before = self.children.len();
        self.children.retain(|f| keep(f));
        before - self.children.len()
    }

    /// Whether any fragment has the given qualified name.
    pub fn has_child(&self, name: &str) -> bool {
        self.children.iter().any(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.root_attrs.is_none()
            && self.element_attrs.is_empty()
            && self.children.is_empty()
            && self.cells.is_empty()
            && self.rows.is_empty()
            && self.sheet_view.is_none()
    }

    /// Append every fragment anchored at `slot` to `out`.
    pub(crate) fn emit_slot(&self, slot: usize, out: &mut String) {
        for fragment in self.children_at(slot) {
            out.push_str(&fragment.xml);
        }
    }
}

/// Schema child order of a part's root element.
pub(crate) struct SchemaOrder(pub &'static [&'static str]);

impl SchemaOrder {
    pub fn slot(&self, local_name: &str) -> Option<usize> {
        self.0.iter().position(|n| *n == local_name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Tracks the slot of the last known element seen while walking a root's children.
    pub fn anchor(&self, local_name: &str, current: &mut usize) -> usize {
        if let Some(slot) = self.slot(local_name) {
            *current = slot;
        }
        *current
    }
}

fn local_name(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

/// Qualified element name of a raw start tag.
pub(crate) fn qualified_name(start_tag: &str) -> &str {
    let body = start_tag.trim_start_matches('<');
    let end = body
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(body.len());
    &body[..end]
}

/// Preserved content of every owned part of a document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FragmentStore {
    parts: BTreeMap<PartKey, PartFragments>,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: PartKey) -> Option<&PartFragments> {
        self.parts.get(&key)
    }

    pub fn insert(&mut self, key: PartKey, fragments: PartFragments) {
        self.parts.insert(key, fragments);
    }

    pub fn remove(&mut self, key: PartKey) -> Option<PartFragments> {
        self.parts.remove(&key)
    }

    pub fn entry(&mut self, key: PartKey) -> &mut PartFragments {
        self.parts.entry(key).or_default()
    }

    /// Shift ranges in the edited sheet's fragments and rewrite formulas in every worksheet's
    /// fragments. `sheet_names` maps worksheet ids to their current names.
    pub fn apply_structural_edit(
        &mut self,
        sheet_names: &BTreeMap<SheetId, String>,
        edited: SheetId,
        edit: &StructuralEdit,
    ) -> EditReport {
        let mut report = EditReport::default();
        let Some(edit_sheet) = sheet_names.get(&edited) else {
            return report;
        };
        for (key, fragments) in &mut self.parts {
            let PartKey::Worksheet(host) = *key else {
                continue;
            };
            let Some(host_name) = sheet_names.get(&host) else {
                continue;
            };
            let mode = Mode::Edit {
                edit,
                shift_ranges: host == edited,
                host: host_name,
                edit_sheet,
            };
            rewrite_children(fragments, &mode, host, &mut report);
            if host == edited {
                fragments.shift_grid(edit);
            }
        }
        report
    }

    /// Rewrite sheet-qualified references in worksheet fragments after a rename.
    pub fn rename_sheet(&mut self, old: &str, new: &str) -> usize {
        let mut report = EditReport::default();
        for (key, fragments) in &mut self.parts {
            if let PartKey::Worksheet(host) = *key {
                rewrite_children(fragments, &Mode::Rename { old, new }, host, &mut report);
            }
        }
        report.formulas_rewritten
    }

    /// Drop a removed sheet's fragments and turn references to it into `#REF!` elsewhere.
    pub fn remove_sheet(&mut self, sheet: SheetId, name: &str) -> EditReport {
        let mut report = EditReport::default();
        self.parts.remove(&PartKey::Worksheet(sheet));
        for (key, fragments) in &mut self.parts {
            if let PartKey::Worksheet(host) = *key {
                rewrite_children(fragments, &Mode::Invalidate { sheet: name }, host, &mut report);
            }
        }
        report
    }

    /// Give `to` a copy of `from`'s fragments. Content that refers to other package parts by
    /// relationship id cannot be shared between sheets and is dropped.
    pub fn copy_sheet(&mut self, from: SheetId, to: SheetId, old: &str, new: &str) -> EditReport {
        let mut report = EditReport::default();
        let Some(mut copy) = self.parts.get(&PartKey::Worksheet(from)).cloned() else {
            return report;
        };
        rewrite_children(&mut copy, &Mode::Copy { old, new }, to, &mut report);
        self.parts.insert(PartKey::Worksheet(to), copy);
        report
    }
}

enum Mode<'a> {
    Edit {
        edit: &'a StructuralEdit,
        shift_ranges: bool,
        host: &'a str,
        edit_sheet: &'a str,
    },
    Rename {
        old: &'a str,
        new: &'a str,
    },
    Invalidate {
        sheet: &'a str,
    },
    Copy {
        old: &'a str,
        new: &'a str,
    },
}

impl Mode<'_> {
    fn shift(&self) -> Option<&StructuralEdit> {
        match self {
            Mode::Edit {
                edit,
                shift_ranges: true,
                ..
            } => Some(edit),
            _ => None,
        }
    }

    /// Rewritten formula text, or `None` when unaffected.
    fn formula(&self, text: &str) -> Option<String> {
        match self {
            Mode::Edit {
                edit,
                host,
                edit_sheet,
                ..
            } => {
                let outcome = formula_rewrite::rewrite_for_edit(text, Some(host), edit_sheet, edit);
                outcome.changed.then_some(outcome.formula)
            }
            Mode::Rename { old, new } | Mode::Copy { old, new } => {
                formula_rewrite::rename_sheet(text, old, new)
            }
            Mode::Invalidate { sheet } => formula_rewrite::invalidate_sheet(text, sheet),
        }
    }
}

fn rewrite_children(
    fragments: &mut PartFragments,
    mode: &Mode<'_>,
    sheet: SheetId,
    report: &mut EditReport,
) {
    for (cell, markup) in &mut fragments.cells {
        let Some(xml) = &markup.opaque_formula else {
            continue;
        };
        match rewrite_fragment(xml, mode) {
            Ok(outcome) => {
                report.formulas_rewritten += outcome.formulas_rewritten;
                for kind in outcome.diagnostics {
                    report.push(sheet, kind);
                }
                match outcome.xml {
                    Rewritten::Unchanged => {}
                    Rewritten::Changed(xml) => markup.opaque_formula = Some(xml),
                    Rewritten::Dropped => {
                        log::debug!("dropped preserved formula of {cell} on sheet {sheet}");
                        markup.opaque_formula = None;
                    }
                }
            }
            Err(err) => log::warn!("preserved formula of {cell} on sheet {sheet}: {err}"),
        }
    }
    let children = std::mem::take(&mut fragments.children);
    for mut fragment in children {
        match rewrite_fragment(&fragment.xml, mode) {
            Ok(outcome) => {
                report.formulas_rewritten += outcome.formulas_rewritten;
                for kind in outcome.diagnostics {
                    report.push(sheet, kind);
                }
                match outcome.xml {
                    Rewritten::Unchanged => fragments.children.push(fragment),
                    Rewritten::Changed(xml) => {
                        fragment.xml = xml;
                        fragments.children.push(fragment);
                    }
                    Rewritten::Dropped => {
                        log::debug!("dropped preserved <{}> from sheet {sheet}", fragment.name);
                    }
                }
            }
            Err(err) => {
                log::warn!(
                    "preserved <{}> on sheet {sheet} could not be rewritten: {err}",
                    fragment.name
                );
                fragments.children.push(fragment);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Rewritten {
    Unchanged,
    Changed(String),
    Dropped,
}

#[derive(Debug)]
struct FragmentOutcome {
    xml: Rewritten,
    diagnostics: Vec<LossyEditKind>,
    formulas_rewritten: usize,
}

const FORMULA_ELEMENTS: &[&[u8]] = &[b"formula", b"formula1", b"formula2", b"f"];
const RANGE_ATTRS: &[&[u8]] = &[b"ref", b"sqref", b"r1", b"r2"];

struct Frame {
    local: Vec<u8>,
    /// Raw start tag body (name and attributes, without `<` and `>`).
    start: Vec<u8>,
    content: Vec<u8>,
    drop: bool,
    /// Set on a `sqref` element whose ranges were all deleted.
    drops_parent: bool,
    kept_children: usize,
    dropped_children: usize,
}

struct Rewriter<'m, 'a> {
    mode: &'m Mode<'a>,
    diagnostics: Vec<LossyEditKind>,
    formulas_rewritten: usize,
    changed: bool,
}

fn emit(buf: &mut Vec<u8>, event: Event<'_>) -> Result<(), XmlError> {
    Writer::new(buf).write_event(event)?;
    Ok(())
}

fn rewrite_fragment(xml: &str, mode: &Mode<'_>) -> Result<FragmentOutcome, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let mut rewriter = Rewriter {
        mode,
        diagnostics: Vec::new(),
        formulas_rewritten: 0,
        changed: false,
    };
    let mut stack: Vec<Frame> = Vec::new();
    let mut output: Vec<u8> = Vec::with_capacity(xml.len());
    let mut dropped = false;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) => {
                let (start, drop) = rewriter.start_tag(&e)?;
                stack.push(Frame {
                    local: e.local_name().as_ref().to_vec(),
                    start,
                    content: Vec::new(),
                    drop,
                    drops_parent: false,
                    kept_children: 0,
                    dropped_children: 0,
                });
            }
            Event::Empty(e) => {
                let (start, drop) = rewriter.start_tag(&e)?;
                match stack.last_mut() {
                    Some(parent) if drop => parent.dropped_children += 1,
                    Some(parent) => {
                        push_tag(&mut parent.content, &start, true);
                        parent.kept_children += 1;
                    }
                    None if drop => dropped = true,
                    None => push_tag(&mut output, &start, true),
                }
            }
            Event::End(e) => {
                let Some(frame) = stack.pop() else {
                    return Err(XmlError::Malformed("unbalanced end tag".to_string()));
                };
                let parent = stack.last_mut();
                if frame.drop {
                    match parent {
                        Some(parent) if frame.drops_parent => parent.drop = true,
                        Some(parent) => parent.dropped_children += 1,
                        None => dropped = true,
                    }
                    continue;
                }
                let start = if frame.dropped_children > 0 {
                    with_count(&frame.start, frame.kept_children)?
                } else {
                    frame.start
                };
                let target = match parent {
                    Some(parent) => {
                        parent.kept_children += 1;
                        &mut parent.content
                    }
                    None => &mut output,
                };
                push_tag(target, &start, false);
                target.extend_from_slice(&frame.content);
                emit(target, Event::End(e))?;
            }
            Event::Text(t) => {
                let Some(frame) = stack.last_mut() else {
                    emit(&mut output, Event::Text(t))?;
                    continue;
                };
                let local = frame.local.as_slice();
                if FORMULA_ELEMENTS.contains(&local) {
                    let text = t.unescape()?;
                    if let Some(rewritten) = rewriter.mode.formula(&text) {
                        rewriter.changed = true;
                        rewriter.formulas_rewritten += 1;
                        frame.content.extend_from_slice(escape_text(&rewritten).as_bytes());
                        continue;
                    }
                } else if local == b"sqref" {
                    if let Some(edit) = rewriter.mode.shift() {
                        let text = t.unescape()?;
                        let element = String::from_utf8_lossy(local).into_owned();
                        if let Some(shifted) = rewriter.shift_sqref(&text, edit, &element) {
                            match shifted {
                                Some(value) => frame
                                    .content
                                    .extend_from_slice(escape_text(&value).as_bytes()),
                                // The sqref names the cells its parent applies to.
                                None => {
                                    frame.drop = true;
                                    frame.drops_parent = true;
                                }
                            }
                            continue;
                        }
                    }
                }
                emit(&mut frame.content, Event::Text(t))?;
            }
            other => {
                let target = match stack.last_mut() {
                    Some(frame) => &mut frame.content,
                    None => &mut output,
                };
                emit(target, other)?;
            }
        }
    }

    let xml = if dropped {
        Rewritten::Dropped
    } else if rewriter.changed {
        Rewritten::Changed(String::from_utf8(output).map_err(|e| e.utf8_error())?)
    } else {
        Rewritten::Unchanged
    };
    Ok(FragmentOutcome {
        xml,
        diagnostics: rewriter.diagnostics,
        formulas_rewritten: rewriter.formulas_rewritten,
    })
}

impl Rewriter<'_, '_> {
    /// Rewritten start tag body and whether the element must be dropped.
    fn start_tag(&mut self, e: &BytesStart<'_>) -> Result<(Vec<u8>, bool), XmlError> {
        let element = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let mut replaced: Vec<(Vec<u8>, String)> = Vec::new();
        let mut drop = false;

        for attr in e.attributes().with_checks(false) {
            let attr = attr?;
            let key = attr.key;
            let prefixed = key.prefix().is_some();
            let local = key.local_name();

            if let Mode::Copy { .. } = self.mode {
                if prefixed && matches!(local.as_ref(), b"id" | b"embed" | b"link") {
                    self.diagnostics.push(LossyEditKind::AttachedContentDropped {
                        element: element.clone(),
                    });
                    self.changed = true;
                    drop = true;
                    continue;
                }
            }

            if !prefixed && RANGE_ATTRS.contains(&local.as_ref()) {
                if let Some(edit) = self.mode.shift() {
                    let value = attr.unescape_value()?;
                    if let Some(shifted) = self.shift_sqref(&value, edit, &element) {
                        match shifted {
                            Some(value) => replaced.push((key.as_ref().to_vec(), value)),
                            None => drop = true,
                        }
                    }
                }
            }
        }

        if drop || replaced.is_empty() {
            return Ok((e.to_vec(), drop));
        }
        let mut out = e.name().as_ref().to_vec();
        for attr in e.attributes().with_checks(false) {
            let attr = attr?;
            out.push(b' ');
            out.extend_from_slice(attr.key.as_ref());
            out.extend_from_slice(b"=\"");
            match replaced.iter().find(|(k, _)| k.as_slice() == attr.key.as_ref()) {
                Some((_, value)) => out.extend_from_slice(escape_attr(value).as_bytes()),
                None => push_raw_value(&mut out, &attr.value),
            }
            out.push(b'"');
        }
        Ok((out, false))
    }

    /// Shift a space separated range list.
    ///
    /// `None` when the value is not a range list or nothing moved; `Some(None)` when every range
    /// was deleted.
    fn shift_sqref(
        &mut self,
        value: &str,
        edit: &StructuralEdit,
        element: &str,
    ) -> Option<Option<String>> {
        let ranges = a1::parse_sqref(value).ok()?;
        if ranges.is_empty() {
            return None;
        }
        let mut kept: Vec<Range> = Vec::with_capacity(ranges.len());
        for range in &ranges {
            match edit.shift_range(*range) {
                RangeShift::Kept(to) => kept.push(to),
                RangeShift::Truncated(to) => {
                    self.diagnostics.push(LossyEditKind::AttachedRangeTruncated {
                        element: element.to_string(),
                        from: *range,
                        to,
                    });
                    kept.push(to);
                }
                RangeShift::Removed => {
                    self.diagnostics.push(LossyEditKind::AttachedRangeRemoved {
                        element: element.to_string(),
                        range: *range,
                    });
                }
            }
        }
        if kept == ranges {
            return None;
        }
        self.changed = true;
        if kept.is_empty() {
            return Some(None);
        }
        Some(Some(a1::format_sqref(&kept)))
    }
}

fn push_tag(out: &mut Vec<u8>, body: &[u8], empty: bool) {
    out.push(b'<');
    out.extend_from_slice(body);
    out.extend_from_slice(if empty { b"/>" } else { b">" });
}

/// Start tag body with its `count` attribute (if any) replaced.
fn with_count(body: &[u8], count: usize) -> Result<Vec<u8>, XmlError> {
    let start = BytesStart::from_content(String::from_utf8_lossy(body), name_len(body));
    let has_count = start
        .attributes()
        .with_checks(false)
        .filter_map(Result::ok)
        .any(|a| a.key.as_ref() == b"count");
    if !has_count {
        return Ok(body.to_vec());
    }
    let mut out = start.name().as_ref().to_vec();
    for attr in start.attributes().with_checks(false) {
        let attr = attr?;
        out.push(b' ');
        out.extend_from_slice(attr.key.as_ref());
        out.extend_from_slice(b"=\"");
        if attr.key.as_ref() == b"count" {
            out.extend_from_slice(count.to_string().as_bytes());
        } else {
            push_raw_value(&mut out, &attr.value);
        }
        out.push(b'"');
    }
    Ok(out)
}

/// Append a still-escaped attribute value for a double-quoted attribute.
fn push_raw_value(out: &mut Vec<u8>, raw: &[u8]) {
    for b in raw {
        if *b == b'"' {
            out.extend_from_slice(b"&quot;");
        } else {
            out.push(*b);
        }
    }
}

fn name_len(body: &[u8]) -> usize {
    body.iter()
        .position(|b| b.is_ascii_whitespace() || *b == b'/')
        .unwrap_or(body.len())
}
