//! `xl/worksheets/sheetN.xml`: cells, row and column properties, merges and frozen panes.
//!
//! Style and shared-string references stay raw here (`xf` index, table index); the loader maps
//! them onto the workbook tables. Shared formulas are expanded into per-cell formulas on decode
//! and every formula is written back unshared.
//!
//! Cell, row and view markup the record has no field for (`cm`, `spans`, data table formulas,
//! split panes, selections, ...) goes to the part's [`PartFragments`] and is written back while
//! the cell or view it belongs to still matches.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::mem::{discriminant, Discriminant};

use chrono::{NaiveDate, NaiveDateTime};
use roxmltree::Node;
use tabula_model::formula_rewrite;
use tabula_model::{
    a1, CachedValue, CellRef, CellValue, ColumnProps, ErrorValue, Formula, FrozenPane, Range,
    RichText, RowProps, EXCEL_MAX_COLS,
};

use crate::codec::{open_root, PartCodec};
use crate::error::XmlError;
use crate::preserve::{qualified_name, CellMarkup, PartFragments, SchemaOrder, SheetViewMarkup};
use crate::shared_strings::{push_rich_text, rich_text_from_node};
use crate::xml::{self, format_number, push_attr, RawAttr};

pub(crate) const ORDER: SchemaOrder = SchemaOrder(&[
    "sheetPr",
    "dimension",
    "sheetViews",
    "sheetFormatPr",
    "cols",
    "sheetData",
    "sheetCalcPr",
    "sheetProtection",
    "protectedRanges",
    "scenarios",
    "autoFilter",
    "sortState",
    "dataConsolidate",
    "customSheetViews",
    "mergeCells",
    "phoneticPr",
    "conditionalFormatting",
    "dataValidations",
    "hyperlinks",
    "printOptions",
    "pageMargins",
    "pageSetup",
    "headerFooter",
    "rowBreaks",
    "colBreaks",
    "customProperties",
    "cellWatches",
    "ignoredErrors",
    "smartTags",
    "drawing",
    "legacyDrawing",
    "legacyDrawingHF",
    "drawingHF",
    "picture",
    "oleObjects",
    "controls",
    "webPublishItems",
    "tableParts",
    "extLst",
]);

/// Width Excel writes for columns that only carry a style (Calibri 11 default).
pub const DEFAULT_COL_WIDTH: f64 = 9.140625;

/// Cell content as stored in the part.
#[derive(Clone, Debug, PartialEq)]
pub enum CellData {
    Value(CellValue),
    /// `t="d"`: ISO 8601 text, converted to a serial by the loader.
    Date(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellRecord {
    pub cell: CellRef,
    /// `xf` index (cellXfs) on decode, style id on encode.
    pub style: u32,
    pub data: CellData,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorksheetRecord {
    /// Row-major.
    pub cells: Vec<CellRecord>,
    pub columns: BTreeMap<u32, ColumnProps>,
    pub rows: BTreeMap<u32, RowProps>,
    pub merges: Vec<Range>,
    pub frozen: Option<FrozenPane>,
    pub tab_selected: bool,
}

impl CellData {
    /// Kind of model value the data loads as. ISO dates load as serial numbers.
    fn kind(&self) -> Discriminant<CellValue> {
        match self {
            CellData::Value(value) => discriminant(value),
            CellData::Date(_) => discriminant(&CellValue::Number(0.0)),
        }
    }
}

impl WorksheetRecord {
    /// Bounding range of every written cell.
    fn dimension(&self) -> Option<Range> {
        let mut cells = self.cells.iter().map(|c| c.cell);
        let first = cells.next()?;
        Some(cells.fold(Range::single(first), |acc, cell| {
            Range::from_coords(
                acc.start.row.min(cell.row),
                acc.start.col.min(cell.col),
                acc.end.row.max(cell.row),
                acc.end.col.max(cell.col),
            )
        }))
    }
}

pub struct WorksheetCodec;

/// Parse `t="d"` cell text.
pub(crate) fn parse_iso_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim().trim_end_matches('Z');
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_ref(what: &str, value: &str) -> Result<Range, XmlError> {
    a1::parse_range(value).map_err(|_| XmlError::invalid(what, value))
}

fn parse_number(what: &str, value: &str) -> Result<f64, XmlError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| XmlError::invalid(what, value))
}

fn parse_error(value: &str) -> Result<ErrorValue, XmlError> {
    value
        .parse::<ErrorValue>()
        .map_err(|_| XmlError::invalid("error value", value))
}

/// Master cell and text of each shared formula group seen so far.
type SharedFormulas = HashMap<u32, (CellRef, String)>;

fn decode_formula(
    f: Node<'_, '_>,
    cell: CellRef,
    shared: &mut SharedFormulas,
) -> Result<Option<Formula>, XmlError> {
    let text = xml::text_content(f);
    let mut array_range = None;
    let expr = match f.attribute("t").unwrap_or("normal") {
        "shared" => {
            let si = xml::attr_u32(f, "si")?.ok_or_else(|| XmlError::missing("f", "si"))?;
            if !text.trim().is_empty() {
                shared.insert(si, (cell, text.clone()));
                text
            } else if let Some((master, master_text)) = shared.get(&si) {
                let drow = i64::from(cell.row) - i64::from(master.row);
                let dcol = i64::from(cell.col) - i64::from(master.col);
                formula_rewrite::translate(master_text, drow, dcol)
            } else {
                log::warn!("shared formula group {si} has no master before {cell}; keeping the value");
                return Ok(None);
            }
        }
        "array" => {
            if let Some(r) = f.attribute("ref") {
                array_range = Some(parse_ref("f@ref", r)?);
            }
            text
        }
        _ => text,
    };
    if expr.trim().is_empty() {
        return Ok(None);
    }
    let mut formula = Formula::new(expr);
    formula.array_range = array_range;
    Ok(Some(formula))
}

/// Whether `node` carries attributes other than `known`.
fn has_other_attrs(node: Node<'_, '_>, known: &[&str]) -> bool {
    node.attributes()
        .any(|a| a.namespace().is_some() || !known.contains(&a.name()))
}

/// Raw attributes of `node` minus `known`, parsed only when there are any.
fn other_attrs(text: &str, node: Node<'_, '_>, known: &[&str]) -> Result<Vec<RawAttr>, XmlError> {
    if !has_other_attrs(node, known) {
        return Ok(Vec::new());
    }
    let mut attrs = xml::node_raw_attrs(text, node)?;
    attrs.retain(|a| !known.contains(&a.name.as_str()));
    Ok(attrs)
}

const CELL_ATTRS: &[&str] = &["r", "s", "t"];
const FORMULA_ATTRS: &[&str] = &["t", "ref", "si"];

fn decode_cell(
    text: &str,
    c: Node<'_, '_>,
    cell: CellRef,
    shared: &mut SharedFormulas,
    fragments: &mut PartFragments,
) -> Result<CellData, XmlError> {
    let f = xml::child_named(c, "f");
    let opaque_formula = f
        .filter(|f| f.attribute("t") == Some("dataTable"))
        .map(|f| xml::raw_node(text, f).to_string());
    let formula_attrs = match f {
        Some(f) if opaque_formula.is_none() => other_attrs(text, f, FORMULA_ATTRS)?,
        _ => Vec::new(),
    };
    let attrs = other_attrs(text, c, CELL_ATTRS)?;
    let data = decode_cell_data(c, cell, shared, f.filter(|_| opaque_formula.is_none()))?;
    if !attrs.is_empty() || !formula_attrs.is_empty() || opaque_formula.is_some() {
        let mut markup = CellMarkup::new(data.kind());
        markup.attrs = attrs;
        markup.formula_attrs = formula_attrs;
        markup.opaque_formula = opaque_formula;
        fragments.set_cell_markup(cell, markup);
    }
    Ok(data)
}

fn decode_cell_data(
    c: Node<'_, '_>,
    cell: CellRef,
    shared: &mut SharedFormulas,
    f: Option<Node<'_, '_>>,
) -> Result<CellData, XmlError> {
    let t = c.attribute("t").unwrap_or("n");
    let v = xml::child_named(c, "v").map(xml::text_content);

    if let Some(f) = f {
        if let Some(mut formula) = decode_formula(f, cell, shared)? {
            formula.cached = match (t, v.as_deref()) {
                (_, None) => None,
                ("b", Some(v)) => Some(CachedValue::Boolean(xml::parse_bool(v.trim()))),
                ("e", Some(v)) => Some(CachedValue::Error(parse_error(v)?)),
                ("str" | "s" | "inlineStr", Some(v)) => Some(CachedValue::Text(v.to_string())),
                (_, Some(v)) if v.trim().is_empty() => None,
                (_, Some(v)) => Some(CachedValue::Number(parse_number("c/v", v)?)),
            };
            return Ok(CellData::Value(CellValue::Formula(formula)));
        }
    }

    let value = match (t, v) {
        ("inlineStr", _) => match xml::child_named(c, "is") {
            Some(is) => CellValue::InlineString(rich_text_from_node(is)),
            None => CellValue::Empty,
        },
        (_, None) => CellValue::Empty,
        ("s", Some(v)) => {
            let index = v
                .trim()
                .parse::<u32>()
                .map_err(|_| XmlError::invalid("shared string index", &v))?;
            CellValue::SharedString(index)
        }
        ("b", Some(v)) => CellValue::Boolean(xml::parse_bool(v.trim())),
        ("e", Some(v)) => CellValue::Error(parse_error(&v)?),
        ("str", Some(v)) => CellValue::InlineString(RichText::plain(v)),
        ("d", Some(v)) => return Ok(CellData::Date(v)),
        (_, Some(v)) if v.trim().is_empty() => CellValue::Empty,
        (_, Some(v)) => CellValue::Number(parse_number("c/v", &v)?),
    };
    Ok(CellData::Value(value))
}

/// Next implicit row or column after `index`.
fn next_index(what: &str, index: u32) -> Result<u32, XmlError> {
    index
        .checked_add(1)
        .ok_or_else(|| XmlError::invalid(what, &format!("{index} + 1")))
}

fn decode_sheet_data(
    text: &str,
    node: Node<'_, '_>,
    record: &mut WorksheetRecord,
    fragments: &mut PartFragments,
) -> Result<(), XmlError> {
    let mut shared = SharedFormulas::new();
    let mut next_row = 0u32;
    for row in xml::children_named(node, "row") {
        let r = match xml::attr_u32(row, "r")? {
            Some(0) => return Err(XmlError::invalid("row@r", "0")),
            Some(r) => r - 1,
            None => next_row,
        };
        next_row = next_index("row@r", r)?;

        let mut known = vec!["r", "hidden"];
        if xml::attr_bool(row, "customHeight").unwrap_or(false) {
            known.extend(["ht", "customHeight"]);
        }
        if xml::attr_bool(row, "customFormat").unwrap_or(false) {
            known.extend(["s", "customFormat"]);
        }
        fragments.set_row_attrs(r, other_attrs(text, row, &known)?);

        let props = RowProps {
            height: if xml::attr_bool(row, "customHeight").unwrap_or(false) {
                xml::attr_f64(row, "ht")?
            } else {
                None
            },
            hidden: xml::attr_bool(row, "hidden").unwrap_or(false),
            style_id: if xml::attr_bool(row, "customFormat").unwrap_or(false) {
                xml::attr_u32(row, "s")?
            } else {
                None
            },
        };
        if !props.is_default() {
            record.rows.insert(r, props);
        }

        let mut next_col = 0u32;
        for c in xml::children_named(row, "c") {
            let cell = match c.attribute("r") {
                Some(text) => a1::parse_cell_ref(text).map_err(|_| XmlError::invalid("c@r", text))?,
                None => CellRef::new(r, next_col),
            };
            next_col = next_index("c@r", cell.col)?;
            let style = xml::attr_u32(c, "s")?.unwrap_or(0);
            let data = decode_cell(text, c, cell, &mut shared, fragments)?;
            record.cells.push(CellRecord { cell, style, data });
        }
    }
    // Producers are not required to write rows or cells in order.
    record.cells.sort_by_key(|c| c.cell);
    Ok(())
}

fn decode_cols(node: Node<'_, '_>, record: &mut WorksheetRecord) -> Result<(), XmlError> {
    for col in xml::children_named(node, "col") {
        let min = xml::attr_u32(col, "min")?.ok_or_else(|| XmlError::missing("col", "min"))?;
        let max = xml::attr_u32(col, "max")?.ok_or_else(|| XmlError::missing("col", "max"))?;
        if min == 0 || max < min {
            return Err(XmlError::invalid("col span", &format!("{min}:{max}")));
        }
        let custom = xml::attr_bool(col, "customWidth").unwrap_or(false);
        let width = xml::attr_f64(col, "width")?.filter(|w| custom || *w != DEFAULT_COL_WIDTH);
        let props = ColumnProps {
            width,
            hidden: xml::attr_bool(col, "hidden").unwrap_or(false),
            style_id: xml::attr_u32(col, "style")?.filter(|s| *s != 0),
        };
        if props.is_default() {
            continue;
        }
        for index in (min - 1)..max.min(EXCEL_MAX_COLS) {
            record.columns.insert(index, props.clone());
        }
    }
    Ok(())
}

fn decode_sheet_views(
    text: &str,
    node: Node<'_, '_>,
    record: &mut WorksheetRecord,
    fragments: &mut PartFragments,
) -> Result<(), XmlError> {
    let Some(view) = xml::child_named(node, "sheetView") else {
        return Ok(());
    };
    record.tab_selected = xml::attr_bool(view, "tabSelected").unwrap_or(false);
    let mut attrs = xml::node_raw_attrs(text, view)?;
    attrs.retain(|a| a.name != "tabSelected");
    fragments.push_element_attrs("sheetView", attrs);

    if let Some(pane) = xml::child_named(view, "pane") {
        if matches!(pane.attribute("state"), Some("frozen" | "frozenSplit")) {
            let split = |name: &str| -> Result<u32, XmlError> {
                Ok(xml::attr_f64(pane, name)?.unwrap_or(0.0).max(0.0) as u32)
            };
            let pane = FrozenPane::new(split("ySplit")?, split("xSplit")?);
            record.frozen = (!pane.is_empty()).then_some(pane);
        }
    }

    let markup = SheetViewMarkup {
        frozen: record.frozen,
        children: view
            .children()
            .filter(Node::is_element)
            .map(|c| (c.tag_name().name().to_string(), xml::raw_node(text, c).to_string()))
            .collect(),
        trailing: node
            .children()
            .filter(|c| c.is_element() && *c != view)
            .map(|c| xml::raw_node(text, c))
            .collect(),
    };
    if !markup.children.is_empty() || !markup.trailing.is_empty() {
        fragments.set_sheet_view(markup);
    }
    Ok(())
}

impl PartCodec for WorksheetCodec {
    type Record = WorksheetRecord;

    fn decode(bytes: &[u8], fragments: &mut PartFragments) -> Result<WorksheetRecord, XmlError> {
        let (text, doc) = xml::parse_document(bytes)?;
        let root = xml::expect_root(&doc, "worksheet")?;
        fragments.set_root_attrs(xml::root_attrs_text(text, root)?);

        let mut record = WorksheetRecord::default();
        let mut slot = 0;
        for child in root.children().filter(Node::is_element) {
            let local = child.tag_name().name();
            let anchor = ORDER.anchor(local, &mut slot);
            match local {
                "dimension" => {}
                "sheetViews" => decode_sheet_views(text, child, &mut record, fragments)?,
                "cols" => decode_cols(child, &mut record)?,
                "sheetData" => decode_sheet_data(text, child, &mut record, fragments)?,
                "mergeCells" => {
                    for merge in xml::children_named(child, "mergeCell") {
                        let r = xml::required_attr(merge, "ref")?;
                        record.merges.push(parse_ref("mergeCell@ref", r)?);
                    }
                }
                _ => {
                    let name = qualified_name(xml::start_tag(text, child));
                    fragments.push_child(anchor, name, xml::raw_node(text, child));
                }
            }
        }
        Ok(record)
    }

    fn encode(record: &WorksheetRecord, fragments: &PartFragments) -> Result<Vec<u8>, XmlError> {
        let mut out = String::with_capacity(1024 + 48 * record.cells.len());
        open_root(&mut out, "worksheet", fragments, &[]);
        out.push('>');
        for (slot, element) in ORDER.0.iter().enumerate() {
            match *element {
                "dimension" => {
                    out.push_str("<dimension");
                    let dimension = record.dimension().map(a1::format_range);
                    push_attr(&mut out, "ref", dimension.as_deref().unwrap_or("A1"));
                    out.push_str("/>");
                }
                "sheetViews" => push_sheet_views(&mut out, record, fragments),
                "cols" if !record.columns.is_empty() => push_cols(&mut out, &record.columns),
                "sheetData" => push_sheet_data(&mut out, record, fragments),
                "mergeCells" if !record.merges.is_empty() => {
                    out.push_str("<mergeCells");
                    push_attr(&mut out, "count", &record.merges.len().to_string());
                    out.push('>');
                    for merge in &record.merges {
                        out.push_str("<mergeCell");
                        push_attr(&mut out, "ref", &a1::format_range(*merge));
                        out.push_str("/>");
                    }
                    out.push_str("</mergeCells>");
                }
                _ => {}
            }
            fragments.emit_slot(slot, &mut out);
        }
        out.push_str("</worksheet>");
        Ok(out.into_bytes())
    }
}

fn push_sheet_views(out: &mut String, record: &WorksheetRecord, fragments: &PartFragments) {
    let attrs = fragments.element_attrs("sheetView", 0);
    out.push_str("<sheetViews><sheetView");
    if record.tab_selected {
        push_attr(out, "tabSelected", "1");
    }
    xml::push_raw_attrs(out, attrs, &[]);
    if !attrs.iter().any(|a| a.name == "workbookViewId") {
        push_attr(out, "workbookViewId", "0");
    }
    let markup = fragments.sheet_view();
    let mut body = String::new();
    match markup {
        Some(markup) if markup.frozen == record.frozen => {
            for (_, xml) in &markup.children {
                body.push_str(xml);
            }
        }
        _ => {
            if let Some(pane) = record.frozen.filter(|p| !p.is_empty()) {
                push_frozen_pane(&mut body, pane);
            }
            // The old pane and selections describe a different split.
            let rest = markup.iter().flat_map(|m| &m.children);
            for (_, xml) in rest.filter(|(name, _)| name != "pane" && name != "selection") {
                body.push_str(xml);
            }
        }
    }
    if body.is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        out.push_str(&body);
        out.push_str("</sheetView>");
    }
    if let Some(markup) = markup {
        out.push_str(&markup.trailing);
    }
    out.push_str("</sheetViews>");
}

fn push_frozen_pane(out: &mut String, pane: FrozenPane) {
    out.push_str("<pane");
    if pane.cols > 0 {
        push_attr(out, "xSplit", &pane.cols.to_string());
    }
    if pane.rows > 0 {
        push_attr(out, "ySplit", &pane.rows.to_string());
    }
    push_attr(
        out,
        "topLeftCell",
        &a1::format_cell_ref(CellRef::new(pane.rows, pane.cols)),
    );
    let active = match (pane.rows > 0, pane.cols > 0) {
        (true, true) => "bottomRight",
        (true, false) => "bottomLeft",
        _ => "topRight",
    };
    push_attr(out, "activePane", active);
    push_attr(out, "state", "frozen");
    out.push_str("/><selection");
    push_attr(out, "pane", active);
    out.push_str("/>");
}

fn push_cols(out: &mut String, columns: &BTreeMap<u32, ColumnProps>) {
    out.push_str("<cols>");
    let mut iter = columns.iter().peekable();
    while let Some((&first, props)) = iter.next() {
        let mut last = first;
        while let Some(&(&next, next_props)) = iter.peek() {
            if next != last + 1 || next_props != props {
                break;
            }
            last = next;
            iter.next();
        }
        out.push_str("<col");
        push_attr(out, "min", &(first + 1).to_string());
        push_attr(out, "max", &(last + 1).to_string());
        match props.width {
            Some(width) => {
                push_attr(out, "width", &format_number(width));
                push_attr(out, "customWidth", "1");
            }
            None => push_attr(out, "width", &format_number(DEFAULT_COL_WIDTH)),
        }
        if let Some(style) = props.style_id {
            push_attr(out, "style", &style.to_string());
        }
        if props.hidden {
            push_attr(out, "hidden", "1");
        }
        out.push_str("/>");
    }
    out.push_str("</cols>");
}

fn push_sheet_data(out: &mut String, record: &WorksheetRecord, fragments: &PartFragments) {
    let mut by_row: BTreeMap<u32, Vec<&CellRecord>> = BTreeMap::new();
    for cell in &record.cells {
        by_row.entry(cell.cell.row).or_default().push(cell);
    }
    let row_indices: BTreeSet<u32> = by_row
        .keys()
        .chain(record.rows.keys())
        .copied()
        .chain(fragments.marked_rows())
        .collect();
    if row_indices.is_empty() {
        out.push_str("<sheetData/>");
        return;
    }
    out.push_str("<sheetData>");
    for r in row_indices {
        out.push_str("<row");
        push_attr(out, "r", &(u64::from(r) + 1).to_string());
        let mut skip = vec!["r", "hidden"];
        if let Some(props) = record.rows.get(&r) {
            if let Some(style) = props.style_id {
                push_attr(out, "s", &style.to_string());
                push_attr(out, "customFormat", "1");
                skip.extend(["s", "customFormat"]);
            }
            if let Some(height) = props.height {
                push_attr(out, "ht", &format_number(height));
                push_attr(out, "customHeight", "1");
                skip.extend(["ht", "customHeight"]);
            }
            if props.hidden {
                push_attr(out, "hidden", "1");
            }
        }
        xml::push_raw_attrs(out, fragments.row_attrs(r), &skip);
        match by_row.get(&r) {
            Some(cells) => {
                out.push('>');
                for cell in cells {
                    let markup = fragments
                        .cell_markup(cell.cell)
                        .filter(|m| m.kind == cell.data.kind());
                    push_cell(out, cell, markup);
                }
                out.push_str("</row>");
            }
            None => out.push_str("/>"),
        }
    }
    out.push_str("</sheetData>");
}

fn push_cell(out: &mut String, record: &CellRecord, markup: Option<&CellMarkup>) {
    let value = match &record.data {
        CellData::Date(text) => {
            push_cell_start(out, record, Some("d"), markup);
            out.push_str("<v>");
            out.push_str(&xml::escape_text(text));
            out.push_str("</v></c>");
            return;
        }
        CellData::Value(value) => value,
    };
    match value {
        CellValue::Empty => {
            if markup.is_some_and(|m| m.opaque_formula.is_some()) {
                push_cell_start(out, record, None, markup);
                out.push_str("</c>");
            } else {
                out.push_str("<c");
                push_attr(out, "r", &a1::format_cell_ref(record.cell));
                if record.style != 0 {
                    push_attr(out, "s", &record.style.to_string());
                }
                if let Some(markup) = markup {
                    xml::push_raw_attrs(out, &markup.attrs, CELL_ATTRS);
                }
                out.push_str("/>");
            }
        }
        CellValue::Number(n) if !n.is_finite() => {
            log::warn!("writing non-finite number at {} as #NUM!", a1::format_cell_ref(record.cell));
            push_cell_start(out, record, Some("e"), markup);
            out.push_str("<v>#NUM!</v></c>");
        }
        CellValue::Number(n) => {
            push_cell_start(out, record, None, markup);
            out.push_str("<v>");
            out.push_str(&format_number(*n));
            out.push_str("</v></c>");
        }
        CellValue::Boolean(b) => {
            push_cell_start(out, record, Some("b"), markup);
            out.push_str(if *b { "<v>1</v></c>" } else { "<v>0</v></c>" });
        }
        CellValue::Error(err) => {
            push_cell_start(out, record, Some("e"), markup);
            out.push_str("<v>");
            out.push_str(&xml::escape_text(err.as_str()));
            out.push_str("</v></c>");
        }
        CellValue::SharedString(index) => {
            push_cell_start(out, record, Some("s"), markup);
            out.push_str("<v>");
            out.push_str(&index.to_string());
            out.push_str("</v></c>");
        }
        CellValue::InlineString(text) => {
            push_cell_start(out, record, Some("inlineStr"), markup);
            out.push_str("<is>");
            push_rich_text(out, text);
            out.push_str("</is></c>");
        }
        CellValue::Formula(formula) => push_formula_cell(out, record, formula, markup),
    }
}

/// Write `<c ...>` and any preserved formula that precedes the value.
fn push_cell_start(
    out: &mut String,
    record: &CellRecord,
    t: Option<&str>,
    markup: Option<&CellMarkup>,
) {
    out.push_str("<c");
    push_attr(out, "r", &a1::format_cell_ref(record.cell));
    if record.style != 0 {
        push_attr(out, "s", &record.style.to_string());
    }
    if let Some(t) = t {
        push_attr(out, "t", t);
    }
    if let Some(markup) = markup {
        xml::push_raw_attrs(out, &markup.attrs, CELL_ATTRS);
    }
    out.push('>');
    if let Some(f) = markup.and_then(|m| m.opaque_formula.as_deref()) {
        out.push_str(f);
    }
}

fn push_formula_cell(
    out: &mut String,
    record: &CellRecord,
    formula: &Formula,
    markup: Option<&CellMarkup>,
) {
    let cached = match &formula.cached {
        Some(CachedValue::Number(n)) if !n.is_finite() => Some(CachedValue::Error(ErrorValue::Num)),
        other => other.clone(),
    };
    let t = match &cached {
        Some(CachedValue::Text(_)) => Some("str"),
        Some(CachedValue::Boolean(_)) => Some("b"),
        Some(CachedValue::Error(_)) => Some("e"),
        Some(CachedValue::Number(_)) | None => None,
    };
    push_cell_start(out, record, t, markup);
    out.push_str("<f");
    if let Some(range) = formula.array_range {
        push_attr(out, "t", "array");
        push_attr(out, "ref", &a1::format_range(range));
    }
    if let Some(markup) = markup {
        xml::push_raw_attrs(out, &markup.formula_attrs, FORMULA_ATTRS);
    }
    out.push('>');
    out.push_str(&xml::escape_text(&formula.expr));
    out.push_str("</f>");
    let v = match cached {
        None => None,
        Some(CachedValue::Number(n)) => Some(format_number(n)),
        Some(CachedValue::Boolean(b)) => Some(if b { "1" } else { "0" }.to_string()),
        Some(CachedValue::Text(text)) => Some(text),
        Some(CachedValue::Error(err)) => Some(err.as_str().to_string()),
    };
    if let Some(v) = v {
        out.push_str("<v");
        if xml::needs_space_preserve(&v) {
            out.push_str(r#" xml:space="preserve""#);
        }
        out.push('>');
        out.push_str(&xml::escape_text(&v));
        out.push_str("</v>");
    }
    out.push_str("</c>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheetPr><tabColor rgb="FFFF0000"/></sheetPr>
  <dimension ref="A1:D4"/>
  <sheetViews>
    <sheetView tabSelected="1" zoomScale="120" workbookViewId="0">
      <pane xSplit="1" ySplit="2" topLeftCell="B3" activePane="bottomRight" state="frozen"/>
      <selection pane="bottomRight" activeCell="C5" sqref="C5"/>
    </sheetView>
  </sheetViews>
  <sheetFormatPr defaultRowHeight="15"/>
  <cols><col min="2" max="4" width="20.5" customWidth="1"/><col min="6" max="6" width="9.140625" style="3"/></cols>
  <sheetData>
    <row r="1" ht="30" customHeight="1"><c r="A1" t="s"><v>0</v></c><c r="B1" s="2"><v>42</v></c><c r="C1" t="b"><v>1</v></c><c r="D1" t="e"><v>#DIV/0!</v></c></row>
    <row r="2" s="4" customFormat="1" hidden="1"><c r="A2"><f>SUM(B1:B1)</f><v>42</v></c><c r="B2" t="str"><f>"x"&amp;A1</f><v>xQ1</v></c></row>
    <row r="3"><c r="A3"><f t="shared" ref="A3:A4" si="0">B3*2</f><v>2</v></c><c t="inlineStr"><is><t>inline</t></is></c></row>
    <row r="4"><c r="A4"><f t="shared" si="0"/><v>4</v></c><c r="B4"><f t="array" ref="B4:C4">TRANSPOSE(A1:A2)</f></c><c r="D4" t="d"><v>2024-02-29T12:00:00</v></c></row>
  </sheetData>
  <mergeCells count="1"><mergeCell ref="C3:D3"/></mergeCells>
  <conditionalFormatting sqref="A1:A4"><cfRule type="cellIs" dxfId="0" priority="1" operator="greaterThan"><formula>10</formula></cfRule></conditionalFormatting>
  <pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/>
  <drawing r:id="rId1"/>
</worksheet>"#;

    fn decode(xml: &str) -> (WorksheetRecord, PartFragments) {
        let mut fragments = PartFragments::new();
        let record = WorksheetCodec::decode(xml.as_bytes(), &mut fragments).unwrap();
        (record, fragments)
    }

    fn value_at(record: &WorksheetRecord, row: u32, col: u32) -> &CellData {
        &record
            .cells
            .iter()
            .find(|c| c.cell == CellRef::new(row, col))
            .unwrap_or_else(|| panic!("no cell at ({row}, {col})"))
            .data
    }

    #[test]
    fn decodes_every_cell_kind() {
        let (record, _) = decode(SHEET);
        assert_eq!(record.cells.len(), 11);
        assert_eq!(value_at(&record, 0, 0), &CellData::Value(CellValue::SharedString(0)));
        assert_eq!(value_at(&record, 0, 1), &CellData::Value(CellValue::Number(42.0)));
        assert_eq!(record.cells[1].style, 2);
        assert_eq!(value_at(&record, 0, 2), &CellData::Value(CellValue::Boolean(true)));
        assert_eq!(
            value_at(&record, 0, 3),
            &CellData::Value(CellValue::Error(ErrorValue::Div0))
        );
        assert_eq!(
            value_at(&record, 1, 0),
            &CellData::Value(CellValue::Formula(
                Formula::new("SUM(B1:B1)").with_cached(CachedValue::Number(42.0))
            ))
        );
        assert_eq!(
            value_at(&record, 1, 1),
            &CellData::Value(CellValue::Formula(
                Formula::new(r#""x"&A1"#).with_cached(CachedValue::Text("xQ1".into()))
            ))
        );
        assert_eq!(
            value_at(&record, 2, 1),
            &CellData::Value(CellValue::InlineString(RichText::plain("inline")))
        );
        assert_eq!(
            value_at(&record, 3, 3),
            &CellData::Date("2024-02-29T12:00:00".into())
        );
    }

    #[test]
    fn shared_and_array_formulas_become_per_cell_formulas() {
        let (record, _) = decode(SHEET);
        let CellData::Value(CellValue::Formula(follower)) = value_at(&record, 3, 0) else {
            panic!("A4 should hold a formula");
        };
        assert_eq!(follower.expr, "B4*2");
        assert_eq!(follower.cached, Some(CachedValue::Number(4.0)));

        let CellData::Value(CellValue::Formula(array)) = value_at(&record, 3, 1) else {
            panic!("B4 should hold a formula");
        };
        assert_eq!(array.array_range, Some(Range::from_coords(3, 1, 3, 2)));
        assert_eq!(array.cached, None);
    }

    #[test]
    fn decodes_layout_and_view_settings() {
        let (record, fragments) = decode(SHEET);
        assert_eq!(record.frozen, Some(FrozenPane::new(2, 1)));
        assert!(record.tab_selected);
        assert_eq!(record.merges, vec![Range::from_coords(2, 2, 2, 3)]);

        assert_eq!(record.columns.len(), 4);
        assert_eq!(record.columns[&1].width, Some(20.5));
        assert_eq!(record.columns[&3].width, Some(20.5));
        assert_eq!(
            record.columns[&5],
            ColumnProps {
                width: None,
                hidden: false,
                style_id: Some(3),
            }
        );

        assert_eq!(record.rows[&0].height, Some(30.0));
        assert_eq!(record.rows[&1].style_id, Some(4));
        assert!(record.rows[&1].hidden);
        assert!(!record.rows.contains_key(&2));

        let names: Vec<_> = fragments.children().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["sheetPr", "sheetFormatPr", "conditionalFormatting", "pageMargins", "drawing"]
        );
    }

    #[test]
    fn encoding_round_trips_and_keeps_schema_order() {
        let (record, fragments) = decode(SHEET);
        let bytes = WorksheetCodec::encode(&record, &fragments).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();

        let order: Vec<usize> = [
            "<sheetPr",
            "<dimension ref=\"A1:D4\"",
            "<sheetViews",
            "<sheetFormatPr",
            "<cols",
            "<sheetData",
            "<mergeCells",
            "<conditionalFormatting",
            "<pageMargins",
            "<drawing r:id=\"rId1\"/>",
        ]
        .iter()
        .map(|tag| text.find(tag).unwrap_or_else(|| panic!("{tag} missing in {text}")))
        .collect();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(order, sorted);

        assert!(text.contains(r#"<col min="2" max="4" width="20.5" customWidth="1"/>"#));
        assert!(text.contains(r#"<sheetView tabSelected="1" zoomScale="120" workbookViewId="0"><pane xSplit="1" ySplit="2" topLeftCell="B3" activePane="bottomRight" state="frozen"/>"#));
        assert!(text.contains(r#"<c r="A4"><f>B4*2</f><v>4</v></c>"#));

        let (reread, again) = decode(text);
        assert_eq!(reread, record);
        assert_eq!(again.children(), fragments.children());
    }

    #[test]
    fn non_finite_numbers_are_written_as_num_errors() {
        let record = WorksheetRecord {
            cells: vec![
                CellRecord {
                    cell: CellRef::new(0, 0),
                    style: 0,
                    data: CellData::Value(CellValue::Number(f64::NAN)),
                },
                CellRecord {
                    cell: CellRef::new(0, 1),
                    style: 0,
                    data: CellData::Value(CellValue::Formula(
                        Formula::new("1/0").with_cached(CachedValue::Number(f64::INFINITY)),
                    )),
                },
            ],
            ..WorksheetRecord::default()
        };
        let bytes = WorksheetCodec::encode(&record, &PartFragments::new()).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains(r#"<c r="A1" t="e"><v>#NUM!</v></c>"#), "{text}");
        assert!(text.contains(r#"<c r="B1" t="e"><f>1/0</f><v>#NUM!</v></c>"#), "{text}");
    }

    #[test]
    fn missing_cell_and_row_references_are_inferred() {
        let (record, _) = decode(
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row><c><v>1</v></c><c><v>2</v></c></row><row><c r="C2"><v>3</v></c><c><v>4</v></c></row></sheetData></worksheet>"#,
        );
        let cells: Vec<CellRef> = record.cells.iter().map(|c| c.cell).collect();
        assert_eq!(
            cells,
            vec![
                CellRef::new(0, 0),
                CellRef::new(0, 1),
                CellRef::new(1, 2),
                CellRef::new(1, 3)
            ]
        );
    }

    #[test]
    fn iso_dates_parse_with_and_without_time() {
        let noon = NaiveDate::from_ymd_opt(2024, 2, 29)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap();
        assert_eq!(parse_iso_datetime("2024-02-29T12:00:00"), Some(noon));
        assert_eq!(parse_iso_datetime("2024-02-29T12:00:00.000Z"), Some(noon));
        assert_eq!(
            parse_iso_datetime("2024-02-29"),
            NaiveDate::from_ymd_opt(2024, 2, 29).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert_eq!(parse_iso_datetime("not a date"), None);
    }

    const MARKED_SHEET: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:x14ac="http://schemas.microsoft.com/office/spreadsheetml/2009/9/ac"><sheetViews><sheetView workbookViewId="0"><pane xSplit="2000" ySplit="1500" topLeftCell="C4" activePane="bottomRight"/><selection pane="topRight" activeCell="D1" sqref="D1"/><selection pane="bottomRight" activeCell="E7" sqref="E7:F8"/></sheetView><sheetView workbookViewId="1"/></sheetViews><sheetData><row r="1" spans="1:3" x14ac:dyDescent="0.25"><c r="A1"><v>1</v></c><c r="B1" cm="1"><f t="array" ref="B1" aca="1">SEQUENCE(1)</f><v>1</v></c><c r="C1" vm="2" ph="1"><v>3</v></c></row><row r="2" spans="1:3"><c r="B2"><f t="dataTable" ref="B2:C3" dt2D="1" dtr="1" r1="A1" r2="A2"/><v>7</v></c><c r="C2"><f ca="1">NOW()</f><v>45000</v></c></row></sheetData></worksheet>"#;

    #[test]
    fn unmodeled_cell_and_row_markup_survives_a_round_trip() {
        let (record, fragments) = decode(MARKED_SHEET);
        assert_eq!(value_at(&record, 1, 1), &CellData::Value(CellValue::Number(7.0)));
        let table = fragments.cell_markup(CellRef::new(1, 1)).unwrap();
        assert!(table.opaque_formula.as_deref().unwrap().contains(r#"t="dataTable""#));

        let bytes = WorksheetCodec::encode(&record, &fragments).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        for expected in [
            r#"<row r="1" spans="1:3" x14ac:dyDescent="0.25">"#,
            r#"<c r="B1" cm="1"><f t="array" ref="B1" aca="1">SEQUENCE(1)</f><v>1</v></c>"#,
            r#"<c r="C1" vm="2" ph="1"><v>3</v></c>"#,
            r#"<c r="B2"><f t="dataTable" ref="B2:C3" dt2D="1" dtr="1" r1="A1" r2="A2"/><v>7</v></c>"#,
            r#"<c r="C2"><f ca="1">NOW()</f><v>45000</v></c>"#,
        ] {
            assert!(text.contains(expected), "{expected} missing in {text}");
        }

        let (reread, again) = decode(text);
        assert_eq!(reread, record);
        assert_eq!(again, fragments);
    }

    #[test]
    fn markup_is_dropped_once_the_cell_changes_kind() {
        let (mut record, fragments) = decode(MARKED_SHEET);
        for cell in &mut record.cells {
            if cell.cell == CellRef::new(1, 1) {
                cell.data = CellData::Value(CellValue::Boolean(true));
            }
        }
        let bytes = WorksheetCodec::encode(&record, &fragments).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains(r#"<c r="B2" t="b"><v>1</v></c>"#), "{text}");
        assert!(!text.contains("dataTable"));
    }

    #[test]
    fn split_panes_selections_and_extra_views_survive() {
        let (record, fragments) = decode(MARKED_SHEET);
        assert_eq!(record.frozen, None);
        let bytes = WorksheetCodec::encode(&record, &fragments).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains(
            r#"<sheetViews><sheetView workbookViewId="0"><pane xSplit="2000" ySplit="1500" topLeftCell="C4" activePane="bottomRight"/><selection pane="topRight" activeCell="D1" sqref="D1"/><selection pane="bottomRight" activeCell="E7" sqref="E7:F8"/></sheetView><sheetView workbookViewId="1"/></sheetViews>"#
        ), "{text}");
    }

    #[test]
    fn freezing_replaces_the_stored_pane_and_selections() {
        let (mut record, fragments) = decode(MARKED_SHEET);
        record.frozen = Some(FrozenPane::new(1, 0));
        let bytes = WorksheetCodec::encode(&record, &fragments).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains(
            r#"<sheetView workbookViewId="0"><pane ySplit="1" topLeftCell="A2" activePane="bottomLeft" state="frozen"/><selection pane="bottomLeft"/></sheetView><sheetView workbookViewId="1"/>"#
        ), "{text}");
        assert!(!text.contains("E7:F8"));
    }

    #[test]
    fn implicit_rows_past_the_last_index_fail_the_part() {
        let mut fragments = PartFragments::new();
        let err = WorksheetCodec::decode(
            br#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="4294967295"/><row/><row/></sheetData></worksheet>"#,
            &mut fragments,
        )
        .unwrap_err();
        assert!(matches!(err, XmlError::InvalidValue { .. }), "{err}");
    }

    #[test]
    fn broken_cell_references_fail_the_part() {
        let mut fragments = PartFragments::new();
        let err = WorksheetCodec::decode(
            br#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="1A"><v>1</v></c></row></sheetData></worksheet>"#,
            &mut fragments,
        )
        .unwrap_err();
        assert!(matches!(err, XmlError::InvalidValue { .. }));
    }
}
