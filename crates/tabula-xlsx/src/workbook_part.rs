//! `xl/workbook.xml`: sheet list, defined names, date system and the active tab.

use roxmltree::Node;
use tabula_model::SheetVisibility;

use crate::codec::{open_root, PartCodec};
use crate::error::XmlError;
use crate::preserve::{qualified_name, PartFragments, SchemaOrder};
use crate::xml::{self, push_attr, NS_REL};

const ORDER: SchemaOrder = SchemaOrder(&[
    "fileVersion",
    "fileSharing",
    "workbookPr",
    "workbookProtection",
    "bookViews",
    "sheets",
    "functionGroups",
    "externalReferences",
    "definedNames",
    "calcPr",
    "oleSize",
    "customWorkbookViews",
    "pivotCaches",
    "smartTagPr",
    "smartTagTypes",
    "webPublishing",
    "fileRecoveryPr",
    "webPublishObjects",
    "extLst",
]);

/// One `<sheet>` entry. Chart sheets and dialog sheets appear here too.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    pub sheet_id: u32,
    pub state: SheetVisibility,
    pub rel_id: String,
}

/// One `<definedName>` as written: scope is a tab index into the sheet list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefinedNameEntry {
    pub name: String,
    pub local_sheet_id: Option<u32>,
    pub hidden: bool,
    pub comment: Option<String>,
    pub formula: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkbookRecord {
    pub date1904: bool,
    pub active_tab: u32,
    pub sheets: Vec<SheetEntry>,
    pub defined_names: Vec<DefinedNameEntry>,
}

pub struct WorkbookCodec;

fn parse_sheet(node: Node<'_, '_>) -> Result<SheetEntry, XmlError> {
    let name = xml::required_attr(node, "name")?.to_string();
    let sheet_id = xml::attr_u32(node, "sheetId")?.ok_or_else(|| XmlError::missing("sheet", "sheetId"))?;
    let state = match node.attribute("state") {
        None => SheetVisibility::Visible,
        Some(s) => SheetVisibility::parse(s).ok_or_else(|| XmlError::invalid("sheet@state", s))?,
    };
    let rel_id = node
        .attribute((NS_REL, "id"))
        .ok_or_else(|| XmlError::missing("sheet", "r:id"))?
        .to_string();
    Ok(SheetEntry {
        name,
        sheet_id,
        state,
        rel_id,
    })
}

fn parse_defined_name(node: Node<'_, '_>) -> Result<DefinedNameEntry, XmlError> {
    Ok(DefinedNameEntry {
        name: xml::required_attr(node, "name")?.to_string(),
        local_sheet_id: xml::attr_u32(node, "localSheetId")?,
        hidden: xml::attr_bool(node, "hidden").unwrap_or(false),
        comment: node.attribute("comment").map(str::to_string),
        formula: xml::text_content(node).trim().to_string(),
    })
}

impl PartCodec for WorkbookCodec {
    type Record = WorkbookRecord;

    fn decode(bytes: &[u8], fragments: &mut PartFragments) -> Result<WorkbookRecord, XmlError> {
        let (text, doc) = xml::parse_document(bytes)?;
        let root = xml::expect_root(&doc, "workbook")?;
        fragments.set_root_attrs(xml::root_attrs_text(text, root)?);

        let mut record = WorkbookRecord::default();
        let mut slot = 0;
        for child in root.children().filter(Node::is_element) {
            let local = child.tag_name().name();
            let anchor = ORDER.anchor(local, &mut slot);
            match local {
                "workbookPr" => {
                    record.date1904 = xml::attr_bool(child, "date1904").unwrap_or(false);
                    let mut attrs = xml::node_raw_attrs(text, child)?;
                    attrs.retain(|a| a.name != "date1904");
                    fragments.push_element_attrs("workbookPr", attrs);
                }
                "bookViews" => {
                    for (i, view) in xml::children_named(child, "workbookView").enumerate() {
                        if i == 0 {
                            record.active_tab = xml::attr_u32(view, "activeTab")?.unwrap_or(0);
                        }
                        let mut attrs = xml::node_raw_attrs(text, view)?;
                        attrs.retain(|a| a.name != "activeTab");
                        fragments.push_element_attrs("workbookView", attrs);
                    }
                }
                "sheets" => {
                    for sheet in xml::children_named(child, "sheet") {
                        record.sheets.push(parse_sheet(sheet)?);
                    }
                }
                "definedNames" => {
                    for name in xml::children_named(child, "definedName") {
                        record.defined_names.push(parse_defined_name(name)?);
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

    fn encode(record: &WorkbookRecord, fragments: &PartFragments) -> Result<Vec<u8>, XmlError> {
        let mut out = String::with_capacity(1024 + 96 * record.sheets.len());
        open_root(&mut out, "workbook", fragments, &[]);
        if fragments
            .root_attrs()
            .is_some_and(|attrs| !attrs.contains("xmlns:r="))
        {
            push_attr(&mut out, "xmlns:r", NS_REL);
        }
        out.push('>');

        let sheet_count = record.sheets.len() as u32;
        for (slot, element) in ORDER.0.iter().enumerate() {
            match *element {
                "workbookPr" => {
                    out.push_str("<workbookPr");
                    if record.date1904 {
                        push_attr(&mut out, "date1904", "1");
                    }
                    xml::push_raw_attrs(&mut out, fragments.element_attrs("workbookPr", 0), &[]);
                    out.push_str("/>");
                }
                "bookViews" => {
                    out.push_str("<bookViews>");
                    let mut index = 0;
                    loop {
                        let attrs = fragments.element_attrs("workbookView", index);
                        if attrs.is_empty() && index > 0 {
                            break;
                        }
                        out.push_str("<workbookView");
                        // Tab indices that no longer exist would make the file unreadable.
                        let stale = |name: &str| {
                            attrs.iter().any(|a| {
                                a.name == name
                                    && a.value.parse::<u32>().is_ok_and(|v| v >= sheet_count)
                            })
                        };
                        let skip: &[&str] = if stale("firstSheet") { &["firstSheet"] } else { &[] };
                        xml::push_raw_attrs(&mut out, attrs, skip);
                        if index == 0 && record.active_tab != 0 {
                            push_attr(&mut out, "activeTab", &record.active_tab.to_string());
                        }
                        out.push_str("/>");
                        index += 1;
                    }
                    out.push_str("</bookViews>");
                }
                "sheets" => {
                    out.push_str("<sheets>");
                    for sheet in &record.sheets {
                        out.push_str("<sheet");
                        push_attr(&mut out, "name", &sheet.name);
                        push_attr(&mut out, "sheetId", &sheet.sheet_id.to_string());
                        if sheet.state != SheetVisibility::Visible {
                            push_attr(&mut out, "state", sheet.state.as_str());
                        }
                        push_attr(&mut out, "r:id", &sheet.rel_id);
                        out.push_str("/>");
                    }
                    out.push_str("</sheets>");
                }
                "definedNames" if !record.defined_names.is_empty() => {
                    out.push_str("<definedNames>");
                    for name in &record.defined_names {
                        out.push_str("<definedName");
                        push_attr(&mut out, "name", &name.name);
                        if let Some(comment) = &name.comment {
                            push_attr(&mut out, "comment", comment);
                        }
                        if let Some(local) = name.local_sheet_id {
                            push_attr(&mut out, "localSheetId", &local.to_string());
                        }
                        if name.hidden {
                            push_attr(&mut out, "hidden", "1");
                        }
                        out.push('>');
                        out.push_str(&xml::escape_text(&name.formula));
                        out.push_str("</definedName>");
                    }
                    out.push_str("</definedNames>");
                }
                _ => {}
            }
            fragments.emit_slot(slot, &mut out);
        }
        out.push_str("</workbook>");
        Ok(out.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships" xmlns:mc="http://schemas.openxmlformats.org/markup-compatibility/2006" mc:Ignorable="x15">
  <fileVersion appName="xl" lastEdited="7" lowestEdited="7" rupBuild="27328"/>
  <workbookPr date1904="1" defaultThemeVersion="166925"/>
  <mc:AlternateContent><mc:Choice Requires="x15"/></mc:AlternateContent>
  <bookViews><workbookView xWindow="0" yWindow="0" windowWidth="28800" activeTab="1" firstSheet="2"/></bookViews>
  <sheets>
    <sheet name="Data" sheetId="1" r:id="rId1"/>
    <sheet name="Chart 1" sheetId="4" state="hidden" r:id="rId2"/>
  </sheets>
  <definedNames>
    <definedName name="_xlnm.Print_Area" localSheetId="0">Data!$A$1:$C$10</definedName>
    <definedName name="Rate" comment="tax &amp; fees" hidden="1">0.05</definedName>
  </definedNames>
  <calcPr calcId="191029"/>
</workbook>"#;

    #[test]
    fn decodes_sheets_names_and_settings() {
        let mut fragments = PartFragments::new();
        let record = WorkbookCodec::decode(WORKBOOK.as_bytes(), &mut fragments).unwrap();
        assert!(record.date1904);
        assert_eq!(record.active_tab, 1);
        assert_eq!(
            record.sheets,
            vec![
                SheetEntry {
                    name: "Data".into(),
                    sheet_id: 1,
                    state: SheetVisibility::Visible,
                    rel_id: "rId1".into(),
                },
                SheetEntry {
                    name: "Chart 1".into(),
                    sheet_id: 4,
                    state: SheetVisibility::Hidden,
                    rel_id: "rId2".into(),
                },
            ]
        );
        assert_eq!(record.defined_names[0].local_sheet_id, Some(0));
        assert_eq!(record.defined_names[0].formula, "Data!$A$1:$C$10");
        assert_eq!(record.defined_names[1].comment.as_deref(), Some("tax & fees"));
        assert!(record.defined_names[1].hidden);

        let names: Vec<_> = fragments.children().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["fileVersion", "mc:AlternateContent", "calcPr"]);
    }

    #[test]
    fn encoding_keeps_unmodeled_content_in_schema_order() {
        let mut fragments = PartFragments::new();
        let mut record = WorkbookCodec::decode(WORKBOOK.as_bytes(), &mut fragments).unwrap();
        record.sheets.truncate(1);
        record.active_tab = 0;
        record.defined_names.remove(0);

        let bytes = WorkbookCodec::encode(&record, &fragments).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        let order: Vec<usize> = [
            "<fileVersion",
            "<workbookPr",
            "<mc:AlternateContent",
            "<bookViews",
            "<sheets",
            "<definedNames",
            "<calcPr",
        ]
        .iter()
        .map(|tag| text.find(tag).unwrap_or_else(|| panic!("{tag} missing in {text}")))
        .collect();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(order, sorted);

        assert!(text.contains(r#"<workbookPr date1904="1" defaultThemeVersion="166925"/>"#));
        // The only remaining sheet is tab 0, so firstSheet="2" is stale.
        assert!(text.contains(r#"<workbookView xWindow="0" yWindow="0" windowWidth="28800"/>"#));
        assert!(text.contains(r#"comment="tax &amp; fees""#));

        let reread = WorkbookCodec::decode(&bytes, &mut PartFragments::new()).unwrap();
        assert_eq!(reread, record);
    }

    #[test]
    fn new_workbooks_get_minimal_markup() {
        let record = WorkbookRecord {
            sheets: vec![SheetEntry {
                name: "Sheet1".into(),
                sheet_id: 1,
                state: SheetVisibility::Visible,
                rel_id: "rId1".into(),
            }],
            ..WorkbookRecord::default()
        };
        let bytes = WorkbookCodec::encode(&record, &PartFragments::new()).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains(
            r#"<workbookPr/><bookViews><workbookView/></bookViews><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#
        ), "{text}");
    }

    #[test]
    fn sheets_without_relationship_ids_are_rejected() {
        let xml = r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheets><sheet name="A" sheetId="1"/></sheets></workbook>"#;
        let err = WorkbookCodec::decode(xml.as_bytes(), &mut PartFragments::new()).unwrap_err();
        assert!(matches!(err, XmlError::MissingAttribute { .. }));
    }
}
