#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
pub const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

pub const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <fonts count="2">
    <font><sz val="11"/><color theme="1"/><name val="Calibri"/><family val="2"/><scheme val="minor"/></font>
    <font><b/><sz val="11"/><color theme="1"/><name val="Calibri"/><family val="2"/><scheme val="minor"/></font>
  </fonts>
  <fills count="2">
    <fill><patternFill patternType="none"/></fill>
    <fill><patternFill patternType="gray125"/></fill>
  </fills>
  <borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>
  <cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>
  <cellXfs count="3">
    <xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>
    <xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/>
    <xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/>
  </cellXfs>
  <cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>
</styleSheet>"#;

pub const CHART_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<c:chartSpace xmlns:c="http://schemas.openxmlformats.org/drawingml/2006/chart"><c:chart><c:plotArea><c:layout/></c:plotArea></c:chart></c:chartSpace>"#;

pub const DRAWING_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:c="http://schemas.openxmlformats.org/drawingml/2006/chart" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><xdr:twoCellAnchor><xdr:from><xdr:col>3</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>1</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from><xdr:to><xdr:col>9</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>15</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to><xdr:graphicFrame macro=""><xdr:nvGraphicFramePr><xdr:cNvPr id="2" name="Chart 1"/><xdr:cNvGraphicFramePr/></xdr:nvGraphicFramePr><xdr:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/></xdr:xfrm><a:graphic><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/chart"><c:chart r:id="rId1"/></a:graphicData></a:graphic></xdr:graphicFrame><xdr:clientData/></xdr:twoCellAnchor></xdr:wsDr>"#;

/// Bytes standing in for a compiled VBA project; never parsed.
pub const VBA_PROJECT_BIN: &[u8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1fake-vba-project\x00\x01\x02\x03";

enum SheetKind {
    Worksheet { body: String, rels: Vec<(String, String, String)> },
    Chartsheet,
}

struct SheetSpec {
    name: String,
    kind: SheetKind,
}

/// Builds small `.xlsx`/`.xlsm` packages in memory.
#[derive(Default)]
pub struct FixtureBuilder {
    sheets: Vec<SheetSpec>,
    shared_strings: Option<Vec<String>>,
    defined_names: Vec<String>,
    workbook_extra: String,
    parts: Vec<(String, Vec<u8>, Option<String>)>,
    workbook_rels: Vec<(String, String)>,
    macro_enabled: bool,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worksheet; `body` is everything inside `<worksheet>`.
    pub fn sheet(mut self, name: &str, body: &str) -> Self {
        self.sheets.push(SheetSpec {
            name: name.to_string(),
            kind: SheetKind::Worksheet {
                body: body.to_string(),
                rels: Vec::new(),
            },
        });
        self
    }

    /// Give the most recently added worksheet a relationship.
    pub fn sheet_rel(mut self, id: &str, rel_type: &str, target: &str) -> Self {
        if let Some(SheetSpec {
            kind: SheetKind::Worksheet { rels, .. },
            ..
        }) = self.sheets.last_mut()
        {
            rels.push((id.to_string(), format!("{REL_BASE}/{rel_type}"), target.to_string()));
        }
        self
    }

    pub fn chart_sheet(mut self, name: &str) -> Self {
        self.sheets.push(SheetSpec {
            name: name.to_string(),
            kind: SheetKind::Chartsheet,
        });
        self
    }

    pub fn shared_strings(mut self, strings: &[&str]) -> Self {
        self.shared_strings = Some(strings.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Add a raw `<definedName>` element.
    pub fn defined_name(mut self, xml: &str) -> Self {
        self.defined_names.push(xml.to_string());
        self
    }

    /// Raw workbook children emitted after `<definedNames>`.
    pub fn workbook_extra(mut self, xml: &str) -> Self {
        self.workbook_extra.push_str(xml);
        self
    }

    /// Add an arbitrary part, optionally with a content-type override.
    pub fn part(mut self, name: &str, bytes: &[u8], content_type: Option<&str>) -> Self {
        self.parts
            .push((name.to_string(), bytes.to_vec(), content_type.map(str::to_string)));
        self
    }

    /// Relate the workbook to a part with a full relationship type URI.
    pub fn workbook_rel(mut self, rel_type: &str, target: &str) -> Self {
        self.workbook_rels
            .push((rel_type.to_string(), target.to_string()));
        self
    }

    pub fn macro_enabled(mut self) -> Self {
        self.macro_enabled = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
        let mut overrides: Vec<(String, String)> = Vec::new();
        let mut wb_rels: Vec<(String, String, String)> = Vec::new();
        let mut sheets_xml = String::new();
        let mut sheet_parts = Vec::new();

        let (mut ws_n, mut cs_n) = (0, 0);
        for (idx, sheet) in self.sheets.iter().enumerate() {
            let rid = format!("rId{}", wb_rels.len() + 1);
            sheets_xml.push_str(&format!(
                r#"<sheet name="{}" sheetId="{}" r:id="{rid}"/>"#,
                sheet.name,
                idx + 1
            ));
            match &sheet.kind {
                SheetKind::Worksheet { body, rels } => {
                    ws_n += 1;
                    let part = format!("xl/worksheets/sheet{ws_n}.xml");
                    wb_rels.push((rid, format!("{REL_BASE}/worksheet"), format!("worksheets/sheet{ws_n}.xml")));
                    overrides.push((
                        part.clone(),
                        "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"
                            .to_string(),
                    ));
                    let xml = format!(
                        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="{NS_MAIN}" xmlns:r="{NS_REL}">{body}</worksheet>"#
                    );
                    sheet_parts.push((part.clone(), xml.into_bytes()));
                    if !rels.is_empty() {
                        sheet_parts.push((
                            format!("xl/worksheets/_rels/sheet{ws_n}.xml.rels"),
                            rels_xml(rels).into_bytes(),
                        ));
                    }
                }
                SheetKind::Chartsheet => {
                    cs_n += 1;
                    let part = format!("xl/chartsheets/sheet{cs_n}.xml");
                    wb_rels.push((rid, format!("{REL_BASE}/chartsheet"), format!("chartsheets/sheet{cs_n}.xml")));
                    overrides.push((
                        part.clone(),
                        "application/vnd.openxmlformats-officedocument.spreadsheetml.chartsheet+xml"
                            .to_string(),
                    ));
                    let xml = format!(
                        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<chartsheet xmlns="{NS_MAIN}" xmlns:r="{NS_REL}"><sheetViews><sheetView workbookViewId="0"/></sheetViews></chartsheet>"#
                    );
                    sheet_parts.push((part, xml.into_bytes()));
                }
            }
        }

        wb_rels.push((
            format!("rId{}", wb_rels.len() + 1),
            format!("{REL_BASE}/styles"),
            "styles.xml".to_string(),
        ));
        overrides.push((
            "xl/styles.xml".to_string(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml".to_string(),
        ));
        if self.shared_strings.is_some() {
            wb_rels.push((
                format!("rId{}", wb_rels.len() + 1),
                format!("{REL_BASE}/sharedStrings"),
                "sharedStrings.xml".to_string(),
            ));
            overrides.push((
                "xl/sharedStrings.xml".to_string(),
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"
                    .to_string(),
            ));
        }
        for (rel_type, target) in &self.workbook_rels {
            wb_rels.push((
                format!("rId{}", wb_rels.len() + 1),
                rel_type.clone(),
                target.clone(),
            ));
        }

        let workbook_ct = if self.macro_enabled {
            "application/vnd.ms-excel.sheet.macroEnabled.main+xml"
        } else {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"
        };
        overrides.insert(0, ("xl/workbook.xml".to_string(), workbook_ct.to_string()));
        for (name, _, ct) in &self.parts {
            if let Some(ct) = ct {
                overrides.push((name.clone(), ct.clone()));
            }
        }

        let mut content_types = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>"#
        );
        if self.macro_enabled {
            content_types.push_str(
                r#"<Default Extension="bin" ContentType="application/vnd.ms-office.vbaProject"/>"#,
            );
        }
        for (part, ct) in &overrides {
            content_types.push_str(&format!(
                r#"<Override PartName="/{part}" ContentType="{ct}"/>"#
            ));
        }
        content_types.push_str("</Types>");
        entries.push(("[Content_Types].xml".to_string(), content_types.into_bytes()));

        entries.push((
            "_rels/.rels".to_string(),
            rels_xml(&[(
                "rId1".to_string(),
                format!("{REL_BASE}/officeDocument"),
                "xl/workbook.xml".to_string(),
            )])
            .into_bytes(),
        ));

        let defined_names = if self.defined_names.is_empty() {
            String::new()
        } else {
            format!("<definedNames>{}</definedNames>", self.defined_names.concat())
        };
        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="{NS_MAIN}" xmlns:r="{NS_REL}"><bookViews><workbookView activeTab="0"/></bookViews><sheets>{sheets_xml}</sheets>{defined_names}{}<calcPr calcId="191029"/></workbook>"#,
            self.workbook_extra
        );
        entries.push(("xl/workbook.xml".to_string(), workbook.into_bytes()));
        entries.push(("xl/_rels/workbook.xml.rels".to_string(), rels_xml(&wb_rels).into_bytes()));
        entries.push(("xl/styles.xml".to_string(), STYLES_XML.as_bytes().to_vec()));
        if let Some(strings) = &self.shared_strings {
            let items: String = strings
                .iter()
                .map(|s| format!("<si><t>{s}</t></si>"))
                .collect();
            let sst = format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="{NS_MAIN}" count="{n}" uniqueCount="{n}">{items}</sst>"#,
                n = strings.len()
            );
            entries.push(("xl/sharedStrings.xml".to_string(), sst.into_bytes()));
        }
        entries.extend(sheet_parts);
        for (name, bytes, _) in self.parts {
            entries.push((name, bytes));
        }
        zip_entries(&entries)
    }
}

pub fn rels_xml(rels: &[(String, String, String)]) -> String {
    let mut out = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for (id, rel_type, target) in rels {
        out.push_str(&format!(
            r#"<Relationship Id="{id}" Type="{rel_type}" Target="{target}"/>"#
        ));
    }
    out.push_str("</Relationships>");
    out
}

pub fn zip_entries(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in entries {
        zip.start_file(name.as_str(), options).expect("start zip entry");
        zip.write_all(bytes).expect("write zip entry");
    }
    zip.finish().expect("finish zip").into_inner()
}

/// A worksheet with a drawing that holds one chart, plus the drawing and chart parts.
pub fn with_chart(builder: FixtureBuilder, name: &str, sheet_data: &str) -> FixtureBuilder {
    builder
        .sheet(name, &format!(r#"{sheet_data}<drawing r:id="rId1"/>"#))
        .sheet_rel("rId1", "drawing", "../drawings/drawing1.xml")
        .part(
            "xl/drawings/drawing1.xml",
            DRAWING_XML.as_bytes(),
            Some("application/vnd.openxmlformats-officedocument.drawing+xml"),
        )
        .part(
            "xl/drawings/_rels/drawing1.xml.rels",
            rels_xml(&[(
                "rId1".to_string(),
                format!("{REL_BASE}/chart"),
                "../charts/chart1.xml".to_string(),
            )])
            .as_bytes(),
            None,
        )
        .part(
            "xl/charts/chart1.xml",
            CHART_XML.as_bytes(),
            Some("application/vnd.openxmlformats-officedocument.drawingml.chart+xml"),
        )
}

/// Text of a part of a saved package.
pub fn part_text(package: &tabula_xlsx::Package, name: &str) -> String {
    String::from_utf8(package.get(name).expect("part exists").to_vec()).expect("utf-8 part")
}
