//! `[Content_Types].xml`: default content types by extension and overrides by part name.

use crate::error::XmlError;
use crate::xml::{self, push_attr, NS_CONTENT_TYPES, XML_DECLARATION};

pub const CT_RELATIONSHIPS: &str = "application/vnd.openxmlformats-package.relationships+xml";
pub const CT_XML: &str = "application/xml";
pub const CT_WORKBOOK: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
pub const CT_WORKBOOK_MACRO: &str = "application/vnd.ms-excel.sheet.macroEnabled.main+xml";
pub const CT_WORKSHEET: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
pub const CT_STYLES: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";
pub const CT_SHARED_STRINGS: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml";
pub const CT_TABLE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.table+xml";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentTypes {
    /// `(extension, content type)`, extension without the dot.
    pub defaults: Vec<(String, String)>,
    /// `(part name, content type)`, part name without the leading `/`.
    pub overrides: Vec<(String, String)>,
}

impl ContentTypes {
    /// The two defaults every package written from scratch starts with.
    pub fn minimal() -> Self {
        Self {
            defaults: vec![
                ("rels".to_string(), CT_RELATIONSHIPS.to_string()),
                ("xml".to_string(), CT_XML.to_string()),
            ],
            overrides: Vec::new(),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, XmlError> {
        let (_, doc) = xml::parse_document(bytes)?;
        let root = xml::expect_root(&doc, "Types")?;
        let mut types = Self::default();
        for node in root.children().filter(|n| n.is_element()) {
            match node.tag_name().name() {
                "Default" => {
                    let ext = xml::required_attr(node, "Extension")?;
                    let ct = xml::required_attr(node, "ContentType")?;
                    types.defaults.push((ext.to_string(), ct.to_string()));
                }
                "Override" => {
                    let part = xml::required_attr(node, "PartName")?;
                    let ct = xml::required_attr(node, "ContentType")?;
                    types
                        .overrides
                        .push((part.trim_start_matches('/').to_string(), ct.to_string()));
                }
                _ => {}
            }
        }
        Ok(types)
    }

    pub fn to_xml(&self) -> Vec<u8> {
        let mut out = String::with_capacity(256 + 128 * self.overrides.len());
        out.push_str(XML_DECLARATION);
        out.push_str("\n<Types");
        push_attr(&mut out, "xmlns", NS_CONTENT_TYPES);
        out.push('>');
        for (ext, ct) in &self.defaults {
            out.push_str("<Default");
            push_attr(&mut out, "Extension", ext);
            push_attr(&mut out, "ContentType", ct);
            out.push_str("/>");
        }
        for (part, ct) in &self.overrides {
            out.push_str("<Override");
            push_attr(&mut out, "PartName", &format!("/{part}"));
            push_attr(&mut out, "ContentType", ct);
            out.push_str("/>");
        }
        out.push_str("</Types>");
        out.into_bytes()
    }

    /// Content type of `part`: its override, else the default for its extension.
    pub fn content_type(&self, part: &str) -> Option<&str> {
        let part = part.trim_start_matches('/');
        if let Some((_, ct)) = self
            .overrides
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(part))
        {
            return Some(ct);
        }
        let ext = part.rsplit_once('.').map(|(_, ext)| ext)?;
        self.defaults
            .iter()
            .find(|(e, _)| e.eq_ignore_ascii_case(ext))
            .map(|(_, ct)| ct.as_str())
    }

    /// Add or replace the override for `part`. Returns whether anything changed.
    pub fn set_override(&mut self, part: &str, content_type: &str) -> bool {
        let part = part.trim_start_matches('/');
        match self
            .overrides
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(part))
        {
            Some((_, ct)) if ct == content_type => false,
            Some((_, ct)) => {
                *ct = content_type.to_string();
                true
            }
            None => {
                self.overrides
                    .push((part.to_string(), content_type.to_string()));
                true
            }
        }
    }

    /// Remove the override for `part`. Returns whether it existed.
    pub fn remove_override(&mut self, part: &str) -> bool {
        let part = part.trim_start_matches('/');
        let before = self.overrides.len();
        self.overrides
            .retain(|(name, _)| !name.eq_ignore_ascii_case(part));
        self.overrides.len() != before
    }
}
