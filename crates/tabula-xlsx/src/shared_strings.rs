//! `xl/sharedStrings.xml`: the workbook's table of (possibly rich) strings.
//!
//! Decoded with a streaming reader since the table can be large. Phonetic runs (`rPh`) are not
//! part of the displayed text and are dropped; `extLst` is preserved.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use roxmltree::Node;
use tabula_model::{Font, RichText, TextRun};

use crate::codec::{open_root, PartCodec};
use crate::error::XmlError;
use crate::preserve::{PartFragments, SchemaOrder};
use crate::styles::{apply_font_property, push_font_properties};
use crate::xml::{self, push_attr, push_t};

const ORDER: SchemaOrder = SchemaOrder(&["si", "extLst"]);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SharedStringsRecord {
    /// Entries in file order; a cell's `<v>` indexes this list.
    pub entries: Vec<RichText>,
    /// Total number of cell references to the table (`count`).
    pub references: usize,
}

pub struct SharedStringsCodec;

impl PartCodec for SharedStringsCodec {
    type Record = SharedStringsRecord;

    fn decode(bytes: &[u8], fragments: &mut PartFragments) -> Result<SharedStringsRecord, XmlError> {
        let text = std::str::from_utf8(bytes)?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut buf = Vec::new();
        let mut entries = Vec::new();
        let mut references = None;
        let mut phonetic = 0usize;
        let mut in_root = false;
        let mut slot = 0;
        loop {
            let before = reader.buffer_position() as usize;
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) | Event::Empty(e) if !in_root => {
                    let found = std::str::from_utf8(e.local_name().as_ref())?.to_string();
                    if found != "sst" {
                        return Err(XmlError::UnexpectedRoot {
                            expected: "sst".to_string(),
                            found,
                        });
                    }
                    let start = &text[before..reader.buffer_position() as usize];
                    let attrs = xml::parse_raw_attrs(start)?;
                    references = attrs
                        .iter()
                        .find(|a| a.name == "count")
                        .and_then(|a| a.value.trim().parse::<usize>().ok());
                    let mut root_attrs = String::new();
                    xml::push_raw_attrs(&mut root_attrs, &attrs, &["count", "uniqueCount"]);
                    fragments.set_root_attrs(root_attrs);
                    in_root = true;
                }
                Event::Start(e) if e.local_name().as_ref() == b"si" => {
                    entries.push(parse_si(&mut reader, &mut phonetic)?);
                }
                Event::Empty(e) if e.local_name().as_ref() == b"si" => {
                    entries.push(RichText::plain(""));
                }
                Event::Start(e) => {
                    let name = std::str::from_utf8(e.name().as_ref())?.to_string();
                    let local = std::str::from_utf8(e.local_name().as_ref())?.to_string();
                    reader.read_to_end_into(e.name(), &mut Vec::new())?;
                    let raw = &text[before..reader.buffer_position() as usize];
                    fragments.push_child(ORDER.anchor(&local, &mut slot), &name, raw);
                }
                Event::Empty(e) => {
                    let name = std::str::from_utf8(e.name().as_ref())?.to_string();
                    let local = std::str::from_utf8(e.local_name().as_ref())?.to_string();
                    let raw = &text[before..reader.buffer_position() as usize];
                    fragments.push_child(ORDER.anchor(&local, &mut slot), &name, raw);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        if !in_root {
            return Err(XmlError::Malformed("shared string table has no root".to_string()));
        }
        if phonetic > 0 {
            log::warn!("shared strings: dropped {phonetic} phonetic run(s)");
        }

        Ok(SharedStringsRecord {
            references: references.unwrap_or(entries.len()),
            entries,
        })
    }

    fn encode(record: &SharedStringsRecord, fragments: &PartFragments) -> Result<Vec<u8>, XmlError> {
        let mut out = String::with_capacity(256 + 32 * record.entries.len());
        open_root(&mut out, "sst", fragments, &["count", "uniqueCount"]);
        let unique = record.entries.len();
        push_attr(&mut out, "count", &record.references.max(unique).to_string());
        push_attr(&mut out, "uniqueCount", &unique.to_string());
        out.push('>');
        for (slot, element) in ORDER.0.iter().enumerate() {
            if *element == "si" {
                for entry in &record.entries {
                    out.push_str("<si>");
                    push_rich_text(&mut out, entry);
                    out.push_str("</si>");
                }
            }
            fragments.emit_slot(slot, &mut out);
        }
        out.push_str("</sst>");
        Ok(out.into_bytes())
    }
}

/// Write the content of an `<si>` or `<is>` element.
pub(crate) fn push_rich_text(out: &mut String, text: &RichText) {
    if text.is_plain() {
        push_t(out, &text.text());
        return;
    }
    for run in &text.runs {
        out.push_str("<r>");
        if let Some(font) = &run.font {
            out.push_str("<rPr>");
            push_font_properties(out, font, "rFont");
            out.push_str("</rPr>");
        }
        push_t(out, &run.text);
        out.push_str("</r>");
    }
}

/// Collapse runs without formatting into plain text.
fn finish(runs: Vec<TextRun>) -> RichText {
    if runs.iter().all(|r| r.font.is_none()) {
        let text: String = runs.into_iter().map(|r| r.text).collect();
        return RichText::plain(text);
    }
    RichText::from_runs(runs)
}

/// Rich text from an already parsed `<is>` (or `<si>`) element.
pub(crate) fn rich_text_from_node(node: Node<'_, '_>) -> RichText {
    let mut runs = Vec::new();
    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "t" => runs.push(TextRun {
                text: xml::text_content(child),
                font: None,
            }),
            "r" => {
                let font = xml::child_named(child, "rPr").map(|rpr| {
                    let mut font = Font::default();
                    for prop in rpr.children().filter(Node::is_element) {
                        apply_font_property(&mut font, prop.tag_name().name(), &prop);
                    }
                    font
                });
                let text = xml::children_named(child, "t").map(xml::text_content).collect();
                runs.push(TextRun { text, font });
            }
            _ => {}
        }
    }
    finish(runs)
}

fn parse_si(reader: &mut Reader<&[u8]>, phonetic: &mut usize) -> Result<RichText, XmlError> {
    let mut buf = Vec::new();
    let mut runs = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => runs.push(TextRun {
                text: read_text(reader, e.name())?,
                font: None,
            }),
            Event::Empty(e) if e.local_name().as_ref() == b"t" => runs.push(TextRun {
                text: String::new(),
                font: None,
            }),
            Event::Start(e) if e.local_name().as_ref() == b"r" => runs.push(parse_r(reader)?),
            Event::Start(e) => {
                if e.local_name().as_ref() == b"rPh" {
                    *phonetic += 1;
                }
                reader.read_to_end_into(e.name(), &mut Vec::new())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"si" => break,
            Event::Eof => return Err(XmlError::Malformed("unterminated <si>".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(finish(runs))
}

fn parse_r(reader: &mut Reader<&[u8]>) -> Result<TextRun, XmlError> {
    let mut buf = Vec::new();
    let mut font = None;
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"rPr" => {
                font = Some(parse_rpr(reader)?);
            }
            Event::Empty(e) if e.local_name().as_ref() == b"rPr" => {
                font = Some(Font::default());
            }
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                text.push_str(&read_text(reader, e.name())?);
            }
            Event::Start(e) => {
                reader.read_to_end_into(e.name(), &mut Vec::new())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"r" => break,
            Event::Eof => return Err(XmlError::Malformed("unterminated <r>".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(TextRun { text, font })
}

fn parse_rpr(reader: &mut Reader<&[u8]>) -> Result<Font, XmlError> {
    let mut buf = Vec::new();
    let mut font = Font::default();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) => apply_rpr_tag(&mut font, &e)?,
            Event::Start(e) => {
                apply_rpr_tag(&mut font, &e)?;
                reader.read_to_end_into(e.name(), &mut Vec::new())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"rPr" => break,
            Event::Eof => return Err(XmlError::Malformed("unterminated <rPr>".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(font)
}

fn apply_rpr_tag(font: &mut Font, e: &BytesStart<'_>) -> Result<(), XmlError> {
    let mut attrs = Vec::new();
    for attr in e.attributes().with_checks(false) {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.local_name().as_ref())?.to_string();
        attrs.push((key, attr.unescape_value()?.into_owned()));
    }
    let local = e.local_name();
    apply_font_property(font, std::str::from_utf8(local.as_ref())?, attrs.as_slice());
    Ok(())
}

fn read_text(reader: &mut Reader<&[u8]>, end: QName<'_>) -> Result<String, XmlError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(std::str::from_utf8(e.as_ref())?),
            Event::End(e) if e.name() == end => break,
            Event::Eof => return Err(XmlError::Malformed("unterminated <t>".to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}
