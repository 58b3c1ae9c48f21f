//! Small XML helpers shared by the part codecs.
//!
//! Parts are decoded with `roxmltree` (or `quick-xml` for the shared string table) and encoded by
//! appending to a `String`. Preserved content is kept as raw, still-escaped text sliced out of the
//! source document, so it is re-emitted exactly.

use roxmltree::Node;

use crate::error::XmlError;

pub const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
pub const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
pub const NS_PACKAGE_REL: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
pub const NS_CONTENT_TYPES: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Root attributes written for parts created from scratch.
pub const DEFAULT_ROOT_ATTRS: &str = r#" xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#;

pub fn needs_space_preserve(s: &str) -> bool {
    s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace)
}

pub fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attr(s: &str) -> String {
    escape_text(s)
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
        .replace('\n', "&#10;")
        .replace('\t', "&#9;")
}

/// Append ` name="value"` with the value escaped.
pub fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape_attr(value));
    out.push('"');
}

/// Append a `<t>` element, marking significant outer whitespace.
pub fn push_t(out: &mut String, text: &str) {
    out.push_str("<t");
    if needs_space_preserve(text) {
        out.push_str(r#" xml:space="preserve""#);
    }
    out.push('>');
    out.push_str(&escape_text(text));
    out.push_str("</t>");
}

/// Shortest representation that parses back to the same `f64`.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        // Also folds -0.0.
        return "0".to_string();
    }
    format!("{value}")
}

/// An attribute as written in the source: qualified name and still-escaped value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAttr {
    pub name: String,
    pub value: String,
}

/// Split the attribute list of a raw start tag (`<name a="1" b='2'>`) into [`RawAttr`]s.
pub fn parse_raw_attrs(start_tag: &str) -> Result<Vec<RawAttr>, XmlError> {
    let body = start_tag
        .strip_prefix('<')
        .ok_or_else(|| XmlError::Malformed(format!("not a start tag: {start_tag}")))?;
    let mut rest = body.trim_start_matches(|c: char| !c.is_whitespace() && c != '>' && c != '/');
    let mut attrs = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() || rest.starts_with('>') || rest.starts_with("/>") {
            break;
        }
        let eq = rest
            .find('=')
            .ok_or_else(|| XmlError::Malformed(format!("attribute without value in {start_tag}")))?;
        let name = rest[..eq].trim().to_string();
        rest = rest[eq + 1..].trim_start();
        let quote = rest
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| XmlError::Malformed(format!("unquoted attribute in {start_tag}")))?;
        let close = rest[1..]
            .find(quote)
            .ok_or_else(|| XmlError::Malformed(format!("unterminated attribute in {start_tag}")))?;
        let value = rest[1..1 + close].to_string();
        rest = &rest[close + 2..];
        attrs.push(RawAttr { name, value });
    }
    Ok(attrs)
}

/// Append raw attributes, skipping any whose qualified name is in `skip`.
pub fn push_raw_attrs(out: &mut String, attrs: &[RawAttr], skip: &[&str]) {
    for attr in attrs.iter().filter(|a| !skip.contains(&a.name.as_str())) {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        // Values were sliced from a well-formed document; only the quote style may differ.
        out.push_str(&attr.value.replace('"', "&quot;"));
        out.push('"');
    }
}

/// Source text of an element, markup included.
pub fn raw_node<'a>(text: &'a str, node: Node<'_, '_>) -> &'a str {
    &text[node.range()]
}

/// Source text of an element's start tag.
pub fn start_tag<'a>(text: &'a str, node: Node<'_, '_>) -> &'a str {
    let raw = raw_node(text, node);
    let mut quote: Option<char> = None;
    for (i, ch) in raw.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '>') => return &raw[..=i],
            (None, _) => {}
        }
    }
    raw
}

/// Attributes of `node` exactly as written (namespace declarations included).
pub fn node_raw_attrs(text: &str, node: Node<'_, '_>) -> Result<Vec<RawAttr>, XmlError> {
    parse_raw_attrs(start_tag(text, node))
}

/// Root attributes (namespace declarations, `mc:Ignorable`, ...) of a part as raw text.
pub fn root_attrs_text(text: &str, root: Node<'_, '_>) -> Result<String, XmlError> {
    let mut out = String::new();
    push_raw_attrs(&mut out, &node_raw_attrs(text, root)?, &[]);
    Ok(out)
}

pub fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

pub fn attr_bool(node: Node<'_, '_>, name: &str) -> Option<bool> {
    node.attribute(name).map(parse_bool)
}

pub fn attr_u32(node: Node<'_, '_>, name: &str) -> Result<Option<u32>, XmlError> {
    node.attribute(name)
        .map(|v| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| XmlError::invalid(&format!("{}@{name}", node.tag_name().name()), v))
        })
        .transpose()
}

pub fn attr_f64(node: Node<'_, '_>, name: &str) -> Result<Option<f64>, XmlError> {
    node.attribute(name)
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| XmlError::invalid(&format!("{}@{name}", node.tag_name().name()), v))
        })
        .transpose()
}

pub fn required_attr<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, XmlError> {
    node.attribute(name)
        .ok_or_else(|| XmlError::missing(node.tag_name().name(), name))
}

/// Element children with local name `name`.
pub fn children_named<'a, 'i>(
    node: Node<'a, 'i>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'i>> {
    node.children()
        .filter(move |c| c.is_element() && c.tag_name().name() == name)
}

pub fn child_named<'a, 'i>(node: Node<'a, 'i>, name: &'static str) -> Option<Node<'a, 'i>> {
    children_named(node, name).next()
}

/// Concatenated text content of `node` (entities already resolved).
pub fn text_content(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Parse a part as UTF-8 XML.
pub fn parse_document(bytes: &[u8]) -> Result<(&str, roxmltree::Document<'_>), XmlError> {
    let text = std::str::from_utf8(bytes)?;
    // A UTF-8 byte order mark is legal in parts but not for the parser.
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let doc = roxmltree::Document::parse(text)?;
    Ok((text, doc))
}

/// Fail unless the document root has the expected local name.
pub fn expect_root<'a, 'i>(
    doc: &'a roxmltree::Document<'i>,
    expected: &str,
) -> Result<Node<'a, 'i>, XmlError> {
    let root = doc.root_element();
    if root.tag_name().name() != expected {
        return Err(XmlError::UnexpectedRoot {
            expected: expected.to_string(),
            found: root.tag_name().name().to_string(),
        });
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_attrs_keep_prefixes_and_escapes() {
        let attrs =
            parse_raw_attrs(r#"<sheetView  tabSelected="1" x14ac:dy='a&amp;b' zoomScale="85"/>"#)
                .unwrap();
        assert_eq!(
            attrs,
            vec![
                RawAttr {
                    name: "tabSelected".into(),
                    value: "1".into()
                },
                RawAttr {
                    name: "x14ac:dy".into(),
                    value: "a&amp;b".into()
                },
                RawAttr {
                    name: "zoomScale".into(),
                    value: "85".into()
                },
            ]
        );
        let mut out = String::new();
        push_raw_attrs(&mut out, &attrs, &["tabSelected"]);
        assert_eq!(out, r#" x14ac:dy="a&amp;b" zoomScale="85""#);
    }

    #[test]
    fn start_tag_stops_at_the_first_unquoted_bracket() {
        let text = r#"<root a="x>y"><child/></root>"#;
        let doc = roxmltree::Document::parse(text).unwrap();
        assert_eq!(start_tag(text, doc.root_element()), r#"<root a="x>y">"#);
        let root_attrs = root_attrs_text(text, doc.root_element()).unwrap();
        assert_eq!(root_attrs, r#" a="x>y""#);
    }

    #[test]
    fn numbers_use_the_shortest_round_trip_form() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1.0 / 3.0).parse::<f64>().unwrap(), 1.0 / 3.0);
    }

    #[test]
    fn escaping_covers_markup_characters() {
        assert_eq!(escape_text("a<b & c>"), "a&lt;b &amp; c&gt;");
        assert_eq!(escape_attr(r#"say "hi""#), "say &quot;hi&quot;");
        let mut out = String::new();
        push_t(&mut out, " padded");
        assert_eq!(out, r#"<t xml:space="preserve"> padded</t>"#);
    }
}
