//! `xl/styles.xml`: fonts, fills, borders, number formats and the `xf` records cells point at.
//!
//! On load every `cellXfs` entry is flattened into a self-contained [`Style`]; the loader interns
//! them into the workbook's [`tabula_model::StyleTable`]. On save the component lists are rebuilt
//! from the table with duplicates folded, so `fonts`/`fills`/`borders` only ever contain what the
//! written `xf` records reference. `dxfs`, `tableStyles`, `colors` and extensions are preserved.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use ordered_float::OrderedFloat;
use roxmltree::Node;
use tabula_model::{
    builtin_code, builtin_id_for_code, Alignment, Border, BorderEdge, BorderStyle, Color,
    ColorKind, Fill, FillPattern, Font, FontScheme, GradientFill, GradientKind, GradientStop,
    HorizontalAlignment, NamedStyle, NumberFormat, Protection, Style, Underline,
    VerticalAlignment, VerticalTextAlignment, FIRST_CUSTOM_NUM_FMT_ID,
};

use crate::codec::{open_root, PartCodec};
use crate::error::XmlError;
use crate::preserve::{qualified_name, PartFragments, SchemaOrder};
use crate::xml::{self, format_number, push_attr};

const ORDER: SchemaOrder = SchemaOrder(&[
    "numFmts",
    "fonts",
    "fills",
    "borders",
    "cellStyleXfs",
    "cellXfs",
    "cellStyles",
    "dxfs",
    "tableStyles",
    "colors",
    "extLst",
]);

/// Typed content of a styles part.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StylesRecord {
    /// Cell formats in `cellXfs` order; entry 0 is the workbook default.
    pub cell_formats: Vec<Style>,
    /// Named styles in `cellStyles` order.
    pub named_styles: Vec<NamedStyle>,
}

pub struct StylesCodec;

/// Attribute lookup shared by the DOM and streaming readers.
pub(crate) trait Attrs {
    fn attr(&self, name: &str) -> Option<&str>;
}

impl Attrs for Node<'_, '_> {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attribute(name)
    }
}

impl Attrs for [(String, String)] {
    fn attr(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// `<b/>` means on; `<b val="0"/>` means off.
fn flag(attrs: &(impl Attrs + ?Sized)) -> bool {
    match attrs.attr("val") {
        None => true,
        Some(v) => !(v == "0" || v.eq_ignore_ascii_case("false")),
    }
}

fn val<T: std::str::FromStr>(attrs: &(impl Attrs + ?Sized)) -> Option<T> {
    attrs.attr("val").and_then(|v| v.trim().parse().ok())
}

fn parse_argb(value: &str) -> Option<u32> {
    let hex = value.trim();
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    match hex.len() {
        8 => u32::from_str_radix(hex, 16).ok(),
        6 => u32::from_str_radix(hex, 16).ok().map(|rgb| 0xFF00_0000 | rgb),
        _ => None,
    }
}

pub(crate) fn parse_color(attrs: &(impl Attrs + ?Sized)) -> Option<Color> {
    let kind = if attrs.attr("auto").is_some_and(xml::parse_bool) {
        ColorKind::Auto
    } else if let Some(rgb) = attrs.attr("rgb") {
        ColorKind::Argb(parse_argb(rgb)?)
    } else if let Some(theme) = attrs.attr("theme").and_then(|v| v.parse().ok()) {
        ColorKind::Theme(theme)
    } else if let Some(indexed) = attrs.attr("indexed").and_then(|v| v.parse().ok()) {
        ColorKind::Indexed(indexed)
    } else {
        return None;
    };
    let tint = attrs
        .attr("tint")
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|t| *t != 0.0)
        .map(OrderedFloat);
    Some(Color { kind, tint })
}

pub(crate) fn push_color(out: &mut String, tag: &str, color: &Color) {
    out.push('<');
    out.push_str(tag);
    match color.kind {
        ColorKind::Argb(argb) => push_attr(out, "rgb", &format!("{argb:08X}")),
        ColorKind::Theme(theme) => push_attr(out, "theme", &theme.to_string()),
        ColorKind::Indexed(indexed) => push_attr(out, "indexed", &indexed.to_string()),
        ColorKind::Auto => push_attr(out, "auto", "1"),
    }
    if let Some(tint) = color.tint {
        push_attr(out, "tint", &format_number(tint.0));
    }
    out.push_str("/>");
}

/// Apply one child of `<font>` or `<rPr>` to `font`. Unmodeled properties are ignored.
pub(crate) fn apply_font_property(font: &mut Font, local: &str, attrs: &(impl Attrs + ?Sized)) {
    match local {
        "b" => font.bold = flag(attrs),
        "i" => font.italic = flag(attrs),
        "strike" => font.strike = flag(attrs),
        "u" => {
            font.underline = match attrs.attr("val") {
                None => Some(Underline::Single),
                Some("none") => None,
                Some(v) => Some(Underline::parse(v).unwrap_or(Underline::Single)),
            }
        }
        "vertAlign" => {
            font.vertical_align = attrs
                .attr("val")
                .and_then(VerticalTextAlignment::parse)
                .filter(|v| *v != VerticalTextAlignment::Baseline)
        }
        "sz" => font.size = val::<f64>(attrs).map(OrderedFloat),
        "color" => font.color = parse_color(attrs),
        "name" | "rFont" => font.name = attrs.attr("val").map(str::to_string),
        "family" => font.family = val(attrs),
        "charset" => font.charset = val(attrs),
        "scheme" => font.scheme = attrs.attr("val").and_then(FontScheme::parse),
        _ => {}
    }
}

/// Write the children of a `<font>` (`name_tag` = `name`) or `<rPr>` (`name_tag` = `rFont`).
pub(crate) fn push_font_properties(out: &mut String, font: &Font, name_tag: &str) {
    if font.bold {
        out.push_str("<b/>");
    }
    if font.italic {
        out.push_str("<i/>");
    }
    if font.strike {
        out.push_str("<strike/>");
    }
    match font.underline {
        Some(Underline::Single) => out.push_str("<u/>"),
        Some(other) => {
            out.push_str("<u");
            push_attr(out, "val", other.as_str());
            out.push_str("/>");
        }
        None => {}
    }
    if let Some(align) = font.vertical_align {
        out.push_str("<vertAlign");
        push_attr(out, "val", align.as_str());
        out.push_str("/>");
    }
    if let Some(size) = font.size {
        out.push_str("<sz");
        push_attr(out, "val", &format_number(size.0));
        out.push_str("/>");
    }
    if let Some(color) = &font.color {
        push_color(out, "color", color);
    }
    if let Some(name) = &font.name {
        out.push('<');
        out.push_str(name_tag);
        push_attr(out, "val", name);
        out.push_str("/>");
    }
    if let Some(family) = font.family {
        out.push_str("<family");
        push_attr(out, "val", &family.to_string());
        out.push_str("/>");
    }
    if let Some(charset) = font.charset {
        out.push_str("<charset");
        push_attr(out, "val", &charset.to_string());
        out.push_str("/>");
    }
    if let Some(scheme) = font.scheme {
        out.push_str("<scheme");
        push_attr(out, "val", scheme.as_str());
        out.push_str("/>");
    }
}

fn parse_font(node: Node<'_, '_>) -> Font {
    let mut font = Font::default();
    for child in node.children().filter(Node::is_element) {
        apply_font_property(&mut font, child.tag_name().name(), &child);
    }
    font
}

fn parse_fill(node: Node<'_, '_>) -> Fill {
    if let Some(gradient) = xml::child_named(node, "gradientFill") {
        let num = |name: &str| {
            gradient
                .attribute(name)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        let stops = xml::children_named(gradient, "stop")
            .filter_map(|stop| {
                let position = stop.attribute("position")?.parse::<f64>().ok()?;
                let color = xml::child_named(stop, "color").and_then(|c| parse_color(&c))?;
                Some(GradientStop {
                    position: OrderedFloat(position),
                    color,
                })
            })
            .collect();
        return Fill {
            gradient: Some(GradientFill {
                kind: gradient
                    .attribute("type")
                    .and_then(GradientKind::parse)
                    .unwrap_or(GradientKind::Linear),
                degree: OrderedFloat(num("degree")),
                left: OrderedFloat(num("left")),
                right: OrderedFloat(num("right")),
                top: OrderedFloat(num("top")),
                bottom: OrderedFloat(num("bottom")),
                stops,
            }),
            ..Fill::default()
        };
    }
    let Some(pattern) = xml::child_named(node, "patternFill") else {
        return Fill::default();
    };
    Fill {
        pattern: pattern
            .attribute("patternType")
            .and_then(FillPattern::parse)
            .unwrap_or(FillPattern::None),
        fg_color: xml::child_named(pattern, "fgColor").and_then(|c| parse_color(&c)),
        bg_color: xml::child_named(pattern, "bgColor").and_then(|c| parse_color(&c)),
        gradient: None,
    }
}

fn parse_border_edge(node: Option<Node<'_, '_>>) -> BorderEdge {
    let Some(node) = node else {
        return BorderEdge::default();
    };
    BorderEdge {
        style: node
            .attribute("style")
            .and_then(BorderStyle::parse)
            .unwrap_or_default(),
        color: xml::child_named(node, "color").and_then(|c| parse_color(&c)),
    }
}

fn parse_border(node: Node<'_, '_>) -> Border {
    Border {
        left: parse_border_edge(xml::child_named(node, "left")),
        right: parse_border_edge(xml::child_named(node, "right")),
        top: parse_border_edge(xml::child_named(node, "top")),
        bottom: parse_border_edge(xml::child_named(node, "bottom")),
        diagonal: parse_border_edge(xml::child_named(node, "diagonal")),
        diagonal_up: xml::attr_bool(node, "diagonalUp").unwrap_or(false),
        diagonal_down: xml::attr_bool(node, "diagonalDown").unwrap_or(false),
    }
}

fn parse_alignment(node: Node<'_, '_>) -> Alignment {
    Alignment {
        horizontal: node
            .attribute("horizontal")
            .and_then(HorizontalAlignment::parse),
        vertical: node.attribute("vertical").and_then(VerticalAlignment::parse),
        wrap_text: xml::attr_bool(node, "wrapText").unwrap_or(false),
        shrink_to_fit: xml::attr_bool(node, "shrinkToFit").unwrap_or(false),
        indent: node
            .attribute("indent")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        text_rotation: node
            .attribute("textRotation")
            .and_then(|v| v.parse().ok())
            .filter(|r| *r != 0),
    }
}

fn parse_protection(node: Node<'_, '_>) -> Protection {
    Protection {
        locked: xml::attr_bool(node, "locked").unwrap_or(true),
        hidden: xml::attr_bool(node, "hidden").unwrap_or(false),
    }
}

/// An `xf` record before its component ids are resolved.
#[derive(Debug, Default)]
struct XfRecord {
    num_fmt_id: u32,
    font_id: u32,
    fill_id: u32,
    border_id: u32,
    xf_id: Option<u32>,
    alignment: Alignment,
    protection: Protection,
}

fn parse_xf(node: Node<'_, '_>) -> XfRecord {
    let id = |name: &str| {
        node.attribute(name)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0)
    };
    XfRecord {
        num_fmt_id: id("numFmtId"),
        font_id: id("fontId"),
        fill_id: id("fillId"),
        border_id: id("borderId"),
        xf_id: node.attribute("xfId").and_then(|v| v.trim().parse().ok()),
        alignment: xml::child_named(node, "alignment")
            .map(parse_alignment)
            .unwrap_or_default(),
        protection: xml::child_named(node, "protection")
            .map(parse_protection)
            .unwrap_or_default(),
    }
}

#[derive(Default)]
struct Components {
    num_fmts: HashMap<u32, String>,
    fonts: Vec<Font>,
    fills: Vec<Fill>,
    borders: Vec<Border>,
}

impl Components {
    fn number_format(&self, id: u32) -> NumberFormat {
        if let Some(code) = self.num_fmts.get(&id) {
            return match u16::try_from(id) {
                Ok(builtin) if builtin_code(builtin) == Some(code.as_str()) => {
                    NumberFormat::Builtin(builtin)
                }
                _ => NumberFormat::Custom(code.clone()),
            };
        }
        match u16::try_from(id) {
            // Ids below the custom range are implicit even when their code is locale specific.
            Ok(builtin) if id < FIRST_CUSTOM_NUM_FMT_ID => NumberFormat::Builtin(builtin),
            _ => {
                log::warn!("styles: numFmtId {id} is not defined; using General");
                NumberFormat::GENERAL
            }
        }
    }

    fn style(&self, xf: &XfRecord, named_style: Option<String>) -> Style {
        fn pick<T: Clone>(items: &[T], id: u32, what: &str, fallback: impl FnOnce() -> T) -> T {
            match items.get(id as usize).or_else(|| items.first()) {
                Some(item) => {
                    if id as usize >= items.len() {
                        log::warn!("styles: {what} {id} is out of range; using entry 0");
                    }
                    item.clone()
                }
                None => fallback(),
            }
        }
        Style {
            font: pick(&self.fonts, xf.font_id, "fontId", Font::body),
            fill: pick(&self.fills, xf.fill_id, "fillId", Fill::default),
            border: pick(&self.borders, xf.border_id, "borderId", Border::default),
            alignment: xf.alignment.clone(),
            number_format: self.number_format(xf.num_fmt_id),
            protection: xf.protection.clone(),
            named_style,
        }
    }
}

struct CellStyleRecord {
    name: String,
    xf_id: u32,
    builtin_id: Option<u32>,
}

impl CellStyleRecord {
    fn is_normal(&self) -> bool {
        self.builtin_id == Some(0) || self.name.eq_ignore_ascii_case("Normal")
    }
}

impl PartCodec for StylesCodec {
    type Record = StylesRecord;

    fn decode(bytes: &[u8], fragments: &mut PartFragments) -> Result<StylesRecord, XmlError> {
        let (text, doc) = xml::parse_document(bytes)?;
        let root = xml::expect_root(&doc, "styleSheet")?;
        fragments.set_root_attrs(xml::root_attrs_text(text, root)?);

        let mut components = Components::default();
        let mut style_xfs = Vec::new();
        let mut cell_xfs = Vec::new();
        let mut cell_styles = Vec::new();
        let mut slot = 0;
        for child in root.children().filter(Node::is_element) {
            let local = child.tag_name().name();
            let anchor = ORDER.anchor(local, &mut slot);
            match local {
                "numFmts" => {
                    for fmt in xml::children_named(child, "numFmt") {
                        let id = xml::attr_u32(fmt, "numFmtId")?;
                        if let (Some(id), Some(code)) = (id, fmt.attribute("formatCode")) {
                            components.num_fmts.insert(id, code.to_string());
                        }
                    }
                }
                "fonts" => {
                    components.fonts = xml::children_named(child, "font").map(parse_font).collect()
                }
                "fills" => {
                    components.fills = xml::children_named(child, "fill").map(parse_fill).collect()
                }
                "borders" => {
                    components.borders = xml::children_named(child, "border")
                        .map(parse_border)
                        .collect()
                }
                "cellStyleXfs" => style_xfs = xml::children_named(child, "xf").map(parse_xf).collect(),
                "cellXfs" => cell_xfs = xml::children_named(child, "xf").map(parse_xf).collect(),
                "cellStyles" => {
                    for style in xml::children_named(child, "cellStyle") {
                        let Some(name) = style.attribute("name") else {
                            log::warn!("styles: skipping cellStyle without a name");
                            continue;
                        };
                        cell_styles.push(CellStyleRecord {
                            name: name.to_string(),
                            xf_id: xml::attr_u32(style, "xfId")?.unwrap_or(0),
                            builtin_id: xml::attr_u32(style, "builtinId")?,
                        });
                    }
                }
                _ => {
                    let name = qualified_name(xml::start_tag(text, child));
                    fragments.push_child(anchor, name, xml::raw_node(text, child));
                }
            }
        }

        let named_for_xf = |xf_id: Option<u32>| -> Option<String> {
            let xf_id = xf_id?;
            cell_styles
                .iter()
                .find(|s| s.xf_id == xf_id)
                .filter(|s| !s.is_normal())
                .map(|s| s.name.clone())
        };
        let cell_formats = cell_xfs
            .iter()
            .map(|xf| components.style(xf, named_for_xf(xf.xf_id)))
            .collect();
        let named_styles = cell_styles
            .iter()
            .map(|record| {
                let style = match style_xfs.get(record.xf_id as usize) {
                    Some(xf) => components.style(xf, None),
                    None => {
                        log::warn!(
                            "styles: cell style {:?} points at missing xf {}",
                            record.name,
                            record.xf_id
                        );
                        Style::default()
                    }
                };
                NamedStyle {
                    name: record.name.clone(),
                    style,
                    builtin_id: record.builtin_id,
                }
            })
            .collect();

        Ok(StylesRecord {
            cell_formats,
            named_styles,
        })
    }

    fn encode(record: &StylesRecord, fragments: &PartFragments) -> Result<Vec<u8>, XmlError> {
        let default_style = record.cell_formats.first().cloned().unwrap_or_default();
        let mut tables = EncodeTables::new(&default_style.font);
        let mut named: Vec<NamedStyle> = record.named_styles.clone();
        if !named.iter().any(|n| n.name.eq_ignore_ascii_case("Normal")) {
            let mut base = default_style.clone();
            base.named_style = None;
            named.insert(0, NamedStyle::normal(base));
        }
        let named_index = |name: Option<&str>| -> u32 {
            let Some(name) = name else {
                return named
                    .iter()
                    .position(|n| n.name.eq_ignore_ascii_case("Normal"))
                    .unwrap_or(0) as u32;
            };
            match named.iter().position(|n| n.name.eq_ignore_ascii_case(name)) {
                Some(index) => index as u32,
                None => {
                    log::warn!("cell format refers to unknown named style {name:?}; using the first");
                    0
                }
            }
        };

        let style_xfs: Vec<String> = named
            .iter()
            .map(|n| tables.xf(&n.style, None))
            .collect();
        let formats: Vec<&Style> = if record.cell_formats.is_empty() {
            vec![&default_style]
        } else {
            record.cell_formats.iter().collect()
        };
        let cell_xfs: Vec<String> = formats
            .iter()
            .map(|style| tables.xf(style, Some(named_index(style.named_style.as_deref()))))
            .collect();

        let mut out = String::with_capacity(2048 + 128 * cell_xfs.len());
        open_root(&mut out, "styleSheet", fragments, &[]);
        out.push('>');
        for (slot, element) in ORDER.0.iter().enumerate() {
            match *element {
                "numFmts" if !tables.num_fmts.is_empty() => {
                    out.push_str("<numFmts");
                    push_attr(&mut out, "count", &tables.num_fmts.len().to_string());
                    out.push('>');
                    for (code, id) in &tables.num_fmts {
                        out.push_str("<numFmt");
                        push_attr(&mut out, "numFmtId", &id.to_string());
                        push_attr(&mut out, "formatCode", code);
                        out.push_str("/>");
                    }
                    out.push_str("</numFmts>");
                }
                "fonts" => {
                    push_list(&mut out, "fonts", tables.fonts.iter(), |out, font| {
                        out.push_str("<font>");
                        push_font_properties(out, font, "name");
                        out.push_str("</font>");
                    })
                }
                "fills" => push_list(&mut out, "fills", tables.fills.iter(), push_fill),
                "borders" => push_list(&mut out, "borders", tables.borders.iter(), push_border),
                "cellStyleXfs" => push_list(&mut out, "cellStyleXfs", style_xfs.iter(), |out, xf| {
                    out.push_str(xf)
                }),
                "cellXfs" => {
                    push_list(&mut out, "cellXfs", cell_xfs.iter(), |out, xf| out.push_str(xf))
                }
                "cellStyles" => {
                    push_list(&mut out, "cellStyles", named.iter().enumerate(), |out, (i, n)| {
                        out.push_str("<cellStyle");
                        push_attr(out, "name", &n.name);
                        push_attr(out, "xfId", &i.to_string());
                        if let Some(builtin) = n.builtin_id {
                            push_attr(out, "builtinId", &builtin.to_string());
                        }
                        out.push_str("/>");
                    })
                }
                _ => {}
            }
            fragments.emit_slot(slot, &mut out);
        }
        out.push_str("</styleSheet>");
        Ok(out.into_bytes())
    }
}

/// Deduplicated component lists built while encoding.
struct EncodeTables {
    num_fmts: IndexMap<String, u32>,
    fonts: IndexSet<Font>,
    fills: IndexSet<Fill>,
    borders: IndexSet<Border>,
}

impl EncodeTables {
    fn new(default_font: &Font) -> Self {
        let mut fonts = IndexSet::new();
        fonts.insert(default_font.clone());
        let mut fills = IndexSet::new();
        // Excel reserves fill ids 0 and 1.
        fills.insert(Fill::default());
        fills.insert(Fill::gray125());
        let mut borders = IndexSet::new();
        borders.insert(Border::default());
        Self {
            num_fmts: IndexMap::new(),
            fonts,
            fills,
            borders,
        }
    }

    fn num_fmt_id(&mut self, format: &NumberFormat) -> u32 {
        match format {
            NumberFormat::Builtin(id) => u32::from(*id),
            NumberFormat::Custom(code) => {
                if let Some(id) = builtin_id_for_code(code) {
                    return u32::from(id);
                }
                let next = FIRST_CUSTOM_NUM_FMT_ID + self.num_fmts.len() as u32;
                *self.num_fmts.entry(code.clone()).or_insert(next)
            }
        }
    }

    fn xf(&mut self, style: &Style, xf_id: Option<u32>) -> String {
        let num_fmt_id = self.num_fmt_id(&style.number_format);
        let font_id = self.fonts.insert_full(style.font.clone()).0;
        let fill_id = self.fills.insert_full(style.fill.clone()).0;
        let border_id = self.borders.insert_full(style.border.clone()).0;

        let mut out = String::from("<xf");
        push_attr(&mut out, "numFmtId", &num_fmt_id.to_string());
        push_attr(&mut out, "fontId", &font_id.to_string());
        push_attr(&mut out, "fillId", &fill_id.to_string());
        push_attr(&mut out, "borderId", &border_id.to_string());
        if let Some(xf_id) = xf_id {
            push_attr(&mut out, "xfId", &xf_id.to_string());
        }
        let apply = xf_id.is_some();
        if apply && num_fmt_id != 0 {
            push_attr(&mut out, "applyNumberFormat", "1");
        }
        if apply && font_id != 0 {
            push_attr(&mut out, "applyFont", "1");
        }
        if apply && fill_id != 0 {
            push_attr(&mut out, "applyFill", "1");
        }
        if apply && border_id != 0 {
            push_attr(&mut out, "applyBorder", "1");
        }
        let has_alignment = !style.alignment.is_default();
        let has_protection = style.protection != Protection::default();
        if apply && has_alignment {
            push_attr(&mut out, "applyAlignment", "1");
        }
        if apply && has_protection {
            push_attr(&mut out, "applyProtection", "1");
        }
        if !has_alignment && !has_protection {
            out.push_str("/>");
            return out;
        }
        out.push('>');
        if has_alignment {
            push_alignment(&mut out, &style.alignment);
        }
        if has_protection {
            out.push_str("<protection");
            if !style.protection.locked {
                push_attr(&mut out, "locked", "0");
            }
            if style.protection.hidden {
                push_attr(&mut out, "hidden", "1");
            }
            out.push_str("/>");
        }
        out.push_str("</xf>");
        out
    }
}

fn push_list<T>(
    out: &mut String,
    tag: &str,
    items: impl ExactSizeIterator<Item = T>,
    mut push: impl FnMut(&mut String, T),
) {
    out.push('<');
    out.push_str(tag);
    push_attr(out, "count", &items.len().to_string());
    out.push('>');
    for item in items {
        push(out, item);
    }
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn push_fill(out: &mut String, fill: &Fill) {
    out.push_str("<fill>");
    if let Some(gradient) = &fill.gradient {
        out.push_str("<gradientFill");
        if gradient.kind != GradientKind::Linear {
            push_attr(out, "type", gradient.kind.as_str());
        }
        for (name, value) in [
            ("degree", gradient.degree),
            ("left", gradient.left),
            ("right", gradient.right),
            ("top", gradient.top),
            ("bottom", gradient.bottom),
        ] {
            if value.0 != 0.0 {
                push_attr(out, name, &format_number(value.0));
            }
        }
        out.push('>');
        for stop in &gradient.stops {
            out.push_str("<stop");
            push_attr(out, "position", &format_number(stop.position.0));
            out.push('>');
            push_color(out, "color", &stop.color);
            out.push_str("</stop>");
        }
        out.push_str("</gradientFill>");
    } else {
        out.push_str("<patternFill");
        push_attr(out, "patternType", fill.pattern.as_str());
        if fill.fg_color.is_none() && fill.bg_color.is_none() {
            out.push_str("/>");
        } else {
            out.push('>');
            if let Some(color) = &fill.fg_color {
                push_color(out, "fgColor", color);
            }
            if let Some(color) = &fill.bg_color {
                push_color(out, "bgColor", color);
            }
            out.push_str("</patternFill>");
        }
    }
    out.push_str("</fill>");
}

fn push_border(out: &mut String, border: &Border) {
    out.push_str("<border");
    if border.diagonal_up {
        push_attr(out, "diagonalUp", "1");
    }
    if border.diagonal_down {
        push_attr(out, "diagonalDown", "1");
    }
    out.push('>');
    for (tag, edge) in [
        ("left", &border.left),
        ("right", &border.right),
        ("top", &border.top),
        ("bottom", &border.bottom),
        ("diagonal", &border.diagonal),
    ] {
        out.push('<');
        out.push_str(tag);
        if edge.style != BorderStyle::None {
            push_attr(out, "style", edge.style.as_str());
        }
        match &edge.color {
            Some(color) => {
                out.push('>');
                push_color(out, "color", color);
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
            None => out.push_str("/>"),
        }
    }
    out.push_str("</border>");
}

fn push_alignment(out: &mut String, alignment: &Alignment) {
    out.push_str("<alignment");
    if let Some(h) = alignment.horizontal {
        push_attr(out, "horizontal", h.as_str());
    }
    if let Some(v) = alignment.vertical {
        push_attr(out, "vertical", v.as_str());
    }
    if let Some(rotation) = alignment.text_rotation {
        push_attr(out, "textRotation", &rotation.to_string());
    }
    if alignment.wrap_text {
        push_attr(out, "wrapText", "1");
    }
    if alignment.indent != 0 {
        push_attr(out, "indent", &alignment.indent.to_string());
    }
    if alignment.shrink_to_fit {
        push_attr(out, "shrinkToFit", "1");
    }
    out.push_str("/>");
}
