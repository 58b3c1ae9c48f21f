use std::collections::{BTreeSet, HashMap};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Deserializer, Serialize};

use crate::compact::IndexRemap;
use crate::error::ModelError;
use crate::number_format::NumberFormat;

/// Declares a fieldless enum whose variants map to fixed OOXML attribute tokens.
macro_rules! token_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $token:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }

            pub fn parse(token: &str) -> Option<Self> {
                match token {
                    $($token => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

/// How a [`Color`] is specified.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ColorKind {
    /// `AARRGGBB`.
    Argb(u32),
    /// Index into the workbook theme palette.
    Theme(u32),
    /// Legacy indexed palette entry.
    Indexed(u32),
    /// Application-chosen (usually black) color.
    Auto,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub kind: ColorKind,
    /// Lighten/darken factor in `-1.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tint: Option<OrderedFloat<f64>>,
}

impl Color {
    pub const fn argb(argb: u32) -> Self {
        Self {
            kind: ColorKind::Argb(argb),
            tint: None,
        }
    }

    pub const fn theme(index: u32) -> Self {
        Self {
            kind: ColorKind::Theme(index),
            tint: None,
        }
    }

    pub const fn indexed(index: u32) -> Self {
        Self {
            kind: ColorKind::Indexed(index),
            tint: None,
        }
    }

    pub const fn auto() -> Self {
        Self {
            kind: ColorKind::Auto,
            tint: None,
        }
    }

    pub fn with_tint(mut self, tint: f64) -> Self {
        self.tint = Some(OrderedFloat(tint));
        self
    }
}

token_enum! {
    pub enum Underline {
        Single => "single",
        Double => "double",
        SingleAccounting => "singleAccounting",
        DoubleAccounting => "doubleAccounting",
    }
}

token_enum! {
    pub enum FontScheme {
        Major => "major",
        Minor => "minor",
    }
}

token_enum! {
    /// Superscript / subscript.
    pub enum VerticalTextAlignment {
        Baseline => "baseline",
        Superscript => "superscript",
        Subscript => "subscript",
    }
}

/// Font formatting.
///
/// `Font::default()` is an empty run font (every field unset). Cell styles start from
/// [`Font::body`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Font {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Size in points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<OrderedFloat<f64>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underline: Option<Underline>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub strike: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<FontScheme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_align: Option<VerticalTextAlignment>,
}

impl Font {
    /// The body font of a new workbook (Calibri 11, theme text color).
    pub fn body() -> Self {
        Self {
            name: Some("Calibri".to_string()),
            size: Some(OrderedFloat(11.0)),
            color: Some(Color::theme(1)),
            family: Some(2),
            scheme: Some(FontScheme::Minor),
            ..Self::default()
        }
    }

    pub fn size_points(&self) -> Option<f64> {
        self.size.map(|s| s.0)
    }
}

token_enum! {
    pub enum FillPattern {
        None => "none",
        Solid => "solid",
        MediumGray => "mediumGray",
        DarkGray => "darkGray",
        LightGray => "lightGray",
        DarkHorizontal => "darkHorizontal",
        DarkVertical => "darkVertical",
        DarkDown => "darkDown",
        DarkUp => "darkUp",
        DarkGrid => "darkGrid",
        DarkTrellis => "darkTrellis",
        LightHorizontal => "lightHorizontal",
        LightVertical => "lightVertical",
        LightDown => "lightDown",
        LightUp => "lightUp",
        LightGrid => "lightGrid",
        LightTrellis => "lightTrellis",
        Gray125 => "gray125",
        Gray0625 => "gray0625",
    }
}

token_enum! {
    pub enum GradientKind {
        Linear => "linear",
        Path => "path",
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GradientStop {
    pub position: OrderedFloat<f64>,
    pub color: Color,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GradientFill {
    pub kind: GradientKind,
    pub degree: OrderedFloat<f64>,
    pub left: OrderedFloat<f64>,
    pub right: OrderedFloat<f64>,
    pub top: OrderedFloat<f64>,
    pub bottom: OrderedFloat<f64>,
    pub stops: Vec<GradientStop>,
}

/// Fill (background) formatting.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fill {
    pub pattern: FillPattern,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fg_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<Color>,
    /// Gradient fills ignore the pattern fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradient: Option<GradientFill>,
}

impl Default for Fill {
    fn default() -> Self {
        Self {
            pattern: FillPattern::None,
            fg_color: None,
            bg_color: None,
            gradient: None,
        }
    }
}

impl Fill {
    pub fn solid(color: Color) -> Self {
        Self {
            pattern: FillPattern::Solid,
            fg_color: Some(color),
            bg_color: Some(Color::indexed(64)),
            gradient: None,
        }
    }

    /// The mandatory second fill of every styles part.
    pub fn gray125() -> Self {
        Self {
            pattern: FillPattern::Gray125,
            ..Self::default()
        }
    }
}

token_enum! {
    pub enum BorderStyle {
        None => "none",
        Thin => "thin",
        Medium => "medium",
        Dashed => "dashed",
        Dotted => "dotted",
        Thick => "thick",
        Double => "double",
        Hair => "hair",
        MediumDashed => "mediumDashed",
        DashDot => "dashDot",
        MediumDashDot => "mediumDashDot",
        DashDotDot => "dashDotDot",
        MediumDashDotDot => "mediumDashDotDot",
        SlantDashDot => "slantDashDot",
    }
}

impl Default for BorderStyle {
    fn default() -> Self {
        BorderStyle::None
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BorderEdge {
    #[serde(default)]
    pub style: BorderStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
}

impl BorderEdge {
    pub fn new(style: BorderStyle, color: Option<Color>) -> Self {
        Self { style, color }
    }

    pub fn is_none(&self) -> bool {
        self.style == BorderStyle::None && self.color.is_none()
    }
}

/// Border formatting for the four sides plus the diagonal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Border {
    #[serde(default)]
    pub left: BorderEdge,
    #[serde(default)]
    pub right: BorderEdge,
    #[serde(default)]
    pub top: BorderEdge,
    #[serde(default)]
    pub bottom: BorderEdge,
    #[serde(default)]
    pub diagonal: BorderEdge,
    #[serde(default, skip_serializing_if = "is_false")]
    pub diagonal_up: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub diagonal_down: bool,
}

impl Border {
    /// Same edge on all four sides.
    pub fn outline(edge: BorderEdge) -> Self {
        Self {
            left: edge.clone(),
            right: edge.clone(),
            top: edge.clone(),
            bottom: edge,
            ..Self::default()
        }
    }
}

token_enum! {
    pub enum HorizontalAlignment {
        General => "general",
        Left => "left",
        Center => "center",
        Right => "right",
        Fill => "fill",
        Justify => "justify",
        CenterContinuous => "centerContinuous",
        Distributed => "distributed",
    }
}

token_enum! {
    pub enum VerticalAlignment {
        Top => "top",
        Center => "center",
        Bottom => "bottom",
        Justify => "justify",
        Distributed => "distributed",
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alignment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal: Option<HorizontalAlignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<VerticalAlignment>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub wrap_text: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub shrink_to_fit: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub indent: u32,
    /// `0..=180` degrees, or `255` for vertical stacked text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_rotation: Option<u32>,
}

impl Alignment {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Protection {
    pub locked: bool,
    pub hidden: bool,
}

impl Default for Protection {
    fn default() -> Self {
        Self {
            locked: true,
            hidden: false,
        }
    }
}

/// Complete cell style.
///
/// A pure value: two styles with equal fields are the same style and intern to the same id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Style {
    pub font: Font,
    #[serde(default)]
    pub fill: Fill,
    #[serde(default)]
    pub border: Border,
    #[serde(default)]
    pub alignment: Alignment,
    #[serde(default)]
    pub number_format: NumberFormat,
    #[serde(default)]
    pub protection: Protection,
    /// Name of the named style (cell style) this style is based on; `None` is "Normal".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_style: Option<String>,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            font: Font::body(),
            fill: Fill::default(),
            border: Border::default(),
            alignment: Alignment::default(),
            number_format: NumberFormat::default(),
            protection: Protection::default(),
            named_style: None,
        }
    }
}

/// A named style ("cell style" in the UI), e.g. `Normal`, `Heading 1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedStyle {
    pub name: String,
    pub style: Style,
    /// Built-in style id (`0` = Normal) when this is one of the predefined styles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin_id: Option<u32>,
}

impl NamedStyle {
    pub fn normal(style: Style) -> Self {
        Self {
            name: "Normal".to_string(),
            style,
            builtin_id: Some(0),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// Deduplicated table of styles.
///
/// Cells store a `style_id` referencing this table. Style `0` is always the workbook default
/// style and is never dropped by compaction.
#[derive(Clone, Debug, Serialize)]
pub struct StyleTable {
    styles: Vec<Style>,
    #[serde(skip)]
    index: HashMap<Style, u32>,
}

impl Default for StyleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for StyleTable {
    fn eq(&self, other: &Self) -> bool {
        self.styles == other.styles
    }
}

impl StyleTable {
    pub fn new() -> Self {
        Self::with_default(Style::default())
    }

    /// A table whose default (id `0`) style is `default`.
    pub fn with_default(default: Style) -> Self {
        let mut table = Self {
            styles: vec![default],
            index: HashMap::new(),
        };
        table.rebuild_index();
        table
    }

    /// Insert (or reuse) a style, returning its id.
    pub fn intern(&mut self, style: Style) -> u32 {
        if let Some(id) = self.index.get(&style) {
            return *id;
        }
        let id = self.styles.len() as u32;
        self.styles.push(style.clone());
        self.index.insert(style, id);
        id
    }

    pub fn resolve(&self, style_id: u32) -> Result<&Style, ModelError> {
        self.get(style_id)
            .ok_or(ModelError::InvalidStyleIndex(style_id))
    }

    pub fn get(&self, style_id: u32) -> Option<&Style> {
        self.styles.get(style_id as usize)
    }

    pub fn contains(&self, style_id: u32) -> bool {
        (style_id as usize) < self.styles.len()
    }

    /// The default style (id `0`).
    pub fn default_style(&self) -> &Style {
        &self.styles[0]
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Style)> {
        self.styles.iter().enumerate().map(|(i, s)| (i as u32, s))
    }

    /// Drop every style not in `live`, keeping table order. Id `0` always survives.
    pub fn compact(&mut self, live: &BTreeSet<u32>) -> IndexRemap {
        let mut map = vec![None; self.styles.len()];
        let mut kept = Vec::with_capacity(live.len() + 1);
        for (old, style) in std::mem::take(&mut self.styles).into_iter().enumerate() {
            if old == 0 || live.contains(&(old as u32)) {
                map[old] = Some(kept.len() as u32);
                kept.push(style);
            }
        }
        self.styles = kept;
        self.rebuild_index();
        IndexRemap::from_vec(map)
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, style) in self.styles.iter().enumerate() {
            self.index.entry(style.clone()).or_insert(i as u32);
        }
    }
}

impl<'de> Deserialize<'de> for StyleTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            #[serde(default)]
            styles: Vec<Style>,
        }

        let mut helper = Helper::deserialize(deserializer)?;
        if helper.styles.is_empty() {
            helper.styles.push(Style::default());
        }

        let mut table = StyleTable {
            styles: helper.styles,
            index: HashMap::new(),
        };
        table.rebuild_index();
        Ok(table)
    }
}
