use serde::{Deserialize, Serialize};

/// Frozen panes: the first `rows` rows and `cols` columns stay visible while scrolling.
///
/// The top-left scrollable cell is `(rows, cols)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrozenPane {
    pub rows: u32,
    pub cols: u32,
}

impl FrozenPane {
    pub const fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }

    pub const fn is_empty(&self) -> bool {
        self.rows == 0 && self.cols == 0
    }
}

/// Sheet tab visibility.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetVisibility {
    #[default]
    Visible,
    Hidden,
    /// Only revealable programmatically.
    VeryHidden,
}

impl SheetVisibility {
    pub fn as_str(self) -> &'static str {
        match self {
            SheetVisibility::Visible => "visible",
            SheetVisibility::Hidden => "hidden",
            SheetVisibility::VeryHidden => "veryHidden",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "visible" => Some(SheetVisibility::Visible),
            "hidden" => Some(SheetVisibility::Hidden),
            "veryHidden" => Some(SheetVisibility::VeryHidden),
            _ => None,
        }
    }
}
