use serde::{Deserialize, Serialize};

use crate::value::CellValue;

/// Maximum rows per worksheet (1,048,576).
pub const EXCEL_MAX_ROWS: u32 = 1_048_576;

/// Maximum columns per worksheet (16,384).
pub const EXCEL_MAX_COLS: u32 = 16_384;

/// A stored cell: a value plus a reference into the workbook style table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub value: CellValue,
    /// Style table id; `0` is the workbook default style.
    #[serde(default, skip_serializing_if = "is_default_style")]
    pub style_id: u32,
}

impl Cell {
    pub fn new(value: CellValue) -> Self {
        Self { value, style_id: 0 }
    }

    pub fn with_style(value: CellValue, style_id: u32) -> Self {
        Self { value, style_id }
    }

    /// A cell with no value and the default style carries no information and is not stored.
    pub fn is_truly_empty(&self) -> bool {
        self.value.is_empty() && self.style_id == 0
    }
}

fn is_default_style(id: &u32) -> bool {
    *id == 0
}
