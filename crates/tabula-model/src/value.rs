use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::address::Range;
use crate::rich_text::RichText;

/// Spreadsheet error literal stored in a cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorValue {
    Null,
    Div0,
    Value,
    Ref,
    Name,
    Num,
    NA,
    GettingData,
}

impl ErrorValue {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorValue::Null => "#NULL!",
            ErrorValue::Div0 => "#DIV/0!",
            ErrorValue::Value => "#VALUE!",
            ErrorValue::Ref => "#REF!",
            ErrorValue::Name => "#NAME?",
            ErrorValue::Num => "#NUM!",
            ErrorValue::NA => "#N/A",
            ErrorValue::GettingData => "#GETTING_DATA",
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorValue {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "#NULL!" => ErrorValue::Null,
            "#DIV/0!" => ErrorValue::Div0,
            "#VALUE!" => ErrorValue::Value,
            "#REF!" => ErrorValue::Ref,
            "#NAME?" => ErrorValue::Name,
            "#NUM!" => ErrorValue::Num,
            "#N/A" => ErrorValue::NA,
            "#GETTING_DATA" => ErrorValue::GettingData,
            _ => return Err(()),
        })
    }
}

/// Last computed result stored alongside a formula.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CachedValue {
    Number(f64),
    Boolean(bool),
    Text(String),
    Error(ErrorValue),
}

/// A formula stored as opaque expression text (without the leading `=`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    pub expr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<CachedValue>,
    /// Spill/array range when this cell is the anchor of an array formula.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_range: Option<Range>,
}

impl Formula {
    pub fn new(expr: impl Into<String>) -> Self {
        let expr = expr.into();
        let expr = match expr.strip_prefix('=') {
            Some(rest) => rest.to_string(),
            None => expr,
        };
        Self {
            expr,
            cached: None,
            array_range: None,
        }
    }

    pub fn with_cached(mut self, cached: CachedValue) -> Self {
        self.cached = Some(cached);
        self
    }
}

/// Value stored in a cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Boolean(bool),
    Error(ErrorValue),
    /// Index into the workbook's shared string table.
    SharedString(u32),
    /// Text stored in the cell itself rather than the shared string table.
    InlineString(RichText),
    Formula(Formula),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_formula(&self) -> Option<&Formula> {
        match self {
            CellValue::Formula(f) => Some(f),
            _ => None,
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        CellValue::Number(f64::from(value))
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

impl From<ErrorValue> for CellValue {
    fn from(value: ErrorValue) -> Self {
        CellValue::Error(value)
    }
}

impl From<Formula> for CellValue {
    fn from(value: Formula) -> Self {
        CellValue::Formula(value)
    }
}

impl From<RichText> for CellValue {
    fn from(value: RichText) -> Self {
        CellValue::InlineString(value)
    }
}
