use serde::{Deserialize, Serialize};

use crate::a1;
use crate::address::SheetRange;
use crate::SheetId;

/// Maximum length of a defined name in characters.
pub const EXCEL_DEFINED_NAME_MAX_LEN: usize = 255;

/// Built-in defined name for a sheet's print area.
pub const XLNM_PRINT_AREA: &str = "_xlnm.Print_Area";
/// Built-in defined name for a sheet's print titles.
pub const XLNM_PRINT_TITLES: &str = "_xlnm.Print_Titles";

/// Scope of a defined name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "sheet", rename_all = "snake_case")]
pub enum NameScope {
    Workbook,
    Sheet(SheetId),
}

/// What a defined name refers to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NameTarget {
    /// One or more rectangular areas, possibly on different sheets.
    Ranges(Vec<SheetRange>),
    /// Any other definition (constants, functions, external or `#REF!` references), stored as
    /// formula text without the leading `=`.
    Formula(String),
}

/// A workbook- or sheet-scoped defined name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinedName {
    pub name: String,
    pub scope: NameScope,
    pub target: NameTarget,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl DefinedName {
    /// A visible workbook-scoped name over a set of ranges.
    pub fn ranges(name: impl Into<String>, targets: Vec<SheetRange>) -> Self {
        Self {
            name: name.into(),
            scope: NameScope::Workbook,
            target: NameTarget::Ranges(targets),
            hidden: false,
            comment: None,
        }
    }

    pub fn formula(name: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: NameScope::Workbook,
            target: NameTarget::Formula(formula.into()),
            hidden: false,
            comment: None,
        }
    }

    pub fn with_scope(mut self, scope: NameScope) -> Self {
        self.scope = scope;
        self
    }

    pub(crate) fn matches(&self, name: &str, scope: NameScope) -> bool {
        self.scope == scope && self.name.to_lowercase() == name.to_lowercase()
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Check a defined name against the spreadsheet naming rules.
pub fn validate_defined_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err("name cannot be empty".to_string());
    };
    let len = name.chars().count();
    if len > EXCEL_DEFINED_NAME_MAX_LEN {
        return Err(format!(
            "name is too long ({len} > {EXCEL_DEFINED_NAME_MAX_LEN})"
        ));
    }
    if !(first.is_alphabetic() || first == '_' || first == '\\') {
        return Err(format!("invalid first character {first:?}"));
    }
    if let Some(ch) = chars.find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '\\' | '?')))
    {
        return Err(format!("invalid character {ch:?}"));
    }
    if a1::parse_cell_ref(name).is_ok() {
        return Err("name looks like a cell reference".to_string());
    }
    if name.eq_ignore_ascii_case("R") || name.eq_ignore_ascii_case("C") {
        return Err("name is reserved".to_string());
    }
    Ok(())
}
