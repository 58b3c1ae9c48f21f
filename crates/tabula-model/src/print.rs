use serde::{Deserialize, Serialize};

use crate::address::{Range, Span};

/// Per-sheet print settings that reference cells.
///
/// These are stored in the package as the `_xlnm.Print_Area` and `_xlnm.Print_Titles` defined
/// names; page layout (margins, orientation, paper size) is preserved verbatim with the sheet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintSettings {
    /// Areas printed; empty prints the used range.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub print_area: Vec<Range>,
    /// Rows repeated at the top of every page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_rows: Option<Span>,
    /// Columns repeated at the left of every page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_cols: Option<Span>,
}

impl PrintSettings {
    pub fn is_empty(&self) -> bool {
        self.print_area.is_empty() && self.repeat_rows.is_none() && self.repeat_cols.is_none()
    }
}
