//! Sheet-level changes a workbook records for layers that keep data of their own about its
//! sheets.
//!
//! A file-format layer typically holds markup the model does not represent (conditional formats,
//! validations, ...) keyed by sheet and cell. When the workbook is edited directly, that layer
//! learns what happened by draining the recorded [`SheetChange`]s and replaying them in order.

use crate::structure::StructuralEdit;
use crate::SheetId;

/// A change that moved cells around or altered a sheet's identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SheetChange {
    /// Rows or columns of `sheet` were inserted or deleted.
    Edited { sheet: SheetId, edit: StructuralEdit },
    Renamed {
        sheet: SheetId,
        old: String,
        new: String,
    },
    Copied {
        from: SheetId,
        to: SheetId,
        from_name: String,
        to_name: String,
    },
    /// `previous` is the sheet that preceded the removed one in tab order.
    Removed {
        sheet: SheetId,
        name: String,
        previous: Option<SheetId>,
    },
}

impl SheetChange {
    /// Sheet the change happened to (the new sheet for a copy).
    pub fn sheet(&self) -> SheetId {
        match self {
            SheetChange::Edited { sheet, .. }
            | SheetChange::Renamed { sheet, .. }
            | SheetChange::Removed { sheet, .. } => *sheet,
            SheetChange::Copied { to, .. } => *to,
        }
    }
}
