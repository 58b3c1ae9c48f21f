use thiserror::Error;

use crate::address::{CellRef, Range};
use crate::sheet_name::SheetNameError;
use crate::SheetId;

/// Error category shared by every Tabula error type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed zip container or missing required part.
    Archive,
    /// Malformed or schema-violating XML inside a recognized part.
    Xml,
    /// Style/string/sheet index out of range, dangling named-range target.
    Reference,
    /// Overlapping merge or write into a non-anchor merged cell.
    StructuralConflict,
    /// Argument rejected before anything was changed.
    InvalidInput,
}

/// Errors raised by document model operations.
///
/// A failed operation leaves the workbook unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("style index {0} does not exist in the style table")]
    InvalidStyleIndex(u32),
    #[error("shared string index {0} does not exist in the shared string table")]
    InvalidStringIndex(u32),
    #[error("sheet {0} does not exist")]
    SheetNotFound(SheetId),
    #[error("defined name {name:?} targets missing sheet {sheet}")]
    DanglingNameTarget { name: String, sheet: SheetId },
    #[error("named style {0:?} does not exist")]
    NamedStyleNotFound(String),
    #[error("merge {requested} overlaps existing merge {existing}")]
    OverlappingMerge { requested: Range, existing: Range },
    #[error("cell {cell} is covered by the merge anchored at {anchor}")]
    MergedCellWriteConflict { cell: CellRef, anchor: CellRef },
    #[error("invalid sheet name {name:?}: {reason}")]
    InvalidSheetName { name: String, reason: SheetNameError },
    #[error("a sheet named {0:?} already exists")]
    DuplicateSheetName(String),
    #[error("merge range {0} must cover at least two cells inside the sheet")]
    InvalidMerge(Range),
    #[error("out of bounds: {0}")]
    OutOfBounds(String),
    #[error("invalid defined name {name:?}: {reason}")]
    InvalidDefinedName { name: String, reason: String },
    #[error("defined name {0:?} already exists in that scope")]
    DuplicateDefinedName(String),
    #[error("defined name {0:?} does not exist in that scope")]
    DefinedNameNotFound(String),
    #[error("named style {0:?} already exists")]
    DuplicateNamedStyle(String),
    #[error("a workbook must keep at least one sheet")]
    CannotRemoveLastSheet,
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::InvalidStyleIndex(_)
            | ModelError::InvalidStringIndex(_)
            | ModelError::SheetNotFound(_)
            | ModelError::DanglingNameTarget { .. }
            | ModelError::NamedStyleNotFound(_)
            | ModelError::DefinedNameNotFound(_) => ErrorKind::Reference,
            ModelError::OverlappingMerge { .. } | ModelError::MergedCellWriteConflict { .. } => {
                ErrorKind::StructuralConflict
            }
            ModelError::InvalidSheetName { .. }
            | ModelError::DuplicateSheetName(_)
            | ModelError::InvalidMerge(_)
            | ModelError::OutOfBounds(_)
            | ModelError::InvalidDefinedName { .. }
            | ModelError::DuplicateDefinedName(_)
            | ModelError::DuplicateNamedStyle(_)
            | ModelError::CannotRemoveLastSheet => ErrorKind::InvalidInput,
        }
    }
}
