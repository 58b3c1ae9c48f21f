//! `tabula-model` is the in-memory spreadsheet document model.
//!
//! A [`Workbook`] owns its sheets in tab order together with two interning tables (styles and
//! shared strings) that cells reference by id. Every mutation keeps those references valid and
//! keeps merged regions consistent; structural edits (row/column insert and delete) rewrite every
//! dependent range and formula and report anything they had to truncate as a [`LossyEdit`].
//!
//! Coordinates are 0-based throughout. The package layer lives in `tabula-xlsx`.

mod address;
pub mod a1;
mod cell;
mod changes;
mod compact;
mod date_system;
mod error;
pub mod formula_rewrite;
mod merge;
mod names;
mod number_format;
mod print;
pub mod rich_text;
mod shared_strings;
mod sheet_name;
mod structure;
mod style;
mod value;
mod view;
mod workbook;
mod worksheet;

/// Stable sheet identifier. Survives renames and reordering; never reused within a workbook.
pub type SheetId = u32;

pub use address::{CellRef, Range, RangeIter, SheetRange, Span};
pub use cell::{Cell, EXCEL_MAX_COLS, EXCEL_MAX_ROWS};
pub use changes::SheetChange;
pub use compact::{Compaction, IndexRemap};
pub use date_system::DateSystem;
pub use error::{ErrorKind, ModelError};
pub use merge::MergedRegions;
pub use names::{
    validate_defined_name, DefinedName, NameScope, NameTarget, EXCEL_DEFINED_NAME_MAX_LEN,
    XLNM_PRINT_AREA, XLNM_PRINT_TITLES,
};
pub use number_format::{
    builtin_code, builtin_id_for_code, NumberFormat, BUILTIN_DATE, BUILTIN_DATETIME,
    FIRST_CUSTOM_NUM_FMT_ID,
};
pub use print::PrintSettings;
pub use rich_text::{RichText, TextRun};
pub use shared_strings::SharedStringTable;
pub use sheet_name::{
    sheet_name_eq, validate_sheet_name, SheetNameError, EXCEL_MAX_SHEET_NAME_LEN,
};
pub use structure::{
    EditReport, LossyEdit, LossyEditKind, RangeShift, SpanShift, StructuralEdit,
};
pub use style::{
    Alignment, Border, BorderEdge, BorderStyle, Color, ColorKind, Fill, FillPattern, Font,
    FontScheme, GradientFill, GradientKind, GradientStop, HorizontalAlignment, NamedStyle,
    Protection, Style, StyleTable, Underline, VerticalAlignment, VerticalTextAlignment,
};
pub use value::{CachedValue, CellValue, ErrorValue, Formula};
pub use view::{FrozenPane, SheetVisibility};
pub use workbook::Workbook;
pub use worksheet::{ColumnProps, RowProps, Worksheet, EXCEL_MAX_COL_WIDTH, EXCEL_MAX_ROW_HEIGHT};
