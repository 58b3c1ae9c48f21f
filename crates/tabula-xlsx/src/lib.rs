//! XLSX/XLSM load, save and round-trip preservation for [`tabula_model::Workbook`].
//!
//! The crate is layered:
//!
//! - [`Package`]: the zip container held in memory (part name -> bytes), written back in the
//!   original entry order and compression so untouched parts stay byte-identical.
//! - [`Relationships`], [`RelationshipGraph`] and [`ContentTypes`]: the OPC plumbing used to
//!   locate parts by role rather than by file name.
//! - [`PartCodec`] implementations for the parts the model owns (workbook, worksheets, styles,
//!   shared strings). Each decodes into a typed record plus the [`PartFragments`] it does not
//!   model, and encodes them back in schema order.
//! - [`XlsxDocument`]: a workbook paired with its source package and preserved fragments.
//!   [`load`] builds one from a package, [`XlsxDocument::save`] writes one back.
//!   [`XlsxDocument::add_table`] adds table parts to a worksheet.
//!
//! Everything else in a package (drawings, charts, images, VBA projects, themes, pivot caches,
//! custom XML, ...) is carried through unopened.

mod codec;
mod content_types;
mod document;
mod error;
mod package;
pub mod path;
mod preserve;
mod read;
mod relationships;
mod shared_strings;
mod styles;
mod table;
mod workbook_part;
mod worksheet;
mod write;
mod xml;

pub use codec::PartCodec;
pub use content_types::{
    ContentTypes, CT_SHARED_STRINGS, CT_STYLES, CT_TABLE, CT_WORKBOOK, CT_WORKBOOK_MACRO,
    CT_WORKSHEET,
};
pub use document::XlsxDocument;
pub use error::{ArchiveError, LoadError, SaveError, TableError, XmlError};
pub use package::{
    Compression, Package, PackageLimits, CONTENT_TYPES_PART, DEFAULT_MAX_PART_BYTES,
    DEFAULT_MAX_TOTAL_BYTES, PACKAGE_RELS_PART,
};
pub use preserve::{
    CellMarkup, Fragment, FragmentStore, PartFragments, PartKey, SheetViewMarkup,
};
pub use read::{load, load_with_options, LoadOptions, LoadWarning};
pub use relationships::{
    role, Edge, Relationship, RelationshipGraph, Relationships, REL_TYPE_OFFICE_DOCUMENT,
    REL_TYPE_SHARED_STRINGS, REL_TYPE_STYLES, REL_TYPE_TABLE, REL_TYPE_VBA_PROJECT,
    REL_TYPE_WORKSHEET,
};
pub use shared_strings::{SharedStringsCodec, SharedStringsRecord};
pub use styles::{StylesCodec, StylesRecord};
pub use table::TableInfo;
pub use workbook_part::{DefinedNameEntry, SheetEntry, WorkbookCodec, WorkbookRecord};
pub use worksheet::{CellData, CellRecord, WorksheetCodec, WorksheetRecord, DEFAULT_COL_WIDTH};
pub use write::SaveOptions;

pub use tabula_model;
