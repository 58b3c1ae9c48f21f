use quick_xml::events::attributes::AttrError;
use tabula_model::{a1, CellRef, ErrorKind, ModelError, Range};
use thiserror::Error;

/// Problems with the zip container itself.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not a zip archive: {0}")]
    NotAZip(String),
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),
    #[error("missing required part: {0}")]
    MissingRequiredPart(String),
    #[error("part not found: {0}")]
    PartNotFound(String),
    #[error("part {part} exceeds the configured limit ({size} > {max} bytes)")]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(err) => ArchiveError::Io(err),
            other => ArchiveError::CorruptArchive(other.to_string()),
        }
    }
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Archive
    }
}

/// Malformed or schema-violating XML inside a part.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed xml: {0}")]
    Malformed(String),
    #[error("xml parse error: {0}")]
    Parse(#[from] roxmltree::Error),
    #[error("xml reader error: {0}")]
    Reader(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attribute(#[from] AttrError),
    #[error("<{element}> is missing attribute {attr:?}")]
    MissingAttribute { element: String, attr: String },
    #[error("invalid {what}: {value:?}")]
    InvalidValue { what: String, value: String },
    #[error("unexpected root element <{found}> (expected <{expected}>)")]
    UnexpectedRoot { expected: String, found: String },
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("xml write error: {0}")]
    Io(#[from] std::io::Error),
}

impl XmlError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Xml
    }

    pub(crate) fn missing(element: &str, attr: &str) -> Self {
        XmlError::MissingAttribute {
            element: element.to_string(),
            attr: attr.to_string(),
        }
    }

    pub(crate) fn invalid(what: &str, value: &str) -> Self {
        XmlError::InvalidValue {
            what: what.to_string(),
            value: value.to_string(),
        }
    }
}

/// Why a package could not be loaded. No partial workbook is returned.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("{part}: {source}")]
    Xml {
        part: String,
        #[source]
        source: XmlError,
    },
    #[error("unresolved reference: {0}")]
    Reference(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Archive(_) => ErrorKind::Archive,
            LoadError::Xml { .. } => ErrorKind::Xml,
            LoadError::Reference(_) => ErrorKind::Reference,
            LoadError::Model(err) => err.kind(),
        }
    }

    pub(crate) fn xml(part: &str) -> impl FnOnce(XmlError) -> LoadError + '_ {
        move |source| LoadError::Xml {
            part: part.to_string(),
            source,
        }
    }
}

/// Why a document could not be saved. The document is left untouched.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("{part}: {source}")]
    Xml {
        part: String,
        #[source]
        source: XmlError,
    },
    #[error("a workbook needs at least one sheet to be saved")]
    NoSheets,
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl SaveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SaveError::Archive(_) => ErrorKind::Archive,
            SaveError::Xml { .. } => ErrorKind::Xml,
            SaveError::NoSheets => ErrorKind::InvalidInput,
            SaveError::Model(err) => err.kind(),
        }
    }

    pub(crate) fn xml(part: &str) -> impl FnOnce(XmlError) -> SaveError + '_ {
        move |source| SaveError::Xml {
            part: part.to_string(),
            source,
        }
    }
}

fn a1_range(range: &Range) -> String {
    a1::format_range(*range)
}

fn a1_cell(cell: &CellRef) -> String {
    a1::format_cell_ref(*cell)
}

/// Why a table could not be added. The document is left untouched.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("invalid table name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("a table or defined name called {0:?} already exists")]
    DuplicateName(String),
    #[error("invalid table range {}: {reason}", a1_range(.range))]
    InvalidRange { range: Range, reason: String },
    #[error("{} overlaps table {table:?}", a1_range(.range))]
    Overlap { range: Range, table: String },
    #[error("{} intersects merged cells {}", a1_range(.range), a1_range(.merge))]
    MergedCells { range: Range, merge: Range },
    #[error("header cell {} must hold text, a number or nothing", a1_cell(.cell))]
    InvalidHeader { cell: CellRef },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("{part}: {source}")]
    Xml {
        part: String,
        #[source]
        source: XmlError,
    },
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl TableError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TableError::InvalidName { .. }
            | TableError::DuplicateName(_)
            | TableError::InvalidRange { .. }
            | TableError::InvalidHeader { .. } => ErrorKind::InvalidInput,
            TableError::Overlap { .. } | TableError::MergedCells { .. } => {
                ErrorKind::StructuralConflict
            }
            TableError::Archive(_) => ErrorKind::Archive,
            TableError::Xml { .. } => ErrorKind::Xml,
            TableError::Model(err) => err.kind(),
        }
    }

    pub(crate) fn xml(part: &str) -> impl FnOnce(XmlError) -> TableError + '_ {
        move |source| TableError::Xml {
            part: part.to_string(),
            source,
        }
    }
}
