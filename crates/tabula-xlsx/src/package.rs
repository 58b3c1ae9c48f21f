//! In-memory OPC package (the zip container of an `.xlsx`/`.xlsm` file).
//!
//! Every entry is inflated on open and kept with its original compression method and archive
//! position, so a package written back out lists untouched parts in the same order with the same
//! bytes.

use std::collections::HashSet;
use std::io::{Cursor, Read, Seek, Write};

use indexmap::IndexMap;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ArchiveError;

/// Default maximum uncompressed size of a single part (256 MiB).
pub const DEFAULT_MAX_PART_BYTES: u64 = 256 * 1024 * 1024;
/// Default maximum uncompressed size of the whole package (512 MiB).
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 512 * 1024 * 1024;

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const PACKAGE_RELS_PART: &str = "_rels/.rels";

/// Inflation limits guarding against zip bombs and forged size metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackageLimits {
    /// Maximum allowed uncompressed bytes for any single part.
    pub max_part_bytes: u64,
    /// Maximum allowed uncompressed bytes across the whole package.
    pub max_total_bytes: u64,
}

impl Default for PackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: DEFAULT_MAX_PART_BYTES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

/// How a part is (or will be) stored in the archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Deflated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct PartEntry {
    data: Vec<u8>,
    compression: Compression,
}

/// A zip package held fully in memory, keyed by part name in archive order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Package {
    parts: IndexMap<String, PartEntry>,
}

struct InflateBudget {
    max_total_bytes: u64,
    used_bytes: u64,
}

impl InflateBudget {
    fn remaining(&self) -> u64 {
        self.max_total_bytes.saturating_sub(self.used_bytes)
    }
}

impl Package {
    /// An empty package, as used when saving a workbook created from scratch.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArchiveError> {
        Self::from_bytes_limited(bytes, PackageLimits::default())
    }

    pub fn from_bytes_limited(bytes: &[u8], limits: PackageLimits) -> Result<Self, ArchiveError> {
        Self::from_reader_limited(Cursor::new(bytes), limits)
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self, ArchiveError> {
        Self::from_reader_limited(reader, PackageLimits::default())
    }

    /// Read every entry of a zip archive, enforcing `limits`.
    ///
    /// Fails when the input is not a zip archive, an entry cannot be read or appears twice, a
    /// part or the package exceeds the limits, or `[Content_Types].xml` / `_rels/.rels` is missing.
    pub fn from_reader_limited<R: Read + Seek>(
        reader: R,
        limits: PackageLimits,
    ) -> Result<Self, ArchiveError> {
        let mut zip = ZipArchive::new(reader).map_err(|err| match err {
            zip::result::ZipError::Io(err) => ArchiveError::Io(err),
            other => ArchiveError::NotAZip(other.to_string()),
        })?;

        let mut parts: IndexMap<String, PartEntry> = IndexMap::with_capacity(zip.len());
        let mut seen: HashSet<Vec<u8>> = HashSet::with_capacity(zip.len());
        let mut budget = InflateBudget {
            max_total_bytes: limits.max_total_bytes,
            used_bytes: 0,
        };
        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .map_err(|err| ArchiveError::CorruptArchive(format!("entry {i}: {err}")))?;
            if !file.is_file() {
                continue;
            }

            let name = file.name().to_string();
            if !seen.insert(normalized_part_name(&name)) {
                return Err(ArchiveError::CorruptArchive(format!(
                    "duplicate entry {name}"
                )));
            }
            let compression = match file.compression() {
                CompressionMethod::Stored => Compression::Stored,
                _ => Compression::Deflated,
            };
            let data = read_entry(&mut file, &name, limits.max_part_bytes, &mut budget)?;
            parts.insert(name, PartEntry { data, compression });
        }

        let package = Self { parts };
        for required in [CONTENT_TYPES_PART, PACKAGE_RELS_PART] {
            if !package.contains(required) {
                return Err(ArchiveError::MissingRequiredPart(required.to_string()));
            }
        }
        log::debug!("opened package with {} part(s)", package.parts.len());
        Ok(package)
    }

    /// Stored name of the part matching `name`.
    ///
    /// Lookup tries the exact name first, then tolerates a leading `/`, `\` separators,
    /// percent-encoding and ASCII case differences.
    pub fn resolve_name(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.parts.get_key_value(name) {
            return Some(key.as_str());
        }
        if let Some((key, _)) = self.parts.get_key_value(name.trim_start_matches('/')) {
            return Some(key.as_str());
        }
        self.parts
            .keys()
            .find(|key| part_names_equivalent(key, name))
            .map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        let key = self.resolve_name(name)?;
        self.parts.get(key).map(|e| e.data.as_slice())
    }

    pub fn part(&self, name: &str) -> Result<&[u8], ArchiveError> {
        self.get(name)
            .ok_or_else(|| ArchiveError::PartNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve_name(name).is_some()
    }

    /// Part names in archive order.
    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Compression the part is written with.
    pub fn compression(&self, name: &str) -> Option<Compression> {
        let key = self.resolve_name(name)?;
        self.parts.get(key).map(|e| e.compression)
    }

    /// Replace an existing part's bytes in place, or append a new deflated part.
    pub fn set_part(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        let name = name.into();
        let data = data.into();
        if let Some(key) = self.resolve_name(&name).map(str::to_string) {
            if let Some(entry) = self.parts.get_mut(&key) {
                entry.data = data;
                return;
            }
        }
        let name = name.trim_start_matches('/').to_string();
        self.parts.insert(
            name,
            PartEntry {
                data,
                compression: Compression::Deflated,
            },
        );
    }

    /// Remove a part, keeping the order of the remaining ones.
    pub fn remove_part(&mut self, name: &str) -> Option<Vec<u8>> {
        let key = self.resolve_name(name)?.to_string();
        self.parts.shift_remove(&key).map(|e| e.data)
    }

    pub fn write(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut cursor = Cursor::new(Vec::new());
        self.write_to(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<(), ArchiveError> {
        let mut zip = ZipWriter::new(writer);
        for (name, entry) in &self.parts {
            let method = match entry.compression {
                Compression::Stored => CompressionMethod::Stored,
                Compression::Deflated => CompressionMethod::Deflated,
            };
            let options = FileOptions::<()>::default().compression_method(method);
            zip.start_file(name.as_str(), options)?;
            zip.write_all(&entry.data)?;
        }
        zip.finish()?;
        Ok(())
    }
}

fn read_entry<R: Read>(
    file: &mut R,
    name: &str,
    max_part_bytes: u64,
    budget: &mut InflateBudget,
) -> Result<Vec<u8>, ArchiveError> {
    let effective_max = max_part_bytes.min(budget.remaining());
    let mut data = Vec::new();
    // Declared sizes can be forged; read one byte past the limit to detect overflow.
    file.take(effective_max.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(|err| ArchiveError::CorruptArchive(format!("{name}: {err}")))?;
    let size = data.len() as u64;
    if size > max_part_bytes {
        return Err(ArchiveError::PartTooLarge {
            part: name.to_string(),
            size,
            max: max_part_bytes,
        });
    }
    if size > effective_max {
        return Err(ArchiveError::PartTooLarge {
            part: "package".to_string(),
            size: budget.used_bytes.saturating_add(size),
            max: budget.max_total_bytes,
        });
    }
    budget.used_bytes += size;
    Ok(data)
}

/// Compare part names the way producers in the wild vary them: ASCII case, `\` versus `/`,
/// leading separators and percent-encoding.
pub(crate) fn part_names_equivalent(a: &str, b: &str) -> bool {
    NormalizedName::new(a).eq(NormalizedName::new(b))
}

/// Key under which equivalent part names collide.
pub(crate) fn normalized_part_name(name: &str) -> Vec<u8> {
    NormalizedName::new(name).collect()
}

/// Bytes of a part name with percent-escapes decoded, separators unified, leading separators
/// dropped and ASCII letters lowercased.
struct NormalizedName<'a> {
    bytes: &'a [u8],
    in_leading_separators: bool,
}

impl<'a> NormalizedName<'a> {
    fn new(name: &'a str) -> Self {
        Self {
            bytes: name.as_bytes(),
            in_leading_separators: true,
        }
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

impl Iterator for NormalizedName<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        loop {
            let b = *self.bytes.first()?;
            let decoded = match (b, self.bytes.get(1..3)) {
                (b'%', Some(&[hi, lo])) => match (hex_val(hi), hex_val(lo)) {
                    (Some(hi), Some(lo)) => {
                        self.bytes = &self.bytes[3..];
                        (hi << 4) | lo
                    }
                    _ => {
                        self.bytes = &self.bytes[1..];
                        b
                    }
                },
                _ => {
                    self.bytes = &self.bytes[1..];
                    b
                }
            };
            if self.in_leading_separators && matches!(decoded, b'/' | b'\\') {
                continue;
            }
            self.in_leading_separators = false;
            return Some(if decoded == b'\\' {
                b'/'
            } else {
                decoded.to_ascii_lowercase()
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_zip(entries: &[(&str, &[u8], CompressionMethod)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes, method) in entries {
            let options = FileOptions::<()>::default().compression_method(*method);
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn minimal(extra: &[(&str, &[u8], CompressionMethod)]) -> Vec<u8> {
        let mut entries: Vec<(&str, &[u8], CompressionMethod)> = vec![
            (CONTENT_TYPES_PART, b"<Types/>", CompressionMethod::Deflated),
            (PACKAGE_RELS_PART, b"<Relationships/>", CompressionMethod::Deflated),
        ];
        entries.extend_from_slice(extra);
        build_zip(&entries)
    }

    #[test]
    fn lookup_tolerates_slashes_case_and_encoding() {
        let pkg = Package::from_bytes(&minimal(&[(
            "XL\\Work Book.xml",
            b"data",
            CompressionMethod::Deflated,
        )]))
        .unwrap();
        assert_eq!(pkg.get("/xl/work%20book.xml"), Some(&b"data"[..]));
        assert_eq!(pkg.resolve_name("xl/work book.xml"), Some("XL\\Work Book.xml"));
        assert!(matches!(
            pkg.part("xl/missing.xml"),
            Err(ArchiveError::PartNotFound(name)) if name == "xl/missing.xml"
        ));
    }

    #[test]
    fn rejects_non_zip_input_and_missing_required_parts() {
        assert!(matches!(
            Package::from_bytes(b"definitely not a zip"),
            Err(ArchiveError::NotAZip(_))
        ));
        let bytes = build_zip(&[(CONTENT_TYPES_PART, b"<Types/>", CompressionMethod::Deflated)]);
        assert!(matches!(
            Package::from_bytes(&bytes),
            Err(ArchiveError::MissingRequiredPart(part)) if part == PACKAGE_RELS_PART
        ));
    }

    #[test]
    fn limits_apply_per_part_and_in_total() {
        let bytes = minimal(&[("xl/big.bin", &[7u8; 64], CompressionMethod::Deflated)]);
        let err = Package::from_bytes_limited(
            &bytes,
            PackageLimits {
                max_part_bytes: 32,
                max_total_bytes: 1024,
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::PartTooLarge { ref part, size: 64, max: 32 } if part == "xl/big.bin"
        ));

        let err = Package::from_bytes_limited(
            &bytes,
            PackageLimits {
                max_part_bytes: 1024,
                max_total_bytes: 70,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::PartTooLarge { max: 70, .. }));
    }

    #[test]
    fn equivalent_entry_names_are_duplicates() {
        let bytes = minimal(&[
            ("xl/a.xml", b"<a/>", CompressionMethod::Deflated),
            ("xl/b.xml", b"<b/>", CompressionMethod::Deflated),
            ("XL/A%2exml", b"<a2/>", CompressionMethod::Deflated),
        ]);
        let err = Package::from_bytes(&bytes).unwrap_err();
        assert!(
            matches!(&err, ArchiveError::CorruptArchive(msg) if msg.contains("duplicate entry")),
            "{err:?}"
        );
        assert_eq!(normalized_part_name("/XL\\A%2exml"), b"xl/a.xml".to_vec());
        assert_ne!(normalized_part_name("xl/a.xml"), normalized_part_name("xl/b.xml"));
    }

    #[test]
    fn write_keeps_order_and_compression_and_appends_new_parts() {
        let bytes = minimal(&[
            ("xl/b.bin", b"stored", CompressionMethod::Stored),
            ("xl/a.xml", b"<a/>", CompressionMethod::Deflated),
        ]);
        let mut pkg = Package::from_bytes(&bytes).unwrap();
        pkg.set_part("xl/a.xml", b"<a v=\"2\"/>".to_vec());
        pkg.set_part("/xl/new.xml", b"<new/>".to_vec());
        pkg.remove_part(PACKAGE_RELS_PART);
        pkg.set_part(PACKAGE_RELS_PART, b"<Relationships/>".to_vec());

        let reread = Package::from_bytes(&pkg.write().unwrap()).unwrap();
        assert_eq!(
            reread.part_names().collect::<Vec<_>>(),
            vec![
                CONTENT_TYPES_PART,
                "xl/b.bin",
                "xl/a.xml",
                "xl/new.xml",
                PACKAGE_RELS_PART
            ]
        );
        assert_eq!(reread.compression("xl/b.bin"), Some(Compression::Stored));
        assert_eq!(reread.compression("xl/new.xml"), Some(Compression::Deflated));
        assert_eq!(reread.get("xl/a.xml"), Some(&b"<a v=\"2\"/>"[..]));
        assert_eq!(reread.get("xl/b.bin"), Some(&b"stored"[..]));
    }
}
