//! OPC relationship parts (`*.rels`) and the package-wide relationship graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::XmlError;
use crate::package::Package;
use crate::path::{rels_for_part, resolve_target, source_for_rels};
use crate::xml::{self, push_attr, NS_PACKAGE_REL, XML_DECLARATION};

pub const REL_TYPE_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub const REL_TYPE_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
pub const REL_TYPE_STYLES: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";
pub const REL_TYPE_SHARED_STRINGS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings";
pub const REL_TYPE_VBA_PROJECT: &str =
    "http://schemas.microsoft.com/office/2006/relationships/vbaProject";
pub const REL_TYPE_TABLE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/table";

/// Last path segment of the relationship types the loader cares about. Transitional and strict
/// namespaces share these.
pub mod role {
    pub const OFFICE_DOCUMENT: &str = "officeDocument";
    pub const WORKSHEET: &str = "worksheet";
    pub const CHARTSHEET: &str = "chartsheet";
    pub const DIALOGSHEET: &str = "dialogsheet";
    pub const MACROSHEET: &str = "xlMacrosheet";
    pub const STYLES: &str = "styles";
    pub const SHARED_STRINGS: &str = "sharedStrings";
    pub const VBA_PROJECT: &str = "vbaProject";
    pub const TABLE: &str = "table";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.eq_ignore_ascii_case("External"))
    }

    /// Whether the relationship type ends in `/<role>`.
    pub fn has_role(&self, role: &str) -> bool {
        self.rel_type
            .rsplit('/')
            .next()
            .is_some_and(|last| last.eq_ignore_ascii_case(role))
    }
}

/// Contents of one `.rels` part, in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Relationships {
    items: Vec<Relationship>,
}

impl Relationships {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, XmlError> {
        let (_, doc) = xml::parse_document(bytes)?;
        let root = xml::expect_root(&doc, "Relationships")?;
        let mut items = Vec::new();
        for node in xml::children_named(root, "Relationship") {
            items.push(Relationship {
                id: xml::required_attr(node, "Id")?.to_string(),
                rel_type: xml::required_attr(node, "Type")?.to_string(),
                target: node.attribute("Target").unwrap_or_default().to_string(),
                target_mode: node.attribute("TargetMode").map(str::to_string),
            });
        }
        Ok(Self { items })
    }

    pub fn to_xml(&self) -> Vec<u8> {
        let mut out = String::with_capacity(128 + 160 * self.items.len());
        out.push_str(XML_DECLARATION);
        out.push_str("\n<Relationships");
        push_attr(&mut out, "xmlns", NS_PACKAGE_REL);
        out.push('>');
        for rel in &self.items {
            out.push_str("<Relationship");
            push_attr(&mut out, "Id", &rel.id);
            push_attr(&mut out, "Type", &rel.rel_type);
            push_attr(&mut out, "Target", &rel.target);
            if let Some(mode) = &rel.target_mode {
                push_attr(&mut out, "TargetMode", mode);
            }
            out.push_str("/>");
        }
        out.push_str("</Relationships>");
        out.into_bytes()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.items.iter().find(|r| r.id == id)
    }

    pub fn first_with_role(&self, role: &str) -> Option<&Relationship> {
        self.items.iter().find(|r| r.has_role(role))
    }

    /// Smallest unused `rIdN`.
    pub fn next_id(&self) -> String {
        let max = self
            .items
            .iter()
            .filter_map(|r| r.id.strip_prefix("rId")?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        format!("rId{}", max + 1)
    }

    /// Append an internal relationship and return its id.
    pub fn push(&mut self, rel_type: &str, target: &str) -> String {
        let id = self.next_id();
        self.items.push(Relationship {
            id: id.clone(),
            rel_type: rel_type.to_string(),
            target: target.to_string(),
            target_mode: None,
        });
        id
    }

    pub fn retain(&mut self, f: impl FnMut(&Relationship) -> bool) {
        self.items.retain(f);
    }
}

/// A relationship together with the part it resolves to (`None` for external targets).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub rel: Relationship,
    pub target_part: Option<String>,
}

/// Every relationship in a package, keyed by source part (`""` for the package itself).
///
/// Built leniently: a malformed `.rels` part contributes no edges and is logged. Callers that
/// require a particular relationships part parse it themselves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelationshipGraph {
    edges: BTreeMap<String, Vec<Edge>>,
}

impl RelationshipGraph {
    pub fn build(package: &Package) -> Self {
        let mut edges = BTreeMap::new();
        for name in package.part_names() {
            let Some(source) = source_for_rels(name) else {
                continue;
            };
            let Some(bytes) = package.get(name) else {
                continue;
            };
            let rels = match Relationships::parse(bytes) {
                Ok(rels) => rels,
                Err(err) => {
                    log::warn!("ignoring malformed relationships part {name}: {err}");
                    continue;
                }
            };
            let resolved = rels
                .iter()
                .map(|rel| Edge {
                    target_part: (!rel.is_external()).then(|| resolve_target(&source, &rel.target)),
                    rel: rel.clone(),
                })
                .collect();
            edges.insert(source, resolved);
        }
        Self { edges }
    }

    pub fn edges(&self, source: &str) -> &[Edge] {
        self.edges
            .get(source.trim_start_matches('/'))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Resolved part of relationship `id` declared by `source`.
    pub fn target(&self, source: &str, id: &str) -> Option<&str> {
        self.edges(source)
            .iter()
            .find(|e| e.rel.id == id)
            .and_then(|e| e.target_part.as_deref())
    }

    /// Resolved part of the first internal relationship of `source` with the given role.
    pub fn target_with_role(&self, source: &str, role: &str) -> Option<&str> {
        self.edges(source)
            .iter()
            .filter(|e| e.rel.has_role(role))
            .find_map(|e| e.target_part.as_deref())
    }

    /// The main workbook part.
    pub fn office_document(&self) -> Option<&str> {
        self.target_with_role("", role::OFFICE_DOCUMENT)
    }

    pub fn workbook_styles(&self, workbook: &str) -> Option<&str> {
        self.target_with_role(workbook, role::STYLES)
    }

    pub fn workbook_shared_strings(&self, workbook: &str) -> Option<&str> {
        self.target_with_role(workbook, role::SHARED_STRINGS)
    }

    /// `(source part, relationship id)` of every internal relationship resolving to `target`.
    pub fn sources_of(&self, target: &str) -> Vec<(&str, &str)> {
        let target = target.trim_start_matches('/');
        self.edges
            .iter()
            .flat_map(|(source, edges)| {
                edges
                    .iter()
                    .filter(|e| {
                        e.target_part
                            .as_deref()
                            .is_some_and(|t| t.eq_ignore_ascii_case(target))
                    })
                    .map(move |e| (source.as_str(), e.rel.id.as_str()))
            })
            .collect()
    }

    /// Transitive closure of parts reachable from `roots`, including the roots, their `.rels`
    /// parts and every internal target that exists in `package`.
    pub fn related_parts<'a>(
        &self,
        package: &Package,
        roots: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut queue: VecDeque<String> = roots.into_iter().map(str::to_string).collect();
        while let Some(part) = queue.pop_front() {
            let Some(stored) = package.resolve_name(&part) else {
                continue;
            };
            if !out.insert(stored.to_string()) {
                continue;
            }
            if let Some(rels) = package.resolve_name(&rels_for_part(&part)) {
                out.insert(rels.to_string());
            }
            for edge in self.edges(&part) {
                if let Some(target) = &edge.target_part {
                    queue.push_back(target.clone());
                }
            }
        }
        out
    }
}
