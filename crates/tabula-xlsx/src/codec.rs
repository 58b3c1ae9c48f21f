//! The seam between package parts and their typed records.
//!
//! Each owned part has a codec that decodes the part's XML into a record plus the
//! [`PartFragments`] it does not model, and encodes a record back, splicing the fragments in at
//! their schema positions.

use crate::error::XmlError;
use crate::preserve::PartFragments;

pub trait PartCodec {
    type Record;

    fn decode(xml: &[u8], fragments: &mut PartFragments) -> Result<Self::Record, XmlError>;

    fn encode(record: &Self::Record, fragments: &PartFragments) -> Result<Vec<u8>, XmlError>;
}

/// Open a part's root element: the preserved root attributes, or the defaults for a new part.
pub(crate) fn open_root(out: &mut String, name: &str, fragments: &PartFragments, skip: &[&str]) {
    out.push_str(crate::xml::XML_DECLARATION);
    out.push_str("\n<");
    out.push_str(name);
    match fragments.root_attrs() {
        Some(raw) => match crate::xml::parse_raw_attrs(&format!("<{name}{raw}>")) {
            Ok(attrs) => crate::xml::push_raw_attrs(out, &attrs, skip),
            Err(_) => out.push_str(raw),
        },
        None => out.push_str(crate::xml::DEFAULT_ROOT_ATTRS),
    }
}
