use serde::{Deserialize, Serialize};

/// Old-index to new-index mapping produced by table compaction.
///
/// Dropped entries map to `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRemap {
    map: Vec<Option<u32>>,
}

impl IndexRemap {
    pub fn identity(len: usize) -> Self {
        Self {
            map: (0..len as u32).map(Some).collect(),
        }
    }

    pub(crate) fn from_vec(map: Vec<Option<u32>>) -> Self {
        Self { map }
    }

    /// New index for `old`, or `None` if the entry was dropped or never existed.
    pub fn get(&self, old: u32) -> Option<u32> {
        self.map.get(old as usize).copied().flatten()
    }

    /// Number of indices the remap was built from.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.map
            .iter()
            .enumerate()
            .all(|(i, new)| *new == Some(i as u32))
    }

    /// Number of entries that survived compaction.
    pub fn retained(&self) -> usize {
        self.map.iter().filter(|m| m.is_some()).count()
    }
}

/// Summary of a [`crate::Workbook::compact`] pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Compaction {
    pub styles: IndexRemap,
    pub strings: IndexRemap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_maps_every_index_to_itself() {
        let remap = IndexRemap::identity(3);
        assert!(remap.is_identity());
        assert_eq!(remap.get(2), Some(2));
        assert_eq!(remap.get(3), None);
    }

    #[test]
    fn dropped_entries_map_to_none() {
        let remap = IndexRemap::from_vec(vec![Some(0), None, Some(1)]);
        assert!(!remap.is_identity());
        assert_eq!(remap.get(1), None);
        assert_eq!(remap.get(2), Some(1));
        assert_eq!(remap.retained(), 2);
    }
}
