use serde::{Deserialize, Serialize};

use crate::address::{CellRef, Range};
use crate::error::ModelError;

/// Merged ranges of one sheet, pairwise non-overlapping and sorted by anchor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRegions {
    regions: Vec<Range>,
}

impl MergedRegions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a merge. Fails without modifying anything when `range` intersects an existing merge.
    pub fn add(&mut self, range: Range) -> Result<(), ModelError> {
        if range.is_single_cell() || !range.end.in_bounds() {
            return Err(ModelError::InvalidMerge(range));
        }
        if let Some(existing) = self.regions.iter().find(|r| r.intersects(&range)) {
            return Err(ModelError::OverlappingMerge {
                requested: range,
                existing: *existing,
            });
        }
        let pos = self
            .regions
            .binary_search(&range)
            .unwrap_or_else(|pos| pos);
        self.regions.insert(pos, range);
        Ok(())
    }

    /// Remove an exact merge range. Returns whether it existed.
    pub fn remove(&mut self, range: &Range) -> bool {
        match self.regions.binary_search(range) {
            Ok(pos) => {
                self.regions.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// The merge covering `cell`, if any.
    pub fn containing(&self, cell: CellRef) -> Option<Range> {
        self.regions.iter().copied().find(|r| r.contains(cell))
    }

    /// The merge anchored at `cell`, if any.
    pub fn anchored_at(&self, cell: CellRef) -> Option<Range> {
        self.containing(cell).filter(|r| r.start == cell)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Replace every region at once. Used by structural edits that move regions in bulk.
    pub(crate) fn replace_all(&mut self, mut regions: Vec<Range>) {
        regions.sort();
        self.regions = regions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_merge_is_rejected_and_nothing_changes() {
        let mut merges = MergedRegions::new();
        merges.add(Range::from_coords(0, 0, 1, 1)).unwrap();
        let before = merges.clone();
        let err = merges.add(Range::from_coords(1, 1, 2, 2)).unwrap_err();
        assert_eq!(
            err,
            ModelError::OverlappingMerge {
                requested: Range::from_coords(1, 1, 2, 2),
                existing: Range::from_coords(0, 0, 1, 1),
            }
        );
        assert_eq!(merges, before);
    }

    #[test]
    fn single_cell_merge_is_invalid() {
        let mut merges = MergedRegions::new();
        let single = Range::single(CellRef::new(3, 3));
        assert_eq!(merges.add(single), Err(ModelError::InvalidMerge(single)));
    }

    #[test]
    fn lookup_by_member_and_anchor() {
        let mut merges = MergedRegions::new();
        let r = Range::from_coords(1, 0, 1, 2);
        merges.add(r).unwrap();
        assert_eq!(merges.containing(CellRef::new(1, 2)), Some(r));
        assert_eq!(merges.anchored_at(CellRef::new(1, 0)), Some(r));
        assert_eq!(merges.anchored_at(CellRef::new(1, 1)), None);
        assert!(merges.remove(&r));
        assert!(!merges.remove(&r));
    }
}
