use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Deserializer, Serialize};

use crate::compact::IndexRemap;
use crate::error::ModelError;
use crate::rich_text::RichText;

/// Deduplicated table of cell text.
///
/// Cells hold [`crate::CellValue::SharedString`] indices into this table. Indices are stable
/// until [`SharedStringTable::compact`] runs.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SharedStringTable {
    entries: Vec<RichText>,
    #[serde(skip)]
    index: HashMap<RichText, u32>,
}

impl PartialEq for SharedStringTable {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl SharedStringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from entries in file order.
    ///
    /// Duplicate entries collapse onto their first occurrence; the returned remap translates the
    /// original positions to table indices.
    pub fn from_entries(entries: impl IntoIterator<Item = RichText>) -> (Self, IndexRemap) {
        let mut table = Self::new();
        let map = entries
            .into_iter()
            .map(|entry| Some(table.intern(entry)))
            .collect();
        (table, IndexRemap::from_vec(map))
    }

    pub fn intern(&mut self, text: RichText) -> u32 {
        if let Some(id) = self.index.get(&text) {
            return *id;
        }
        let id = self.entries.len() as u32;
        self.entries.push(text.clone());
        self.index.insert(text, id);
        id
    }

    pub fn intern_str(&mut self, text: &str) -> u32 {
        self.intern(RichText::plain(text))
    }

    pub fn resolve(&self, id: u32) -> Result<&RichText, ModelError> {
        self.get(id).ok_or(ModelError::InvalidStringIndex(id))
    }

    pub fn get(&self, id: u32) -> Option<&RichText> {
        self.entries.get(id as usize)
    }

    pub fn contains(&self, id: u32) -> bool {
        (id as usize) < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RichText> {
        self.entries.iter()
    }

    /// Drop every entry not in `live`, keeping table order.
    pub fn compact(&mut self, live: &BTreeSet<u32>) -> IndexRemap {
        let mut map = vec![None; self.entries.len()];
        let mut kept = Vec::with_capacity(live.len());
        for (old, entry) in std::mem::take(&mut self.entries).into_iter().enumerate() {
            if live.contains(&(old as u32)) {
                map[old] = Some(kept.len() as u32);
                kept.push(entry);
            }
        }
        self.entries = kept;
        self.rebuild_index();
        IndexRemap::from_vec(map)
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            self.index.entry(entry.clone()).or_insert(i as u32);
        }
    }
}

impl<'de> Deserialize<'de> for SharedStringTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Helper {
            #[serde(default)]
            entries: Vec<RichText>,
        }

        let helper = Helper::deserialize(deserializer)?;
        let mut table = SharedStringTable {
            entries: helper.entries,
            index: HashMap::new(),
        };
        table.rebuild_index();
        Ok(table)
    }
}
