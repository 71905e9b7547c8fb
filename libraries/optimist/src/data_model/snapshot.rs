use crate::Item;
use crate::data_model::{Entry, ItemId};
use crate::error::SyncError;

/// The set of ids present in a [`Snapshot`]. Always derived from the snapshot's entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipIndex(im::HashSet<ItemId>);

impl MembershipIndex {
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemId> {
        self.0.iter()
    }
}

#[derive(Clone, Debug)]
pub struct Snapshot<T: Clone> {
    entries: im::Vector<Entry<T>>,
    index: MembershipIndex,
}

impl<T: Item> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            entries: im::Vector::new(),
            index: MembershipIndex::default(),
        }
    }
}

impl<T: Item> Snapshot<T> {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot from a server response. If the same id shows up more than once, the first occurrence wins.
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        Self::from_entries(items.into_iter().map(Entry::Full))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = Entry<T>>) -> Self {
        let mut snapshot = Self::default();
        for entry in entries {
            if snapshot.index.contains(entry.id()) {
                log::warn!("Duplicate item {} in snapshot, keeping the first one", entry.id());
                continue;
            }
            snapshot.index.0.insert(entry.id().to_string());
            snapshot.entries.push_back(entry);
        }
        snapshot
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry<T>> {
        self.entries.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Entry<T>> {
        if !self.contains(id) {
            return None;
        }
        self.entries.iter().find(|entry| entry.id() == id)
    }

    pub fn membership(&self) -> &MembershipIndex {
        &self.index
    }

    /// True if any entry is a placeholder, i.e. the snapshot holds data the server hasn't filled in yet.
    pub fn needs_refresh(&self) -> bool {
        self.entries.iter().any(Entry::is_placeholder)
    }

    /// Returns a new snapshot with `entry` in it. An existing entry with the same id keeps its position.
    pub fn with_entry(&self, entry: Entry<T>) -> Self {
        let mut next = self.clone();
        match next.entries.iter().position(|e| e.id() == entry.id()) {
            Some(position) => {
                next.entries.set(position, entry);
            }
            None => {
                next.index.0.insert(entry.id().to_string());
                next.entries.push_back(entry);
            }
        }
        next
    }

    /// Returns a new snapshot without the entry for `id`.
    pub fn without(&self, id: &str) -> Self {
        let mut next = self.clone();
        if let Some(position) = next.entries.iter().position(|e| e.id() == id) {
            next.entries.remove(position);
        }
        next.index.0.remove(id);
        next
    }

    pub(crate) fn check_consistency(&self) -> Result<(), SyncError> {
        let ids: im::HashSet<ItemId> = self.entries.iter().map(|e| e.id().to_string()).collect();

        let missing_from_snapshot: Vec<ItemId> = self
            .index
            .iter()
            .filter(|id| !ids.contains(id.as_str()))
            .cloned()
            .collect();
        let missing_from_index: Vec<ItemId> = ids
            .iter()
            .filter(|id| !self.index.contains(id))
            .cloned()
            .collect();

        if missing_from_snapshot.is_empty() && missing_from_index.is_empty() {
            Ok(())
        } else {
            Err(SyncError::InconsistentState {
                missing_from_snapshot,
                missing_from_index,
            })
        }
    }

    pub(crate) fn rebuild_index(&self) -> Self {
        Self::from_entries(self.entries.iter().cloned())
    }

    #[cfg(test)]
    pub(crate) fn with_index_unchecked(entries: Vec<Entry<T>>, index: Vec<&str>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            index: MembershipIndex(index.into_iter().map(str::to_string).collect()),
        }
    }
}
