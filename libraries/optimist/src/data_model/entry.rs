use crate::Item;
use crate::data_model::ItemId;

/// An element of a [`super::Snapshot`].
///
/// `Placeholder` is what gets inserted when an item is added without its metadata. It only knows its id,
/// and is replaced by the full item once the server snapshot comes back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry<T> {
    Full(T),
    Placeholder { id: ItemId },
}

impl<T: Item> Entry<T> {
    pub fn id(&self) -> &str {
        match self {
            Entry::Full(item) => item.id(),
            Entry::Placeholder { id } => id,
        }
    }

    pub fn item(&self) -> Option<&T> {
        match self {
            Entry::Full(item) => Some(item),
            Entry::Placeholder { .. } => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Entry::Placeholder { .. })
    }

    /// Builds the entry to insert for `id`, falling back to a placeholder when the metadata is missing
    /// or describes a different item.
    pub(crate) fn for_insert(id: &str, metadata: Option<T>) -> Self {
        match metadata {
            Some(item) if item.id() == id => Entry::Full(item),
            Some(item) => {
                log::warn!(
                    "Metadata for item {} was supplied while toggling {id}, using a placeholder instead",
                    item.id()
                );
                Entry::Placeholder { id: id.to_string() }
            }
            None => Entry::Placeholder { id: id.to_string() },
        }
    }
}
