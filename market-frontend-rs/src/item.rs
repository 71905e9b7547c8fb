use chrono::{DateTime, Utc};
use optimist::Entry;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct WishlistItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub original_price: Option<f64>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub discount: Option<f64>,
    #[serde(default)]
    pub order_count: u32,
    #[serde(default)]
    #[tsify(type = "string | null")]
    pub date_added: Option<DateTime<Utc>>,
}

impl WishlistItem {
    /// What the page shows for an item we only know the id of.
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            price: 0.0,
            original_price: None,
            image: None,
            discount: None,
            order_count: 0,
            date_added: None,
        }
    }
}

impl optimist::Item for WishlistItem {
    fn id(&self) -> &str {
        &self.id
    }
}

/// An item as handed to JS. `placeholder` is set when the display fields haven't been loaded yet.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct WishlistEntry {
    #[serde(flatten)]
    pub item: WishlistItem,
    pub placeholder: bool,
}

impl From<Entry<WishlistItem>> for WishlistEntry {
    fn from(entry: Entry<WishlistItem>) -> Self {
        match entry {
            Entry::Full(item) => WishlistEntry {
                item,
                placeholder: false,
            },
            Entry::Placeholder { id } => WishlistEntry {
                item: WishlistItem::placeholder(&id),
                placeholder: true,
            },
        }
    }
}
