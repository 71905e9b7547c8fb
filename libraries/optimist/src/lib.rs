//! This is a library for keeping a small per-user collection (a wishlist, a set of liked items...)
//! in sync with a server while making every change feel instantaneous.
//! It was created for a marketplace front-end, so it doesn't include much that was not needed there.
//!
//! Syncing strategy:
//! 1. The server is the single source of truth. The client holds the last snapshot it fetched, namespaced by the current session.
//! 2. When the user toggles an item, the change is written locally as an "overlay" on top of that snapshot, before any network round-trip.
//! 3. The toggle is then sent to the server:
//!   1. If the server accepts it, the snapshot is fetched again, and the fetched snapshot replaces the optimistic guess.
//!   2. If the server rejects it, the overlay is dropped (restoring the previous state) and the cache is marked stale.
//!
//! Sounds simple, but there are a few tricky parts that this library handles:
//! out-of-order responses, overlapping toggles, and responses that arrive after the user logged out.

pub mod cache;
pub mod data_model;
pub mod remote;
pub mod synchronizer;

mod error;

pub use cache::{Change, ListenerKey, Session, SyncStatus};
pub use data_model::{Entry, ItemId, MembershipIndex, Snapshot};
pub use error::{RemoteError, SyncError};
pub use remote::RemoteStore;
pub use synchronizer::{FetchOutcome, Synchronizer, ToggleOutcome};

/// Anything that can live in a synced collection.
pub trait Item: Clone + 'static {
    /// Unique identifier of the item within the collection.
    fn id(&self) -> &str;
}
