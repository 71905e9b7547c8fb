//! # Data model
//! A [`Snapshot`] is an immutable, ordered list of [`Entry`]s together with the set of their ids.
//! Snapshots are never modified in place: every change produces a new value, which is cheap thanks to `im`'s structural sharing.

mod entry;
mod snapshot;

pub use entry::Entry;
pub use snapshot::{MembershipIndex, Snapshot};

pub type ItemId = String;
