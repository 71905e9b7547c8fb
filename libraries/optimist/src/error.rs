use crate::data_model::ItemId;

/// What a [`crate::RemoteStore`] reports when a call fails.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server responded with status {status}: {body}")]
    Status { status: String, body: String },

    #[error("Failed to decode server response: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to fetch the collection")]
    RemoteFetch(#[source] RemoteError),

    #[error("Failed to toggle membership")]
    RemoteMutation(#[source] RemoteError),

    #[error(
        "Membership index out of sync with snapshot (indexed but missing: {missing_from_snapshot:?}, present but unindexed: {missing_from_index:?})"
    )]
    InconsistentState {
        missing_from_snapshot: Vec<ItemId>,
        missing_from_index: Vec<ItemId>,
    },

    #[error("A toggle for {0} is already in flight")]
    ToggleInFlight(ItemId),

    #[error("No session")]
    NoSession,
}
