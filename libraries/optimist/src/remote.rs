//! The server side of the collection, as seen by the [`crate::Synchronizer`].
//! Implement [`RemoteStore`] for whatever transport you use; tests implement it with scripted responses.

use std::rc::Rc;

use crate::cache::Session;
use crate::error::RemoteError;

// The futures are polled on a single thread (e.g. the browser's event loop), so we don't require them to be `Send`.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    type Item: crate::Item;

    /// Fetch the full collection for the session's user.
    async fn fetch_all(&self, session: &Session) -> Result<Vec<Self::Item>, RemoteError>;

    /// Ask the server to add the item if it is absent, or remove it if it is present.
    /// This is not idempotent: calling it twice flips membership twice.
    async fn toggle_membership(&self, session: &Session, id: &str) -> Result<(), RemoteError>;
}

impl<R: RemoteStore> RemoteStore for Rc<R> {
    type Item = R::Item;

    async fn fetch_all(&self, session: &Session) -> Result<Vec<Self::Item>, RemoteError> {
        (**self).fetch_all(session).await
    }

    async fn toggle_membership(&self, session: &Session, id: &str) -> Result<(), RemoteError> {
        (**self).toggle_membership(session, id).await
    }
}
