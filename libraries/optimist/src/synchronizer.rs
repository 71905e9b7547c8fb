//! # Synchronizer
//! The only writer of the [`ProjectionCache`]. Consumers read membership through it and ask it for toggles.
//!
//! A toggle is a two-phase affair:
//! 1. [`Synchronizer::toggle`] applies the change to the cache right away and hands back a future.
//! 2. That future sends the toggle to the server, then either re-fetches the collection (on success) or
//!    reverts the change and invalidates the cache (on failure).
//!
//! Remote errors stop here. Consumers see the reverted state, and the [`ToggleOutcome`] if they care to look.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cache::{
    Change, FetchTicket, Intent, ListenerKey, Overlay, ProjectionCache, Session, SyncStatus,
};
use crate::data_model::{Entry, ItemId, Snapshot};
use crate::error::SyncError;
use crate::remote::RemoteStore;

#[derive(Clone, Debug)]
pub enum ToggleOutcome {
    /// The server accepted the toggle. `reconciled` tells whether the follow-up fetch made it into the cache.
    Committed { reconciled: bool },
    /// The server rejected the toggle and the optimistic change was reverted.
    RolledBack { error: SyncError },
    /// Nothing to do (removing an item that isn't there).
    Unchanged,
    /// The session ended before the server answered.
    Abandoned,
}

#[derive(Clone, Debug)]
pub enum FetchOutcome {
    /// No session, so nothing was fetched.
    Skipped,
    /// The cache was already up to date.
    Fresh,
    Applied,
    /// The response arrived too late: the session changed or a newer snapshot was already applied.
    Superseded,
    Failed(SyncError),
}

enum Desire<T> {
    Toggle(Option<T>),
    Remove,
}

pub struct Synchronizer<R: RemoteStore> {
    // we never hold a borrow across an .await. by avoiding this, we guarantee the absence of "borrow while locked" panics
    cache: RefCell<ProjectionCache<R::Item>>,
    remote: R,
}

impl<R: RemoteStore + 'static> Synchronizer<R> {
    pub fn new(remote: R) -> Self {
        Self {
            cache: RefCell::new(ProjectionCache::default()),
            remote,
        }
    }

    /// Starts (or refreshes the token of) a session. Switching users drops everything the cache held.
    pub fn login(&self, session: Session) {
        let _flusher = FlushLater::new(self);
        self.cache.borrow_mut().login(session);
    }

    /// Clears the collection. Anything still in flight is discarded when it comes back.
    pub fn logout(&self) {
        let _flusher = FlushLater::new(self);
        self.cache.borrow_mut().logout();
    }

    pub fn session(&self) -> Option<Session> {
        self.cache.borrow().session().cloned()
    }

    pub fn subscribe(&self, listener: impl Fn(&Change) + 'static) -> ListenerKey {
        self.cache.borrow_mut().register_listener(listener)
    }

    pub fn unsubscribe(&self, key: ListenerKey) {
        self.cache.borrow_mut().unregister_listener(key)
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.cache.borrow().contains(id)
    }

    pub fn count(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn items(&self) -> Vec<Entry<R::Item>> {
        self.cache
            .borrow()
            .read()
            .map(|snapshot| snapshot.entries().cloned().collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<Snapshot<R::Item>> {
        self.cache.borrow().read().cloned()
    }

    pub fn status(&self) -> SyncStatus {
        self.cache.borrow().status().clone()
    }

    pub fn needs_fetch(&self) -> bool {
        self.cache.borrow().needs_fetch()
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.cache.borrow().is_in_flight(id)
    }

    /// Fetches the collection and applies it, unless something newer got there first.
    pub async fn refetch(&self) -> FetchOutcome {
        let started = self.cache.borrow_mut().begin_fetch();
        let Some((ticket, session)) = started else {
            log::debug!("No session, skipping wishlist fetch");
            return FetchOutcome::Skipped;
        };

        let pending = PendingFetch {
            sync: self,
            ticket,
            armed: true,
        };
        let result = self.remote.fetch_all(&session).await;
        let ticket = pending.settled();

        let _flusher = FlushLater::new(self);
        let mut cache = self.cache.borrow_mut();
        match result {
            Ok(items) => {
                if cache.apply_fetched(ticket, Snapshot::from_items(items)) {
                    FetchOutcome::Applied
                } else {
                    FetchOutcome::Superseded
                }
            }
            Err(e) => {
                log::error!("Failed to fetch wishlist: {e}");
                cache.fetch_failed(ticket, &e);
                FetchOutcome::Failed(SyncError::RemoteFetch(e))
            }
        }
    }

    /// Fetches only if nothing has been loaded for this session yet, or the cache was invalidated.
    pub async fn ensure_loaded(&self) -> FetchOutcome {
        let (has_session, needs_fetch) = {
            let cache = self.cache.borrow();
            (cache.session().is_some(), cache.needs_fetch())
        };
        match (has_session, needs_fetch) {
            (false, _) => FetchOutcome::Skipped,
            (true, false) => FetchOutcome::Fresh,
            (true, true) => self.refetch().await,
        }
    }

    /// Flips membership of `id`. The cache reflects the change before this returns.
    ///
    /// `metadata` is what gets shown for the item until the server snapshot comes back; without it a placeholder is used.
    /// Fails with [`SyncError::ToggleInFlight`] if the previous toggle of this item hasn't been answered yet,
    /// and with [`SyncError::NoSession`] when logged out.
    ///
    /// The returned future must be polled to completion (e.g. spawned). Dropping it early reverts the change.
    pub fn toggle(
        self: &Rc<Self>,
        id: &str,
        metadata: Option<R::Item>,
    ) -> Result<impl Future<Output = ToggleOutcome> + use<R>, SyncError> {
        let tentative = self.begin(id, Desire::Toggle(metadata))?;
        Ok(settle(tentative))
    }

    /// Like [`Synchronizer::toggle`], but only ever removes. Removing an absent item resolves to [`ToggleOutcome::Unchanged`]
    /// without contacting the server.
    pub fn remove_item(
        self: &Rc<Self>,
        id: &str,
    ) -> Result<impl Future<Output = ToggleOutcome> + use<R>, SyncError> {
        let tentative = self.begin(id, Desire::Remove)?;
        Ok(settle(tentative))
    }

    fn begin(
        self: &Rc<Self>,
        id: &str,
        desire: Desire<R::Item>,
    ) -> Result<Option<Tentative<R>>, SyncError> {
        let _flusher = FlushLater::new(self);
        let mut cache = self.cache.borrow_mut();

        let session = cache.session().cloned().ok_or(SyncError::NoSession)?;
        if cache.is_in_flight(id) {
            log::info!("Ignoring toggle of {id}: the previous one hasn't been answered yet");
            return Err(SyncError::ToggleInFlight(id.to_string()));
        }

        let intent = match (cache.contains(id), desire) {
            (true, _) => Intent::Remove,
            (false, Desire::Toggle(metadata)) => Intent::Insert(Entry::for_insert(id, metadata)),
            (false, Desire::Remove) => {
                log::debug!("{id} is not in the wishlist, nothing to remove");
                return Ok(None);
            }
        };
        let replaced = cache.stage(id, intent);

        Ok(Some(Tentative {
            sync: Rc::clone(self),
            id: id.to_string(),
            replaced,
            session,
            epoch: cache.epoch(),
            armed: true,
        }))
    }

    /// Calls queued listener notifications, making sure the cache isn't borrowed while they run.
    fn flush_notifications(&self) {
        // do it like this to avoid holding the borrow while we call the callbacks
        let notifications = self.cache.borrow_mut().drain_due_notifications();
        // that's important because listeners usually read the cache again
        for notification in notifications {
            notification();
        }
    }
}

async fn settle<R: RemoteStore + 'static>(tentative: Option<Tentative<R>>) -> ToggleOutcome {
    match tentative {
        Some(tentative) => tentative.settle().await,
        None => ToggleOutcome::Unchanged,
    }
}

/// An optimistic change that has been applied locally but not yet confirmed or reverted.
/// If it is dropped before settling, the change is reverted.
struct Tentative<R: RemoteStore + 'static> {
    sync: Rc<Synchronizer<R>>,
    id: ItemId,
    // an accepted change to the same item that this one replaced
    replaced: Option<Overlay<R::Item>>,
    session: Session,
    epoch: u64,
    armed: bool,
}

impl<R: RemoteStore + 'static> Tentative<R> {
    async fn settle(mut self) -> ToggleOutcome {
        let result = self
            .sync
            .remote
            .toggle_membership(&self.session, &self.id)
            .await;
        self.armed = false;

        let sync = Rc::clone(&self.sync);
        if !sync.cache.borrow().is_current(self.epoch) {
            log::info!(
                "Session changed while toggling {}, ignoring the server's answer",
                self.id
            );
            return ToggleOutcome::Abandoned;
        }

        match result {
            Ok(()) => {
                sync.cache.borrow_mut().acknowledge(&self.id);
                let reconciled = match sync.refetch().await {
                    FetchOutcome::Applied => true,
                    outcome => {
                        log::warn!(
                            "Toggled {} but couldn't reconcile with the server: {outcome:?}",
                            self.id
                        );
                        false
                    }
                };
                ToggleOutcome::Committed { reconciled }
            }
            Err(e) => {
                log::warn!("Toggling {} failed, rolling back: {e}", self.id);
                {
                    let _flusher = FlushLater::new(&sync);
                    let mut cache = sync.cache.borrow_mut();
                    cache.rollback(&self.id, self.replaced.take());
                    cache.invalidate();
                }
                ToggleOutcome::RolledBack {
                    error: SyncError::RemoteMutation(e),
                }
            }
        }
    }
}

impl<R: RemoteStore + 'static> Drop for Tentative<R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::warn!(
            "Toggle of {} was dropped before the server answered, rolling back",
            self.id
        );
        let _flusher = FlushLater::new(&self.sync);
        let mut cache = self.sync.cache.borrow_mut();
        if cache.is_current(self.epoch) {
            cache.rollback(&self.id, self.replaced.take());
            // we don't know whether the request reached the server
            cache.invalidate();
        }
    }
}

/// A fetch whose answer hasn't been handled yet. If it is dropped first, the ticket is given back
/// so the cache doesn't count it as in flight forever.
struct PendingFetch<'a, R: RemoteStore + 'static> {
    sync: &'a Synchronizer<R>,
    ticket: FetchTicket,
    armed: bool,
}

impl<R: RemoteStore + 'static> PendingFetch<'_, R> {
    fn settled(mut self) -> FetchTicket {
        self.armed = false;
        self.ticket
    }
}

impl<R: RemoteStore + 'static> Drop for PendingFetch<'_, R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        log::debug!("Wishlist fetch dropped before the server answered");
        self.sync.cache.borrow_mut().fetch_abandoned(self.ticket);
    }
}

/// A simple struct that flushes listener notifications when dropped. This is useful if you want to ensure you don't forget to flush them, regardless of the code path a function takes.
struct FlushLater<'a, R: RemoteStore + 'static> {
    sync: &'a Synchronizer<R>,
}

impl<'a, R: RemoteStore + 'static> FlushLater<'a, R> {
    fn new(sync: &'a Synchronizer<R>) -> Self {
        Self { sync }
    }
}

impl<R: RemoteStore + 'static> Drop for FlushLater<'_, R> {
    fn drop(&mut self) {
        self.sync.flush_notifications();
    }
}
