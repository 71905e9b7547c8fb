//! # ProjectionCache
//! Holds what the client believes the collection looks like: the last snapshot confirmed by the server,
//! plus one optimistic overlay per item that is being toggled. Readers only ever see the projection of the two.
//!
//! Everything in here is namespaced by the current [`Session`]. Logging out (or in as someone else) bumps the
//! session epoch, and anything that started under an older epoch is discarded when it comes back.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use slotmap::SlotMap;

use crate::Item;
use crate::data_model::{Entry, ItemId, Snapshot};
use crate::error::RemoteError;

slotmap::new_key_type! {
    pub struct ListenerKey;
}

#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
        }
    }
}

// keep tokens out of the logs
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// What listeners are told about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    /// The projection changed (optimistic write, or a fetched snapshot was applied).
    Updated,
    /// An optimistic change to this item was reverted.
    RolledBack { id: ItemId },
    /// The cache no longer trusts its contents and wants to be re-fetched.
    Invalidated,
    /// The user logged in or out. The collection starts over.
    SessionChanged,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SyncStatus {
    pub fetches_in_flight: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub fn is_fetching(&self) -> bool {
        self.fetches_in_flight > 0
    }
}

/// Handed out when a fetch starts, and checked when its result comes back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FetchTicket {
    epoch: u64,
    seq: u64,
}

#[derive(Clone, Debug)]
pub(crate) enum Intent<T> {
    Insert(Entry<T>),
    Remove,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// The server hasn't answered yet.
    InFlight,
    /// The server accepted the change. Any fetch with a sequence number of at least `reflected_from` includes it.
    Acknowledged { reflected_from: u64 },
}

/// One item's pending change. Handed back by [`ProjectionCache::stage`] when a newer change replaces it.
#[derive(Clone, Debug)]
pub(crate) struct Overlay<T> {
    intent: Intent<T>,
    phase: Phase,
}

type Listener = Rc<dyn Fn(&Change)>;

pub struct ProjectionCache<T: Item> {
    session: Option<Session>,
    epoch: u64,

    confirmed: Option<Snapshot<T>>,
    overlays: BTreeMap<ItemId, Overlay<T>>,
    projection: Option<Snapshot<T>>,

    next_fetch: u64,
    applied_fetch: Option<u64>,
    // set by `invalidate`: fetches numbered at least this clear the staleness
    stale_from: Option<u64>,
    status: SyncStatus,

    listeners: SlotMap<ListenerKey, Listener>,
    pending: Vec<Change>,
}

impl<T: Item> Default for ProjectionCache<T> {
    fn default() -> Self {
        Self {
            session: None,
            epoch: 0,
            confirmed: None,
            overlays: BTreeMap::new(),
            projection: None,
            next_fetch: 0,
            applied_fetch: None,
            stale_from: None,
            status: SyncStatus::default(),
            listeners: SlotMap::with_key(),
            pending: Vec::new(),
        }
    }
}

impl<T: Item> ProjectionCache<T> {
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The confirmed snapshot with every optimistic overlay applied. `None` until something has been loaded for the current session.
    pub fn read(&self) -> Option<&Snapshot<T>> {
        self.projection.as_ref()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.projection
            .as_ref()
            .is_some_and(|snapshot| snapshot.contains(id))
    }

    pub fn len(&self) -> usize {
        self.projection.as_ref().map(Snapshot::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stale(&self) -> bool {
        self.stale_from.is_some()
    }

    /// True when there is a session and nothing trustworthy has been fetched for it.
    pub fn needs_fetch(&self) -> bool {
        self.session.is_some() && (self.confirmed.is_none() || self.is_stale())
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.overlays
            .get(id)
            .is_some_and(|overlay| overlay.phase == Phase::InFlight)
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn register_listener(&mut self, listener: impl Fn(&Change) + 'static) -> ListenerKey {
        self.listeners.insert(Rc::new(listener))
    }

    pub fn unregister_listener(&mut self, key: ListenerKey) {
        if self.listeners.remove(key).is_none() {
            log::warn!("Tried to unregister a listener that doesn't exist: {key:?}");
        }
    }

    /// Takes the queued notifications. Call them after releasing any borrow of the cache,
    /// since listeners usually read the cache again.
    pub fn drain_due_notifications(&mut self) -> Vec<Box<dyn FnOnce()>> {
        let mut notifications: Vec<Box<dyn FnOnce()>> = Vec::new();
        for change in std::mem::take(&mut self.pending) {
            for listener in self.listeners.values() {
                let listener = Rc::clone(listener);
                let change = change.clone();
                notifications.push(Box::new(move || listener(&change)));
            }
        }
        notifications
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    pub(crate) fn login(&mut self, session: Session) {
        if self.session.as_ref() == Some(&session) {
            return;
        }
        if let Some(current) = &mut self.session
            && current.user_id == session.user_id
        {
            // same user, new token: keep the collection and whatever is in flight
            log::debug!("Refreshed access token for {}", session.user_id);
            *current = session;
            return;
        }

        log::info!("Starting wishlist session for {}", session.user_id);
        self.reset();
        self.session = Some(session);
        self.reproject();
        self.notify(Change::SessionChanged);
    }

    pub(crate) fn logout(&mut self) {
        if self.session.is_none() && self.projection.is_none() {
            return;
        }
        log::info!("Ending wishlist session");
        self.reset();
        self.reproject();
        self.notify(Change::SessionChanged);
    }

    /// Replaces the confirmed snapshot.
    pub(crate) fn write(&mut self, snapshot: Snapshot<T>) {
        self.confirmed = Some(snapshot);
        self.reproject();
        self.notify(Change::Updated);
    }

    /// Marks the cache stale, so the next load goes to the server.
    ///
    /// Overlays are kept. Every overlay still here is either waiting on the server or was accepted by it;
    /// rejected guesses were already removed by [`ProjectionCache::rollback`]. Accepted ones leave once a
    /// fetch reflects them, in-flight ones when their toggle settles.
    pub(crate) fn invalidate(&mut self) {
        self.stale_from.get_or_insert(self.next_fetch);
        self.reproject();
        self.notify(Change::Invalidated);
    }

    /// Puts an in-flight change on top of `id`, returning the overlay it replaced (an accepted change
    /// still waiting for its fetch).
    pub(crate) fn stage(&mut self, id: &str, intent: Intent<T>) -> Option<Overlay<T>> {
        let replaced = self.overlays.insert(
            id.to_string(),
            Overlay {
                intent,
                phase: Phase::InFlight,
            },
        );
        self.reproject();
        self.notify(Change::Updated);
        replaced
    }

    pub(crate) fn acknowledge(&mut self, id: &str) {
        if let Some(overlay) = self.overlays.get_mut(id) {
            overlay.phase = Phase::Acknowledged {
                reflected_from: self.next_fetch,
            };
        }
    }

    /// Drops the in-flight change to `id`, bringing back `replaced` (what [`ProjectionCache::stage`] returned)
    /// unless a fetch has reflected it since.
    pub(crate) fn rollback(&mut self, id: &str, replaced: Option<Overlay<T>>) {
        if self.overlays.remove(id).is_none() {
            return;
        }
        if let Some(replaced) = replaced
            && !self.is_reflected(&replaced)
        {
            self.overlays.insert(id.to_string(), replaced);
        }
        self.reproject();
        self.notify(Change::RolledBack { id: id.to_string() });
    }

    pub(crate) fn begin_fetch(&mut self) -> Option<(FetchTicket, Session)> {
        let session = self.session.clone()?;
        let ticket = FetchTicket {
            epoch: self.epoch,
            seq: self.next_fetch,
        };
        self.next_fetch += 1;
        self.status.fetches_in_flight += 1;
        Some((ticket, session))
    }

    /// Applies a fetched snapshot, unless it belongs to an old session or is older than one already applied.
    /// Returns whether it was applied.
    pub(crate) fn apply_fetched(&mut self, ticket: FetchTicket, snapshot: Snapshot<T>) -> bool {
        if !self.is_current(ticket.epoch) {
            log::info!("Discarding snapshot fetched for a previous session");
            return false;
        }
        self.status.fetches_in_flight = self.status.fetches_in_flight.saturating_sub(1);

        if self
            .applied_fetch
            .is_some_and(|applied| applied > ticket.seq)
        {
            log::info!(
                "Discarding out-of-order snapshot (fetch {}, already applied {:?})",
                ticket.seq,
                self.applied_fetch
            );
            return false;
        }

        self.applied_fetch = Some(ticket.seq);
        if self.stale_from.is_some_and(|from| ticket.seq >= from) {
            self.stale_from = None;
        }
        self.status.last_synced_at = Some(Utc::now());
        self.status.last_error = None;

        // acknowledged overlays are now part of the server's answer. in-flight ones still aren't.
        self.overlays.retain(|_, overlay| match overlay.phase {
            Phase::InFlight => true,
            Phase::Acknowledged { reflected_from } => ticket.seq < reflected_from,
        });

        self.write(snapshot);
        true
    }

    pub(crate) fn fetch_failed(&mut self, ticket: FetchTicket, error: &RemoteError) {
        if !self.is_current(ticket.epoch) {
            return;
        }
        self.status.fetches_in_flight = self.status.fetches_in_flight.saturating_sub(1);
        self.status.last_error = Some(error.to_string());
        if self.confirmed.is_some() {
            // retry on next load
            self.stale_from.get_or_insert(self.next_fetch);
        }
    }

    /// Gives back a ticket whose fetch was dropped before it came back.
    pub(crate) fn fetch_abandoned(&mut self, ticket: FetchTicket) {
        if self.is_current(ticket.epoch) {
            self.status.fetches_in_flight = self.status.fetches_in_flight.saturating_sub(1);
        }
    }

    fn is_reflected(&self, overlay: &Overlay<T>) -> bool {
        match overlay.phase {
            Phase::InFlight => false,
            Phase::Acknowledged { reflected_from } => self
                .applied_fetch
                .is_some_and(|applied| applied >= reflected_from),
        }
    }

    fn reset(&mut self) {
        self.session = None;
        self.epoch += 1;
        self.confirmed = None;
        self.overlays.clear();
        self.applied_fetch = None;
        self.stale_from = None;
        self.status = SyncStatus::default();
    }

    fn reproject(&mut self) {
        if self.session.is_none() || (self.confirmed.is_none() && self.overlays.is_empty()) {
            self.projection = None;
            return;
        }

        let base = self.confirmed.clone().unwrap_or_default();
        let projection = self
            .overlays
            .iter()
            .fold(base, |snapshot, (id, overlay)| match &overlay.intent {
                // the server's copy of an item beats our guess at it
                Intent::Insert(_) if snapshot.contains(id) => snapshot,
                Intent::Insert(entry) => snapshot.with_entry(entry.clone()),
                Intent::Remove => snapshot.without(id),
            });

        self.projection = Some(match projection.check_consistency() {
            Ok(()) => projection,
            Err(e) => {
                log::error!("{e}, rebuilding the index");
                projection.rebuild_index()
            }
        });
    }

    fn notify(&mut self, change: Change) {
        if !self.listeners.is_empty() {
            self.pending.push(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Clone, Debug, PartialEq)]
    struct Product {
        id: String,
    }

    impl Item for Product {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn product(id: &str) -> Product {
        Product { id: id.to_string() }
    }

    fn logged_in() -> ProjectionCache<Product> {
        let mut cache = ProjectionCache::default();
        cache.login(Session::new("alice", "token-a"));
        cache
    }

    fn fetched(cache: &mut ProjectionCache<Product>, ids: &[&str]) -> bool {
        let (ticket, _) = cache.begin_fetch().expect("session is set");
        cache.apply_fetched(ticket, Snapshot::from_items(ids.iter().map(|id| product(id))))
    }

    #[test]
    fn absent_until_first_fetch() {
        let mut cache = logged_in();
        assert!(cache.read().is_none());
        assert!(cache.needs_fetch());

        assert!(fetched(&mut cache, &[]));
        assert!(cache.read().is_some_and(Snapshot::is_empty));
        assert!(!cache.needs_fetch());
        assert!(cache.status().last_synced_at.is_some());
    }

    #[test]
    fn no_fetch_without_session() {
        let mut cache = ProjectionCache::<Product>::default();
        assert!(cache.begin_fetch().is_none());
        assert!(!cache.needs_fetch());
    }

    #[test]
    fn overlays_project_on_top_of_confirmed() {
        let mut cache = logged_in();
        fetched(&mut cache, &["p1", "p2"]);

        cache.stage("p1", Intent::Remove);
        cache.stage("p3", Intent::Insert(Entry::Placeholder { id: "p3".into() }));

        assert!(!cache.contains("p1"));
        assert!(cache.contains("p2"));
        assert!(cache.contains("p3"));
        assert_eq!(cache.len(), 2);
        assert!(cache.is_in_flight("p1"));

        cache.rollback("p1", None);
        assert!(cache.contains("p1"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn out_of_order_snapshot_is_discarded() {
        let mut cache = logged_in();
        let (older, _) = cache.begin_fetch().unwrap();
        let (newer, _) = cache.begin_fetch().unwrap();
        assert_eq!(cache.status().fetches_in_flight, 2);

        assert!(cache.apply_fetched(newer, Snapshot::from_items([product("p2")])));
        assert!(!cache.apply_fetched(older, Snapshot::from_items([product("p1")])));

        assert!(cache.contains("p2"));
        assert!(!cache.contains("p1"));
        assert!(!cache.status().is_fetching());
    }

    #[test]
    fn snapshot_from_previous_session_is_discarded() {
        let mut cache = logged_in();
        let (ticket, _) = cache.begin_fetch().unwrap();
        cache.logout();
        cache.login(Session::new("bob", "token-b"));

        assert!(!cache.apply_fetched(ticket, Snapshot::from_items([product("p1")])));
        assert!(cache.read().is_none());
        assert_eq!(cache.status().fetches_in_flight, 0);
    }

    #[test]
    fn token_refresh_keeps_the_collection() {
        let mut cache = logged_in();
        fetched(&mut cache, &["p1"]);
        let epoch = cache.epoch();

        cache.login(Session::new("alice", "token-a2"));
        assert!(cache.is_current(epoch));
        assert!(cache.contains("p1"));
        assert_eq!(
            cache.session().map(|s| s.access_token.as_str()),
            Some("token-a2")
        );
    }

    #[test]
    fn acknowledged_overlay_lives_until_a_later_fetch() {
        let mut cache = logged_in();
        fetched(&mut cache, &[]);

        let (before_ack, _) = cache.begin_fetch().unwrap();
        cache.stage("p1", Intent::Insert(Entry::Full(product("p1"))));
        cache.acknowledge("p1");
        assert!(!cache.is_in_flight("p1"));

        // this fetch started before the server accepted the change, so it can't know about it
        assert!(cache.apply_fetched(before_ack, Snapshot::empty()));
        assert!(cache.contains("p1"));

        assert!(fetched(&mut cache, &[]));
        assert!(!cache.contains("p1"));
    }

    #[test]
    fn invalidate_keeps_pending_and_accepted_overlays() {
        let mut cache = logged_in();
        fetched(&mut cache, &[]);
        cache.stage("p1", Intent::Insert(Entry::Full(product("p1"))));
        cache.stage("p2", Intent::Insert(Entry::Full(product("p2"))));
        cache.acknowledge("p2");

        cache.invalidate();
        assert!(cache.is_stale());
        assert!(cache.needs_fetch());
        assert!(cache.contains("p1"));
        assert!(cache.contains("p2"));

        // the server never saw p2 get added after all
        assert!(fetched(&mut cache, &[]));
        assert!(!cache.is_stale());
        assert!(cache.contains("p1"));
        assert!(!cache.contains("p2"));
    }

    #[test]
    fn rollback_restores_the_replaced_change() {
        let mut cache = logged_in();
        fetched(&mut cache, &[]);
        assert!(cache.stage("p1", Intent::Insert(Entry::Full(product("p1")))).is_none());
        cache.acknowledge("p1");

        let replaced = cache.stage("p1", Intent::Remove);
        assert!(replaced.is_some());
        assert!(!cache.contains("p1"));

        cache.rollback("p1", replaced);
        assert!(cache.contains("p1"));
        assert!(!cache.is_in_flight("p1"));
    }

    #[test]
    fn rollback_skips_a_change_the_server_already_reflected() {
        let mut cache = logged_in();
        fetched(&mut cache, &[]);
        cache.stage("p1", Intent::Insert(Entry::Full(product("p1"))));
        cache.acknowledge("p1");

        let replaced = cache.stage("p1", Intent::Remove);
        // the server has since dropped p1 again, and that answer came back
        assert!(fetched(&mut cache, &[]));

        cache.rollback("p1", replaced);
        assert!(!cache.contains("p1"));
    }

    #[test]
    fn abandoned_fetch_gives_back_its_ticket() {
        let mut cache = logged_in();
        let (ticket, _) = cache.begin_fetch().unwrap();
        assert!(cache.status().is_fetching());

        cache.fetch_abandoned(ticket);
        assert!(!cache.status().is_fetching());
        assert!(cache.needs_fetch());
    }

    #[test]
    fn failed_fetch_records_error_and_marks_stale() {
        let mut cache = logged_in();
        fetched(&mut cache, &["p1"]);

        let (ticket, _) = cache.begin_fetch().unwrap();
        cache.fetch_failed(ticket, &RemoteError::Network("offline".into()));

        assert!(cache.is_stale());
        assert!(cache.contains("p1"));
        assert_eq!(
            cache.status().last_error.as_deref(),
            Some("Network error: offline")
        );
    }

    #[test]
    fn listeners_get_queued_changes() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut cache = logged_in();

        let key = cache.register_listener({
            let seen = Rc::clone(&seen);
            move |change| seen.borrow_mut().push(change.clone())
        });
        cache.stage("p1", Intent::Remove);
        cache.rollback("p1", None);
        assert!(seen.borrow().is_empty());

        for notification in cache.drain_due_notifications() {
            notification();
        }
        assert_eq!(
            *seen.borrow(),
            vec![Change::Updated, Change::RolledBack { id: "p1".into() }]
        );

        cache.unregister_listener(key);
        cache.invalidate();
        assert!(cache.drain_due_notifications().is_empty());
    }
}
