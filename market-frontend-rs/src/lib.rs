//! Browser bindings for the marketplace wishlist.
//!
//! Wraps an [`optimist::Synchronizer`] talking to the marketplace API, so pages can ask whether a product
//! is wishlisted, toggle it with instant feedback, and get told when the answer changes.

mod config;
mod item;
mod remote;
mod utils;

use std::rc::Rc;
use std::sync::LazyLock;

use optimist::{Change, FetchOutcome, ListenerKey, Session, Synchronizer, SyncStatus, ToggleOutcome};
use wasm_bindgen::prelude::*;

pub use config::{ApiConfig, api_config};
pub use item::{WishlistEntry, WishlistItem};
pub use remote::HttpWishlist;

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
#[allow(clippy::declare_interior_mutable_const)]
const LOGGER: LazyLock<()> = LazyLock::new(|| {
    utils::set_panic_hook();

    wasm_logger::init(wasm_logger::Config::default());
    log::info!("Logging initialized");
});

#[wasm_bindgen]
pub struct Wishlist {
    sync: Rc<Synchronizer<HttpWishlist>>,
}

/// Returned by [`Wishlist::subscribe`]. Hand it back to [`Wishlist::unsubscribe`] to stop listening.
#[wasm_bindgen]
pub struct Subscription {
    key: ListenerKey,
}

#[derive(tsify::Tsify, serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct WishlistSyncStatus {
    pub logged_in: bool,
    pub loaded: bool,
    pub fetching: bool,
    #[tsify(type = "string | null")]
    pub last_synced_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

impl WishlistSyncStatus {
    fn new(logged_in: bool, loaded: bool, status: SyncStatus) -> Self {
        Self {
            logged_in,
            loaded,
            fetching: status.is_fetching(),
            last_synced_at: status.last_synced_at,
            last_error: status.last_error,
        }
    }
}

/// The name JS listeners receive for each kind of change.
fn change_kind(change: &Change) -> &'static str {
    match change {
        Change::Updated => "updated",
        Change::RolledBack { .. } => "rolledBack",
        Change::Invalidated => "invalidated",
        Change::SessionChanged => "sessionChanged",
    }
}

/// Whether a read should start a background load. A failed fetch is not retried from here; the page has to
/// call `refetch`.
fn should_auto_load(needs_fetch: bool, status: &SyncStatus) -> bool {
    needs_fetch && !status.is_fetching() && status.last_error.is_none()
}

fn describe_toggle(id: &str, outcome: &ToggleOutcome) {
    match outcome {
        ToggleOutcome::Committed { reconciled: true } => {
            log::debug!("Toggle of {id} confirmed");
        }
        ToggleOutcome::Committed { reconciled: false } => {
            log::info!("Toggle of {id} confirmed, waiting for the next fetch to reconcile");
        }
        ToggleOutcome::RolledBack { error } => {
            log::error!("Toggle of {id} was rolled back: {error}");
        }
        ToggleOutcome::Unchanged => {}
        ToggleOutcome::Abandoned => {
            log::debug!("Toggle of {id} abandoned after the session changed");
        }
    }
}

#[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
impl Wishlist {
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen(constructor))]
    pub fn new(config: Option<ApiConfig>) -> Self {
        // used to only initialize the logger once
        #[allow(clippy::borrow_interior_mutable_const)]
        *LOGGER;

        let config = config.unwrap_or_else(api_config);
        log::info!("Wishlist talking to {}", config.api_base_url);
        Self {
            sync: Rc::new(Synchronizer::new(HttpWishlist::new(config))),
        }
    }

    /// Starts a session, or refreshes the access token if this user is already logged in.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn login(&self, user_id: String, access_token: String) {
        self.sync.login(Session::new(user_id, access_token));
        self.refresh_if_stale();
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn logout(&self) {
        self.sync.logout();
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn is_member(&self, id: &str) -> bool {
        self.refresh_if_stale();
        self.sync.is_member(id)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen(getter))]
    pub fn count(&self) -> usize {
        self.refresh_if_stale();
        self.sync.count()
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn items(&self) -> Vec<WishlistEntry> {
        self.refresh_if_stale();
        self.sync
            .items()
            .into_iter()
            .map(WishlistEntry::from)
            .collect()
    }

    /// Flips membership of `id`. The change is visible immediately; the server is told in the background.
    /// Returns false if the toggle was refused (logged out, or the last toggle of this item is still pending).
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn toggle(&self, id: String, item: Option<WishlistItem>) -> bool {
        match self.sync.toggle(&id, item) {
            Ok(settlement) => {
                wasm_bindgen_futures::spawn_local(async move {
                    let outcome = settlement.await;
                    describe_toggle(&id, &outcome);
                });
                true
            }
            Err(e) => {
                log::warn!("Not toggling {id}: {e}");
                false
            }
        }
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn remove_item(&self, id: String) -> bool {
        match self.sync.remove_item(&id) {
            Ok(settlement) => {
                wasm_bindgen_futures::spawn_local(async move {
                    let outcome = settlement.await;
                    describe_toggle(&id, &outcome);
                });
                true
            }
            Err(e) => {
                log::warn!("Not removing {id}: {e}");
                false
            }
        }
    }

    /// Fetches the wishlist from the server. Resolves to whether new data was applied.
    /// Failures are logged and show up in [`Wishlist::sync_status`].
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn refetch(&self) -> bool {
        matches!(self.sync.refetch().await, FetchOutcome::Applied)
    }

    /// Fetches only if the wishlist hasn't been loaded for this session or was invalidated.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub async fn ensure_loaded(&self) -> bool {
        matches!(
            self.sync.ensure_loaded().await,
            FetchOutcome::Applied | FetchOutcome::Fresh
        )
    }

    /// `callback` is called with the kind of change (`"updated"`, `"rolledBack"`, `"invalidated"`, `"sessionChanged"`)
    /// and, for rollbacks, the id of the item that was reverted.
    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn subscribe(&self, callback: js_sys::Function) -> Subscription {
        let key = self.sync.subscribe(move |change| {
            #[cfg(target_arch = "wasm32")]
            {
                let this = JsValue::null();
                let kind = JsValue::from_str(change_kind(change));
                let id = match change {
                    Change::RolledBack { id } => JsValue::from_str(id),
                    _ => JsValue::null(),
                };
                let _ = callback.call2(&this, &kind, &id);
            }
            #[cfg(not(target_arch = "wasm32"))]
            {
                let _ = (&callback, change_kind(change));
            }
        });
        Subscription { key }
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.sync.unsubscribe(subscription.key)
    }

    #[cfg_attr(target_arch = "wasm32", wasm_bindgen)]
    pub fn sync_status(&self) -> WishlistSyncStatus {
        WishlistSyncStatus::new(
            self.sync.session().is_some(),
            self.sync.snapshot().is_some(),
            self.sync.status(),
        )
    }

    /// Kicks off a fetch when the cache has nothing trustworthy to show.
    fn refresh_if_stale(&self) {
        if !should_auto_load(self.sync.needs_fetch(), &self.sync.status()) {
            return;
        }
        let sync = Rc::clone(&self.sync);
        wasm_bindgen_futures::spawn_local(async move {
            sync.ensure_loaded().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_kinds() {
        assert_eq!(change_kind(&Change::Updated), "updated");
        assert_eq!(
            change_kind(&Change::RolledBack { id: "p1".into() }),
            "rolledBack"
        );
        assert_eq!(change_kind(&Change::Invalidated), "invalidated");
        assert_eq!(change_kind(&Change::SessionChanged), "sessionChanged");
    }

    #[test]
    fn reads_load_only_when_idle_and_healthy() {
        let idle = SyncStatus::default();
        assert!(should_auto_load(true, &idle));
        assert!(!should_auto_load(false, &idle));

        let fetching = SyncStatus {
            fetches_in_flight: 1,
            ..SyncStatus::default()
        };
        assert!(!should_auto_load(true, &fetching));

        let failed = SyncStatus {
            last_error: Some("Network error: offline".to_string()),
            ..SyncStatus::default()
        };
        assert!(!should_auto_load(true, &failed));
    }

    #[test]
    fn sync_status_view() {
        let status = SyncStatus {
            fetches_in_flight: 1,
            last_synced_at: None,
            last_error: Some("Network error: offline".to_string()),
        };
        let view = WishlistSyncStatus::new(true, false, status);
        assert!(view.fetching);
        assert!(!view.loaded);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["loggedIn"], true);
        assert_eq!(json["lastError"], "Network error: offline");
    }
}
