use optimist::{RemoteError, RemoteStore, Session};

use crate::config::ApiConfig;
use crate::item::WishlistItem;

/// Body of `POST /wishlist/toggle`.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ToggleRequest<'a> {
    product_id: &'a str,
}

/// The marketplace wishlist endpoints.
pub struct HttpWishlist {
    config: ApiConfig,
}

impl HttpWishlist {
    pub fn new(config: ApiConfig) -> Self {
        Self { config }
    }
}

fn bearer(session: &Session) -> String {
    format!("Bearer {}", session.access_token)
}

fn network_error(e: fetch_happen::Error) -> RemoteError {
    RemoteError::Network(format!("{e:?}"))
}

/// Anything outside 2xx becomes a [`RemoteError::Status`] carrying whatever the server said.
async fn check_status(
    response: fetch_happen::Response,
) -> Result<fetch_happen::Response, RemoteError> {
    if response.ok() {
        return Ok(response);
    }
    let status = response.status().to_string();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(status_error(status, body))
}

fn status_error(status: String, body: String) -> RemoteError {
    let body = body.trim();
    RemoteError::Status {
        status,
        body: if body.is_empty() {
            "Unknown error".to_string()
        } else {
            body.to_string()
        },
    }
}

impl RemoteStore for HttpWishlist {
    type Item = WishlistItem;

    async fn fetch_all(&self, session: &Session) -> Result<Vec<WishlistItem>, RemoteError> {
        let client = fetch_happen::Client;
        let response = client
            .get(self.config.url("wishlist"))
            .header("Authorization", bearer(session))
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(response).await?;

        let items: Vec<WishlistItem> = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(format!("{e:?}")))?;
        log::debug!("Fetched {} wishlist items", items.len());
        Ok(items)
    }

    async fn toggle_membership(&self, session: &Session, id: &str) -> Result<(), RemoteError> {
        let client = fetch_happen::Client;
        let response = client
            .post(self.config.url("wishlist/toggle"))
            .header("Authorization", bearer(session))
            .json(&ToggleRequest { product_id: id })
            .map_err(|e| RemoteError::Decode(format!("Failed to encode toggle request: {e:?}")))?
            .send()
            .await
            .map_err(network_error)?;
        check_status(response).await?;
        Ok(())
    }
}
