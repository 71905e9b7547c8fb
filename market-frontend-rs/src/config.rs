/// Where the marketplace API lives.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ApiConfig {
    pub api_base_url: String,
}

// same-origin, behind the site's reverse proxy
const DEFAULT_API_URL: &str = "/api";

impl ApiConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        let api_base_url: String = api_base_url.into();
        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url, path.trim_start_matches('/'))
    }
}

/// The API location baked in at build time. `MARKETPLACE_API_URL` overrides the default,
/// and the `local-backend` feature points at a backend running on this machine.
pub fn api_config() -> ApiConfig {
    if cfg!(feature = "local-backend") {
        ApiConfig::new("http://localhost:8080")
    } else {
        ApiConfig::new(option_env!("MARKETPLACE_API_URL").unwrap_or(DEFAULT_API_URL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_joined_with_a_single_slash() {
        let config = ApiConfig::new("https://shop.test/api/");
        assert_eq!(config.api_base_url, "https://shop.test/api");
        assert_eq!(config.url("/wishlist"), "https://shop.test/api/wishlist");
        assert_eq!(
            config.url("wishlist/toggle"),
            "https://shop.test/api/wishlist/toggle"
        );
    }

    #[test]
    fn relative_base_is_kept() {
        assert_eq!(ApiConfig::new("/api").url("wishlist"), "/api/wishlist");
    }
}
