use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// An opaque bearer token. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(Arc<String>);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::new(token.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("AccessToken(<redacted>)")
    }
}

impl From<String> for AccessToken {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

impl From<&str> for AccessToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// The cached token for one client.
///
/// Writers overwrite unconditionally and the last store wins. Concurrent
/// refreshes may race; each caller keeps using the token it fetched itself.
#[derive(Default)]
pub struct TokenStore {
    current: ArcSwapOption<String>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Option<AccessToken> {
        self.current.load_full().map(AccessToken)
    }

    pub fn store(&self, token: AccessToken) {
        self.current.store(Some(token.0));
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TokenStore")
            .field("has_token", &!self.is_empty())
            .finish()
    }
}
