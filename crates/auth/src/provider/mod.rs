// Identity providers
// Decision: Closed set of built-in kinds plus a trait object for anything custom

use async_trait::async_trait;
use axum::http::request::Parts;
use serde_json::Value;
use std::{fmt, sync::Arc};

use crate::{error::Result, token::User};

pub mod dev;
mod direct;
mod oauth2;
pub mod presets;
mod registry;

pub use dev::DevAuthServer;
pub use direct::{DirectProvider, UserIdFn, VerifyProvider, DEFAULT_TEMPLATE};
pub use oauth2::{MappedUser, OAuth2Endpoints, OAuth2Provider, UserMapper};
pub use registry::ProviderRegistry;

/// Result of a custom provider step
#[derive(Debug, Clone)]
pub enum ProviderOutcome {
    /// Login finished; a session is issued for this user
    Authenticated(User),
    /// Send the browser elsewhere (e.g. to a remote login page)
    Redirect(String),
    /// Respond with this JSON and do nothing else
    Json(Value),
}

/// User-implemented provider driven by the handshake endpoint
#[async_trait]
pub trait CustomProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn login(&self, parts: &Parts) -> Result<ProviderOutcome>;

    async fn callback(&self, parts: &Parts) -> Result<ProviderOutcome>;

    async fn logout(&self, _parts: &Parts) -> Result<()> {
        Ok(())
    }
}

/// A registered provider
#[derive(Clone)]
pub enum Provider {
    OAuth2(OAuth2Provider),
    Direct(DirectProvider),
    Verify(VerifyProvider),
    Custom(Arc<dyn CustomProvider>),
}

impl Provider {
    pub fn name(&self) -> &str {
        match self {
            Provider::OAuth2(p) => p.name(),
            Provider::Direct(p) => p.name(),
            Provider::Verify(p) => p.name(),
            Provider::Custom(p) => p.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Provider::OAuth2(_) => "oauth2",
            Provider::Direct(_) => "direct",
            Provider::Verify(_) => "verify",
            Provider::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OAuth2(p) => p.fmt(f),
            Provider::Direct(p) => p.fmt(f),
            Provider::Verify(p) => p.fmt(f),
            Provider::Custom(p) => f.debug_tuple("Custom").field(&p.name()).finish(),
        }
    }
}

impl From<OAuth2Provider> for Provider {
    fn from(p: OAuth2Provider) -> Self {
        Provider::OAuth2(p)
    }
}

impl From<DirectProvider> for Provider {
    fn from(p: DirectProvider) -> Self {
        Provider::Direct(p)
    }
}

impl From<VerifyProvider> for Provider {
    fn from(p: VerifyProvider) -> Self {
        Provider::Verify(p)
    }
}
