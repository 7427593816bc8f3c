// Server configuration
// Decision: Provider credentials come from AUTH_<NAME>_CLIENT_ID / AUTH_<NAME>_CLIENT_SECRET pairs
// Decision: A preset is enabled only when both halves of its pair are set

use anyhow::{bail, Context, Result};
use gatehouse_auth::provider::presets::PRESET_NAMES;
use gatehouse_auth::AuthConfig;
use std::time::Duration;

/// Credentials for one preset OAuth2 provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (SERVER_ADDR)
    pub addr: String,
    /// HMAC secret for session tokens (AUTH_SECRET)
    pub secret: String,
    pub auth: AuthConfig,
    pub providers: Vec<ProviderCredentials>,
    /// Start the local OAuth2 dev server on this address (AUTH_DEV_PROVIDER_ADDR)
    pub dev_provider: Option<String>,
    /// How long a refreshed token is served to repeated refreshes of the same token
    pub refresh_cache_ttl: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup("AUTH_SECRET")
            .filter(|s| !s.is_empty())
            .context("AUTH_SECRET environment variable required")?;

        let auth = AuthConfig::default()
            .with_env_overlay(&lookup)
            .context("invalid auth configuration")?;

        let providers = PRESET_NAMES
            .iter()
            .filter_map(|name| {
                let prefix = format!("AUTH_{}", name.to_uppercase());
                let client_id = lookup(&format!("{prefix}_CLIENT_ID"))?;
                let client_secret = lookup(&format!("{prefix}_CLIENT_SECRET"))?;
                Some(ProviderCredentials {
                    name: name.to_string(),
                    client_id,
                    client_secret,
                })
            })
            .collect();

        let dev_provider = match lookup("AUTH_DEV_PROVIDER").as_deref() {
            Some("1") | Some("true") => Some(
                lookup("AUTH_DEV_PROVIDER_ADDR").unwrap_or_else(|| "127.0.0.1:8084".to_string()),
            ),
            Some("0") | Some("false") | Some("") | None => None,
            Some(other) => bail!("AUTH_DEV_PROVIDER must be true or false, got {other:?}"),
        };

        let refresh_cache_ttl = match lookup("AUTH_REFRESH_CACHE_TTL") {
            Some(v) => Duration::from_secs(
                v.trim()
                    .parse()
                    .with_context(|| format!("AUTH_REFRESH_CACHE_TTL is not a number: {v:?}"))?,
            ),
            None => Duration::from_secs(30),
        };

        Ok(Self {
            addr: lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            secret,
            auth,
            providers,
            dev_provider,
            refresh_cache_ttl,
        })
    }
}
