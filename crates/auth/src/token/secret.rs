// Signing secret resolution
// Decision: Secrets are looked up by audience so one deployment can serve several sites

use std::collections::HashMap;

use crate::error::{AuthError, Result};

/// Returns the HMAC secret for an audience.
///
/// With audience secrets disabled the token service always asks for the empty key.
pub trait SecretReader: Send + Sync {
    fn secret(&self, aud: &str) -> Result<String>;
}

impl<F> SecretReader for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn secret(&self, aud: &str) -> Result<String> {
        self(aud)
    }
}

/// One secret for every audience
#[derive(Clone)]
pub struct StaticSecret(String);

impl StaticSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }
}

impl SecretReader for StaticSecret {
    fn secret(&self, _aud: &str) -> Result<String> {
        if self.0.is_empty() {
            return Err(AuthError::Secret("empty secret".to_string()));
        }
        Ok(self.0.clone())
    }
}

impl std::fmt::Debug for StaticSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticSecret(***)")
    }
}

/// One secret per audience, with an optional fallback for unknown audiences
#[derive(Clone, Default)]
pub struct AudienceSecrets {
    secrets: HashMap<String, String>,
    fallback: Option<String>,
}

impl AudienceSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, aud: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(aud.into(), secret.into());
        self
    }

    pub fn with_fallback(mut self, secret: impl Into<String>) -> Self {
        self.fallback = Some(secret.into());
        self
    }
}

impl SecretReader for AudienceSecrets {
    fn secret(&self, aud: &str) -> Result<String> {
        self.secrets
            .get(aud)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| AuthError::Secret(format!("no secret for audience {aud:?}")))
    }
}

/// Placeholder reader used when the service is built without secrets
pub(crate) struct MissingSecret;

impl SecretReader for MissingSecret {
    fn secret(&self, _aud: &str) -> Result<String> {
        Err(AuthError::Secret("secret reader not configured".to_string()))
    }
}
