// Provider registry
// Decision: Built once at startup, then shared read-only behind Arc
// Decision: Duplicate names are rejected unless explicitly allowed (then first match wins)

use crate::error::{AuthError, Result};

use super::Provider;

/// Ordered, immutable-after-setup set of providers
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<Provider>,
    allow_duplicates: bool,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep registering same-named providers instead of failing
    pub fn allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    /// Append a provider
    pub fn register(&mut self, provider: Provider) -> Result<()> {
        let name = provider.name().to_string();
        if name.is_empty() || name.contains('_') {
            return Err(AuthError::config(format!(
                "invalid provider name {name:?}, must be non-empty without '_'"
            )));
        }
        if self.contains(&name) {
            if !self.allow_duplicates {
                return Err(AuthError::DuplicateProvider(name));
            }
            tracing::warn!(provider = %name, "provider registered twice, first one handles requests");
        }

        tracing::debug!(provider = %name, kind = provider.kind(), "provider registered");
        self.providers.push(provider);
        Ok(())
    }

    /// Builder-style `register`
    pub fn with(mut self, provider: Provider) -> Result<Self> {
        self.register(provider)?;
        Ok(self)
    }

    /// First provider registered under `name`
    pub fn resolve(&self, name: &str) -> Result<&Provider> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| AuthError::ProviderNotFound(name.to_string()))
    }

    /// First registered provider, used by logout without `using`
    pub fn first(&self) -> Option<&Provider> {
        self.providers.first()
    }

    /// Names in registration order, duplicates included
    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.iter().any(|p| p.name() == name)
    }

    /// Whether the provider prefix of `user_id` is registered
    pub fn is_allowed(&self, user_id: &str) -> bool {
        let prefix = user_id.split('_').next().unwrap_or_default();
        !prefix.is_empty() && self.contains(prefix)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Provider> {
        self.providers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::presets;

    #[test]
    fn test_register_and_resolve() {
        let registry = ProviderRegistry::new()
            .with(Provider::OAuth2(presets::github("a", "b")))
            .unwrap()
            .with(Provider::OAuth2(presets::dev("http://localhost:8084")))
            .unwrap();

        assert_eq!(registry.names(), vec!["github", "dev"]);
        assert_eq!(registry.resolve("dev").unwrap().name(), "dev");
        assert!(matches!(
            registry.resolve("google"),
            Err(AuthError::ProviderNotFound(name)) if name == "google"
        ));
        assert_eq!(registry.first().unwrap().name(), "github");
    }

    #[test]
    fn test_duplicates_rejected_by_default() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(Provider::OAuth2(presets::github("a", "b")))
            .unwrap();
        assert!(matches!(
            registry.register(Provider::OAuth2(presets::github("c", "d"))),
            Err(AuthError::DuplicateProvider(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicates_allowed_first_wins() {
        let registry = ProviderRegistry::new()
            .allow_duplicates(true)
            .with(Provider::OAuth2(presets::dev("http://first")))
            .unwrap()
            .with(Provider::OAuth2(presets::dev("http://second")))
            .unwrap();

        assert_eq!(registry.names(), vec!["dev", "dev"]);
        let Provider::OAuth2(p) = registry.resolve("dev").unwrap() else {
            panic!("expected oauth2 provider");
        };
        assert!(p.endpoints().auth_url.starts_with("http://first"));
    }

    #[test]
    fn test_invalid_names() {
        let mut registry = ProviderRegistry::new();
        let provider = presets::dev("http://x");
        let renamed = crate::provider::OAuth2Provider::new(
            "my_dev",
            "c",
            "s",
            provider.endpoints().clone(),
            std::sync::Arc::new(|_: &serde_json::Value| crate::provider::MappedUser::default()),
        );
        assert!(matches!(
            registry.register(Provider::OAuth2(renamed)),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn test_is_allowed() {
        let registry = ProviderRegistry::new()
            .with(Provider::OAuth2(presets::dev("http://x")))
            .unwrap();
        assert!(registry.is_allowed("dev_0123abc"));
        assert!(!registry.is_allowed("github_0123abc"));
        assert!(!registry.is_allowed("_0123abc"));
        assert!(!registry.is_allowed(""));
    }
}
