// Auth service wiring
// Decision: Everything is assembled once by the builder; the result is cheap to clone into routers
// Decision: A missing secret reader is not fatal at build time, every sign/verify fails instead

use axum::Router;
use std::sync::Arc;

use crate::{
    authorizer::{Authenticator, RoleGuard},
    avatar::AvatarSaver,
    config::AuthConfig,
    error::Result,
    handshake::HandshakeEngine,
    hooks::{BasicAuthChecker, ClaimsUpdater, Validator},
    provider::{CustomProvider, Provider, ProviderRegistry},
    refresh::RefreshCache,
    token::{SecretReader, TokenService},
};

/// Collects configuration and collaborators for an `AuthService`
pub struct AuthServiceBuilder {
    config: AuthConfig,
    secrets: Option<Arc<dyn SecretReader>>,
    providers: Vec<Provider>,
    validator: Option<Arc<dyn Validator>>,
    claims_updater: Option<Arc<dyn ClaimsUpdater>>,
    basic_checker: Option<Arc<dyn BasicAuthChecker>>,
    avatar: Option<Arc<dyn AvatarSaver>>,
    refresh_cache: Option<Arc<dyn RefreshCache>>,
}

impl AuthServiceBuilder {
    pub fn secret_reader(mut self, secrets: impl SecretReader + 'static) -> Self {
        self.secrets = Some(Arc::new(secrets));
        self
    }

    pub fn provider(mut self, provider: impl Into<Provider>) -> Self {
        self.providers.push(provider.into());
        self
    }

    pub fn custom_provider(mut self, provider: Arc<dyn CustomProvider>) -> Self {
        self.providers.push(Provider::Custom(provider));
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn claims_updater(mut self, updater: impl ClaimsUpdater + 'static) -> Self {
        self.claims_updater = Some(Arc::new(updater));
        self
    }

    pub fn basic_auth_checker(mut self, checker: impl BasicAuthChecker + 'static) -> Self {
        self.basic_checker = Some(Arc::new(checker));
        self
    }

    pub fn avatar_saver(mut self, avatar: impl AvatarSaver + 'static) -> Self {
        self.avatar = Some(Arc::new(avatar));
        self
    }

    pub fn refresh_cache(mut self, cache: impl RefreshCache + 'static) -> Self {
        self.refresh_cache = Some(Arc::new(cache));
        self
    }

    pub fn build(self) -> Result<AuthService> {
        let config = Arc::new(self.config);

        let mut tokens = match self.secrets {
            Some(secrets) => TokenService::new(config.clone(), secrets),
            None => {
                tracing::warn!("no secret reader defined, tokens can't be issued or verified");
                TokenService::without_secret(config.clone())
            }
        };
        if let Some(updater) = self.claims_updater {
            tokens = tokens.with_claims_updater(updater);
        }

        let mut registry = ProviderRegistry::new().allow_duplicates(config.allow_duplicate_providers);
        for provider in self.providers {
            registry.register(provider)?;
        }
        let registry = Arc::new(registry);

        let mut authenticator = Authenticator::new(tokens.clone(), registry.clone())
            .with_validator(self.validator.clone())
            .with_basic_checker(self.basic_checker);
        if let Some(cache) = self.refresh_cache {
            authenticator = authenticator.with_refresh_cache(cache);
        }

        let handshake = HandshakeEngine::new(tokens.clone(), registry.clone())?
            .with_validator(self.validator)
            .with_avatar_saver(self.avatar);

        tracing::info!(
            providers = ?registry.names(),
            base_path = %config.base_path,
            "auth service configured"
        );

        Ok(AuthService {
            config,
            tokens,
            registry,
            authenticator: Arc::new(authenticator),
            handshake: Arc::new(handshake),
        })
    }
}

/// Assembled auth core
#[derive(Clone)]
pub struct AuthService {
    config: Arc<AuthConfig>,
    tokens: TokenService,
    registry: Arc<ProviderRegistry>,
    authenticator: Arc<Authenticator>,
    handshake: Arc<HandshakeEngine>,
}

impl AuthService {
    pub fn builder(config: AuthConfig) -> AuthServiceBuilder {
        AuthServiceBuilder {
            config,
            secrets: None,
            providers: Vec::new(),
            validator: None,
            claims_updater: None,
            basic_checker: None,
            avatar: None,
            refresh_cache: None,
        }
    }

    /// Handshake endpoint mounted at the configured base path
    pub fn routes(&self) -> Router {
        self.handshake.clone().router()
    }

    /// State for the auth middleware functions
    pub fn authenticator(&self) -> Arc<Authenticator> {
        self.authenticator.clone()
    }

    /// State for `require_roles`
    pub fn role_guard<S: AsRef<str>>(&self, roles: &[S]) -> RoleGuard {
        RoleGuard::new(self.authenticator.clone(), roles)
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn registry(&self) -> Arc<ProviderRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::AuthError,
        provider::presets,
        token::{Claims, StaticSecret, User},
    };

    #[test]
    fn test_build_registers_providers_in_order() {
        let service = AuthService::builder(AuthConfig::default())
            .secret_reader(StaticSecret::new("s"))
            .provider(presets::github("a", "b"))
            .provider(presets::dev("http://localhost:1"))
            .build()
            .unwrap();
        assert_eq!(service.registry().names(), vec!["github", "dev"]);
    }

    #[test]
    fn test_duplicate_provider_fails_build() {
        let result = AuthService::builder(AuthConfig::default())
            .provider(presets::dev("http://a"))
            .provider(presets::dev("http://b"))
            .build();
        assert!(matches!(result, Err(AuthError::DuplicateProvider(_))));

        let result = AuthService::builder(AuthConfig {
            allow_duplicate_providers: true,
            ..Default::default()
        })
        .provider(presets::dev("http://a"))
        .provider(presets::dev("http://b"))
        .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_without_secret_cannot_mint() {
        let service = AuthService::builder(AuthConfig::default())
            .build()
            .unwrap();
        let claims = Claims::for_user(User::new("dev", "1", "x"));
        assert!(matches!(
            service.tokens().mint(claims),
            Err(AuthError::Secret(_))
        ));
    }
}
