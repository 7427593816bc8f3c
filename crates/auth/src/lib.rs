// Gatehouse authentication core
//
// Signed session tokens carried in cookies, multi-provider login handshakes
// and request authorization for axum services.

pub mod authorizer;
pub mod avatar;
pub mod config;
pub mod error;
pub mod handshake;
pub mod hooks;
pub mod provider;
pub mod refresh;
pub mod service;
pub mod token;

pub use authorizer::{
    admin_only, require_auth, require_roles, trace_auth, Access, AuthMode, Authenticator,
    Authorized, CurrentUser, MaybeUser, RoleGuard, Unauthorized,
};
pub use avatar::AvatarSaver;
pub use config::{AuthConfig, TransportNames};
pub use error::{AuthError, Result};
pub use handshake::{HandshakeEngine, HandshakeError};
pub use hooks::{BasicAuthChecker, ClaimsUpdater, CredChecker, Sender, Validator};
pub use provider::{
    CustomProvider, DevAuthServer, DirectProvider, OAuth2Endpoints, OAuth2Provider, Provider,
    ProviderOutcome, ProviderRegistry, VerifyProvider,
};
pub use refresh::{MokaRefreshCache, RefreshCache, RefreshedToken, Uncached};
pub use service::{AuthService, AuthServiceBuilder};
pub use token::{
    AudienceSecrets, Claims, Handshake, SecretReader, StaticSecret, TokenService, TokenWrite, User,
};
