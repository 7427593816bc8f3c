// Request authorization pipeline and axum glue
// Decision: One pipeline, four modes; admin and role checks run required mode first
// Decision: Failures that imply a stale or compromised credential clear the session cookies
// Decision: The admin password is compared through SHA-256 digests so timing does not depend on length

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::FutureExt;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::{convert::Infallible, sync::Arc};
use subtle::ConstantTimeEq;

use crate::{
    error::AuthError,
    hooks::{BasicAuthChecker, Validator},
    provider::ProviderRegistry,
    refresh::{RefreshCache, RefreshFuture, RefreshedToken, Uncached},
    token::{TokenService, TokenWrite, User},
};

const ADMIN_USER: &str = "admin";

/// How a route treats unauthenticated requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Reject anything without a valid identity
    Required,
    /// Attach the identity when there is one, never reject
    Optional,
    /// Required, and the user must carry the admin flag
    AdminOnly,
    /// Required, and the user's role must be one of these (case-insensitive)
    Roles(Vec<String>),
}

/// Identity accepted for a request
#[derive(Debug, Clone)]
pub struct Authorized {
    pub user: User,
    /// Refreshed cookies to put on the response
    pub write: TokenWrite,
}

/// Request allowed through by `authorize`
#[derive(Debug, Clone)]
pub enum Access {
    /// Identity established
    Granted(Authorized),
    /// Optional mode without identity; `write` drops a rejected session
    Anonymous(TokenWrite),
}

impl Access {
    pub fn user(&self) -> Option<&User> {
        match self {
            Access::Granted(authorized) => Some(&authorized.user),
            Access::Anonymous(_) => None,
        }
    }

    /// Cookies to put on the downstream response
    pub fn write(&self) -> &TokenWrite {
        match self {
            Access::Granted(authorized) => &authorized.write,
            Access::Anonymous(write) => write,
        }
    }
}

/// Unauthorized outcome, with cookie removals when the session must be dropped
#[derive(Debug)]
pub struct Unauthorized {
    pub error: AuthError,
    pub write: TokenWrite,
}

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            self.write,
            Json(json!({ "message": "Unauthorized." })),
        )
            .into_response()
    }
}

/// Runs the authorization pipeline
#[derive(Clone)]
pub struct Authenticator {
    tokens: TokenService,
    registry: Arc<ProviderRegistry>,
    validator: Option<Arc<dyn Validator>>,
    basic_checker: Option<Arc<dyn BasicAuthChecker>>,
    refresh_cache: Arc<dyn RefreshCache>,
}

impl Authenticator {
    pub fn new(tokens: TokenService, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            tokens,
            registry,
            validator: None,
            basic_checker: None,
            refresh_cache: Arc::new(Uncached),
        }
    }

    pub fn with_validator(mut self, validator: Option<Arc<dyn Validator>>) -> Self {
        self.validator = validator;
        self
    }

    /// Custom basic-auth checker; takes precedence over the admin password
    pub fn with_basic_checker(mut self, checker: Option<Arc<dyn BasicAuthChecker>>) -> Self {
        self.basic_checker = checker;
        self
    }

    pub fn with_refresh_cache(mut self, cache: Arc<dyn RefreshCache>) -> Self {
        self.refresh_cache = cache;
        self
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Apply `mode` to a request.
    ///
    /// Optional mode never fails; a rejected session still yields its clearing cookies.
    pub async fn authorize(&self, mode: &AuthMode, parts: &Parts) -> Result<Access, Unauthorized> {
        let result = self.authenticate(parts).await;

        let authorized = match (mode, result) {
            (AuthMode::Optional, Ok(authorized)) => return Ok(Access::Granted(authorized)),
            (AuthMode::Optional, Err(rejected)) => {
                tracing::trace!(error = %rejected.error, "optional auth without identity");
                return Ok(Access::Anonymous(rejected.write));
            }
            (_, Err(rejected)) => return Err(rejected),
            (_, Ok(authorized)) => authorized,
        };

        let allowed = match mode {
            AuthMode::AdminOnly => authorized.user.is_admin(),
            AuthMode::Roles(roles) => authorized.user.has_any_role(roles),
            AuthMode::Required | AuthMode::Optional => true,
        };
        if !allowed {
            tracing::debug!(user_id = %authorized.user.id, ?mode, "access denied");
            return Err(Unauthorized {
                error: AuthError::AccessDenied(authorized.user.id),
                write: TokenWrite::new(),
            });
        }
        Ok(Access::Granted(authorized))
    }

    /// Identify the caller: basic auth, then the session token
    pub async fn authenticate(&self, parts: &Parts) -> Result<Authorized, Unauthorized> {
        let basic = basic_credentials(parts);

        if let (Some((user, password)), None) = (&basic, &self.basic_checker) {
            if let Some(admin) = self.admin_user(user, password) {
                return Ok(Authorized {
                    user: admin,
                    write: TokenWrite::new(),
                });
            }
        }

        if let (Some((user, password)), Some(checker)) = (&basic, &self.basic_checker) {
            return match checker.check(user, password).await {
                Ok(Some(user)) => Ok(Authorized {
                    user,
                    write: TokenWrite::new(),
                }),
                Ok(None) => Err(self.reject(AuthError::CredentialCheckFailed(format!(
                    "basic auth rejected for {user}"
                )))),
                Err(e) => Err(self.reject(AuthError::CredentialCheckFailed(e.to_string()))),
            };
        }

        self.from_token(parts).await.map_err(|e| self.reject(e))
    }

    async fn from_token(&self, parts: &Parts) -> crate::error::Result<Authorized> {
        let (mut claims, raw) = self.tokens.extract(parts)?;

        if claims.is_handshake() {
            return Err(AuthError::HandshakeTokenRejected);
        }
        let user = claims.user.as_ref().ok_or(AuthError::NoUserInClaim)?;

        if let Some(validator) = &self.validator {
            if !validator.validate(&raw, &claims) {
                return Err(AuthError::ValidatorRejected(user.id.clone()));
            }
        }

        if !self.registry.is_allowed(&user.id) {
            return Err(AuthError::ProviderNotAllowed(user.id.clone()));
        }

        let mut write = TokenWrite::new();
        if self.tokens.is_soft_expired(&claims) {
            let refreshed = self
                .refresh_cache
                .get_or_refresh(&raw, self.refresh_job(&claims))
                .await?;
            tracing::debug!(user_id = %user.id, "session token refreshed");
            write = self.tokens.write(&refreshed.token, &refreshed.claims);
            claims = refreshed.claims;
        }

        let user = claims.user.ok_or(AuthError::NoUserInClaim)?;
        Ok(Authorized { user, write })
    }

    fn refresh_job(&self, claims: &crate::token::Claims) -> RefreshFuture {
        let tokens = self.tokens.clone();
        let claims = claims.clone();
        async move {
            let (claims, token) = tokens.refresh(&claims)?;
            Ok::<_, AuthError>(RefreshedToken { claims, token })
        }
        .boxed()
    }

    fn admin_user(&self, user: &str, password: &str) -> Option<User> {
        let expected = self.tokens.config().admin_password.as_deref()?;
        let given = Sha256::digest(password.as_bytes());
        let wanted = Sha256::digest(expected.as_bytes());
        if user == ADMIN_USER && bool::from(given.as_slice().ct_eq(wanted.as_slice())) {
            let mut admin = User {
                id: ADMIN_USER.to_string(),
                name: ADMIN_USER.to_string(),
                ..Default::default()
            };
            admin.set_admin(true);
            return Some(admin);
        }
        tracing::warn!(user = %user, "admin basic auth rejected");
        None
    }

    fn reject(&self, error: AuthError) -> Unauthorized {
        let write = if error.clears_session() {
            self.tokens.clear()
        } else {
            TokenWrite::new()
        };
        tracing::debug!(error = %error, "request not authorized");
        Unauthorized { error, write }
    }
}

/// `Authorization: Basic` user and password
fn basic_credentials(parts: &Parts) -> Option<(String, String)> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Role requirement carried as middleware state
#[derive(Clone)]
pub struct RoleGuard {
    auth: Arc<Authenticator>,
    roles: Vec<String>,
}

impl RoleGuard {
    pub fn new<S: AsRef<str>>(auth: Arc<Authenticator>, roles: &[S]) -> Self {
        Self {
            auth,
            roles: roles.iter().map(|r| r.as_ref().to_string()).collect(),
        }
    }
}

async fn run(auth: &Authenticator, mode: AuthMode, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    let write = match auth.authorize(&mode, &parts).await {
        Ok(Access::Granted(authorized)) => {
            parts.extensions.insert(authorized.user);
            authorized.write
        }
        Ok(Access::Anonymous(write)) => write,
        Err(rejected) => return rejected.into_response(),
    };
    let mut response = next.run(Request::from_parts(parts, body)).await;
    write.apply(response.headers_mut());
    response
}

/// Middleware: reject requests without a valid identity
pub async fn require_auth(
    State(auth): State<Arc<Authenticator>>,
    request: Request,
    next: Next,
) -> Response {
    run(&auth, AuthMode::Required, request, next).await
}

/// Middleware: attach the identity when present, never reject
pub async fn trace_auth(
    State(auth): State<Arc<Authenticator>>,
    request: Request,
    next: Next,
) -> Response {
    run(&auth, AuthMode::Optional, request, next).await
}

/// Middleware: only users with the admin flag
pub async fn admin_only(
    State(auth): State<Arc<Authenticator>>,
    request: Request,
    next: Next,
) -> Response {
    run(&auth, AuthMode::AdminOnly, request, next).await
}

/// Middleware: only users with one of the guard's roles
pub async fn require_roles(State(guard): State<RoleGuard>, request: Request, next: Next) -> Response {
    run(&guard.auth, AuthMode::Roles(guard.roles.clone()), request, next).await
}

/// Extractor for the user attached by the auth middleware
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<User>()
            .cloned()
            .map(CurrentUser)
            .ok_or(Unauthorized {
                error: AuthError::TokenMissing,
                write: TokenWrite::new(),
            })
    }
}

/// Optional user extractor - None when the request is anonymous
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<User>().cloned()))
    }
}
