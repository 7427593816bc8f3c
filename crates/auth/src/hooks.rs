// Caller-supplied collaborators
// Decision: Synchronous hooks accept plain closures; async ones are async_trait objects

use async_trait::async_trait;

use crate::{
    error::Result,
    token::{Claims, User},
};

/// Accepts or rejects the user carried by a verified token
pub trait Validator: Send + Sync {
    fn validate(&self, token: &str, claims: &Claims) -> bool;
}

impl<F> Validator for F
where
    F: Fn(&str, &Claims) -> bool + Send + Sync,
{
    fn validate(&self, token: &str, claims: &Claims) -> bool {
        self(token, claims)
    }
}

/// Last chance to modify claims before they are signed
pub trait ClaimsUpdater: Send + Sync {
    fn update(&self, claims: Claims) -> Claims;
}

impl<F> ClaimsUpdater for F
where
    F: Fn(Claims) -> Claims + Send + Sync,
{
    fn update(&self, claims: Claims) -> Claims {
        self(claims)
    }
}

/// Replaces the built-in admin basic auth.
///
/// `Ok(None)` means the credentials were rejected.
#[async_trait]
pub trait BasicAuthChecker: Send + Sync {
    async fn check(&self, user: &str, password: &str) -> Result<Option<User>>;
}

/// Checks login/password pairs for the direct provider
#[async_trait]
pub trait CredChecker: Send + Sync {
    async fn check(&self, user: &str, password: &str) -> Result<bool>;
}

/// Delivers confirmation messages for the verify provider
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, address: &str, text: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_validator() {
        let validator = |_token: &str, claims: &Claims| {
            claims
                .user
                .as_ref()
                .map(|u| !u.name.starts_with("blocked"))
                .unwrap_or(false)
        };
        let ok = Claims::for_user(User::new("dev", "1", "alice"));
        let blocked = Claims::for_user(User::new("dev", "2", "blocked_bob"));
        assert!(validator.validate("t", &ok));
        assert!(!validator.validate("t", &blocked));
        assert!(!validator.validate("t", &Claims::default()));
    }
}
