// Direct (login/password) and verification-link providers
// Decision: Neither talks to a remote authorization server; both converge on the same issue step

use std::{fmt, sync::Arc};

use crate::{
    error::{AuthError, Result},
    hooks::{CredChecker, Sender},
    token::{Claims, Handshake, User},
};

/// Maps a login name to the value hashed into the user id
pub type UserIdFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Provider checking credentials with a caller-supplied checker
#[derive(Clone)]
pub struct DirectProvider {
    name: String,
    checker: Arc<dyn CredChecker>,
    user_id_fn: Option<UserIdFn>,
}

impl DirectProvider {
    pub fn new(name: impl Into<String>, checker: Arc<dyn CredChecker>) -> Self {
        Self {
            name: name.into(),
            checker,
            user_id_fn: None,
        }
    }

    pub fn with_user_id_fn(mut self, f: UserIdFn) -> Self {
        self.user_id_fn = Some(f);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check the pair and build the user on success
    pub async fn authenticate(&self, user: &str, password: &str) -> Result<User> {
        if user.is_empty() {
            return Err(AuthError::bad_request("user is required"));
        }

        let ok = self
            .checker
            .check(user, password)
            .await
            .map_err(|e| AuthError::CredentialCheckFailed(e.to_string()))?;
        if !ok {
            return Err(AuthError::CredentialCheckFailed(format!(
                "incorrect user or password for {user}"
            )));
        }

        let id_source = match &self.user_id_fn {
            Some(f) => f(user),
            None => user.to_string(),
        };
        Ok(User::new(&self.name, &id_source, user))
    }
}

impl fmt::Debug for DirectProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectProvider")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Default confirmation message
pub const DEFAULT_TEMPLATE: &str = "Confirmation for {user} {address}, site {site}\n\nToken: {token}";

/// Separator between provider, user name and address in the confirmation payload
const ID_SEPARATOR: &str = "::";

/// Provider that proves control of an address by sending it a signed token
#[derive(Clone)]
pub struct VerifyProvider {
    name: String,
    sender: Arc<dyn Sender>,
    template: String,
}

impl VerifyProvider {
    pub fn new(name: impl Into<String>, sender: Arc<dyn Sender>) -> Self {
        Self {
            name: name.into(),
            sender,
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }

    /// Message template; `{token}`, `{user}`, `{address}` and `{site}` are substituted
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unsigned claims of the confirmation token for `user` at `address`
    pub fn confirmation_claims(
        &self,
        user: &str,
        address: &str,
        aud: &str,
        from: &str,
    ) -> Result<Claims> {
        if user.is_empty() || address.is_empty() {
            return Err(AuthError::bad_request("user and address are required"));
        }
        if user.contains(ID_SEPARATOR) {
            return Err(AuthError::bad_request("invalid user name"));
        }
        Ok(Claims {
            aud: aud.to_string(),
            handshake: Some(Handshake {
                id: format!("{}{ID_SEPARATOR}{user}{ID_SEPARATOR}{address}", self.name),
                from: from.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    pub fn render(&self, token: &str, user: &str, address: &str, site: &str) -> String {
        self.template
            .replace("{token}", token)
            .replace("{user}", user)
            .replace("{address}", address)
            .replace("{site}", site)
    }

    /// Deliver the rendered confirmation
    pub async fn send(&self, address: &str, text: &str) -> Result<()> {
        self.sender.send(address, text).await.map_err(|e| {
            tracing::error!(provider = %self.name, error = %e, "failed to send confirmation");
            AuthError::exchange(format!("failed to send confirmation: {e}"))
        })
    }

    /// User proven by a verified confirmation token issued by this provider
    pub fn confirmed_user(&self, claims: &Claims) -> Result<User> {
        let payload = claims
            .handshake
            .as_ref()
            .map(|h| h.id.as_str())
            .unwrap_or_default();
        let payload = payload
            .strip_prefix(self.name.as_str())
            .and_then(|rest| rest.strip_prefix(ID_SEPARATOR))
            .ok_or_else(|| {
                AuthError::NonceMismatch(format!(
                    "confirmation was not issued by provider {}",
                    self.name
                ))
            })?;
        let (user, address) = payload
            .split_once(ID_SEPARATOR)
            .filter(|(u, a)| !u.is_empty() && !a.is_empty())
            .ok_or_else(|| AuthError::malformed("confirmation token carries no address"))?;

        let mut confirmed = User::new(&self.name, user, user);
        confirmed.email = Some(address.to_string());
        Ok(confirmed)
    }
}

impl fmt::Debug for VerifyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyProvider")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
