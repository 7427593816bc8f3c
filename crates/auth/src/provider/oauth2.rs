// OAuth2 provider: endpoints, code exchange and user-info normalization
// Decision: Manual OAuth2 over reqwest (authorization code grant only)
// Decision: Provider JSON is mapped into a User by a per-provider mapper function

use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashMap, fmt, sync::Arc};
use url::Url;

use crate::{
    error::{AuthError, Result},
    token::User,
};

/// Provider-side identity extracted from user-info JSON
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedUser {
    /// Provider-side id, hashed into the user id
    pub id: String,
    pub name: String,
    pub picture: Option<String>,
    pub email: Option<String>,
}

/// Maps raw user-info JSON into a provider identity
pub type UserMapper = Arc<dyn Fn(&Value) -> MappedUser + Send + Sync>;

/// Remote endpoints of an OAuth2 authorization server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuth2Endpoints {
    pub auth_url: String,
    pub token_url: String,
    pub user_info_url: String,
    /// RFC 7009 revocation endpoint
    pub revoke_url: Option<String>,
    pub scopes: Vec<String>,
}

/// OAuth2 identity provider
#[derive(Clone)]
pub struct OAuth2Provider {
    name: String,
    client_id: String,
    client_secret: String,
    endpoints: OAuth2Endpoints,
    mapper: UserMapper,
    /// Provider JSON field -> user attribute
    user_attributes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl OAuth2Provider {
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        endpoints: OAuth2Endpoints,
        mapper: UserMapper,
    ) -> Self {
        Self {
            name: name.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            endpoints,
            mapper,
            user_attributes: HashMap::new(),
        }
    }

    /// Copy provider JSON fields into user attributes
    pub fn with_user_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.user_attributes = attributes;
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.endpoints.scopes = scopes;
        self
    }

    pub fn with_revoke_url(mut self, url: impl Into<String>) -> Self {
        self.endpoints.revoke_url = Some(url.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> &OAuth2Endpoints {
        &self.endpoints
    }

    pub fn supports_revocation(&self) -> bool {
        self.endpoints.revoke_url.is_some()
    }

    /// URL the browser is sent to in order to start the login
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<String> {
        let scope = self.endpoints.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.endpoints.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| AuthError::config(format!("bad auth url for {}: {e}", self.name)))?;
        Ok(url.into())
    }

    /// Exchange an authorization code for a provider access token
    pub async fn exchange_code(
        &self,
        client: &reqwest::Client,
        code: &str,
        redirect_uri: &str,
    ) -> Result<String> {
        let response: TokenResponse = client
            .post(&self.endpoints.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::exchange(format!("failed to exchange code: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::exchange(format!("failed to parse token response: {e}")))?;

        Ok(response.access_token)
    }

    /// Fetch raw user-info JSON with the provider access token
    pub async fn fetch_user_info(
        &self,
        client: &reqwest::Client,
        access_token: &str,
    ) -> Result<Value> {
        client
            .get(&self.endpoints.user_info_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::exchange(format!("failed to fetch user info: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::exchange(format!("failed to parse user info: {e}")))
    }

    /// Normalize user-info JSON into a User with `<name>_<hash>` id
    pub fn map_user(&self, data: &Value) -> Result<User> {
        let mapped = (self.mapper)(data);
        if mapped.id.is_empty() {
            return Err(AuthError::exchange(format!(
                "no user id in {} user info",
                self.name
            )));
        }

        let mut user = User::new(&self.name, &mapped.id, mapped.name);
        user.picture = mapped.picture.filter(|p| !p.is_empty());
        user.email = mapped.email.filter(|e| !e.is_empty());

        for (field, attr) in &self.user_attributes {
            if let Some(value) = data.get(field) {
                user.attributes.insert(attr.clone(), value.clone());
            }
        }
        Ok(user)
    }

    /// Revoke a provider access token (RFC 7009)
    pub async fn revoke(&self, client: &reqwest::Client, access_token: &str) -> Result<()> {
        let Some(url) = &self.endpoints.revoke_url else {
            return Ok(());
        };

        client
            .post(url)
            .form(&[
                ("token", access_token),
                ("token_type_hint", "access_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::exchange(format!("failed to revoke token: {e}")))?;
        Ok(())
    }
}

impl fmt::Debug for OAuth2Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Provider")
            .field("name", &self.name)
            .field("client_id", &self.client_id)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

/// String field of a JSON object; numbers are rendered as strings
pub(crate) fn json_str(data: &Value, key: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn json_opt(data: &Value, key: &str) -> Option<String> {
    Some(json_str(data, key)).filter(|s| !s.is_empty())
}
