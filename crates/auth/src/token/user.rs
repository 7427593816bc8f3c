// User identity embedded in session claims
// Decision: User id is "<provider>_<hash>" so revoking a provider invalidates its users
// Decision: Provider-side ids are hashed with SHA-256 (hex) unless already hashed

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

const ADMIN_ATTR: &str = "admin";

/// Authenticated user, as carried in the `user` claim
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct User {
    /// `<providerName>_<opaqueHash>`
    pub id: String,
    /// Display name
    pub name: String,
    /// Picture URL, replaced with a proxied avatar URL after login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Value>,
}

impl User {
    /// Create a user for `provider` from the provider-side id
    pub fn new(provider: &str, provider_user_id: &str, name: impl Into<String>) -> Self {
        Self {
            id: format!("{}_{}", provider, hash_id(provider_user_id)),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Provider name encoded in the id (text before the first `_`)
    pub fn provider(&self) -> &str {
        self.id.split('_').next().unwrap_or_default()
    }

    pub fn is_admin(&self) -> bool {
        self.bool_attr(ADMIN_ATTR)
    }

    pub fn set_admin(&mut self, admin: bool) {
        self.set_bool_attr(ADMIN_ATTR, admin);
    }

    /// Case-insensitive match of the user's role against `roles`
    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles
            .iter()
            .any(|role| role.as_ref().eq_ignore_ascii_case(&self.role))
    }

    /// Boolean attribute; missing or non-boolean values read as false
    pub fn bool_attr(&self, key: &str) -> bool {
        self.attributes
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// String attribute; missing or non-string values read as empty
    pub fn str_attr(&self, key: &str) -> &str {
        self.attributes
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn set_bool_attr(&mut self, key: &str, value: bool) {
        self.attributes.insert(key.to_string(), Value::Bool(value));
    }

    pub fn set_str_attr(&mut self, key: &str, value: impl Into<String>) {
        self.attributes
            .insert(key.to_string(), Value::String(value.into()));
    }

    pub fn set_slice_attr(&mut self, key: &str, values: &[String]) {
        let list = values.iter().cloned().map(Value::String).collect();
        self.attributes.insert(key.to_string(), Value::Array(list));
    }

    /// List attribute; non-string elements are skipped
    pub fn slice_attr(&self, key: &str) -> Vec<String> {
        self.attributes
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Hash a provider-side id into the opaque part of a user id.
///
/// Values that already look like a SHA-256 hex digest are returned as is,
/// so re-hashing an id is a no-op.
pub fn hash_id(value: &str) -> String {
    if value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit()) {
        return value.to_string();
    }
    hex::encode(Sha256::digest(value.as_bytes()))
}
