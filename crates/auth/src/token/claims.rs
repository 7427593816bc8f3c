// Session claims
// Decision: Temporal fields are optional so "unset" is distinguishable from zero
// Decision: The handshake marker lives in the same claims type as sessions; the authorizer rejects it

use serde::{Deserialize, Serialize};

use super::user::User;

/// In-flight OAuth/verification state carried by handshake tokens
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Handshake {
    /// OAuth `state` nonce
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    /// Where to send the browser after a successful login
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
    /// Provider-specific payload (verification: `provider::user::address`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

/// Decoded token payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iss: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aud: String,
    /// Session id; doubles as the anti-forgery token value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake: Option<Handshake>,
    /// Session cookie without max-age (dies with the browser session)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sess_only: bool,
}

impl Claims {
    /// Claims for a fresh session of `user`
    pub fn for_user(user: User) -> Self {
        Self {
            user: Some(user),
            ..Default::default()
        }
    }

    pub fn is_handshake(&self) -> bool {
        self.handshake.is_some()
    }

    pub fn with_audience(mut self, aud: impl Into<String>) -> Self {
        self.aud = aud.into();
        self
    }

    pub fn session_only(mut self, sess_only: bool) -> Self {
        self.sess_only = sess_only;
        self
    }

    /// Drop codec-managed timestamps, leaving the caller-controlled content
    pub fn without_timestamps(mut self) -> Self {
        self.iat = None;
        self.exp = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_skips_empty_fields() {
        let claims = Claims::for_user(User::new("dev", "1", "dev"));
        let json = serde_json::to_value(&claims).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("user"));
        assert!(!obj.contains_key("handshake"));
        assert!(!obj.contains_key("exp"));
        assert!(!obj.contains_key("sess_only"));
    }

    #[test]
    fn test_deserialize_minimal_payload() {
        let claims: Claims = serde_json::from_str(r#"{"exp": 10}"#).unwrap();
        assert_eq!(claims.exp, Some(10));
        assert!(claims.user.is_none());
        assert!(!claims.is_handshake());
    }

    #[test]
    fn test_handshake_marker() {
        let claims = Claims {
            handshake: Some(Handshake {
                state: "abc".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(claims.is_handshake());
        let round: Claims =
            serde_json::from_value(serde_json::to_value(&claims).unwrap()).unwrap();
        assert_eq!(round.handshake.unwrap().state, "abc");
    }
}
