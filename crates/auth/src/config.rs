// Authentication configuration
// Decision: Follow the AUTH_ prefix convention for every environment variable
// Decision: Defaults are complete; the environment overlay is a separate, pure merge step

use axum_extra::extract::cookie::SameSite;
use std::time::Duration;

use crate::error::{AuthError, Result};

/// Cookie, header and query names used by the token transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportNames {
    /// Session cookie name
    pub jwt_cookie: String,
    /// Session header name
    pub jwt_header: String,
    /// Session query parameter name
    pub jwt_query: String,
    /// Anti-forgery cookie name
    pub xsrf_cookie: String,
    /// Anti-forgery header name
    pub xsrf_header: String,
}

impl Default for TransportNames {
    fn default() -> Self {
        Self {
            jwt_cookie: "JWT".to_string(),
            jwt_header: "X-JWT".to_string(),
            jwt_query: "token".to_string(),
            xsrf_cookie: "XSRF-TOKEN".to_string(),
            xsrf_header: "X-XSRF-TOKEN".to_string(),
        }
    }
}

/// Complete authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Public root URL of the service, used to build OAuth redirect URIs
    pub url: String,
    /// Path the handshake endpoints are mounted on
    pub base_path: String,
    /// Value of the `iss` claim
    pub issuer: String,
    /// Lifetime of a session token before it becomes soft-expired
    pub token_duration: Duration,
    /// Lifetime of the session cookie; may outlive the token to allow refresh
    pub cookie_duration: Duration,
    /// Lifetime of handshake and confirmation tokens
    pub handshake_ttl: Duration,
    /// Timeout for every call to a remote provider
    pub http_timeout: Duration,
    /// Mark cookies as Secure
    pub secure_cookies: bool,
    /// SameSite attribute for both cookies
    pub same_site: SameSite,
    /// Domain attribute for both cookies
    pub cookie_domain: Option<String>,
    /// Skip anti-forgery checks (testing/debugging only)
    pub disable_xsrf: bool,
    /// Do not stamp `iat`
    pub disable_iat: bool,
    /// Send the token in the JWT header instead of cookies
    pub send_jwt_header: bool,
    /// Resolve one secret per audience instead of a global secret
    pub aud_secrets: bool,
    /// Allowed `aud` values; empty allows any
    pub allowed_audiences: Vec<String>,
    /// Cookie/header/query names
    pub names: TransportNames,
    /// Enables basic auth for user `admin` with this password
    pub admin_password: Option<String>,
    /// Allow registering the same provider name twice (first match wins)
    pub allow_duplicate_providers: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            base_path: "/auth".to_string(),
            issuer: "gatehouse".to_string(),
            token_duration: Duration::from_secs(15 * 60), // 15 minutes
            cookie_duration: Duration::from_secs(30 * 24 * 60 * 60), // 30 days
            handshake_ttl: Duration::from_secs(15 * 60),
            http_timeout: Duration::from_secs(10),
            secure_cookies: false,
            same_site: SameSite::Lax,
            cookie_domain: None,
            disable_xsrf: false,
            disable_iat: false,
            send_jwt_header: false,
            aud_secrets: false,
            allowed_audiences: Vec::new(),
            names: TransportNames::default(),
            admin_password: None,
            allow_duplicate_providers: false,
        }
    }
}

impl AuthConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overlay(|key| std::env::var(key).ok())
    }

    /// Overlay `AUTH_*` variables returned by `lookup` on top of `self`.
    ///
    /// Durations are given in seconds. Booleans accept `true/false/1/0`.
    /// Unset or empty variables leave the current value untouched.
    pub fn with_env_overlay<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AUTH_URL") {
            self.url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("AUTH_BASE_PATH") {
            self.base_path = v;
        }
        if let Some(v) = get("AUTH_ISSUER") {
            self.issuer = v;
        }
        if let Some(v) = get("AUTH_TOKEN_DURATION") {
            self.token_duration = parse_secs("AUTH_TOKEN_DURATION", &v)?;
        }
        if let Some(v) = get("AUTH_COOKIE_DURATION") {
            self.cookie_duration = parse_secs("AUTH_COOKIE_DURATION", &v)?;
        }
        if let Some(v) = get("AUTH_HANDSHAKE_TTL") {
            self.handshake_ttl = parse_secs("AUTH_HANDSHAKE_TTL", &v)?;
        }
        if let Some(v) = get("AUTH_HTTP_TIMEOUT") {
            self.http_timeout = parse_secs("AUTH_HTTP_TIMEOUT", &v)?;
        }
        if let Some(v) = get("AUTH_SECURE_COOKIES") {
            self.secure_cookies = parse_bool("AUTH_SECURE_COOKIES", &v)?;
        }
        if let Some(v) = get("AUTH_SAME_SITE") {
            self.same_site = parse_same_site(&v)?;
        }
        if let Some(v) = get("AUTH_COOKIE_DOMAIN") {
            self.cookie_domain = Some(v);
        }
        if let Some(v) = get("AUTH_DISABLE_XSRF") {
            self.disable_xsrf = parse_bool("AUTH_DISABLE_XSRF", &v)?;
        }
        if let Some(v) = get("AUTH_DISABLE_IAT") {
            self.disable_iat = parse_bool("AUTH_DISABLE_IAT", &v)?;
        }
        if let Some(v) = get("AUTH_SEND_JWT_HEADER") {
            self.send_jwt_header = parse_bool("AUTH_SEND_JWT_HEADER", &v)?;
        }
        if let Some(v) = get("AUTH_AUD_SECRETS") {
            self.aud_secrets = parse_bool("AUTH_AUD_SECRETS", &v)?;
        }
        if let Some(v) = get("AUTH_ALLOWED_AUDIENCES") {
            self.allowed_audiences = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = get("AUTH_JWT_COOKIE_NAME") {
            self.names.jwt_cookie = v;
        }
        if let Some(v) = get("AUTH_JWT_HEADER") {
            self.names.jwt_header = v;
        }
        if let Some(v) = get("AUTH_JWT_QUERY") {
            self.names.jwt_query = v;
        }
        if let Some(v) = get("AUTH_XSRF_COOKIE_NAME") {
            self.names.xsrf_cookie = v;
        }
        if let Some(v) = get("AUTH_XSRF_HEADER") {
            self.names.xsrf_header = v;
        }
        if let Some(v) = get("AUTH_ADMIN_PASSWORD") {
            self.admin_password = Some(v);
        }
        if let Some(v) = get("AUTH_ALLOW_DUPLICATE_PROVIDERS") {
            self.allow_duplicate_providers = parse_bool("AUTH_ALLOW_DUPLICATE_PROVIDERS", &v)?;
        }

        Ok(self)
    }

    /// Redirect URI registered with OAuth2 providers for `provider`
    pub fn callback_url(&self, provider: &str) -> String {
        format!(
            "{}{}?action=callback&using={}",
            self.url, self.base_path, provider
        )
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| AuthError::config(format!("{key}: expected seconds, got {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(AuthError::config(format!(
            "{key}: expected boolean, got {value:?}"
        ))),
    }
}

fn parse_same_site(value: &str) -> Result<SameSite> {
    match value.trim().to_lowercase().as_str() {
        "lax" => Ok(SameSite::Lax),
        "strict" => Ok(SameSite::Strict),
        "none" => Ok(SameSite::None),
        _ => Err(AuthError::config(format!(
            "AUTH_SAME_SITE: expected lax, strict or none, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overlay(vars: &[(&str, &str)]) -> Result<AuthConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AuthConfig::default().with_env_overlay(|k| map.get(k).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.names.jwt_cookie, "JWT");
        assert_eq!(config.names.xsrf_cookie, "XSRF-TOKEN");
        assert_eq!(config.names.jwt_header, "X-JWT");
        assert_eq!(config.names.xsrf_header, "X-XSRF-TOKEN");
        assert_eq!(config.names.jwt_query, "token");
        assert_eq!(config.base_path, "/auth");
        assert!(config.cookie_duration > config.token_duration);
        assert!(!config.disable_xsrf);
        assert!(!config.allow_duplicate_providers);
    }

    #[test]
    fn test_empty_overlay_keeps_defaults() {
        let config = overlay(&[]).unwrap();
        assert_eq!(config.issuer, "gatehouse");
        assert_eq!(config.token_duration, Duration::from_secs(900));
    }

    #[test]
    fn test_overlay_values() {
        let config = overlay(&[
            ("AUTH_URL", "https://example.com/"),
            ("AUTH_ISSUER", "my-app"),
            ("AUTH_TOKEN_DURATION", "60"),
            ("AUTH_SECURE_COOKIES", "true"),
            ("AUTH_DISABLE_XSRF", "1"),
            ("AUTH_SAME_SITE", "Strict"),
            ("AUTH_ALLOWED_AUDIENCES", "site1, site2,,"),
            ("AUTH_JWT_COOKIE_NAME", "SESSION"),
            ("AUTH_ADMIN_PASSWORD", "hunter2"),
        ])
        .unwrap();

        assert_eq!(config.url, "https://example.com");
        assert_eq!(config.issuer, "my-app");
        assert_eq!(config.token_duration, Duration::from_secs(60));
        assert!(config.secure_cookies);
        assert!(config.disable_xsrf);
        assert_eq!(config.same_site, SameSite::Strict);
        assert_eq!(config.allowed_audiences, vec!["site1", "site2"]);
        assert_eq!(config.names.jwt_cookie, "SESSION");
        assert_eq!(config.admin_password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let config = overlay(&[("AUTH_ISSUER", "  "), ("AUTH_ADMIN_PASSWORD", "")]).unwrap();
        assert_eq!(config.issuer, "gatehouse");
        assert!(config.admin_password.is_none());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            overlay(&[("AUTH_TOKEN_DURATION", "15m")]),
            Err(AuthError::Config(_))
        ));
        assert!(matches!(
            overlay(&[("AUTH_DISABLE_XSRF", "maybe")]),
            Err(AuthError::Config(_))
        ));
        assert!(matches!(
            overlay(&[("AUTH_SAME_SITE", "sometimes")]),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn test_callback_url() {
        let config = AuthConfig {
            url: "https://example.com".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.callback_url("github"),
            "https://example.com/auth?action=callback&using=github"
        );
    }
}
