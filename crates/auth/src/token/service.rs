// Token codec and transport
// Decision: HS256 with a secret resolved per audience (or one global secret)
// Decision: `exp` is not enforced on decode; expiry is a soft signal handled by refresh
// Decision: XSRF is checked for unsafe methods only when the token came from the cookie

use axum::http::{request::Parts, HeaderName, HeaderValue, Method};
use axum_extra::extract::cookie::Cookie;
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::Rng;
use std::{collections::HashSet, sync::Arc, time::Duration};
use subtle::ConstantTimeEq;

use super::{
    claims::Claims,
    secret::{MissingSecret, SecretReader},
    transport::{cookie_value, find_token, header_value, TokenSource, TokenWrite},
};
use crate::{
    config::AuthConfig,
    error::{AuthError, Result},
    hooks::ClaimsUpdater,
};

/// Generate a random identifier string (32 hex characters)
pub(crate) fn generate_random_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

/// Signs, verifies and transports session tokens
#[derive(Clone)]
pub struct TokenService {
    config: Arc<AuthConfig>,
    secrets: Arc<dyn SecretReader>,
    claims_updater: Option<Arc<dyn ClaimsUpdater>>,
}

impl TokenService {
    pub fn new(config: Arc<AuthConfig>, secrets: Arc<dyn SecretReader>) -> Self {
        Self {
            config,
            secrets,
            claims_updater: None,
        }
    }

    /// Service that fails every sign/verify; used before a secret is configured
    pub(crate) fn without_secret(config: Arc<AuthConfig>) -> Self {
        Self::new(config, Arc::new(MissingSecret))
    }

    pub fn with_claims_updater(mut self, updater: Arc<dyn ClaimsUpdater>) -> Self {
        self.claims_updater = Some(updater);
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Mint a token and produce the transport writes for it
    pub fn issue(&self, claims: Claims) -> Result<(Claims, TokenWrite)> {
        let (claims, token) = self.mint(claims)?;
        let write = self.write(&token, &claims);
        Ok((claims, write))
    }

    /// Stamp codec-managed fields and sign with the default session lifetime
    pub fn mint(&self, claims: Claims) -> Result<(Claims, String)> {
        self.mint_for(claims, self.config.token_duration)
    }

    /// Stamp codec-managed fields and sign; `exp` is set to `now + ttl` when unset
    pub fn mint_for(&self, mut claims: Claims, ttl: Duration) -> Result<(Claims, String)> {
        let now = Utc::now().timestamp();
        if !self.config.disable_iat {
            claims.iat = Some(now);
        }
        if claims.exp.is_none() {
            claims.exp = Some(now.saturating_add(whole_seconds(ttl)));
        }
        claims.iss = self.config.issuer.clone();
        if claims.jti.is_empty() {
            claims.jti = generate_random_id();
        }
        if let Some(updater) = &self.claims_updater {
            claims = updater.update(claims);
        }

        let secret = self.secrets.secret(self.secret_key(&claims.aud))?;
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| AuthError::malformed(format!("can't sign token: {e}")))?;

        Ok((claims, token))
    }

    /// Refresh: reset expiry and re-sign, keeping `jti` so the XSRF pair stays valid
    pub fn refresh(&self, claims: &Claims) -> Result<(Claims, String)> {
        self.mint(claims.clone().without_timestamps())
    }

    /// Transport writes for an already minted token
    pub fn write(&self, token: &str, claims: &Claims) -> TokenWrite {
        let mut write = TokenWrite::new();

        if self.config.send_jwt_header {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(self.config.names.jwt_header.as_str()),
                HeaderValue::from_str(token),
            ) {
                write.push_header(name, value);
            }
            return write;
        }

        let max_age = (!claims.sess_only).then_some(self.config.cookie_duration);
        write.push_cookie(self.cookie(&self.config.names.jwt_cookie, token, true, max_age));
        write.push_cookie(self.cookie(
            &self.config.names.xsrf_cookie,
            &claims.jti,
            false,
            max_age,
        ));
        write
    }

    /// Removal cookies for the session pair
    pub fn clear(&self) -> TokenWrite {
        let mut write = TokenWrite::new();
        for (name, http_only) in [
            (&self.config.names.jwt_cookie, true),
            (&self.config.names.xsrf_cookie, false),
        ] {
            let mut cookie = self.cookie(name, "", http_only, Some(Duration::ZERO));
            cookie.set_expires(time::OffsetDateTime::UNIX_EPOCH);
            write.push_cookie(cookie);
        }
        write
    }

    /// Verify a raw token string: signature, structure, `nbf` and audience
    pub fn parse(&self, token: &str) -> Result<Claims> {
        let aud = if self.config.aud_secrets {
            peek_audience(token)?
        } else {
            String::new()
        };
        let secret = self.secrets.secret(self.secret_key(&aud))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::new();

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
            _ => AuthError::malformed(e.to_string()),
        })?;

        self.check_audience(&data.claims.aud)?;
        Ok(data.claims)
    }

    /// Find, verify and XSRF-check the token carried by a request
    pub fn extract(&self, parts: &Parts) -> Result<(Claims, String)> {
        let (token, source) =
            find_token(parts, &self.config.names).ok_or(AuthError::TokenMissing)?;
        let claims = self.parse(&token)?;

        if source == TokenSource::Cookie && !self.config.disable_xsrf && is_unsafe(&parts.method)
        {
            self.check_xsrf(parts)?;
        }

        Ok((claims, token))
    }

    /// Expiry has passed; the token is still trusted but should be refreshed
    pub fn is_soft_expired(&self, claims: &Claims) -> bool {
        claims
            .exp
            .map(|exp| exp < Utc::now().timestamp())
            .unwrap_or(false)
    }

    fn check_xsrf(&self, parts: &Parts) -> Result<()> {
        let header = header_value(&parts.headers, &self.config.names.xsrf_header)
            .ok_or(AuthError::XsrfMismatch)?;
        let cookie = cookie_value(&parts.headers, &self.config.names.xsrf_cookie)
            .ok_or(AuthError::XsrfMismatch)?;
        if bool::from(header.as_bytes().ct_eq(cookie.as_bytes())) {
            Ok(())
        } else {
            Err(AuthError::XsrfMismatch)
        }
    }

    fn check_audience(&self, aud: &str) -> Result<()> {
        if self.config.allowed_audiences.is_empty()
            || self.config.allowed_audiences.iter().any(|a| a == aud)
        {
            return Ok(());
        }
        Err(AuthError::AudienceRejected(aud.to_string()))
    }

    fn secret_key<'a>(&self, aud: &'a str) -> &'a str {
        if self.config.aud_secrets {
            aud
        } else {
            ""
        }
    }

    fn cookie(
        &self,
        name: &str,
        value: &str,
        http_only: bool,
        max_age: Option<Duration>,
    ) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_string(), value.to_string()))
            .path("/")
            .http_only(http_only)
            .secure(self.config.secure_cookies)
            .same_site(self.config.same_site);
        if let Some(domain) = &self.config.cookie_domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(age) = max_age {
            builder = builder.max_age(time::Duration::seconds(whole_seconds(age)));
        }
        builder.build()
    }
}

/// Seconds in `d`, saturating at `i64::MAX`
fn whole_seconds(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.config.issuer)
            .field("aud_secrets", &self.config.aud_secrets)
            .finish_non_exhaustive()
    }
}

fn is_unsafe(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Read `aud` without verifying the signature; only used to pick the secret
fn peek_audience(token: &str) -> Result<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.aud)
        .map_err(|e| AuthError::malformed(e.to_string()))
}
