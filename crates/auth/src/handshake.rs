// Handshake endpoint: login, callback, logout and session queries
// Decision: One route at the base path, dispatched on the `action` and `using` query values
// Decision: OAuth state travels in a short-lived signed handshake token stored in the session cookie
// Decision: Failures are reported with the provider name and never retried

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use moka::future::Cache;
use rand::Rng;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};
use subtle::ConstantTimeEq;
use url::Url;

use crate::{
    avatar::{proxy_picture, AvatarSaver},
    error::{AuthError, Result},
    hooks::Validator,
    provider::{
        CustomProvider, DirectProvider, OAuth2Provider, Provider, ProviderOutcome,
        ProviderRegistry, VerifyProvider,
    },
    token::{query_value, Claims, Handshake, TokenService, TokenWrite, User},
};

/// Largest accepted direct-login body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Sessions whose provider access token is kept for revocation
const PROVIDER_TOKEN_CAPACITY: u64 = 10_000;

/// Upper bound on how long a provider access token is kept
const MAX_PROVIDER_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Generate a 160-bit OAuth state nonce (40 hex characters)
fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 20] = rng.gen();
    hex::encode(bytes)
}

/// Handshake failure tagged with the provider it came from
#[derive(Debug)]
pub struct HandshakeError {
    pub provider: String,
    pub error: AuthError,
}

impl HandshakeError {
    fn new(provider: &str, error: AuthError) -> Self {
        Self {
            provider: provider.to_string(),
            error,
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        match &self.error {
            AuthError::ExchangeFailed(_) | AuthError::Internal(_) | AuthError::Secret(_) => {
                tracing::error!(provider = %self.provider, error = %self.error, "handshake failed")
            }
            _ => tracing::warn!(provider = %self.provider, error = %self.error, "handshake rejected"),
        }
        (
            status,
            Json(json!({ "error": self.error.to_string(), "provider": self.provider })),
        )
            .into_response()
    }
}

/// Values carried from login to the issued session
#[derive(Debug, Clone, Default)]
struct LoginContext {
    aud: String,
    from: String,
    sess_only: bool,
}

impl LoginContext {
    fn from_params(params: &HashMap<String, String>) -> Self {
        let get = |key: &str| params.get(key).cloned().unwrap_or_default();
        let aud = params
            .get("aud")
            .or_else(|| params.get("site"))
            .cloned()
            .unwrap_or_default();
        Self {
            aud,
            from: get("from"),
            sess_only: matches!(get("session").as_str(), "1" | "true"),
        }
    }

    fn from_handshake(claims: &Claims) -> Self {
        Self {
            aud: claims.aud.clone(),
            from: claims
                .handshake
                .as_ref()
                .map(|h| h.from.clone())
                .unwrap_or_default(),
            sess_only: claims.sess_only,
        }
    }
}

/// Drives provider handshakes and answers session queries
pub struct HandshakeEngine {
    tokens: TokenService,
    registry: Arc<ProviderRegistry>,
    client: reqwest::Client,
    validator: Option<Arc<dyn Validator>>,
    avatar: Option<Arc<dyn AvatarSaver>>,
    /// session jti -> provider access token, kept for revocation on logout
    provider_tokens: Cache<String, String>,
}

impl HandshakeEngine {
    pub fn new(tokens: TokenService, registry: Arc<ProviderRegistry>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(tokens.config().http_timeout)
            .user_agent(concat!("gatehouse/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::config(format!("can't build http client: {e}")))?;
        let provider_tokens = Cache::builder()
            .max_capacity(PROVIDER_TOKEN_CAPACITY)
            .time_to_live(tokens.config().cookie_duration.min(MAX_PROVIDER_TOKEN_TTL))
            .build();

        Ok(Self {
            tokens,
            registry,
            client,
            validator: None,
            avatar: None,
            provider_tokens,
        })
    }

    pub fn with_validator(mut self, validator: Option<Arc<dyn Validator>>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_avatar_saver(mut self, avatar: Option<Arc<dyn AvatarSaver>>) -> Self {
        self.avatar = avatar;
        self
    }

    /// Router serving the handshake endpoint at the configured base path
    pub fn router(self: Arc<Self>) -> Router {
        let path = self.tokens.config().base_path.clone();
        Router::new()
            .route(&path, get(handle).post(handle))
            .with_state(self)
    }

    /// Dispatch one handshake request
    pub async fn dispatch(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let action = query_value(&parts, "action").unwrap_or_else(|| "login".to_string());

        match action.as_str() {
            "list" => Json(json!({ "providers": self.registry.names() })).into_response(),
            "user" => self.current_user(&parts),
            "status" => self.status(&parts),
            "logout" => self.logout(&parts).await,
            "login" | "callback" => {
                let Some(name) = query_value(&parts, "using") else {
                    return HandshakeError::new("", AuthError::bad_request("missing using"))
                        .into_response();
                };
                let provider = match self.registry.resolve(&name) {
                    Ok(p) => p,
                    Err(e) => return HandshakeError::new(&name, e).into_response(),
                };
                let result = if action == "login" {
                    self.login(provider, &parts, body).await
                } else {
                    self.callback(provider, &parts).await
                };
                result
                    .map_err(|e| HandshakeError::new(&name, e))
                    .into_response()
            }
            other => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("invalid action {other:?}") })),
            )
                .into_response(),
        }
    }

    async fn login(&self, provider: &Provider, parts: &Parts, body: Body) -> Result<Response> {
        match provider {
            Provider::OAuth2(p) => self.oauth2_login(p, parts),
            Provider::Direct(p) => self.direct_login(p, parts, body).await,
            Provider::Verify(p) => self.verify_login(p, parts).await,
            Provider::Custom(p) => {
                let outcome = p.login(parts).await?;
                self.custom_outcome(p.as_ref(), parts, outcome).await
            }
        }
    }

    async fn callback(&self, provider: &Provider, parts: &Parts) -> Result<Response> {
        match provider {
            Provider::OAuth2(p) => self.oauth2_callback(p, parts).await,
            Provider::Custom(p) => {
                let outcome = p.callback(parts).await?;
                self.custom_outcome(p.as_ref(), parts, outcome).await
            }
            Provider::Direct(_) | Provider::Verify(_) => Err(AuthError::bad_request(format!(
                "provider {} has no callback",
                provider.name()
            ))),
        }
    }

    fn oauth2_login(&self, provider: &OAuth2Provider, parts: &Parts) -> Result<Response> {
        let ctx = LoginContext::from_params(&query_params(parts));
        let state = generate_state();
        let from = self.safe_redirect(&ctx.from).unwrap_or_default();

        let claims = Claims {
            aud: ctx.aud,
            sess_only: ctx.sess_only,
            handshake: Some(Handshake {
                state: state.clone(),
                from,
                ..Default::default()
            }),
            ..Default::default()
        };
        let (claims, token) = self
            .tokens
            .mint_for(claims, self.tokens.config().handshake_ttl)?;
        let write = self.tokens.write(&token, &claims);

        let redirect_uri = self.tokens.config().callback_url(provider.name());
        let url = provider.authorization_url(&redirect_uri, &state)?;
        tracing::debug!(provider = %provider.name(), "login redirect to provider");
        Ok(redirect(&url, write))
    }

    async fn oauth2_callback(&self, provider: &OAuth2Provider, parts: &Parts) -> Result<Response> {
        let (claims, _) = self
            .tokens
            .extract(parts)
            .map_err(|e| AuthError::NonceMismatch(format!("no handshake token: {e}")))?;
        let handshake = claims
            .handshake
            .as_ref()
            .ok_or_else(|| AuthError::NonceMismatch("not a handshake token".to_string()))?;
        if self.tokens.is_soft_expired(&claims) {
            return Err(AuthError::NonceMismatch("handshake expired".to_string()));
        }
        let state = query_value(parts, "state").unwrap_or_default();
        if state.is_empty() || !bool::from(state.as_bytes().ct_eq(handshake.state.as_bytes())) {
            return Err(AuthError::NonceMismatch("unexpected state".to_string()));
        }

        if let Some(error) = query_value(parts, "error") {
            return Err(AuthError::exchange(format!("provider returned {error}")));
        }
        let code = query_value(parts, "code").ok_or_else(|| AuthError::bad_request("missing code"))?;

        let redirect_uri = self.tokens.config().callback_url(provider.name());
        let access_token = provider
            .exchange_code(&self.client, &code, &redirect_uri)
            .await?;
        let info = provider.fetch_user_info(&self.client, &access_token).await?;
        let user = provider.map_user(&info)?;

        let access_token = provider.supports_revocation().then_some(access_token);
        self.complete(
            provider.name(),
            user,
            LoginContext::from_handshake(&claims),
            access_token,
        )
        .await
    }

    async fn direct_login(
        &self,
        provider: &DirectProvider,
        parts: &Parts,
        body: Body,
    ) -> Result<Response> {
        let mut params = query_params(parts);
        params.extend(body_params(&parts.headers, body).await?);

        let user = params.get("user").cloned().unwrap_or_default();
        let password = params
            .get("passwd")
            .or_else(|| params.get("password"))
            .cloned()
            .unwrap_or_default();
        let authenticated = provider.authenticate(&user, &password).await?;
        self.complete(
            provider.name(),
            authenticated,
            LoginContext::from_params(&params),
            None,
        )
        .await
    }

    async fn verify_login(&self, provider: &VerifyProvider, parts: &Parts) -> Result<Response> {
        let params = query_params(parts);

        if let Some(token) = params.get("token").filter(|t| !t.is_empty()) {
            let claims = self.tokens.parse(token)?;
            if !claims.is_handshake() {
                return Err(AuthError::NonceMismatch(
                    "not a confirmation token".to_string(),
                ));
            }
            if self.tokens.is_soft_expired(&claims) {
                return Err(AuthError::NonceMismatch("confirmation expired".to_string()));
            }
            let user = provider.confirmed_user(&claims)?;
            return self
                .complete(
                    provider.name(),
                    user,
                    LoginContext::from_handshake(&claims),
                    None,
                )
                .await;
        }

        let ctx = LoginContext::from_params(&params);
        let user = params.get("user").cloned().unwrap_or_default();
        let address = params.get("address").cloned().unwrap_or_default();
        let from = self.safe_redirect(&ctx.from).unwrap_or_default();
        let claims = provider
            .confirmation_claims(&user, &address, &ctx.aud, &from)?
            .session_only(ctx.sess_only);
        let (_, token) = self
            .tokens
            .mint_for(claims, self.tokens.config().handshake_ttl)?;

        let text = provider.render(&token, &user, &address, &ctx.aud);
        provider.send(&address, &text).await?;
        tracing::debug!(provider = %provider.name(), user = %user, "confirmation sent");
        Ok(Json(json!({ "user": user, "address": address })).into_response())
    }

    async fn custom_outcome(
        &self,
        provider: &dyn CustomProvider,
        parts: &Parts,
        outcome: ProviderOutcome,
    ) -> Result<Response> {
        match outcome {
            ProviderOutcome::Authenticated(user) => {
                if user.provider() != provider.name() {
                    return Err(AuthError::config(format!(
                        "provider {} returned user {} with a foreign id",
                        provider.name(),
                        user.id
                    )));
                }
                let ctx = LoginContext::from_params(&query_params(parts));
                self.complete(provider.name(), user, ctx, None).await
            }
            ProviderOutcome::Redirect(url) => Ok(redirect(&url, TokenWrite::new())),
            ProviderOutcome::Json(value) => Ok(Json(value).into_response()),
        }
    }

    /// Common tail of every successful login: avatar, validator, issue
    async fn complete(
        &self,
        provider: &str,
        user: User,
        ctx: LoginContext,
        provider_token: Option<String>,
    ) -> Result<Response> {
        let user = proxy_picture(self.avatar.as_deref(), user, &self.client).await;
        let user_id = user.id.clone();

        let claims = Claims::for_user(user)
            .with_audience(ctx.aud)
            .session_only(ctx.sess_only);
        let (claims, token) = self.tokens.mint(claims)?;

        if let Some(validator) = &self.validator {
            if !validator.validate(&token, &claims) {
                return Err(AuthError::ValidatorRejected(user_id));
            }
        }

        if let Some(access_token) = provider_token {
            self.provider_tokens
                .insert(claims.jti.clone(), access_token)
                .await;
        }

        let write = self.tokens.write(&token, &claims);
        tracing::info!(provider = %provider, user_id = %user_id, "user logged in");

        if let Some(target) = self.safe_redirect(&ctx.from) {
            return Ok(redirect(&target, write));
        }
        Ok((write, Json(claims.user)).into_response())
    }

    async fn logout(&self, parts: &Parts) -> Response {
        let provider = match query_value(parts, "using") {
            Some(name) => self.registry.resolve(&name).map_err(|e| (name, e)),
            None => self.registry.first().ok_or_else(|| {
                (
                    String::new(),
                    AuthError::bad_request("providers not defined"),
                )
            }),
        };
        let provider = match provider {
            Ok(p) => p,
            Err((name, e)) => return HandshakeError::new(&name, e).into_response(),
        };

        if let Err(e) = self.revoke(provider, parts).await {
            return HandshakeError::new(provider.name(), e).into_response();
        }

        tracing::debug!(provider = %provider.name(), "logout");
        (self.tokens.clear(), StatusCode::OK).into_response()
    }

    async fn revoke(&self, provider: &Provider, parts: &Parts) -> Result<()> {
        match provider {
            Provider::OAuth2(p) if p.supports_revocation() => {
                let Some(claims) = self.session_claims(parts) else {
                    return Ok(());
                };
                let same_provider = claims
                    .user
                    .as_ref()
                    .is_some_and(|user| user.provider() == p.name());
                if !same_provider {
                    return Ok(());
                }
                if let Some(access_token) = self.provider_tokens.get(&claims.jti).await {
                    p.revoke(&self.client, &access_token).await?;
                    self.provider_tokens.invalidate(&claims.jti).await;
                }
                Ok(())
            }
            Provider::Custom(p) => p.logout(parts).await,
            _ => Ok(()),
        }
    }

    fn current_user(&self, parts: &Parts) -> Response {
        match self.session_user(parts) {
            Some(user) => Json(user).into_response(),
            None => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "not logged in" })),
            )
                .into_response(),
        }
    }

    fn status(&self, parts: &Parts) -> Response {
        match self.session_user(parts) {
            Some(user) => Json(json!({ "status": "Logged in", "user": user.name })).into_response(),
            None => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "status": "not logged in" })),
            )
                .into_response(),
        }
    }

    /// User of a valid, non-handshake session token
    fn session_user(&self, parts: &Parts) -> Option<User> {
        self.session_claims(parts)?.user
    }

    /// Claims of a valid, non-handshake session token
    fn session_claims(&self, parts: &Parts) -> Option<Claims> {
        let (claims, _) = self.tokens.extract(parts).ok()?;
        (!claims.is_handshake()).then_some(claims)
    }

    /// `from` as a redirect target when it stays on this site
    fn safe_redirect(&self, from: &str) -> Option<String> {
        if from.is_empty() {
            return None;
        }
        if from.starts_with('/') && !from.starts_with("//") && !from.contains('\\') {
            return Some(from.to_string());
        }

        let target = Url::parse(from).ok()?;
        let own = Url::parse(&self.tokens.config().url).ok()?;
        (target.origin() == own.origin()).then(|| target.to_string())
    }
}

async fn handle(State(engine): State<Arc<HandshakeEngine>>, request: Request) -> Response {
    engine.dispatch(request).await
}

fn redirect(url: &str, write: TokenWrite) -> Response {
    let mut response = (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response();
    write.apply(response.headers_mut());
    response
}

fn query_params(parts: &Parts) -> HashMap<String, String> {
    parts
        .uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// Form or JSON body fields; other bodies are ignored
async fn body_params(headers: &HeaderMap, body: Body) -> Result<HashMap<String, String>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_lowercase();
    let is_form = content_type.starts_with("application/x-www-form-urlencoded");
    let is_json = content_type.starts_with("application/json");
    if !is_form && !is_json {
        return Ok(HashMap::new());
    }

    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AuthError::bad_request(format!("can't read body: {e}")))?;
    if bytes.is_empty() {
        return Ok(HashMap::new());
    }

    if is_form {
        return Ok(url::form_urlencoded::parse(&bytes).into_owned().collect());
    }

    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::bad_request(format!("invalid json body: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| AuthError::bad_request("json body must be an object"))?;
    Ok(object
        .iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k.clone(), s.clone())),
            Value::Bool(b) => Some((k.clone(), b.to_string())),
            Value::Number(n) => Some((k.clone(), n.to_string())),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AuthConfig,
        hooks::{CredChecker, Sender},
        provider::{presets, OAuth2Endpoints},
        token::StaticSecret,
    };
    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    struct AnyPassword;

    #[async_trait]
    impl CredChecker for AnyPassword {
        async fn check(&self, _user: &str, password: &str) -> Result<bool> {
            Ok(password == "good")
        }
    }

    fn token_service() -> TokenService {
        TokenService::new(
            Arc::new(AuthConfig {
                url: "http://app.example.com".to_string(),
                ..Default::default()
            }),
            Arc::new(StaticSecret::new("secret")),
        )
    }

    fn engine(providers: Vec<Provider>) -> Arc<HandshakeEngine> {
        let mut registry = ProviderRegistry::new();
        for p in providers {
            registry.register(p).unwrap();
        }
        Arc::new(HandshakeEngine::new(token_service(), Arc::new(registry)).unwrap())
    }

    async fn send(engine: &Arc<HandshakeEngine>, request: axum::http::Request<Body>) -> Response {
        engine.clone().router().oneshot(request).await.unwrap()
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn set_cookie(response: &Response, name: &str) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{name}=")))
            .and_then(|v| v.split(';').next())
            .map(|v| v[name.len() + 1..].to_string())
    }

    #[tokio::test]
    async fn test_list_providers() {
        let engine = engine(vec![
            presets::github("a", "b").into(),
            presets::dev("http://localhost:1").into(),
        ]);
        let response = send(&engine, get("/auth?action=list")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"providers": ["github", "dev"]})
        );
    }

    #[tokio::test]
    async fn test_unknown_provider_and_action() {
        let engine = engine(vec![presets::dev("http://localhost:1").into()]);

        let response = send(&engine, get("/auth?action=login&using=nope")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["provider"], "nope");

        let response = send(&engine, get("/auth?action=dance")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oauth2_login_redirects_with_handshake_cookie() {
        let engine = engine(vec![presets::dev("http://idp.local").into()]);
        let response = send(
            &engine,
            get("/auth?action=login&using=dev&from=%2Fprofile&site=site1"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let location = Url::parse(
            response.headers()[header::LOCATION].to_str().unwrap(),
        )
        .unwrap();
        assert_eq!(location.host_str(), Some("idp.local"));
        let params: HashMap<_, _> = location.query_pairs().into_owned().collect();
        assert_eq!(params["state"].len(), 40);
        assert_eq!(
            params["redirect_uri"],
            "http://app.example.com/auth?action=callback&using=dev"
        );

        let token = set_cookie(&response, "JWT").unwrap();
        let claims = token_service().parse(&token).unwrap();
        let handshake = claims.handshake.unwrap();
        assert_eq!(handshake.state, params["state"]);
        assert_eq!(handshake.from, "/profile");
        assert_eq!(claims.aud, "site1");
        assert!(claims.user.is_none());
    }

    #[tokio::test]
    async fn test_callback_state_mismatch_skips_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let provider = OAuth2Provider::new(
            "mock",
            "c",
            "s",
            OAuth2Endpoints {
                auth_url: format!("{}/authorize", server.uri()),
                token_url: format!("{}/token", server.uri()),
                user_info_url: format!("{}/user", server.uri()),
                ..Default::default()
            },
            Arc::new(|_: &Value| crate::provider::MappedUser::default()),
        );
        let engine = engine(vec![provider.into()]);

        let login = send(&engine, get("/auth?action=login&using=mock")).await;
        let token = set_cookie(&login, "JWT").unwrap();

        let request = axum::http::Request::get("/auth?action=callback&using=mock&state=forged&code=c")
            .header(header::COOKIE, format!("JWT={token}"))
            .body(Body::empty())
            .unwrap();
        let response = send(&engine, request).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["provider"], "mock");
        assert!(body["error"].as_str().unwrap().contains("state"));

        let response = send(&engine, get("/auth?action=callback&using=mock&state=x&code=c")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_direct_login_form_and_json() {
        let engine = engine(vec![DirectProvider::new("local", Arc::new(AnyPassword)).into()]);

        let request = axum::http::Request::post("/auth?action=login&using=local")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("user=alice&passwd=good"))
            .unwrap();
        let response = send(&engine, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie(&response, "JWT").is_some());
        assert!(set_cookie(&response, "XSRF-TOKEN").is_some());
        assert_eq!(body_json(response).await["name"], "alice");

        let request = axum::http::Request::post("/auth?action=login&using=local")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"user": "alice", "passwd": "bad"}"#))
            .unwrap();
        let response = send(&engine, request).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(set_cookie(&response, "JWT").is_none());
    }

    #[tokio::test]
    async fn test_direct_login_redirects_to_safe_from_only() {
        let engine = engine(vec![DirectProvider::new("local", Arc::new(AnyPassword)).into()]);

        let response = send(
            &engine,
            get("/auth?action=login&using=local&user=a&passwd=good&from=%2Fhome"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/home");

        let response = send(
            &engine,
            get("/auth?action=login&using=local&user=a&passwd=good&from=https%3A%2F%2Fevil.com%2F"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_validator_rejects_login() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(DirectProvider::new("local", Arc::new(AnyPassword)).into())
            .unwrap();
        let validator: Arc<dyn Validator> =
            Arc::new(|_: &str, claims: &Claims| claims.user.as_ref().map(|u| u.name != "mallory").unwrap_or(false));
        let engine = Arc::new(
            HandshakeEngine::new(token_service(), Arc::new(registry))
                .unwrap()
                .with_validator(Some(validator)),
        );

        let response = send(&engine, get("/auth?action=login&using=local&user=mallory&passwd=good")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(set_cookie(&response, "JWT").is_none());

        let response = send(&engine, get("/auth?action=login&using=local&user=alice&passwd=good")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_and_user_queries() {
        let engine = engine(vec![DirectProvider::new("local", Arc::new(AnyPassword)).into()]);

        let response = send(&engine, get("/auth?action=status")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await, json!({"status": "not logged in"}));

        let login = send(&engine, get("/auth?action=login&using=local&user=alice&passwd=good")).await;
        let cookie = format!("JWT={}", set_cookie(&login, "JWT").unwrap());

        let request = axum::http::Request::get("/auth?action=status")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let response = send(&engine, request).await;
        assert_eq!(
            body_json(response).await,
            json!({"status": "Logged in", "user": "alice"})
        );

        let request = axum::http::Request::get("/auth?action=user")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let response = send(&engine, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["name"], "alice");
    }

    #[tokio::test]
    async fn test_logout_without_providers() {
        let engine = engine(vec![]);
        let response = send(&engine, get("/auth?action=logout")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[derive(Default)]
    struct Outbox(parking_lot::Mutex<Vec<(String, String)>>);

    #[async_trait]
    impl Sender for Outbox {
        async fn send(&self, address: &str, text: &str) -> Result<()> {
            self.0.lock().push((address.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct FailingSaver;

    #[async_trait]
    impl AvatarSaver for FailingSaver {
        async fn put(&self, _user: &User, _client: &reqwest::Client) -> Result<String> {
            Err(AuthError::Internal(anyhow::anyhow!("storage down")))
        }
    }

    /// Custom provider that answers login with a fixed user
    struct FixedUser(User);

    #[async_trait]
    impl CustomProvider for FixedUser {
        fn name(&self) -> &str {
            "corp"
        }

        async fn login(&self, _parts: &Parts) -> Result<ProviderOutcome> {
            Ok(ProviderOutcome::Authenticated(self.0.clone()))
        }

        async fn callback(&self, _parts: &Parts) -> Result<ProviderOutcome> {
            Err(AuthError::bad_request("no callback"))
        }
    }

    fn with_cookie(uri: &str, token: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri)
            .header(header::COOKIE, format!("JWT={token}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_verify_login_sends_and_redeems_confirmation() {
        let outbox = Arc::new(Outbox::default());
        let provider = VerifyProvider::new("email", outbox.clone()).with_template("{token}");
        let engine = engine(vec![provider.into()]);

        let response = send(
            &engine,
            get("/auth?action=login&using=email&user=bob&address=bob%40example.com"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie(&response, "JWT").is_none());
        assert_eq!(
            body_json(response).await,
            json!({"user": "bob", "address": "bob@example.com"})
        );

        let (address, confirmation) = outbox.0.lock()[0].clone();
        assert_eq!(address, "bob@example.com");

        let response = send(
            &engine,
            get(&format!("/auth?action=login&using=email&token={confirmation}")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let session = set_cookie(&response, "JWT").unwrap();
        let claims = token_service().parse(&session).unwrap();
        assert!(!claims.is_handshake());
        let user = claims.user.unwrap();
        assert_eq!(user.provider(), "email");
        assert_eq!(user.email.as_deref(), Some("bob@example.com"));

        let body = body_json(response).await;
        assert_eq!(body["name"], "bob");
        assert_eq!(body["email"], "bob@example.com");
    }

    #[tokio::test]
    async fn test_verify_login_rejects_stale_or_session_tokens() {
        let provider = VerifyProvider::new("email", Arc::new(Outbox::default()));
        let mut expired = provider
            .confirmation_claims("bob", "bob@example.com", "", "")
            .unwrap();
        expired.exp = Some(chrono::Utc::now().timestamp() - 60);
        let (_, expired) = token_service()
            .mint_for(expired, Duration::from_secs(60))
            .unwrap();

        let mut session_user = User::new("email", "bob", "bob");
        session_user.email = Some("bob@example.com".to_string());
        let (_, session) = token_service().mint(Claims::for_user(session_user)).unwrap();

        let engine = engine(vec![provider.into()]);
        for token in [expired, session, "garbage".to_string()] {
            let response = send(
                &engine,
                get(&format!("/auth?action=login&using=email&token={token}")),
            )
            .await;
            assert!(response.status().is_client_error());
            assert!(set_cookie(&response, "JWT").is_none());
            assert_eq!(body_json(response).await["provider"], "email");
        }
    }

    #[tokio::test]
    async fn test_verify_confirmation_not_redeemable_elsewhere() {
        let outbox = Arc::new(Outbox::default());
        let engine = engine(vec![
            VerifyProvider::new("email", outbox.clone())
                .with_template("{token}")
                .into(),
            VerifyProvider::new("sms", Arc::new(Outbox::default())).into(),
        ]);

        send(
            &engine,
            get("/auth?action=login&using=email&user=bob&address=bob%40example.com"),
        )
        .await;
        let confirmation = outbox.0.lock()[0].1.clone();

        let response = send(
            &engine,
            get(&format!("/auth?action=login&using=sms&token={confirmation}")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(set_cookie(&response, "JWT").is_none());
    }

    #[tokio::test]
    async fn test_custom_provider_foreign_user_is_config_error() {
        let engine = engine(vec![Provider::Custom(Arc::new(FixedUser(User::new(
            "other", "1", "eve",
        ))))]);
        let response = send(&engine, get("/auth?action=login&using=corp")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(set_cookie(&response, "JWT").is_none());
        let body = body_json(response).await;
        assert_eq!(body["provider"], "corp");
        assert!(body["error"].as_str().unwrap().contains("foreign id"));

        let engine = engine_with_user(User::new("corp", "1", "carol"));
        let response = send(&engine, get("/auth?action=login&using=corp")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie(&response, "JWT").is_some());
    }

    fn engine_with_user(user: User) -> Arc<HandshakeEngine> {
        engine(vec![Provider::Custom(Arc::new(FixedUser(user)))])
    }

    #[tokio::test]
    async fn test_failing_avatar_saver_keeps_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "at-1", "token_type": "bearer"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "42",
                "name": "alice",
                "avatar_url": "http://cdn.example.com/alice.png",
            })))
            .mount(&server)
            .await;

        let provider = OAuth2Provider::new(
            "mock",
            "c",
            "s",
            OAuth2Endpoints {
                auth_url: format!("{}/authorize", server.uri()),
                token_url: format!("{}/token", server.uri()),
                user_info_url: format!("{}/user", server.uri()),
                ..Default::default()
            },
            Arc::new(|data: &Value| crate::provider::MappedUser {
                id: data["id"].as_str().unwrap_or_default().to_string(),
                name: data["name"].as_str().unwrap_or_default().to_string(),
                picture: data["avatar_url"].as_str().map(str::to_string),
                email: None,
            }),
        );
        let mut registry = ProviderRegistry::new();
        registry.register(provider.into()).unwrap();
        let engine = Arc::new(
            HandshakeEngine::new(token_service(), Arc::new(registry))
                .unwrap()
                .with_avatar_saver(Some(Arc::new(FailingSaver))),
        );

        let login = send(&engine, get("/auth?action=login&using=mock")).await;
        let handshake = set_cookie(&login, "JWT").unwrap();
        let location = Url::parse(login.headers()[header::LOCATION].to_str().unwrap()).unwrap();
        let state = location
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let response = send(
            &engine,
            with_cookie(
                &format!("/auth?action=callback&using=mock&state={state}&code=c1"),
                &handshake,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let session = set_cookie(&response, "JWT").unwrap();
        let user = token_service().parse(&session).unwrap().user.unwrap();
        assert_eq!(user.name, "alice");
        assert!(user.picture.is_none());
        assert!(body_json(response).await["picture"].is_null());

        // Direct providers carry no picture, so the saver is never consulted
        let mut registry = ProviderRegistry::new();
        registry
            .register(DirectProvider::new("local", Arc::new(AnyPassword)).into())
            .unwrap();
        let engine = Arc::new(
            HandshakeEngine::new(token_service(), Arc::new(registry))
                .unwrap()
                .with_avatar_saver(Some(Arc::new(FailingSaver))),
        );
        let response = send(&engine, get("/auth?action=login&using=local&user=bob&passwd=good")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookie(&response, "JWT").is_some());
        assert!(body_json(response).await["picture"].is_null());
    }

    #[test]
    fn test_safe_redirect() {
        let engine = engine(vec![]);
        assert_eq!(engine.safe_redirect("/a?b=1").as_deref(), Some("/a?b=1"));
        assert_eq!(
            engine.safe_redirect("http://app.example.com/x").as_deref(),
            Some("http://app.example.com/x")
        );
        assert!(engine.safe_redirect("//evil.com").is_none());
        assert!(engine.safe_redirect("/\\evil.com").is_none());
        assert!(engine.safe_redirect("https://app.example.com/x").is_none());
        assert!(engine.safe_redirect("javascript:alert(1)").is_none());
        assert!(engine.safe_redirect("").is_none());
    }
}
