// Local OAuth2 authorization server for development and tests
// Decision: Auto-approves every login; the user name comes from the `username` query value
// Decision: Codes and access tokens live in bounded in-memory caches and expire on their own

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};
use url::Url;

use crate::{
    error::{AuthError, Result},
    token::generate_random_id,
};

const DEFAULT_USER: &str = "dev_user";

/// Outstanding codes and tokens kept at most
const MAX_ENTRIES: u64 = 10_000;
const CODE_TTL: Duration = Duration::from_secs(10 * 60);
const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

struct DevState {
    /// authorization code -> user name
    codes: Cache<String, String>,
    /// access token -> user name
    tokens: Cache<String, String>,
}

impl DevState {
    fn with_capacity(capacity: u64) -> Self {
        Self {
            codes: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(CODE_TTL)
                .build(),
            tokens: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(TOKEN_TTL)
                .build(),
        }
    }
}

impl Default for DevState {
    fn default() -> Self {
        Self::with_capacity(MAX_ENTRIES)
    }
}

#[derive(Debug, Deserialize)]
struct AuthorizeParams {
    redirect_uri: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    code: String,
}

/// Development OAuth2 server
#[derive(Clone, Default)]
pub struct DevAuthServer {
    state: Arc<DevState>,
}

impl DevAuthServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes: authorize, access_token and user
    pub fn router(&self) -> Router {
        Router::new()
            .route("/login/oauth/authorize", get(authorize))
            .route("/login/oauth/access_token", post(access_token))
            .route("/user", get(user_info))
            .with_state(self.state.clone())
    }

    /// Bind `addr` and serve in the background; returns the bound address
    pub async fn spawn(&self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AuthError::config(format!("dev server can't bind {addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| AuthError::Internal(e.into()))?;
        let router = self.router();

        tracing::info!(addr = %local, "dev oauth2 server started");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "dev oauth2 server stopped");
            }
        });
        Ok((local, handle))
    }
}

async fn authorize(
    State(state): State<Arc<DevState>>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let Ok(mut target) = Url::parse(&params.redirect_uri) else {
        return (StatusCode::BAD_REQUEST, "invalid redirect_uri").into_response();
    };

    let username = params
        .username
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_USER.to_string());
    let code = generate_random_id();
    state.codes.insert(code.clone(), username.clone()).await;
    tracing::debug!(user = %username, "dev login approved");

    target
        .query_pairs_mut()
        .append_pair("code", &code)
        .append_pair("state", &params.state);
    Redirect::to(target.as_str()).into_response()
}

async fn access_token(State(state): State<Arc<DevState>>, Form(form): Form<TokenForm>) -> Response {
    let Some(username) = state.codes.remove(&form.code).await else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant"})),
        )
            .into_response();
    };

    let token = generate_random_id();
    state.tokens.insert(token.clone(), username).await;
    Json(json!({"access_token": token, "token_type": "bearer"})).into_response()
}

async fn user_info(State(state): State<Arc<DevState>>, headers: HeaderMap) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let username = match token {
        Some(token) => state.tokens.get(token).await,
        None => None,
    };

    match username {
        Some(name) => Json(json!({"id": name, "name": name})).into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}
