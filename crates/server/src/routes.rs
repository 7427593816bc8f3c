// HTTP routes
// Decision: Each protected area is its own sub-router so every middleware mode is mounted once

use axum::{middleware, routing::get, Json, Router};
use gatehouse_auth::{
    admin_only, require_auth, require_roles, trace_auth, AuthService, CurrentUser, MaybeUser,
};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    providers: Vec<String>,
}

/// Roles accepted on `/editors`
pub const EDITOR_ROLES: &[&str] = &["editor", "admin"];

/// Application router: health, handshake endpoint and the guarded areas
pub fn build_router(auth: &AuthService) -> Router {
    let authenticator = auth.authenticator();
    let providers = auth.registry().names();

    let private = Router::new()
        .route("/private", get(private_area))
        .route_layer(middleware::from_fn_with_state(
            authenticator.clone(),
            require_auth,
        ));

    let open = Router::new()
        .route("/open", get(open_area))
        .route_layer(middleware::from_fn_with_state(
            authenticator.clone(),
            trace_auth,
        ));

    let admin = Router::new()
        .route("/admin", get(admin_area))
        .route_layer(middleware::from_fn_with_state(authenticator, admin_only));

    let editors = Router::new()
        .route("/editors", get(private_area))
        .route_layer(middleware::from_fn_with_state(
            auth.role_guard(EDITOR_ROLES),
            require_roles,
        ));

    Router::new()
        .route(
            "/health",
            get(move || async move {
                Json(HealthResponse {
                    status: "ok",
                    version: env!("CARGO_PKG_VERSION"),
                    providers,
                })
            }),
        )
        .merge(auth.routes())
        .merge(private)
        .merge(open)
        .merge(admin)
        .merge(editors)
}

async fn private_area(CurrentUser(user): CurrentUser) -> Json<Value> {
    Json(json!({ "message": format!("hello {}", user.name), "user": user }))
}

async fn open_area(MaybeUser(user): MaybeUser) -> Json<Value> {
    match user {
        Some(user) => Json(json!({ "message": format!("hello {}", user.name) })),
        None => Json(json!({ "message": "hello stranger" })),
    }
}

async fn admin_area(CurrentUser(user): CurrentUser) -> Json<Value> {
    Json(json!({ "message": "admin area", "admin": user.name }))
}
