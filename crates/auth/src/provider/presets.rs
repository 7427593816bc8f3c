// Well-known OAuth2 providers
// Decision: Each preset is endpoints plus a user-info mapper; nothing else differs between providers

use serde_json::Value;
use std::sync::Arc;

use super::oauth2::{json_opt, json_str, MappedUser, OAuth2Endpoints, OAuth2Provider};

/// Names accepted by `by_name`
pub const PRESET_NAMES: &[&str] = &[
    "github",
    "google",
    "facebook",
    "microsoft",
    "yandex",
    "battlenet",
    "patreon",
];

/// Build a preset provider by name
pub fn by_name(name: &str, client_id: &str, client_secret: &str) -> Option<OAuth2Provider> {
    let provider = match name {
        "github" => github(client_id, client_secret),
        "google" => google(client_id, client_secret),
        "facebook" => facebook(client_id, client_secret),
        "microsoft" => microsoft(client_id, client_secret),
        "yandex" => yandex(client_id, client_secret),
        "battlenet" => battlenet(client_id, client_secret),
        "patreon" => patreon(client_id, client_secret),
        _ => return None,
    };
    Some(provider)
}

fn endpoints(auth: &str, token: &str, user: &str, scopes: &[&str]) -> OAuth2Endpoints {
    OAuth2Endpoints {
        auth_url: auth.to_string(),
        token_url: token.to_string(),
        user_info_url: user.to_string(),
        revoke_url: None,
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn github(client_id: &str, client_secret: &str) -> OAuth2Provider {
    OAuth2Provider::new(
        "github",
        client_id,
        client_secret,
        endpoints(
            "https://github.com/login/oauth/authorize",
            "https://github.com/login/oauth/access_token",
            "https://api.github.com/user",
            &[],
        ),
        Arc::new(map_github),
    )
}

pub fn google(client_id: &str, client_secret: &str) -> OAuth2Provider {
    OAuth2Provider::new(
        "google",
        client_id,
        client_secret,
        endpoints(
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
            "https://www.googleapis.com/oauth2/v3/userinfo",
            &["openid", "email", "profile"],
        ),
        Arc::new(map_google),
    )
    .with_revoke_url("https://oauth2.googleapis.com/revoke")
}

pub fn facebook(client_id: &str, client_secret: &str) -> OAuth2Provider {
    OAuth2Provider::new(
        "facebook",
        client_id,
        client_secret,
        endpoints(
            "https://www.facebook.com/v19.0/dialog/oauth",
            "https://graph.facebook.com/v19.0/oauth/access_token",
            "https://graph.facebook.com/me?fields=id,name,picture",
            &["public_profile"],
        ),
        Arc::new(map_facebook),
    )
}

pub fn microsoft(client_id: &str, client_secret: &str) -> OAuth2Provider {
    OAuth2Provider::new(
        "microsoft",
        client_id,
        client_secret,
        endpoints(
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
            "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            "https://graph.microsoft.com/v1.0/me",
            &["User.Read"],
        ),
        Arc::new(map_microsoft),
    )
}

pub fn yandex(client_id: &str, client_secret: &str) -> OAuth2Provider {
    OAuth2Provider::new(
        "yandex",
        client_id,
        client_secret,
        endpoints(
            "https://oauth.yandex.com/authorize",
            "https://oauth.yandex.com/token",
            "https://login.yandex.ru/info?format=json",
            &[],
        ),
        Arc::new(map_yandex),
    )
}

pub fn battlenet(client_id: &str, client_secret: &str) -> OAuth2Provider {
    OAuth2Provider::new(
        "battlenet",
        client_id,
        client_secret,
        endpoints(
            "https://us.battle.net/oauth/authorize",
            "https://us.battle.net/oauth/token",
            "https://us.battle.net/oauth/userinfo",
            &[],
        ),
        Arc::new(map_battlenet),
    )
}

pub fn patreon(client_id: &str, client_secret: &str) -> OAuth2Provider {
    OAuth2Provider::new(
        "patreon",
        client_id,
        client_secret,
        endpoints(
            "https://www.patreon.com/oauth2/authorize",
            "https://www.patreon.com/api/oauth2/token",
            "https://www.patreon.com/api/oauth2/v2/identity?fields%5Buser%5D=full_name,image_url,email",
            &["identity", "identity[email]"],
        ),
        Arc::new(map_patreon),
    )
}

/// Provider talking to the local development server at `base_url`
pub fn dev(base_url: &str) -> OAuth2Provider {
    let base = base_url.trim_end_matches('/');
    OAuth2Provider::new(
        "dev",
        "cid",
        "csecret",
        endpoints(
            &format!("{base}/login/oauth/authorize"),
            &format!("{base}/login/oauth/access_token"),
            &format!("{base}/user"),
            &[],
        ),
        Arc::new(map_dev),
    )
}

fn map_github(data: &Value) -> MappedUser {
    MappedUser {
        id: json_str(data, "id"),
        name: json_opt(data, "name").unwrap_or_else(|| json_str(data, "login")),
        picture: json_opt(data, "avatar_url"),
        email: json_opt(data, "email"),
    }
}

fn map_google(data: &Value) -> MappedUser {
    MappedUser {
        id: json_str(data, "sub"),
        name: json_opt(data, "name").unwrap_or_else(|| json_str(data, "email")),
        picture: json_opt(data, "picture"),
        email: json_opt(data, "email"),
    }
}

fn map_facebook(data: &Value) -> MappedUser {
    MappedUser {
        id: json_str(data, "id"),
        name: json_str(data, "name"),
        picture: data
            .pointer("/picture/data/url")
            .and_then(Value::as_str)
            .map(str::to_string),
        email: json_opt(data, "email"),
    }
}

fn map_microsoft(data: &Value) -> MappedUser {
    MappedUser {
        id: json_str(data, "id"),
        name: json_str(data, "displayName"),
        picture: None,
        email: json_opt(data, "mail").or_else(|| json_opt(data, "userPrincipalName")),
    }
}

fn map_yandex(data: &Value) -> MappedUser {
    let name = json_opt(data, "display_name")
        .or_else(|| json_opt(data, "real_name"))
        .unwrap_or_else(|| json_str(data, "login"));
    let picture = match data.get("is_avatar_empty").and_then(Value::as_bool) {
        Some(true) => None,
        _ => json_opt(data, "default_avatar_id")
            .map(|id| format!("https://avatars.yandex.net/get-yapic/{id}/islands-200")),
    };
    MappedUser {
        id: json_str(data, "id"),
        name,
        picture,
        email: json_opt(data, "default_email"),
    }
}

fn map_battlenet(data: &Value) -> MappedUser {
    MappedUser {
        id: json_str(data, "id"),
        name: json_str(data, "battletag"),
        picture: None,
        email: None,
    }
}

fn map_patreon(data: &Value) -> MappedUser {
    let attrs = data.pointer("/data/attributes").cloned().unwrap_or_default();
    MappedUser {
        id: data
            .pointer("/data/id")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default(),
        name: json_str(&attrs, "full_name"),
        picture: json_opt(&attrs, "image_url"),
        email: json_opt(&attrs, "email"),
    }
}

fn map_dev(data: &Value) -> MappedUser {
    MappedUser {
        id: json_str(data, "id"),
        name: json_str(data, "name"),
        picture: json_opt(data, "picture"),
        email: json_opt(data, "email"),
    }
}
