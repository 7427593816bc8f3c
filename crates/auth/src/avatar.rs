// Avatar proxy collaborator
// Decision: Storage is the caller's business; login only needs the proxied URL back
// Decision: A failing proxy never fails a login, the picture is dropped instead

use async_trait::async_trait;

use crate::{error::Result, token::User};

/// Persists a user's avatar and returns the URL it is served from
#[async_trait]
pub trait AvatarSaver: Send + Sync {
    async fn put(&self, user: &User, client: &reqwest::Client) -> Result<String>;
}

/// Replace `user.picture` with a proxied URL.
///
/// Users without a picture are left untouched.
pub(crate) async fn proxy_picture(
    saver: Option<&dyn AvatarSaver>,
    mut user: User,
    client: &reqwest::Client,
) -> User {
    let Some(saver) = saver else {
        return user;
    };
    if user.picture.is_none() {
        return user;
    }

    match saver.put(&user, client).await {
        Ok(url) => user.picture = Some(url),
        Err(e) => {
            tracing::warn!(user_id = %user.id, error = %e, "failed to proxy avatar");
            user.picture = None;
        }
    }
    user
}
