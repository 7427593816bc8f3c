// Session token model, codec and transport

mod claims;
mod secret;
mod service;
mod transport;
mod user;

pub use claims::{Claims, Handshake};
pub use secret::{AudienceSecrets, SecretReader, StaticSecret};
pub(crate) use service::generate_random_id;
pub use service::TokenService;
pub use transport::{query_value, TokenSource, TokenWrite};
pub use user::{hash_id, User};
