mod auth;
pub mod scopes;
mod transport;

pub use auth::{HelixUser, TwitchAuth};
pub use transport::{TokenSet, TokenTransport, Validation};
