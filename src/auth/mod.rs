pub mod handlers;
pub mod password;
pub mod session;

pub use session::{bearer_token, resolve_token, IssuedToken, TokenError, TokenSigner};
