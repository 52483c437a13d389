//! Authentication: credential hashing and identity tokens

pub mod jwt;
pub mod password;

pub use jwt::{extract_bearer_token, Claims, IssuedToken, TokenService};
pub use password::CredentialHasher;
