//! Token verification against a remote JWKS endpoint.
//!
//! - `jwks` - fetches and caches public signing keys, keyed by `kid`
//! - `verifier` - validates bearer tokens using resolved keys
//! - `claims` - the verified token payload

pub mod claims;
pub mod error;
pub mod jwks;
pub mod verifier;

pub use claims::IdentityClaims;
pub use error::AuthError;
pub use jwks::{JwksClient, KEY_CACHE_TTL};
pub use verifier::TokenVerifier;
