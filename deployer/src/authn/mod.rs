//! Authentication: inbound callers and outbound API credentials

pub mod access_token;
pub mod caller;

pub use access_token::{AccessTokenProvider, MetadataTokenProvider, StaticTokenProvider};
pub use caller::{CallerIdentity, JwtVerifier};
