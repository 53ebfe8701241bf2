//! Data models shared by the session, gateway and vault.
//!
//! - `TokenPair`: access token plus optional refresh token
//! - `UserProfile`: opaque identity payload returned by the backend
//! - Wire types for the login and refresh endpoints

pub mod auth;

pub use auth::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, TokenPair, UserProfile};
