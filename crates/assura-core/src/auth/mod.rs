//! Session module for the signed-in user's credentials.
//!
//! This module provides:
//! - `SessionStore`: shared session state with controlled mutations
//! - `SessionPersistence`: where the session is written after every change
//!
//! The session is restored from disk at startup and rewritten on every
//! login, refresh and logout.

pub mod persistence;
pub mod session;

pub use persistence::{FileSessionPersistence, SessionPersistence};
pub use session::{SessionSnapshot, SessionStore};
