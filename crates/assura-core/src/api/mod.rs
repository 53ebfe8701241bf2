//! REST gateway module for the Assura backend.
//!
//! This module provides the `ApiClient` for authenticated requests. The
//! backend issues short-lived JWT bearer tokens; an expired token is renewed
//! through `/auth/refresh` without the caller noticing.

pub mod client;
pub mod error;
mod refresh;

pub use client::{ApiClient, ApiRequest};
pub use error::{ApiError, RefreshError};
