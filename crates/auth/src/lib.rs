//! `neuroviz-auth`: caller identity boundary.
//!
//! This crate is decoupled from HTTP and storage. It turns a bearer token
//! into a validated [`JwtClaims`] whose subject is the calling [`UserId`];
//! that identity is then passed explicitly into every job operation.
//!
//! [`UserId`]: neuroviz_core::UserId

pub mod claims;
pub mod jwt;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
