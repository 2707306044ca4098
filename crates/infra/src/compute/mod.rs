//! Client side of the external EEG compute service.
//!
//! The engine only depends on [`ComputeClient`]; [`HttpComputeClient`] is the
//! production implementation speaking the service's HTTP/JSON contract.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ComputeClient, HttpComputeClient};
pub use error::ComputeError;
pub use types::ComputeRequest;
