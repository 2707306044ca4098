//! Infrastructure layer: the job engine and its adapters (stores, compute
//! client, session lookup, config).

pub mod compute;
pub mod config;
pub mod jobs;
pub mod sessions;

#[cfg(test)]
mod integration_tests;
