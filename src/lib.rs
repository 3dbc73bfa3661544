//! Floodgate - Admission Control for LLM Gateway Services
//!
//! This crate implements the rate-limiting subsystem of a request broker
//! that forwards chat turns to external language-model providers. Every
//! inbound request is checked against a token-bucket quota keyed by client
//! identity, with two interchangeable enforcement backends (in-process
//! memory and a shared Redis store) and a mutable bypass allowlist edited
//! through the broker's administrative interface.
//!
//! The surrounding HTTP layer resolves a [`ratelimit::ClientIdentity`],
//! asks the [`ratelimit::AdmissionController`] for a verdict, and maps a
//! denial to a 429 carrying [`ratelimit::RateLimitedBody`].

pub mod config;
pub mod error;
pub mod ratelimit;

pub use config::FloodgateConfig;
pub use error::{FloodgateError, Result};
