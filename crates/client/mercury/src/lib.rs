//! Client for the Mercury off-chain data service.
//!
//! Upkeeps request off-chain data by reverting their check with a
//! lookup describing the feeds they need. [MercuryClient] fetches one value
//! per feed, signing every request. Only upkeeps allowed by their admin, see
//! [AllowList], may use it.

mod allowlist;
mod auth;
mod client;
mod config;
mod error;
mod request;

pub use allowlist::{AdminConfigSource, AdminOffchainConfig, AllowList, AllowListConfig};
pub use auth::{auth_headers, sign, SIGNATURE_HEADER, TIMESTAMP_HEADER};
pub use client::MercuryClient;
pub use config::{MercuryConfig, RetryPolicy};
pub use error::MercuryError;
pub use request::MercuryProtocol;

#[cfg(any(test, feature = "testing"))]
pub use allowlist::MockAdminConfigSource;
