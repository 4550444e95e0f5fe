//! Service discovery for downstream instances.
//!
//! A narrow provider trait (`list()`) with two concrete sources (configured
//! endpoint list, DNS lookup), wrapped by a single `DiscoveryHandle` that is
//! either a direct pass-through (`static` mode) or a snapshot of a background
//! polling task (`polling` mode).
//!
//! An empty instance list is a valid result (no healthy backends right now),
//! distinct from a provider failure, which is a `DiscoveryError`.

pub mod handle;
pub mod provider;

use std::time::Duration;

use thiserror::Error;

pub use handle::DiscoveryHandle;
pub use provider::{
    ConfiguredProvider, DiscoveryProvider, DiscoverySnapshot, DnsProvider, ServiceInstance,
};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery provider failed: {0}")]
    Provider(String),

    #[error("discovery lookup timed out after {0:?}")]
    Timeout(Duration),
}
