//! Discovery providers: where the instance lists come from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::services::discovery::DiscoveryError;

/// One reachable backend instance. Immutable once listed; a refresh replaces
/// the whole snapshot, it never patches instances in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInstance {
    /// Opaque provider identity (configured slot, resolved address, ...).
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl ServiceInstance {
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug)]
pub struct DiscoverySnapshot {
    pub instances: Vec<ServiceInstance>,
    pub taken_at: DateTime<Utc>,
}

impl DiscoverySnapshot {
    pub fn new(instances: Vec<ServiceInstance>) -> Self {
        Self {
            instances,
            taken_at: Utc::now(),
        }
    }
}

/// The one capability the gateway consumes: a current instance list.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list(&self) -> Result<Vec<ServiceInstance>, DiscoveryError>;
}

/// Fixed instance list from configuration. Never fails; an empty list is
/// only possible if config validation is bypassed (tests).
pub struct ConfiguredProvider {
    instances: Vec<ServiceInstance>,
}

impl ConfiguredProvider {
    pub fn new(endpoints: &[(String, u16)]) -> Self {
        let instances = endpoints
            .iter()
            .map(|(host, port)| ServiceInstance {
                id: format!("{host}:{port}"),
                host: host.clone(),
                port: *port,
            })
            .collect();

        Self { instances }
    }
}

#[async_trait]
impl DiscoveryProvider for ConfiguredProvider {
    fn name(&self) -> &'static str {
        "configured"
    }

    async fn list(&self) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        Ok(self.instances.clone())
    }
}

/// Resolves a service name (`host:port`) via the system resolver. With a
/// headless cluster service this yields one address per ready pod.
pub struct DnsProvider {
    service_name: String,
}

impl DnsProvider {
    pub fn new(service_name: String) -> Self {
        Self { service_name }
    }
}

#[async_trait]
impl DiscoveryProvider for DnsProvider {
    fn name(&self) -> &'static str {
        "dns"
    }

    async fn list(&self) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let addrs = tokio::net::lookup_host(&self.service_name)
            .await
            .map_err(|e| {
                DiscoveryError::Provider(format!("dns lookup {} failed: {e}", self.service_name))
            })?;

        Ok(addrs
            .map(|addr| ServiceInstance {
                id: addr.to_string(),
                host: addr.ip().to_string(),
                port: addr.port(),
            })
            .collect())
    }
}
