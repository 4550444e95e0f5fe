/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 *   - config, scopes: ScopeResolver, exchanger, discovery, http client
 * - Clone 前提で持つ (内部は Arc/Clone cheap)
 * - 全て起動時に一度だけ構築し、以後 read-only で共有する
 */
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::Config;
use crate::services::discovery::{DiscoveryHandle, ServiceInstance};
use crate::services::exchange::TokenExchanger;
use crate::services::scopes::ScopeResolver;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scopes: Arc<ScopeResolver>,
    pub exchanger: Arc<TokenExchanger>,
    pub discovery: DiscoveryHandle,
    pub http: reqwest::Client,
    round_robin: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        scopes: Arc<ScopeResolver>,
        exchanger: Arc<TokenExchanger>,
        discovery: DiscoveryHandle,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            scopes,
            exchanger,
            discovery,
            http,
            round_robin: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Round-robin pick over the current snapshot. Returns `None` on an
    /// empty list; the caller maps that to a no-route rejection.
    pub fn pick_instance<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let n = self.round_robin.fetch_add(1, Ordering::Relaxed);
        Some(&instances[n % instances.len()])
    }
}
