//! The stable discovery interface the pipeline calls.
//!
//! One handle type covers both strategies (the legacy gateway had two
//! near-identical decorator types for this):
//! - `static`: every `get()` asks the provider, bounded by the deadline.
//! - `polling`: a background task refreshes on an interval and publishes
//!   whole snapshots through a `watch` channel; `get()` never touches the
//!   network.
//!
//! The handle is the extension point for future filtering (readiness,
//! zones): wrap the provider, don't modify it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::services::discovery::provider::{DiscoveryProvider, DiscoverySnapshot};
use crate::services::discovery::DiscoveryError;

#[derive(Clone)]
pub struct DiscoveryHandle {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Direct {
        provider: Arc<dyn DiscoveryProvider>,
        deadline: Duration,
    },
    Polling {
        rx: watch::Receiver<PollState>,
    },
}

/// Last poll outcome. A failed poll keeps the previous snapshot around but
/// surfaces the error, so a flapping provider is visible instead of being
/// mistaken for an empty cluster.
#[derive(Clone, Debug)]
struct PollState {
    snapshot: Option<DiscoverySnapshot>,
    last_error: Option<String>,
}

impl DiscoveryHandle {
    pub fn direct(provider: Arc<dyn DiscoveryProvider>, deadline: Duration) -> Self {
        Self {
            inner: Inner::Direct { provider, deadline },
        }
    }

    /// Start polling. The initial refresh runs here so the gateway never
    /// serves before a first snapshot exists; its failure is a startup error.
    pub async fn polling(
        provider: Arc<dyn DiscoveryProvider>,
        interval: Duration,
        deadline: Duration,
    ) -> Result<Self, DiscoveryError> {
        let initial = refresh(provider.as_ref(), deadline).await?;

        let (tx, rx) = watch::channel(PollState {
            snapshot: Some(initial),
            last_error: None,
        });

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; we already have the initial snapshot.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                match refresh(provider.as_ref(), deadline).await {
                    Ok(snapshot) => {
                        tracing::debug!(
                            provider = provider.name(),
                            instances = snapshot.instances.len(),
                            "discovery snapshot refreshed"
                        );
                        tx.send_modify(|state| {
                            state.snapshot = Some(snapshot);
                            state.last_error = None;
                        });
                    }
                    Err(err) => {
                        tracing::warn!(provider = provider.name(), error = %err, "discovery poll failed");
                        tx.send_modify(|state| {
                            state.last_error = Some(err.to_string());
                        });
                    }
                }

                if tx.is_closed() {
                    break;
                }
            }
        });

        Ok(Self {
            inner: Inner::Polling { rx },
        })
    }

    pub async fn get(&self) -> Result<DiscoverySnapshot, DiscoveryError> {
        match &self.inner {
            Inner::Direct { provider, deadline } => refresh(provider.as_ref(), *deadline).await,
            Inner::Polling { rx } => {
                let state = rx.borrow().clone();
                if let Some(err) = state.last_error {
                    return Err(DiscoveryError::Provider(err));
                }
                // Invariant: `polling()` only returns after the first snapshot.
                state
                    .snapshot
                    .ok_or_else(|| DiscoveryError::Provider("no snapshot published".to_string()))
            }
        }
    }
}

async fn refresh(
    provider: &dyn DiscoveryProvider,
    deadline: Duration,
) -> Result<DiscoverySnapshot, DiscoveryError> {
    let instances = tokio::time::timeout(deadline, provider.list())
        .await
        .map_err(|_| DiscoveryError::Timeout(deadline))??;

    Ok(DiscoverySnapshot::new(instances))
}
