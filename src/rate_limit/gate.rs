//! Two-tier admission: the global bucket first, then the caller's own bucket.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::bucket::Shortfall;
use super::global::GlobalLimiter;
use super::registry::{ClientRegistry, Eviction};
use crate::config::RateLimitConfig;

/// How the gate behaves when a bucket is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Queue the request until a token frees up or its cancellation fires.
    #[default]
    Wait,
    /// Refuse immediately and tell the caller when to retry.
    Reject,
}

/// Why a request was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    #[error("global request rate exceeded")]
    Global { retry_after: Option<Duration> },

    #[error("client request rate exceeded")]
    PerClient { retry_after: Option<Duration> },

    #[error("cancelled while waiting for admission")]
    CancelledWhileWaiting,
}

impl Denial {
    /// Suggested delay before retrying, when one is known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Denial::Global { retry_after } | Denial::PerClient { retry_after } => *retry_after,
            Denial::CancelledWhileWaiting => None,
        }
    }

    /// Short label for logs.
    pub fn scope(&self) -> &'static str {
        match self {
            Denial::Global { .. } => "global",
            Denial::PerClient { .. } => "per_client",
            Denial::CancelledWhileWaiting => "cancelled",
        }
    }
}

fn deny(shortfall: Shortfall, tier: fn(Option<Duration>) -> Denial) -> Denial {
    match shortfall {
        Shortfall::Cancelled => Denial::CancelledWhileWaiting,
        Shortfall::RetryAfter(wait) => tier(Some(wait)),
        Shortfall::ExceedsBurst { .. } => tier(None),
    }
}

fn global_tier(retry_after: Option<Duration>) -> Denial {
    Denial::Global { retry_after }
}

fn client_tier(retry_after: Option<Duration>) -> Denial {
    Denial::PerClient { retry_after }
}

/// Composes the [`GlobalLimiter`] and the [`ClientRegistry`].
///
/// Holds no state of its own; clones share the same limiters.
#[derive(Clone)]
pub struct Gate {
    global: Arc<GlobalLimiter>,
    clients: Arc<ClientRegistry>,
    mode: Mode,
}

impl Gate {
    pub fn new(global: Arc<GlobalLimiter>, clients: Arc<ClientRegistry>, mode: Mode) -> Self {
        Self {
            global,
            clients,
            mode,
        }
    }

    /// Build both tiers from configuration, failing on invalid rates or bursts.
    pub fn from_config(config: &RateLimitConfig) -> crate::Result<Self> {
        Ok(Self::new(
            Arc::new(GlobalLimiter::new(config.global_rate, config.global_burst)?),
            Arc::new(ClientRegistry::new(config.client_rate, config.client_burst)?),
            config.mode,
        ))
    }

    /// Start reclaiming idle client buckets on the configured schedule.
    pub fn start_eviction(&self, config: &RateLimitConfig) -> Eviction {
        self.clients
            .start_eviction(config.cleanup_interval(), config.idle_expiry())
    }

    /// Decide whether a request from `identity` may proceed.
    ///
    /// A global denial returns before the client registry is touched, so a
    /// flood of new identities cannot allocate buckets while the service as a
    /// whole is saturated.
    pub async fn admit(&self, identity: &str, cancel: &CancellationToken) -> Result<(), Denial> {
        let result = match self.mode {
            Mode::Wait => self.admit_waiting(identity, cancel).await,
            Mode::Reject => self.admit_now(identity),
        };

        if let Err(denial) = &result {
            warn!(client = identity, scope = denial.scope(), "Request denied: {denial}");
        }
        result
    }

    async fn admit_waiting(&self, identity: &str, cancel: &CancellationToken) -> Result<(), Denial> {
        self.global
            .admit(cancel)
            .await
            .map_err(|s| deny(s, global_tier))?;

        let bucket = self.clients.get_or_create(identity);
        bucket
            .acquire(1, cancel)
            .await
            .map_err(|s| deny(s, client_tier))
    }

    fn admit_now(&self, identity: &str) -> Result<(), Denial> {
        self.global.check().map_err(|s| deny(s, global_tier))?;

        self.clients
            .get_or_create(identity)
            .try_acquire(1)
            .map_err(|s| deny(s, client_tier))
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn global(&self) -> &GlobalLimiter {
        &self.global
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }
}
