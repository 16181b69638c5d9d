//! Two-tier admission control.
//!
//! Every request passes a [`GlobalLimiter`] that bounds aggregate throughput,
//! then a per-client [`TokenBucket`] looked up in the [`ClientRegistry`].
//! Client buckets are created on first use and reclaimed by a background
//! [`Eviction`] task once they have been idle long enough.
//!
//! ```ignore
//! let gate = Gate::from_config(&config.rate_limit)?;
//! let eviction = gate.start_eviction(&config.rate_limit);
//!
//! match gate.admit("203.0.113.7", &cancel).await {
//!     Ok(()) => { /* run the handler */ }
//!     Err(denial) => { /* answer 429 */ }
//! }
//!
//! eviction.stop().await;
//! ```

pub mod bucket;
pub mod gate;
pub mod global;
pub mod registry;

pub use bucket::{Shortfall, TokenBucket};
pub use gate::{Denial, Gate, Mode};
pub use global::GlobalLimiter;
pub use registry::{ClientRegistry, Eviction};
