//! Continuous-refill token bucket.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// Why a bucket could not hand out the requested tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Shortfall {
    /// Not enough tokens right now; `n` tokens will be available after the duration.
    #[error("not enough tokens, retry after {0:?}")]
    RetryAfter(Duration),

    /// The request can never be satisfied because it is larger than the burst.
    #[error("requested {requested} tokens but burst is {burst}")]
    ExceedsBurst { requested: u32, burst: u32 },

    #[error("cancelled while waiting for tokens")]
    Cancelled,
}

struct State {
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

/// A token bucket holding up to `burst` tokens, refilled at `rate` tokens per second.
///
/// The token level is recomputed from elapsed time whenever the bucket is
/// touched, so no background refill task exists. Accounting is guarded by an
/// internal mutex and the bucket can be shared freely between tasks.
pub struct TokenBucket {
    rate: f64,
    burst: u32,
    state: Mutex<State>,
}

/// Reject parameters that would make the refill math meaningless.
pub(crate) fn validate(rate: f64, burst: u32) -> Result<(), String> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(format!(
            "rate must be a positive number of tokens per second, got {rate}"
        ));
    }
    if burst == 0 {
        return Err("burst must be at least 1".to_string());
    }
    Ok(())
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// Fails with [`Error::Config`] when `rate` is not a positive finite number
    /// or `burst` is zero.
    pub fn new(rate: f64, burst: u32) -> crate::Result<Self> {
        validate(rate, burst).map_err(Error::Config)?;
        Ok(Self::unchecked(rate, burst))
    }

    /// Create a full bucket from parameters that were already validated.
    pub(crate) fn unchecked(rate: f64, burst: u32) -> Self {
        let now = Instant::now();
        Self {
            rate,
            burst,
            state: Mutex::new(State {
                tokens: f64::from(burst),
                last_refill: now,
                last_used: now,
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Tokens currently available.
    pub fn available(&self) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    /// Take `n` tokens now or report how long until they would be available.
    /// Never blocks.
    pub fn try_acquire(&self, n: u32) -> Result<(), Shortfall> {
        if n > self.burst {
            return Err(Shortfall::ExceedsBurst {
                requested: n,
                burst: self.burst,
            });
        }

        let mut state = self.lock();
        let now = Instant::now();
        self.refill(&mut state, now);

        let wanted = f64::from(n);
        if state.tokens >= wanted {
            state.tokens -= wanted;
            state.last_used = now;
            Ok(())
        } else {
            // A slow enough rate puts the next token past what Duration can hold.
            let deficit = wanted - state.tokens;
            let wait = Duration::try_from_secs_f64(deficit / self.rate).unwrap_or(Duration::MAX);
            Err(Shortfall::RetryAfter(wait))
        }
    }

    /// Wait until `n` tokens can be taken, or until `cancel` fires.
    ///
    /// Tokens are only taken at the moment of success, so an abandoned wait
    /// leaves nothing behind. Waiters are not served in FIFO order.
    pub async fn acquire(&self, n: u32, cancel: &CancellationToken) -> Result<(), Shortfall> {
        loop {
            if cancel.is_cancelled() {
                return Err(Shortfall::Cancelled);
            }

            let wait = match self.try_acquire(n) {
                Ok(()) => return Ok(()),
                Err(Shortfall::RetryAfter(wait)) => wait,
                Err(other) => return Err(other),
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Shortfall::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Time since tokens were last taken (or since creation if never).
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.lock().last_used)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill(&self, state: &mut State, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(f64::from(self.burst));
        state.last_refill = now;
    }
}
