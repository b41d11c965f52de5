// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

struct State {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket admitting up to `burst` events at once and refilling at
/// `rate` tokens per second. Starts full.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<State>,
}

impl TokenBucket {
    #[must_use]
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst);
        Self {
            rate,
            burst,
            state: Mutex::new(State {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;
        f(&mut state)
    }

    /// Takes a token if one is available.
    pub fn allow(&self) -> bool {
        self.with_state(|state| {
            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                true
            } else {
                false
            }
        })
    }

    /// Takes a token unconditionally, going into debt if needed, and returns
    /// how long the caller must wait before the token is really its own.
    pub fn reserve(&self) -> Duration {
        self.with_state(|state| {
            state.tokens -= 1.0;
            if state.tokens >= 0.0 {
                Duration::ZERO
            } else {
                Duration::try_from_secs_f64(-state.tokens / self.rate)
                    .unwrap_or(Duration::MAX)
            }
        })
    }

    /// Waits until a token is available and takes it.
    pub async fn wait(&self) {
        let delay = self.reserve();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
