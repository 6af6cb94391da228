//! Request identity rotation and backoff
//!
//! Each request goes out with a user agent drawn from a shared pool. An agent
//! that draws a 403/429 is retired for the rest of the process, but the pool
//! never empties.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Upper bound for a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Shared pool of user agents
#[derive(Debug)]
pub struct IdentityPool {
    agents: Mutex<Vec<String>>,
}

impl IdentityPool {
    pub fn new(agents: Vec<String>) -> Self {
        Self {
            agents: Mutex::new(agents),
        }
    }

    /// Random agent from the pool; `None` only if the pool was built empty
    pub fn pick(&self) -> Option<String> {
        let agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        if agents.is_empty() {
            return None;
        }
        Some(agents[fastrand::usize(..agents.len())].clone())
    }

    /// Retires an agent after a block; the last agent is always kept
    ///
    /// Returns whether the agent was removed.
    pub fn retire(&self, agent: &str) -> bool {
        let mut agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        if agents.len() <= 1 {
            return false;
        }
        let before = agents.len();
        agents.retain(|a| a != agent);
        let removed = agents.len() < before;
        if removed {
            tracing::debug!("Retired user agent, {} left", agents.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.agents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exponential backoff: `base * 2^attempt`, capped, with up to 25% jitter
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    let delay = base.saturating_mul(factor).min(MAX_BACKOFF);
    jittered(delay)
}

/// Adds up to 25% random jitter to a delay
pub fn jittered(delay: Duration) -> Duration {
    let extra_ms = (delay.as_millis() as u64) / 4;
    if extra_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(fastrand::u64(..=extra_ms))
}
