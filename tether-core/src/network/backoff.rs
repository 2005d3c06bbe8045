//! Reconnect delay policy: bounded exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Parameters for reconnect delays.
///
/// The delay before retry `n` (zero-based) is
/// `min(initial × multiplier^n, max)` plus a uniform jitter in
/// `[0, jitter_ratio × delay]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub jitter_ratio: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max: Duration::from_secs(30),
            jitter_ratio: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// A policy with a constant delay and no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            multiplier: 1.0,
            max: delay,
            jitter_ratio: 0.0,
        }
    }

    /// Fresh backoff state for this policy.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempt: 0,
        }
    }
}

/// Per-run backoff state. Reset after every successful connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The un-jittered delay for the current attempt.
    pub fn base_delay(&self) -> Duration {
        let initial = self.policy.initial.as_secs_f64();
        let max = self.policy.max.as_secs_f64().max(initial);
        let factor = self.policy.multiplier.max(1.0);
        let exp = i32::try_from(self.attempt).unwrap_or(i32::MAX);
        Duration::from_secs_f64((initial * factor.powi(exp)).min(max))
    }

    /// Delay to wait before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);

        let ratio = self.policy.jitter_ratio.clamp(0.0, 1.0);
        if ratio == 0.0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=base.as_secs_f64() * ratio);
        base + Duration::from_secs_f64(jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
