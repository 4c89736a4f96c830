//! Reconnection scheduler: backoff delays, retry ceiling and the timers
//! that drive retries.
//!
//! Every timer the manager creates is spawned through this type, so
//! [`ReconnectScheduler::cancel_all`] is the single place that stops them.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::ConnectionConfig;

/// A spawned timer and the token that cancels it.
struct PendingTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Computes retry delays, counts attempts and owns retry timers.
pub struct ReconnectScheduler {
    base_delay: Duration,
    max_delay: Duration,
    factor: f64,
    jitter: f64,
    max_attempts: u32,
    attempt: u32,
    timers: Vec<PendingTimer>,
}

impl ReconnectScheduler {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            factor: config.backoff_factor,
            jitter: config.jitter,
            max_attempts: config.max_reconnection_attempts,
            attempt: 0,
            timers: Vec::new(),
        }
    }

    /// Delay before the given attempt (1-based), or `None` once the attempt
    /// count exceeds the configured ceiling.
    pub fn schedule_next(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if self.jitter <= 0.0 {
            return Some(Duration::from_secs_f64(capped));
        }
        let spread = capped * self.jitter;
        let with_jitter =
            (capped + spread * jitter_offset()).clamp(0.0, self.max_delay.as_secs_f64());
        Some(Duration::from_secs_f64(with_jitter))
    }

    /// Advances the attempt counter and returns `(attempt, delay)`, or
    /// `None` when the ceiling is reached. The counter is left untouched on
    /// exhaustion so the final count stays observable.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        let next = self.attempt.saturating_add(1);
        let delay = self.schedule_next(next)?;
        self.attempt = next;
        Some((next, delay))
    }

    /// Number of retries made since the last established connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Resets the attempt counter; called once a connection is confirmed.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Runs `task` after `delay` unless cancelled first.
    ///
    /// The task itself also stops at its next await point when cancelled.
    pub fn spawn<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.prune();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => {
                        trace!("timer cancelled before firing");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            tokio::select! {
                _ = token.cancelled() => trace!("timer task cancelled"),
                _ = task => {}
            }
        });
        self.timers.push(PendingTimer { cancel, handle });
    }

    /// Timers that have not finished yet.
    pub fn pending(&mut self) -> usize {
        self.prune();
        self.timers.len()
    }

    /// Cancels every pending timer at once and returns how many were live.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.timers.iter().filter(|t| !t.handle.is_finished()).count();
        for timer in self.timers.drain(..) {
            timer.cancel.cancel();
            timer.handle.abort();
        }
        if count > 0 {
            debug!(count, "cancelled pending reconnection timers");
        }
        count
    }

    fn prune(&mut self) {
        self.timers.retain(|t| !t.handle.is_finished());
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Pseudo-random offset in `[-1.0, 1.0)` derived from the clock.
fn jitter_offset() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as f64;
    (nanos / 1_000_000_000.0) * 2.0 - 1.0
}
