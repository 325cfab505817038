/*
 * Appsgate - Apps proxy for chat-server integrations
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Shared runtime utilities for Appsgate services.
//!
//! - [`CircuitBreaker`]: consecutive-failure tracking with a single half-open probe,
//!   admitted through a [`BreakerPermit`]
//! - [`BreakerSet`]: lazily created breakers keyed by upstream name (one per app)
//! - [`shutdown_signal`]: graceful SIGINT/SIGTERM handler

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// Returned by [`CircuitBreaker::acquire`] while the breaker rejects calls.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit open for {name}: {failures} consecutive failures")]
pub struct BreakerOpen {
    pub name: String,
    pub failures: u32,
}

/// Thread-safe circuit breaker: CLOSED → OPEN → HALF-OPEN.
///
/// After `threshold` consecutive failures the breaker opens and rejects calls
/// for `half_open_secs`. Then exactly one probe is let through; its outcome
/// either closes the breaker or re-opens it for another window.
pub struct CircuitBreaker {
    name: String,
    failure_count: AtomicU32,
    last_failure_epoch_ms: AtomicU64,
    probe_in_flight: AtomicBool,
    threshold: u32,
    half_open_secs: u64,
}

/// Admission for one upstream call, returned by [`CircuitBreaker::acquire`].
///
/// Resolve it with [`BreakerPermit::success`] or [`BreakerPermit::failure`].
/// A permit dropped unresolved records nothing, and a half-open probe slot
/// it holds is released so the next caller can probe again.
#[must_use]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
}

impl BreakerPermit<'_> {
    /// Whether this call is the single half-open probe.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(self) {
        self.breaker.record_success();
    }

    pub fn failure(self) {
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.probe {
            self.breaker.probe_in_flight.store(false, Ordering::Release);
        }
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: &str, threshold: u32, half_open_secs: u64) -> Self {
        Self {
            name: name.to_string(),
            failure_count: AtomicU32::new(0),
            last_failure_epoch_ms: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            threshold: threshold.max(1),
            half_open_secs,
        }
    }

    fn tripped(&self) -> bool {
        self.failure_count.load(Ordering::Relaxed) >= self.threshold
    }

    fn window_elapsed(&self) -> bool {
        let last_ms = self.last_failure_epoch_ms.load(Ordering::Relaxed);
        now_epoch_ms().saturating_sub(last_ms) / 1000 >= self.half_open_secs
    }

    /// Returns `true` while a call would be rejected. Never takes the probe.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.tripped()
            && (!self.window_elapsed() || self.probe_in_flight.load(Ordering::Acquire))
    }

    /// Admits one call, or rejects it while the breaker is open.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerOpen`] while the breaker is open or its half-open
    /// probe is already in flight.
    pub fn acquire(&self) -> Result<BreakerPermit<'_>, BreakerOpen> {
        if !self.tripped() {
            return Ok(BreakerPermit {
                breaker: self,
                probe: false,
            });
        }
        if self.window_elapsed()
            && self
                .probe_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            return Ok(BreakerPermit {
                breaker: self,
                probe: true,
            });
        }
        Err(BreakerOpen {
            name: self.name.clone(),
            failures: self.failure_count.load(Ordering::Relaxed),
        })
    }

    pub fn record_success(&self) {
        if self.failure_count.swap(0, Ordering::Relaxed) >= self.threshold {
            info!(upstream = %self.name, "circuit closed");
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_epoch_ms
            .store(now_epoch_ms(), Ordering::Relaxed);
        if failures == self.threshold {
            warn!(upstream = %self.name, failures, "circuit opened");
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Breaker set
// ---------------------------------------------------------------------------

/// Breakers created on first use, sharing one threshold and window.
pub struct BreakerSet {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    threshold: u32,
    half_open_secs: u64,
}

impl BreakerSet {
    #[must_use]
    pub fn new(threshold: u32, half_open_secs: u64) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            threshold,
            half_open_secs,
        }
    }

    /// Breaker for `name`, created closed if not yet tracked.
    #[must_use]
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut map = self
            .breakers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(map.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(name, self.threshold, self.half_open_secs))
        }))
    }

    /// Forget the breaker for `name`, e.g. after the upstream is reconfigured.
    pub fn reset(&self, name: &str) {
        let mut map = self
            .breakers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.remove(name);
    }
}

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Wait for SIGINT (ctrl-c) or SIGTERM, then return.
///
/// Use with `axum::serve(...).with_graceful_shutdown(...)`.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .unwrap_or_else(|e| error!(error = %e, "ctrl-c handler failed"));
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler unavailable, relying on ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_starts_closed() {
        let cb = CircuitBreaker::new("com.example.app", 3, 30);
        assert!(!cb.is_open());
        let permit = cb.acquire().unwrap();
        assert!(!permit.is_probe());
    }

    #[test]
    fn test_breaker_opens_after_threshold() {
        let cb = CircuitBreaker::new("com.example.app", 3, 30);
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open(), "still closed at 2 failures");
        cb.record_failure();
        let err = cb.acquire().err().unwrap();
        assert_eq!(err.name, "com.example.app");
        assert_eq!(err.failures, 3);
        assert!(err.to_string().contains("circuit open"));
    }

    #[test]
    fn test_breaker_resets_on_success() {
        let cb = CircuitBreaker::new("app", 2, 30);
        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_open());
        cb.record_success();
        assert!(cb.acquire().is_ok());
    }

    #[test]
    fn test_breaker_single_probe_when_half_open() {
        let cb = CircuitBreaker::new("app", 1, 0);
        cb.record_failure();
        assert!(!cb.is_open(), "window elapsed, a probe may go");
        let probe = cb.acquire().unwrap();
        assert!(probe.is_probe());
        assert!(cb.is_open(), "second caller waits for the probe");
        assert!(cb.acquire().is_err());
        probe.success();
        assert!(!cb.is_open());
        assert!(!cb.acquire().unwrap().is_probe());
    }

    #[test]
    fn test_failed_probe_reopens() {
        let cb = CircuitBreaker::new("app", 1, 3600);
        cb.record_failure();
        assert!(cb.acquire().is_err());

        let cb = CircuitBreaker::new("app", 1, 0);
        cb.record_failure();
        cb.acquire().unwrap().failure();
        let probe = cb.acquire().unwrap();
        assert!(probe.is_probe(), "next window gets a fresh probe");
    }

    #[test]
    fn test_dropped_probe_releases_slot() {
        let cb = CircuitBreaker::new("app", 1, 0);
        cb.record_failure();
        let probe = cb.acquire().unwrap();
        assert!(cb.acquire().is_err());
        drop(probe);
        assert!(!cb.is_open());
        assert!(cb.acquire().unwrap().is_probe(), "breaker still half-open");
    }

    #[test]
    fn test_closed_permit_drop_keeps_probe() {
        let cb = CircuitBreaker::new("app", 1, 0);
        let closed = cb.acquire().unwrap();
        cb.record_failure();
        let probe = cb.acquire().unwrap();
        drop(closed);
        assert!(cb.acquire().is_err(), "probe slot stays taken");
        drop(probe);
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let cb = CircuitBreaker::new("app", 0, 30);
        assert!(!cb.is_open());
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn test_breaker_set_shares_per_name() {
        let set = BreakerSet::new(1, 60);
        set.get("a").record_failure();
        assert!(set.get("a").is_open());
        assert!(!set.get("b").is_open(), "breakers are independent per name");
        set.reset("a");
        assert!(!set.get("a").is_open());
    }
}
