use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, TimeoutPhase};
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub attempts: u64,
    pub retries: u64,
    pub timeout_connect: u64,
    pub timeout_request: u64,
    pub transport_errors: u64,
    pub token_requests: u64,
    pub token_refreshes: u64,
    pub refresh_loops: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

/// Opt-in counters shared by an executor and the OAuth client built on it.
/// Every recorder is a no-op when disabled.
#[derive(Clone, Debug, Default)]
pub(crate) struct ClientMetrics {
    inner: Option<Arc<ClientMetricsInner>>,
}

#[derive(Debug, Default)]
struct ClientMetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    timeout_connect: AtomicU64,
    timeout_request: AtomicU64,
    transport_errors: AtomicU64,
    token_requests: AtomicU64,
    token_refreshes: AtomicU64,
    refresh_loops: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    inner: Option<Arc<ClientMetricsInner>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            inner.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl ClientMetrics {
    pub(crate) fn with_enabled(enabled: bool) -> Self {
        if enabled {
            Self {
                inner: Some(Arc::new(ClientMetricsInner::default())),
            }
        } else {
            Self::default()
        }
    }

    fn bump(&self, counter: impl Fn(&ClientMetricsInner) -> &AtomicU64) {
        if let Some(inner) = &self.inner {
            counter(inner).fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_request_started(&self) {
        self.bump(|inner| &inner.requests_started);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        self.bump(|inner| &inner.in_flight);
        InFlightGuard {
            inner: self.inner.clone(),
        }
    }

    pub(crate) fn record_attempt(&self) {
        self.bump(|inner| &inner.attempts);
    }

    pub(crate) fn record_retry(&self) {
        self.bump(|inner| &inner.retries);
    }

    pub(crate) fn record_token_request(&self, refresh: bool) {
        self.bump(|inner| &inner.token_requests);
        if refresh {
            self.bump(|inner| &inner.token_refreshes);
        }
    }

    pub(crate) fn record_refresh_loop(&self) {
        self.bump(|inner| &inner.refresh_loops);
    }

    pub(crate) fn record_request_succeeded(&self, status: u16, latency: Duration) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_latency(inner, latency);
        *lock_unpoisoned(&inner.status_counts)
            .entry(status)
            .or_insert(0) += 1;
    }

    pub(crate) fn record_request_failed(&self, error: &Error, latency: Duration) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(inner, latency);
        let key = match error {
            Error::Timeout { phase, .. } => {
                match phase {
                    TimeoutPhase::Connect => inner.timeout_connect.fetch_add(1, Ordering::Relaxed),
                    TimeoutPhase::Request => inner.timeout_request.fetch_add(1, Ordering::Relaxed),
                };
                format!("timeout:{phase}")
            }
            Error::Transport { kind, .. } => {
                inner.transport_errors.fetch_add(1, Ordering::Relaxed);
                format!("transport:{kind}")
            }
            other => other.code().as_str().to_owned(),
        };
        *lock_unpoisoned(&inner.error_counts).entry(key).or_insert(0) += 1;
    }

    fn record_latency(&self, inner: &ClientMetricsInner, latency: Duration) {
        inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    pub(crate) fn snapshot(&self) -> ClientMetricsSnapshot {
        let Some(inner) = &self.inner else {
            return ClientMetricsSnapshot::default();
        };
        let latency_samples = inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        ClientMetricsSnapshot {
            requests_started: inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: inner.requests_failed.load(Ordering::Relaxed),
            attempts: inner.attempts.load(Ordering::Relaxed),
            retries: inner.retries.load(Ordering::Relaxed),
            timeout_connect: inner.timeout_connect.load(Ordering::Relaxed),
            timeout_request: inner.timeout_request.load(Ordering::Relaxed),
            transport_errors: inner.transport_errors.load(Ordering::Relaxed),
            token_requests: inner.token_requests.load(Ordering::Relaxed),
            token_refreshes: inner.token_refreshes.load(Ordering::Relaxed),
            refresh_loops: inner.refresh_loops.load(Ordering::Relaxed),
            in_flight: inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&inner.error_counts).clone(),
        }
    }
}
