//! Per-attempt request events.
//!
//! The executor calls [`TelemetrySink::begin_event`] right before a physical
//! attempt and [`TelemetrySink::commit`] right after it. Commit failures are
//! logged at debug level and otherwise dropped; they never change the outcome
//! of a request.

use std::time::Duration;

use http::Method;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[error("telemetry sink failed: {message}")]
pub struct TelemetryError {
    message: String,
}

impl TelemetryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Started by [`TelemetrySink::begin_event`]; the committed event's duration
/// is measured from here.
#[derive(Clone, Debug)]
pub struct EventHandle {
    request_number: u64,
    started_at: Instant,
}

impl EventHandle {
    pub fn new(request_number: u64) -> Self {
        Self {
            request_number,
            started_at: Instant::now(),
        }
    }

    pub fn request_number(&self) -> u64 {
        self.request_number
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// One physical attempt, as committed to a sink.
#[derive(Clone, Debug)]
pub struct RequestEvent {
    pub client: String,
    pub method: Method,
    pub host: String,
    pub path: String,
    pub outcome: Outcome,
    pub status: Option<u16>,
    pub failure: Option<String>,
    pub duration: Duration,
    /// Per-client counter, incremented once per physical attempt.
    pub request_number: u64,
    /// 1-based attempt within the logical request.
    pub attempt: usize,
}

pub trait TelemetrySink: Send + Sync {
    fn begin_event(&self, request_number: u64) -> EventHandle {
        EventHandle::new(request_number)
    }

    fn commit(&self, handle: EventHandle, event: &RequestEvent) -> Result<(), TelemetryError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn commit(&self, _handle: EventHandle, _event: &RequestEvent) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Emits each event through `tracing` under the `reqauth::telemetry` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn commit(&self, _handle: EventHandle, event: &RequestEvent) -> Result<(), TelemetryError> {
        match event.outcome {
            Outcome::Success => info!(
                target: "reqauth::telemetry",
                client = %event.client,
                method = %event.method,
                host = %event.host,
                path = %event.path,
                outcome = event.outcome.as_str(),
                status = event.status,
                duration_ms = event.duration.as_millis() as u64,
                request_number = event.request_number,
                attempt = event.attempt,
                "http request completed"
            ),
            Outcome::Failure => warn!(
                target: "reqauth::telemetry",
                client = %event.client,
                method = %event.method,
                host = %event.host,
                path = %event.path,
                outcome = event.outcome.as_str(),
                failure = event.failure.as_deref(),
                duration_ms = event.duration.as_millis() as u64,
                request_number = event.request_number,
                attempt = event.attempt,
                "http request failed"
            ),
        }
        Ok(())
    }
}
