use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::config::{AdvancedConfig, ClientProfile};
use crate::decode::BodyDecoder;
use crate::error::{Error, TimeoutPhase};
use crate::metrics::{ClientMetrics, ClientMetricsSnapshot};
use crate::request::Request;
use crate::response::{RawResponse, Response};
use crate::retry::{RetryAll, RetryConfig, RetryDecision, RetryPolicy, RetryPredicate};
use crate::telemetry::{Outcome, RequestEvent, TelemetrySink, TracingTelemetry};
use crate::transport::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_RESPONSE_BODY_BYTES, HyperTransport, Transport,
};
use crate::util::{merge_headers, parse_header_name, parse_header_value, redact_uri_for_logs};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CLIENT_NAME: &str = "reqauth";

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const STOPPED: u8 = 2;

/// Admission, draining and cancellation for one executor.
#[derive(Debug, Default)]
struct Lifecycle {
    state: AtomicU8,
    in_flight: AtomicUsize,
    drained: Notify,
    cancel: CancellationToken,
    released: AtomicBool,
}

/// Holds one admitted logical request in flight until dropped.
pub(crate) struct Admission<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.lifecycle.leave();
    }
}

impl Lifecycle {
    fn enter(&self) -> Result<Admission<'_>, Error> {
        if self.state.load(Ordering::SeqCst) != RUNNING {
            return Err(Error::ClientShutdown);
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let active = Admission { lifecycle: self };
        if self.state.load(Ordering::SeqCst) != RUNNING {
            return Err(Error::ClientShutdown);
        }
        Ok(active)
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn drain(&self) {
        loop {
            let drained = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }

    fn advance_to(&self, next: u8) {
        self.state.fetch_max(next, Ordering::SeqCst);
    }

    /// True exactly once.
    fn take_release(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }
}

pub struct RequestExecutorBuilder {
    client_name: String,
    request_timeout: Duration,
    connect_timeout: Duration,
    max_response_body_bytes: usize,
    default_headers: HeaderMap,
    retry_policy: Option<RetryPolicy>,
    retry_predicate: Option<Arc<dyn RetryPredicate>>,
    telemetry_enabled: bool,
    telemetry_sink: Arc<dyn TelemetrySink>,
    metrics_enabled: bool,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for RequestExecutorBuilder {
    fn default() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            default_headers: HeaderMap::new(),
            retry_policy: None,
            retry_predicate: None,
            telemetry_enabled: true,
            telemetry_sink: Arc::new(TracingTelemetry),
            metrics_enabled: false,
            transport: None,
        }
    }
}

impl RequestExecutorBuilder {
    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    /// Applies to the default transport only; a custom transport owns its
    /// own connect deadline.
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    pub fn retry_predicate_arc(mut self, retry_predicate: Arc<dyn RetryPredicate>) -> Self {
        self.retry_predicate = Some(retry_predicate);
        self
    }

    pub fn retry_predicate<P>(self, retry_predicate: P) -> Self
    where
        P: RetryPredicate + 'static,
    {
        self.retry_predicate_arc(Arc::new(retry_predicate))
    }

    pub fn telemetry_enabled(mut self, enabled: bool) -> Self {
        self.telemetry_enabled = enabled;
        self
    }

    pub fn telemetry_sink_arc(mut self, telemetry_sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry_sink = telemetry_sink;
        self
    }

    pub fn telemetry_sink<S>(self, telemetry_sink: S) -> Self
    where
        S: TelemetrySink + 'static,
    {
        self.telemetry_sink_arc(Arc::new(telemetry_sink))
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn transport<T>(self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport_arc(Arc::new(transport))
    }

    pub fn profile(mut self, profile: ClientProfile) -> Self {
        let defaults = profile.defaults();
        self.request_timeout = defaults.request_timeout;
        self.connect_timeout = defaults.connect_timeout;
        self.retry_policy = Some(defaults.retry_policy);
        self.max_response_body_bytes = defaults.max_response_body_bytes;
        self
    }

    pub fn advanced(mut self, config: AdvancedConfig) -> Self {
        if let Some(request_timeout) = config.request_timeout {
            self = self.request_timeout(request_timeout);
        }
        if let Some(connect_timeout) = config.connect_timeout {
            self = self.connect_timeout(connect_timeout);
        }
        if let Some(max_response_body_bytes) = config.max_response_body_bytes {
            self = self.max_response_body_bytes(max_response_body_bytes);
        }
        if let Some(retry_policy) = config.retry_policy {
            self.retry_policy = Some(retry_policy);
        }
        if let Some(enabled) = config.telemetry_enabled {
            self.telemetry_enabled = enabled;
        }
        if let Some(enabled) = config.metrics_enabled {
            self.metrics_enabled = enabled;
        }
        self
    }

    pub fn build(self) -> crate::Result<RequestExecutor> {
        if self.client_name.trim().is_empty() {
            return Err(Error::configuration("client_name", "must not be empty"));
        }
        let retry = match (self.retry_policy, self.retry_predicate) {
            (Some(policy), predicate) => Some(RetryConfig {
                policy,
                predicate: predicate.unwrap_or_else(|| Arc::new(RetryAll)),
            }),
            (None, Some(_)) => {
                return Err(Error::configuration(
                    "retry_predicate",
                    "a retry predicate needs a retry policy",
                ));
            }
            (None, None) => None,
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HyperTransport::builder()
                    .connect_timeout(self.connect_timeout)
                    .max_response_body_bytes(self.max_response_body_bytes)
                    .user_agent(self.client_name.clone())
                    .build()?,
            ),
        };

        Ok(RequestExecutor {
            inner: Arc::new(ExecutorInner {
                client_name: self.client_name,
                request_timeout: self.request_timeout,
                default_headers: self.default_headers,
                retry,
                telemetry: self.telemetry_enabled.then_some(self.telemetry_sink),
                metrics: ClientMetrics::with_enabled(self.metrics_enabled),
                transport,
                request_counter: AtomicU64::new(0),
                lifecycle: Lifecycle::default(),
            }),
        })
    }
}

struct ExecutorInner {
    client_name: String,
    request_timeout: Duration,
    default_headers: HeaderMap,
    retry: Option<RetryConfig>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    metrics: ClientMetrics,
    transport: Arc<dyn Transport>,
    request_counter: AtomicU64,
    lifecycle: Lifecycle,
}

/// Runs requests over a shared [`Transport`], retrying failures according
/// to the configured predicate and policy.
///
/// Cloning is cheap and clones share the transport, counters and shutdown
/// state.
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<ExecutorInner>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestExecutor")
            .field("client_name", &self.inner.client_name)
            .field("request_timeout", &self.inner.request_timeout)
            .field(
                "retry_policy",
                &self.inner.retry.as_ref().map(|retry| &retry.policy),
            )
            .field("telemetry_enabled", &self.inner.telemetry.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    pub fn builder() -> RequestExecutorBuilder {
        RequestExecutorBuilder::default()
    }

    pub fn client_name(&self) -> &str {
        &self.inner.client_name
    }

    /// Physical attempts issued so far, retries included.
    pub fn request_count(&self) -> u64 {
        self.inner.request_counter.load(Ordering::Relaxed)
    }

    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub(crate) fn metrics(&self) -> &ClientMetrics {
        &self.inner.metrics
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lifecycle.state.load(Ordering::SeqCst) != RUNNING
    }

    pub async fn execute<D>(
        &self,
        request: &Request,
        decoder: D,
    ) -> crate::Result<Response<D::Output>>
    where
        D: BodyDecoder,
    {
        self.execute_raw(request).await?.decode(&decoder)
    }

    /// Like [`execute`](Self::execute) but leaves the body undecoded.
    pub async fn execute_raw(&self, request: &Request) -> crate::Result<RawResponse> {
        let admission = self.admit()?;
        self.execute_admitted(&admission, request).await
    }

    /// Counts a logical request as in flight until the returned guard drops,
    /// so a graceful shutdown waits for it even between physical sends.
    pub(crate) fn admit(&self) -> crate::Result<Admission<'_>> {
        self.inner.lifecycle.enter()
    }

    /// Sends under an admission taken earlier from this executor with
    /// [`admit`](Self::admit). Forced shutdown still cancels it.
    pub(crate) async fn execute_admitted(
        &self,
        _admission: &Admission<'_>,
        request: &Request,
    ) -> crate::Result<RawResponse> {
        let inner = &*self.inner;
        let mut request = request.clone();
        let merged_headers = merge_headers(&inner.default_headers, request.headers());
        *request.headers_mut() = merged_headers;

        inner.metrics.record_request_started();
        let _in_flight = inner.metrics.enter_in_flight();
        let started_at = Instant::now();

        let result = tokio::select! {
            biased;
            _ = inner.lifecycle.cancel.cancelled() => Err(Error::Cancelled {
                method: request.method().clone(),
                uri: redact_uri_for_logs(request.uri()),
            }),
            result = self.run_with_retry(&request) => result,
        };

        match &result {
            Ok(response) => inner
                .metrics
                .record_request_succeeded(response.status().as_u16(), started_at.elapsed()),
            Err(error) => inner
                .metrics
                .record_request_failed(error, started_at.elapsed()),
        }
        result
    }

    async fn run_with_retry(&self, request: &Request) -> crate::Result<RawResponse> {
        let mut attempt = 1_usize;
        loop {
            let error = match self.run_attempt(request, attempt).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };
            let Some(retry) = &self.inner.retry else {
                return Err(error);
            };
            let RetryDecision::RetryAfter(delay) = retry.decide(&error, attempt) else {
                debug!(attempt, error = %error, "not retrying request");
                return Err(error);
            };
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying request"
            );
            self.inner.metrics.record_retry();
            if !delay.is_zero() {
                sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn run_attempt(&self, request: &Request, attempt: usize) -> crate::Result<RawResponse> {
        let inner = &*self.inner;
        let request_number = inner.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        inner.metrics.record_attempt();
        let redacted_uri = redact_uri_for_logs(request.uri());
        let span = info_span!(
            "reqauth.request",
            client = %inner.client_name,
            method = %request.method(),
            uri = %redacted_uri,
            attempt = attempt,
            request_number = request_number
        );
        let handle = inner
            .telemetry
            .as_ref()
            .map(|sink| sink.begin_event(request_number));
        let timeout_value = request.timeout().unwrap_or(inner.request_timeout);

        let result = async {
            debug!("sending request");
            match timeout(timeout_value, inner.transport.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    phase: TimeoutPhase::Request,
                    timeout_ms: timeout_value.as_millis(),
                    method: request.method().clone(),
                    uri: redacted_uri.clone(),
                }),
            }
        }
        .instrument(span)
        .await;

        if let (Some(sink), Some(handle)) = (&inner.telemetry, handle) {
            let duration = handle.elapsed();
            let event = RequestEvent {
                client: inner.client_name.clone(),
                method: request.method().clone(),
                host: request.host().to_owned(),
                path: request.path().to_owned(),
                outcome: if result.is_ok() {
                    Outcome::Success
                } else {
                    Outcome::Failure
                },
                status: result
                    .as_ref()
                    .ok()
                    .map(|response| response.status().as_u16()),
                failure: result.as_ref().err().map(ToString::to_string),
                duration,
                request_number,
                attempt,
            };
            if let Err(error) = sink.commit(handle, &event) {
                debug!(error = %error, request_number, "dropping telemetry event");
            }
        }
        result
    }

    /// Stops admitting requests, waits for in-flight ones to finish, then
    /// releases the transport. Safe to call more than once.
    pub async fn shutdown(&self) {
        let lifecycle = &self.inner.lifecycle;
        lifecycle.advance_to(DRAINING);
        lifecycle.drain().await;
        lifecycle.advance_to(STOPPED);
        self.release_transport();
    }

    /// Stops admitting requests and cancels in-flight ones, including their
    /// backoff waits. Safe to call more than once.
    pub fn shutdown_now(&self) {
        let lifecycle = &self.inner.lifecycle;
        lifecycle.advance_to(STOPPED);
        lifecycle.cancel.cancel();
        self.release_transport();
    }

    fn release_transport(&self) {
        if self.inner.lifecycle.take_release() {
            debug!(client = %self.inner.client_name, "releasing transport");
            self.inner.transport.close();
        }
    }
}
