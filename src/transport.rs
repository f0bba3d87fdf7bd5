use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, USER_AGENT};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::classify::{causes, transport_error_kind};
use crate::error::{BoxError, Error, TimeoutPhase};
use crate::request::Request;
use crate::response::RawResponse;
use crate::util::redact_uri_for_logs;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
pub(crate) const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
pub(crate) const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Sends one request and returns the raw response.
///
/// Implementations report failures with [`Error::Transport`], connect
/// deadlines with [`Error::Timeout`] in [`TimeoutPhase::Connect`], and
/// oversized or broken bodies with [`Error::ResponseBodyTooLarge`] /
/// [`Error::ReadBody`]. The overall request deadline is enforced by the
/// executor around `send`.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<RawResponse, Error>>;

    /// Called once when the owning executor shuts down.
    fn close(&self) {}
}

type ReqBody = BoxBody<Bytes, Infallible>;

fn req_body(body: Option<&Bytes>) -> ReqBody {
    Full::new(body.cloned().unwrap_or_default()).boxed()
}

pub struct HyperTransportBuilder {
    connect_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    max_response_body_bytes: usize,
    user_agent: Option<String>,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            user_agent: None,
        }
    }
}

impl HyperTransportBuilder {
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host.max(1);
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> crate::Result<HyperTransport> {
        let user_agent = self
            .user_agent
            .as_deref()
            .map(|value| {
                HeaderValue::from_str(value).map_err(|source| Error::InvalidHeaderValue {
                    name: USER_AGENT.as_str().to_owned(),
                    source,
                })
            })
            .transpose()?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(self.connect_timeout));
        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .build(https);

        Ok(HyperTransport {
            client,
            connect_timeout: self.connect_timeout,
            max_response_body_bytes: self.max_response_body_bytes,
            user_agent,
        })
    }
}

/// The default [`Transport`]: a pooled hyper client over rustls.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<hyper_rustls::HttpsConnector<HttpConnector>, ReqBody>,
    connect_timeout: Duration,
    max_response_body_bytes: usize,
    user_agent: Option<HeaderValue>,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("connect_timeout", &self.connect_timeout)
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::default()
    }

    fn build_request(&self, request: &Request) -> Result<http::Request<ReqBody>, Error> {
        let mut builder = http::Request::builder()
            .method(request.method().clone())
            .uri(request.uri().clone());
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        if let Some(user_agent) = &self.user_agent
            && !request.headers().contains_key(USER_AGENT)
        {
            builder = builder.header(USER_AGENT, user_agent.clone());
        }
        builder
            .body(req_body(request.body()))
            .map_err(|source| Error::RequestBuild { source })
    }

    fn map_send_error(
        &self,
        request: &Request,
        source: hyper_util::client::legacy::Error,
    ) -> Error {
        if source.is_connect() && connect_timed_out(&source) {
            return Error::Timeout {
                phase: TimeoutPhase::Connect,
                timeout_ms: self.connect_timeout.as_millis(),
                method: request.method().clone(),
                uri: redact_uri_for_logs(request.uri()),
            };
        }
        Error::Transport {
            kind: transport_error_kind(&source),
            method: request.method().clone(),
            uri: redact_uri_for_logs(request.uri()),
            source: Box::new(source),
        }
    }

    async fn send_inner(&self, request: &Request) -> Result<RawResponse, Error> {
        let http_request = self.build_request(request)?;
        let response = self
            .client
            .request(http_request)
            .await
            .map_err(|source| self.map_send_error(request, source))?;
        let (parts, body) = response.into_parts();
        let body = read_all_body_limited(body, self.max_response_body_bytes)
            .await
            .map_err(|error| match error {
                ReadBodyError::Read(source) => Error::ReadBody {
                    method: request.method().clone(),
                    uri: redact_uri_for_logs(request.uri()),
                    source: Box::new(source) as BoxError,
                },
                ReadBodyError::TooLarge { actual_bytes } => Error::ResponseBodyTooLarge {
                    limit_bytes: self.max_response_body_bytes,
                    actual_bytes,
                    method: request.method().clone(),
                    uri: redact_uri_for_logs(request.uri()),
                },
            })?;
        Ok(RawResponse::new(parts.status, parts.headers, body))
    }
}

impl Transport for HyperTransport {
    fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<RawResponse, Error>> {
        Box::pin(self.send_inner(request))
    }
}

/// True when an io `TimedOut` sits anywhere in the chain; the connector
/// reports its own connect deadline that way.
fn connect_timed_out(error: &(dyn std::error::Error + 'static)) -> bool {
    causes(error)
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(|io_error| io_error.kind() == std::io::ErrorKind::TimedOut)
}

enum ReadBodyError {
    Read(hyper::Error),
    TooLarge { actual_bytes: usize },
}

async fn read_all_body_limited(
    mut body: Incoming,
    max_bytes: usize,
) -> Result<Bytes, ReadBodyError> {
    let mut collected = Vec::new();
    let mut total_len = 0_usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ReadBodyError::Read)?;
        if let Some(data) = frame.data_ref() {
            total_len = total_len.saturating_add(data.len());
            if total_len > max_bytes {
                return Err(ReadBodyError::TooLarge {
                    actual_bytes: total_len,
                });
            }
            collected.extend_from_slice(data);
        }
    }

    Ok(Bytes::from(collected))
}
