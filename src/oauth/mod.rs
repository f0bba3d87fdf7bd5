//! OAuth2 bearer-token requests with bounded refresh.
//!
//! [`OAuthClient`] attaches the cached token to each request, sends it
//! through a [`RequestExecutor`], and asks a [`RefreshPredicate`] whether the
//! response means the token went stale. If so it fetches a new token and
//! resends, at most `max_refresh_depth` times per logical request before
//! failing with [`Error::RefreshLoopDetected`].
//!
//! The token cache is shared by clones of one client. Concurrent callers that
//! find it empty or stale may each fetch a token; the last store wins and
//! every caller sends the token it fetched itself.

mod store;
mod token;

use std::sync::Arc;

use http::StatusCode;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use tracing::{debug, warn};

pub use self::store::{AccessToken, TokenStore};
pub use self::token::{
    ClientAuthStyle, ClientCredentials, JsonFieldExtractor, TokenExtractor, TokenNotFoundReason,
};
use crate::decode::BodyDecoder;
use crate::error::Error;
use crate::executor::{Admission, RequestExecutor};
use crate::metrics::ClientMetricsSnapshot;
use crate::request::Request;
use crate::response::{RawResponse, Response};
use crate::util::{parse_header_name, redact_uri_for_logs};

/// Default bound on consecutive token refreshes within one logical request.
pub const MAX_REFRESH_DEPTH: usize = 3;

/// Decides whether a response obtained with the current token means the
/// token must be replaced. Only successful sends reach the predicate.
pub trait RefreshPredicate: Send + Sync {
    fn needs_refresh(&self, response: &RawResponse) -> bool;
}

impl<F> RefreshPredicate for F
where
    F: Fn(&RawResponse) -> bool + Send + Sync,
{
    fn needs_refresh(&self, response: &RawResponse) -> bool {
        self(response)
    }
}

#[derive(Clone, Debug)]
pub struct RefreshOnStatus {
    statuses: Vec<StatusCode>,
}

impl RefreshOnStatus {
    pub fn unauthorized() -> Self {
        Self::statuses([StatusCode::UNAUTHORIZED])
    }

    pub fn statuses(statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }
}

impl Default for RefreshOnStatus {
    fn default() -> Self {
        Self::unauthorized()
    }
}

impl RefreshPredicate for RefreshOnStatus {
    fn needs_refresh(&self, response: &RawResponse) -> bool {
        self.statuses.contains(&response.status())
    }
}

type HeaderFormatter = Arc<dyn Fn(&str) -> String + Send + Sync>;

enum TokenSource {
    Request(Request),
    Credentials(ClientCredentials),
}

pub struct OAuthClientBuilder {
    executor: RequestExecutor,
    token_executor: Option<RequestExecutor>,
    token_source: Option<TokenSource>,
    token_extractor: Arc<dyn TokenExtractor>,
    authorization_header: HeaderName,
    header_value: HeaderFormatter,
    refresh_predicate: Option<Arc<dyn RefreshPredicate>>,
    max_refresh_depth: usize,
}

impl OAuthClientBuilder {
    fn new(executor: RequestExecutor) -> Self {
        Self {
            executor,
            token_executor: None,
            token_source: None,
            token_extractor: Arc::new(JsonFieldExtractor::access_token()),
            authorization_header: AUTHORIZATION,
            header_value: Arc::new(|token: &str| format!("Bearer {token}")),
            refresh_predicate: None,
            max_refresh_depth: MAX_REFRESH_DEPTH,
        }
    }

    /// Sends this exact request to obtain a token.
    pub fn token_request(mut self, request: Request) -> Self {
        self.token_source = Some(TokenSource::Request(request));
        self
    }

    pub fn client_credentials(mut self, credentials: ClientCredentials) -> Self {
        self.token_source = Some(TokenSource::Credentials(credentials));
        self
    }

    /// Executor for token requests, with its own retry policy. Defaults to
    /// the executor used for authorized requests.
    pub fn token_executor(mut self, executor: RequestExecutor) -> Self {
        self.token_executor = Some(executor);
        self
    }

    pub fn token_extractor<E>(mut self, extractor: E) -> Self
    where
        E: TokenExtractor + 'static,
    {
        self.token_extractor = Arc::new(extractor);
        self
    }

    pub fn authorization_header(mut self, name: HeaderName) -> Self {
        self.authorization_header = name;
        self
    }

    pub fn try_authorization_header(self, name: &str) -> crate::Result<Self> {
        Ok(self.authorization_header(parse_header_name(name)?))
    }

    pub fn header_value<F>(mut self, format: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.header_value = Arc::new(format);
        self
    }

    pub fn refresh_when<P>(mut self, predicate: P) -> Self
    where
        P: RefreshPredicate + 'static,
    {
        self.refresh_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn max_refresh_depth(mut self, max_refresh_depth: usize) -> Self {
        self.max_refresh_depth = max_refresh_depth;
        self
    }

    pub fn build(self) -> crate::Result<OAuthClient> {
        let token_request = match self.token_source {
            Some(TokenSource::Request(request)) => request,
            Some(TokenSource::Credentials(credentials)) => credentials.to_request()?,
            None => {
                return Err(Error::configuration(
                    "token_request",
                    "set a token request or client credentials",
                ));
            }
        };
        let Some(refresh_predicate) = self.refresh_predicate else {
            return Err(Error::configuration(
                "refresh_when",
                "a refresh predicate is required",
            ));
        };
        if self.max_refresh_depth == 0 {
            return Err(Error::configuration(
                "max_refresh_depth",
                "must be at least 1",
            ));
        }

        let token_executor = self
            .token_executor
            .unwrap_or_else(|| self.executor.clone());
        Ok(OAuthClient {
            inner: Arc::new(OAuthInner {
                executor: self.executor,
                token_executor,
                token_request,
                token_extractor: self.token_extractor,
                authorization_header: self.authorization_header,
                header_value: self.header_value,
                refresh_predicate,
                max_refresh_depth: self.max_refresh_depth,
                store: TokenStore::new(),
            }),
        })
    }
}

struct OAuthInner {
    executor: RequestExecutor,
    token_executor: RequestExecutor,
    token_request: Request,
    token_extractor: Arc<dyn TokenExtractor>,
    authorization_header: HeaderName,
    header_value: HeaderFormatter,
    refresh_predicate: Arc<dyn RefreshPredicate>,
    max_refresh_depth: usize,
    store: TokenStore,
}

/// A [`RequestExecutor`] that authorizes every request with a cached OAuth2
/// bearer token. Clones share the token cache.
#[derive(Clone)]
pub struct OAuthClient {
    inner: Arc<OAuthInner>,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OAuthClient")
            .field("executor", &self.inner.executor)
            .field("authorization_header", &self.inner.authorization_header)
            .field("max_refresh_depth", &self.inner.max_refresh_depth)
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    pub fn builder(executor: RequestExecutor) -> OAuthClientBuilder {
        OAuthClientBuilder::new(executor)
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.inner.executor
    }

    pub fn max_refresh_depth(&self) -> usize {
        self.inner.max_refresh_depth
    }

    pub fn cached_token(&self) -> Option<AccessToken> {
        self.inner.store.load()
    }

    /// Sends `request` with the cached token, fetching one first if none is
    /// cached.
    pub async fn send<D>(&self, request: &Request, decoder: D) -> crate::Result<Response<D::Output>>
    where
        D: BodyDecoder,
    {
        self.run(request, false).await?.decode(&decoder)
    }

    /// Like [`send`](Self::send) but always fetches a fresh token first.
    pub async fn send_with_refresh<D>(
        &self,
        request: &Request,
        decoder: D,
    ) -> crate::Result<Response<D::Output>>
    where
        D: BodyDecoder,
    {
        self.run(request, true).await?.decode(&decoder)
    }

    pub async fn send_raw(&self, request: &Request) -> crate::Result<RawResponse> {
        self.run(request, false).await
    }

    /// Fetches a token unconditionally and caches it.
    pub async fn fetch_token(&self) -> crate::Result<AccessToken> {
        let admission = self.inner.token_executor.admit()?;
        self.request_token(&admission, true).await
    }

    /// One logical request holds an admission on both executors for the whole
    /// refresh loop, so a graceful shutdown waits through token fetches too.
    async fn run(&self, request: &Request, mut force_refresh: bool) -> crate::Result<RawResponse> {
        let inner = &*self.inner;
        let api_admission = inner.executor.admit()?;
        let token_admission = inner.token_executor.admit()?;
        let mut depth = 0_usize;
        loop {
            if depth == inner.max_refresh_depth {
                inner.executor.metrics().record_refresh_loop();
                warn!(
                    depth,
                    method = %request.method(),
                    uri = %redact_uri_for_logs(request.uri()),
                    "token refresh loop detected"
                );
                return Err(Error::RefreshLoopDetected { depth });
            }

            let token = match inner.store.load() {
                Some(token) if !force_refresh => token,
                cached => self.request_token(&token_admission, cached.is_some()).await?,
            };
            let authorized = request.with_header(
                inner.authorization_header.clone(),
                self.header_value(&token)?,
            );
            let response = inner
                .executor
                .execute_admitted(&api_admission, &authorized)
                .await?;
            if !inner.refresh_predicate.needs_refresh(&response) {
                return Ok(response);
            }

            debug!(
                depth,
                status = response.status().as_u16(),
                "response requires a token refresh"
            );
            force_refresh = true;
            depth += 1;
        }
    }

    async fn request_token(
        &self,
        admission: &Admission<'_>,
        refresh: bool,
    ) -> crate::Result<AccessToken> {
        let inner = &*self.inner;
        inner.executor.metrics().record_token_request(refresh);
        debug!(
            refresh,
            uri = %redact_uri_for_logs(inner.token_request.uri()),
            "requesting access token"
        );
        let response = inner
            .token_executor
            .execute_admitted(admission, &inner.token_request)
            .await?;
        let token = inner.token_extractor.extract(&response)?;
        inner.store.store(token.clone());
        Ok(token)
    }

    fn header_value(&self, token: &AccessToken) -> crate::Result<HeaderValue> {
        let formatted = (self.inner.header_value)(token.as_str());
        let mut value =
            HeaderValue::from_str(&formatted).map_err(|source| Error::InvalidHeaderValue {
                name: self.inner.authorization_header.as_str().to_owned(),
                source,
            })?;
        value.set_sensitive(true);
        Ok(value)
    }

    pub fn metrics_snapshot(&self) -> ClientMetricsSnapshot {
        self.inner.executor.metrics_snapshot()
    }

    /// Drains and releases both executors.
    pub async fn shutdown(&self) {
        self.inner.executor.shutdown().await;
        self.inner.token_executor.shutdown().await;
    }

    pub fn shutdown_now(&self) {
        self.inner.executor.shutdown_now();
        self.inner.token_executor.shutdown_now();
    }
}
