//! `reqauth` executes HTTP requests with composable retry policies and an
//! OAuth2 bearer-token layer that refreshes stale tokens a bounded number of
//! times.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqauth::prelude::{
//!     ClientCredentials, JsonBody, OAuthClient, RefreshOnStatus, Request, RequestExecutor,
//!     RetryPolicy, RetryTransient,
//! };
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = RequestExecutor::builder()
//!         .client_name("my-sdk")
//!         .request_timeout(Duration::from_secs(3))
//!         .retry_policy(
//!             RetryPolicy::limit_retries(3).append(RetryPolicy::exponential(
//!                 Duration::from_millis(100),
//!                 Duration::from_secs(2),
//!             )),
//!         )
//!         .retry_predicate(RetryTransient)
//!         .build()?;
//!
//!     let client = OAuthClient::builder(executor)
//!         .client_credentials(
//!             ClientCredentials::new("https://auth.example.com/token", "client-id", "secret")
//!                 .scope("items:read"),
//!         )
//!         .refresh_when(RefreshOnStatus::unauthorized())
//!         .build()?;
//!
//!     let request = Request::get("https://api.example.com/v1/items/42").build()?;
//!     let item = client.send(&request, JsonBody::<Item>::new()).await?;
//!     println!("item id={}", item.body().id);
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Failure handling
//!
//! - Retries are opt-in: without a [`RetryPolicy`] every failure is returned
//!   after one attempt. With one, the last attempt's error is returned as-is.
//! - [`classify`] inspects any error chain, including errors the caller
//!   wrapped around an [`Error`].
//! - [`Error::AccessTokenNotFound`] and [`Error::RefreshLoopDetected`] are
//!   terminal for the OAuth flow.

mod config;
mod decode;
mod error;
mod executor;
mod metrics;
mod request;
mod response;
mod retry;
mod telemetry;
mod transport;
mod util;

pub mod classify;
pub mod oauth;

pub use crate::config::{AdvancedConfig, ClientProfile, ProfileDefaults};
pub use crate::decode::{
    BodyDecoder, BytesBody, Discard, FnDecoder, JsonBody, TextBody, decode_with,
};
pub use crate::error::{Error, ErrorCode, TimeoutPhase, TransportErrorKind};
pub use crate::executor::{RequestExecutor, RequestExecutorBuilder};
pub use crate::metrics::ClientMetricsSnapshot;
pub use crate::request::{Request, RequestBuilder};
pub use crate::response::{RawResponse, Response};
pub use crate::retry::{
    DelayMerge, RetryAll, RetryDecision, RetryPolicy, RetryPredicate, RetryTransient,
};
pub use crate::telemetry::{
    EventHandle, NoopTelemetry, Outcome, RequestEvent, TelemetryError, TelemetrySink,
    TracingTelemetry,
};
pub use crate::transport::{BoxFuture, HyperTransport, HyperTransportBuilder, Transport};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::classify::FailureKind;
    pub use crate::oauth::{
        AccessToken, ClientAuthStyle, ClientCredentials, JsonFieldExtractor, MAX_REFRESH_DEPTH,
        OAuthClient, RefreshOnStatus, RefreshPredicate, TokenExtractor,
    };
    pub use crate::{
        BodyDecoder, BytesBody, ClientMetricsSnapshot, ClientProfile, Discard, Error, ErrorCode,
        JsonBody, RawResponse, Request, RequestExecutor, Response, Result, RetryAll, RetryDecision,
        RetryPolicy, RetryPredicate, RetryTransient, TextBody, TimeoutPhase, TransportErrorKind,
    };
}
