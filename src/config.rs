use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientProfile {
    #[default]
    Standard,
    LowLatency,
    Batch,
}

#[derive(Clone, Debug)]
pub struct ProfileDefaults {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub max_response_body_bytes: usize,
}

impl ClientProfile {
    pub fn defaults(self) -> ProfileDefaults {
        match self {
            Self::Standard => ProfileDefaults {
                request_timeout: Duration::from_secs(10),
                connect_timeout: Duration::from_secs(5),
                retry_policy: RetryPolicy::limit_retries(3)
                    .append(RetryPolicy::incremental(Duration::from_millis(200))),
                max_response_body_bytes: 8 * 1024 * 1024,
            },
            Self::LowLatency => ProfileDefaults {
                request_timeout: Duration::from_secs(2),
                connect_timeout: Duration::from_millis(500),
                retry_policy: RetryPolicy::limit_retries(1)
                    .append(RetryPolicy::incremental(Duration::from_millis(50))),
                max_response_body_bytes: 2 * 1024 * 1024,
            },
            Self::Batch => ProfileDefaults {
                request_timeout: Duration::from_secs(60),
                connect_timeout: Duration::from_secs(10),
                retry_policy: RetryPolicy::limit_retries(5).append(RetryPolicy::exponential(
                    Duration::from_millis(250),
                    Duration::from_secs(8),
                )),
                max_response_body_bytes: 32 * 1024 * 1024,
            },
        }
    }
}

/// Field-by-field overrides applied on top of the builder's current values.
#[derive(Clone, Debug, Default)]
pub struct AdvancedConfig {
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub max_response_body_bytes: Option<usize>,
    pub retry_policy: Option<RetryPolicy>,
    pub telemetry_enabled: Option<bool>,
    pub metrics_enabled: Option<bool>,
}

impl AdvancedConfig {
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout);
        self
    }

    pub fn with_max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = Some(max_response_body_bytes);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    pub fn with_telemetry_enabled(mut self, enabled: bool) -> Self {
        self.telemetry_enabled = Some(enabled);
        self
    }

    pub fn with_metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = Some(enabled);
        self
    }
}
