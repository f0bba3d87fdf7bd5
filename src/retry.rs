use std::sync::Arc;
use std::time::Duration;

use crate::classify::{is_cancelled, is_connect_timeout, is_request_timeout};
use crate::error::{Error, TransportErrorKind};

/// What a [`RetryPolicy`] says about the next attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Stop,
    RetryAfter(Duration),
}

impl RetryDecision {
    pub fn delay(self) -> Option<Duration> {
        match self {
            Self::Stop => None,
            Self::RetryAfter(delay) => Some(delay),
        }
    }

    pub fn is_stop(self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// How [`RetryPolicy::combine`] merges the delays of two policies that both
/// allow a retry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DelayMerge {
    #[default]
    Max,
    Sum,
    Last,
}

impl DelayMerge {
    fn merge(self, left: Duration, right: Duration) -> Duration {
        match self {
            Self::Max => left.max(right),
            Self::Sum => left.saturating_add(right),
            Self::Last => right,
        }
    }
}

type CustomPolicy = Arc<dyn Fn(usize) -> Option<Duration> + Send + Sync>;

/// A pure function from retry ordinal to decision.
///
/// `decide(n)` is asked after the `n`-th failed attempt, starting at 1, and
/// answers whether attempt `n + 1` may run and how long to wait first. The
/// policy never reads a clock or keeps state; waiting is the executor's job.
#[derive(Clone)]
pub struct RetryPolicy {
    kind: PolicyKind,
}

#[derive(Clone)]
enum PolicyKind {
    Constant(Duration),
    Incremental(Duration),
    Exponential { base: Duration, max: Duration },
    LimitRetries(usize),
    Custom(CustomPolicy),
    Combined {
        left: Box<RetryPolicy>,
        right: Box<RetryPolicy>,
        merge: DelayMerge,
    },
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            PolicyKind::Constant(delay) => formatter
                .debug_tuple("RetryPolicy::Constant")
                .field(delay)
                .finish(),
            PolicyKind::Incremental(base) => formatter
                .debug_tuple("RetryPolicy::Incremental")
                .field(base)
                .finish(),
            PolicyKind::Exponential { base, max } => formatter
                .debug_struct("RetryPolicy::Exponential")
                .field("base", base)
                .field("max", max)
                .finish(),
            PolicyKind::LimitRetries(max_retries) => formatter
                .debug_tuple("RetryPolicy::LimitRetries")
                .field(max_retries)
                .finish(),
            PolicyKind::Custom(_) => formatter.write_str("RetryPolicy::Custom"),
            PolicyKind::Combined { left, right, merge } => formatter
                .debug_struct("RetryPolicy::Combined")
                .field("left", left)
                .field("right", right)
                .field("merge", merge)
                .finish(),
        }
    }
}

impl RetryPolicy {
    /// Same delay every time; never stops on its own.
    pub fn constant(delay: Duration) -> Self {
        Self {
            kind: PolicyKind::Constant(delay),
        }
    }

    /// `base * n`; never stops on its own.
    pub fn incremental(base: Duration) -> Self {
        Self {
            kind: PolicyKind::Incremental(base),
        }
    }

    /// `base * 2^(n-1)` capped at `max`; never stops on its own.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            kind: PolicyKind::Exponential {
                base,
                max: max.max(base),
            },
        }
    }

    /// Allows `max_retries` retries with no delay of its own.
    pub fn limit_retries(max_retries: usize) -> Self {
        Self {
            kind: PolicyKind::LimitRetries(max_retries),
        }
    }

    pub fn custom<F>(decide: F) -> Self
    where
        F: Fn(usize) -> Option<Duration> + Send + Sync + 'static,
    {
        Self {
            kind: PolicyKind::Custom(Arc::new(decide)),
        }
    }

    /// Stops as soon as either policy stops; otherwise waits for the longer
    /// of the two delays.
    pub fn append(self, other: RetryPolicy) -> Self {
        self.combine(other, DelayMerge::Max)
    }

    pub fn combine(self, other: RetryPolicy, merge: DelayMerge) -> Self {
        Self {
            kind: PolicyKind::Combined {
                left: Box::new(self),
                right: Box::new(other),
                merge,
            },
        }
    }

    pub fn decide(&self, retry: usize) -> RetryDecision {
        let retry = retry.max(1);
        match &self.kind {
            PolicyKind::Constant(delay) => RetryDecision::RetryAfter(*delay),
            PolicyKind::Incremental(base) => {
                let factor = u32::try_from(retry).unwrap_or(u32::MAX);
                RetryDecision::RetryAfter(base.saturating_mul(factor))
            }
            PolicyKind::Exponential { base, max } => {
                let exponent = retry.saturating_sub(1).min(31) as u32;
                let delay = base.saturating_mul(1_u32 << exponent).min(*max);
                RetryDecision::RetryAfter(delay)
            }
            PolicyKind::LimitRetries(max_retries) => {
                if retry > *max_retries {
                    RetryDecision::Stop
                } else {
                    RetryDecision::RetryAfter(Duration::ZERO)
                }
            }
            PolicyKind::Custom(decide) => match decide(retry) {
                Some(delay) => RetryDecision::RetryAfter(delay),
                None => RetryDecision::Stop,
            },
            PolicyKind::Combined { left, right, merge } => {
                match (left.decide(retry), right.decide(retry)) {
                    (RetryDecision::RetryAfter(left), RetryDecision::RetryAfter(right)) => {
                        RetryDecision::RetryAfter(merge.merge(left, right))
                    }
                    _ => RetryDecision::Stop,
                }
            }
        }
    }
}

/// Decides whether a failed attempt may be retried at all. The
/// [`RetryPolicy`] is only consulted once this says yes.
pub trait RetryPredicate: Send + Sync {
    fn should_retry(&self, error: &Error) -> bool;
}

impl<F> RetryPredicate for F
where
    F: Fn(&Error) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &Error) -> bool {
        self(error)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RetryAll;

impl RetryPredicate for RetryAll {
    fn should_retry(&self, _error: &Error) -> bool {
        true
    }
}

/// Retries timeouts and connection-level transport failures, never
/// cancellations, token errors or refused requests that reached a server.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryTransient;

impl RetryPredicate for RetryTransient {
    fn should_retry(&self, error: &Error) -> bool {
        if is_cancelled(error) {
            return false;
        }
        if is_connect_timeout(error) || is_request_timeout(error) {
            return true;
        }
        matches!(
            error.transport_kind(),
            Some(
                TransportErrorKind::Dns
                    | TransportErrorKind::ConnectionRefused
                    | TransportErrorKind::Connect
                    | TransportErrorKind::Read
            )
        ) || matches!(error, Error::ReadBody { .. })
    }
}

#[derive(Clone)]
pub(crate) struct RetryConfig {
    pub(crate) policy: RetryPolicy,
    pub(crate) predicate: Arc<dyn RetryPredicate>,
}

impl RetryConfig {
    pub(crate) fn decide(&self, error: &Error, retry: usize) -> RetryDecision {
        if !self.predicate.should_retry(error) {
            return RetryDecision::Stop;
        }
        self.policy.decide(retry)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::Method;

    use super::{DelayMerge, RetryDecision, RetryPolicy, RetryPredicate, RetryTransient};
    use crate::error::{Error, TimeoutPhase};

    #[test]
    fn incremental_delay_grows_linearly_and_never_stops() {
        let policy = RetryPolicy::incremental(Duration::from_millis(100));
        assert_eq!(
            policy.decide(1),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            policy.decide(4),
            RetryDecision::RetryAfter(Duration::from_millis(400))
        );
        assert!(!policy.decide(10_000).is_stop());
    }

    #[test]
    fn limit_retries_stops_after_configured_count() {
        let policy = RetryPolicy::limit_retries(2);
        assert_eq!(policy.decide(1), RetryDecision::RetryAfter(Duration::ZERO));
        assert_eq!(policy.decide(2), RetryDecision::RetryAfter(Duration::ZERO));
        assert_eq!(policy.decide(3), RetryDecision::Stop);
    }

    #[test]
    fn append_caps_unbounded_backoff_without_changing_its_curve() {
        let policy =
            RetryPolicy::limit_retries(3).append(RetryPolicy::incremental(Duration::from_secs(1)));
        let delays = (1..=4)
            .map(|retry| policy.decide(retry).delay())
            .collect::<Vec<_>>();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_secs(1)),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(3)),
                None,
            ]
        );
    }

    #[test]
    fn combine_supports_alternative_delay_merges() {
        let left = RetryPolicy::constant(Duration::from_millis(30));
        let right = RetryPolicy::constant(Duration::from_millis(20));
        assert_eq!(
            left.clone()
                .combine(right.clone(), DelayMerge::Sum)
                .decide(1)
                .delay(),
            Some(Duration::from_millis(50))
        );
        assert_eq!(
            left.combine(right, DelayMerge::Last).decide(1).delay(),
            Some(Duration::from_millis(20))
        );
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy =
            RetryPolicy::exponential(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(policy.decide(1).delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.decide(3).delay(), Some(Duration::from_millis(400)));
        assert_eq!(policy.decide(40).delay(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn decisions_depend_only_on_the_retry_ordinal() {
        let policy = RetryPolicy::custom(|retry| (retry < 3).then(|| Duration::from_millis(7)));
        for _ in 0..3 {
            assert_eq!(policy.decide(2).delay(), Some(Duration::from_millis(7)));
            assert!(policy.decide(3).is_stop());
        }
    }

    #[test]
    fn transient_predicate_skips_cancellation_and_token_errors() {
        let timeout = Error::Timeout {
            phase: TimeoutPhase::Request,
            timeout_ms: 5,
            method: Method::GET,
            uri: "http://127.0.0.1/".to_owned(),
        };
        let cancelled = Error::Cancelled {
            method: Method::GET,
            uri: "http://127.0.0.1/".to_owned(),
        };
        assert!(RetryTransient.should_retry(&timeout));
        assert!(!RetryTransient.should_retry(&cancelled));
        assert!(!RetryTransient.should_retry(&Error::RefreshLoopDetected { depth: 3 }));
    }
}
