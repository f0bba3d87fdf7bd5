//! Failure classification over error cause chains.
//!
//! Every function here walks a chain from the outermost error to the
//! innermost cause, following [`std::error::Error::source`], and stops at the
//! first match. Nothing here allocates (except [`classify`]) or mutates the
//! chain, so the predicates are safe to call from retry and refresh
//! decisions on any task.

use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::io;

use crate::error::{Error, TimeoutPhase, TransportErrorKind};

type DynError = dyn StdError + 'static;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureKind {
    ConnectTimeout,
    RequestTimeout,
    ConnectionRefused,
    NameResolution,
    TokenNotFound,
    RefreshLoop,
    Cancelled,
}

impl FailureKind {
    pub const ALL: [FailureKind; 7] = [
        FailureKind::ConnectTimeout,
        FailureKind::RequestTimeout,
        FailureKind::ConnectionRefused,
        FailureKind::NameResolution,
        FailureKind::TokenNotFound,
        FailureKind::RefreshLoop,
        FailureKind::Cancelled,
    ];

    pub fn matches(self, error: &DynError) -> bool {
        match self {
            Self::ConnectTimeout => is_connect_timeout(error),
            Self::RequestTimeout => is_request_timeout(error),
            Self::ConnectionRefused => is_connection_refused(error),
            Self::NameResolution => is_name_resolution(error),
            Self::TokenNotFound => is_token_not_found(error),
            Self::RefreshLoop => is_refresh_loop(error),
            Self::Cancelled => is_cancelled(error),
        }
    }
}

/// Iterates `error` and its causes, outermost first.
pub fn causes<'a>(error: &'a DynError) -> impl Iterator<Item = &'a DynError> + 'a {
    std::iter::successors(Some(error), |&current| current.source())
}

pub fn find_cause_where<'a, P>(error: &'a DynError, mut predicate: P) -> Option<&'a DynError>
where
    P: FnMut(&DynError) -> bool,
{
    causes(error).find(|cause| predicate(*cause))
}

/// Returns the first cause of type `E`, if any.
pub fn find_cause<'a, E>(error: &'a DynError) -> Option<&'a E>
where
    E: StdError + 'static,
{
    causes(error).find_map(|cause| cause.downcast_ref::<E>())
}

fn any_client_error<P>(error: &DynError, predicate: P) -> bool
where
    P: Fn(&Error) -> bool,
{
    causes(error)
        .filter_map(|cause| cause.downcast_ref::<Error>())
        .any(predicate)
}

fn any_io_error_kind(error: &DynError, kind: io::ErrorKind) -> bool {
    causes(error)
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(|io_error| io_error.kind() == kind)
}

pub fn is_connect_timeout(error: &DynError) -> bool {
    any_client_error(error, |error| {
        error.timeout_phase() == Some(TimeoutPhase::Connect)
    })
}

pub fn is_request_timeout(error: &DynError) -> bool {
    any_client_error(error, |error| {
        error.timeout_phase() == Some(TimeoutPhase::Request)
    })
}

pub fn is_connection_refused(error: &DynError) -> bool {
    any_client_error(error, |error| {
        error.transport_kind() == Some(TransportErrorKind::ConnectionRefused)
    }) || any_io_error_kind(error, io::ErrorKind::ConnectionRefused)
}

pub fn is_name_resolution(error: &DynError) -> bool {
    any_client_error(error, |error| {
        error.transport_kind() == Some(TransportErrorKind::Dns)
    })
}

pub fn is_token_not_found(error: &DynError) -> bool {
    any_client_error(error, |error| {
        matches!(error, Error::AccessTokenNotFound { .. })
    })
}

pub fn is_refresh_loop(error: &DynError) -> bool {
    any_client_error(error, |error| {
        matches!(error, Error::RefreshLoopDetected { .. })
    })
}

pub fn is_cancelled(error: &DynError) -> bool {
    any_client_error(error, |error| matches!(error, Error::Cancelled { .. }))
}

/// Every [`FailureKind`] found anywhere in the chain. Empty when nothing
/// matches.
pub fn classify(error: &DynError) -> BTreeSet<FailureKind> {
    FailureKind::ALL
        .into_iter()
        .filter(|kind| kind.matches(error))
        .collect()
}

/// Maps a transport-level error onto a [`TransportErrorKind`] by looking for
/// an `io::Error` in its chain first and falling back to the rendered
/// message.
pub(crate) fn transport_error_kind(error: &DynError) -> TransportErrorKind {
    for io_error in causes(error).filter_map(|cause| cause.downcast_ref::<io::Error>()) {
        match io_error.kind() {
            io::ErrorKind::ConnectionRefused => return TransportErrorKind::ConnectionRefused,
            io::ErrorKind::NotFound => return TransportErrorKind::Dns,
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable => return TransportErrorKind::Connect,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => return TransportErrorKind::Read,
            _ => {}
        }
    }

    let text = causes(error)
        .map(|cause| cause.to_string().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(": ");
    if text.contains("dns")
        || text.contains("name or service not known")
        || text.contains("failed to lookup address")
    {
        return TransportErrorKind::Dns;
    }
    if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
        return TransportErrorKind::Tls;
    }
    if text.contains("connection refused") {
        return TransportErrorKind::ConnectionRefused;
    }
    if text.contains("connect") {
        return TransportErrorKind::Connect;
    }
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
        || text.contains("connection closed")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}
