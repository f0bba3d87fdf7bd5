use std::sync::Mutex;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Uri};

use crate::error::Error;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Request headers override defaults with the same name.
pub(crate) fn merge_headers(default_headers: &HeaderMap, request_headers: &HeaderMap) -> HeaderMap {
    if default_headers.is_empty() {
        return request_headers.clone();
    }
    let mut merged = default_headers.clone();
    for name in request_headers.keys() {
        merged.remove(name);
    }
    for (name, value) in request_headers {
        merged.append(name.clone(), value.clone());
    }
    merged
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_uri(uri: &str) -> Result<Uri, Error> {
    let parsed = uri.parse::<Uri>().map_err(|_| Error::InvalidUri {
        uri: uri.to_owned(),
    })?;
    match parsed.scheme_str() {
        Some(scheme)
            if (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"))
                && parsed.host().is_some() =>
        {
            Ok(parsed)
        }
        _ => Err(Error::InvalidUri {
            uri: uri.to_owned(),
        }),
    }
}

pub(crate) fn append_query_pairs(uri: &str, query_pairs: &[(String, String)]) -> String {
    if query_pairs.is_empty() {
        return uri.to_owned();
    }

    match url::Url::parse(uri) {
        Ok(mut url) => {
            url.query_pairs_mut().extend_pairs(query_pairs);
            url.to_string()
        }
        Err(_) => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            serializer.extend_pairs(query_pairs);
            let separator = if uri.contains('?') { '&' } else { '?' };
            format!("{uri}{separator}{}", serializer.finish())
        }
    }
}

/// Drops userinfo, query and fragment so credentials never reach logs.
pub(crate) fn redact_uri_for_logs(uri: &Uri) -> String {
    let Ok(mut parsed) = url::Url::parse(&uri.to_string()) else {
        let text = uri.to_string();
        return text.split('?').next().unwrap_or(&text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
