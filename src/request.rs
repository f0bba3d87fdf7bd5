use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use serde::Serialize;

use crate::Result;
use crate::error::Error;
use crate::util::{append_query_pairs, parse_header_name, parse_header_value, parse_uri};

/// An outgoing request description.
///
/// Executors work on their own clone, so headers added while sending (such
/// as `Authorization`) never leak back into the caller's value. Cloning is
/// cheap: the body is reference counted.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn builder(method: Method, uri: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, uri.into())
    }

    pub fn get(uri: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::GET, uri)
    }

    pub fn post(uri: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::POST, uri)
    }

    pub fn put(uri: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::PUT, uri)
    }

    pub fn patch(uri: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::PATCH, uri)
    }

    pub fn delete(uri: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::DELETE, uri)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = Some(body.into());
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
    }

    /// Returns a copy carrying `name: value`, replacing any previous values.
    pub fn with_header(&self, name: HeaderName, value: HeaderValue) -> Self {
        let mut request = self.clone();
        request.headers.insert(name, value);
        request
    }

    pub(crate) fn host(&self) -> &str {
        self.uri.host().unwrap_or_default()
    }

    pub(crate) fn path(&self) -> &str {
        self.uri.path()
    }
}

pub struct RequestBuilder {
    method: Method,
    uri: String,
    query_pairs: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    error: Option<Error>,
}

impl RequestBuilder {
    pub(crate) fn new(method: Method, uri: String) -> Self {
        Self {
            method,
            uri,
            query_pairs: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            error: None,
        }
    }

    fn fail(mut self, error: Error) -> Self {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Self {
        let parsed = parse_header_name(name)
            .and_then(|name| parse_header_value(name.as_str(), value).map(|value| (name, value)));
        match parsed {
            Ok((name, value)) => self.header(name, value),
            Err(error) => self.fail(error),
        }
    }

    pub fn query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_pairs.push((name.into(), value.into()));
        self
    }

    pub fn query<T>(mut self, params: &T) -> Self
    where
        T: Serialize + ?Sized,
    {
        match serde_urlencoded::to_string(params) {
            Ok(encoded) => {
                self.query_pairs.extend(
                    url::form_urlencoded::parse(encoded.as_bytes())
                        .map(|(name, value)| (name.into_owned(), value.into_owned())),
                );
                self
            }
            Err(source) => self.fail(Error::SerializeForm { source }),
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json<T>(self, payload: &T) -> Self
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_vec(payload) {
            Ok(body) => self
                .body(body)
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json")),
            Err(source) => self.fail(Error::SerializeJson { source }),
        }
    }

    pub fn form<T>(self, payload: &T) -> Self
    where
        T: Serialize + ?Sized,
    {
        match serde_urlencoded::to_string(payload) {
            Ok(encoded) => self.body(encoded).header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            ),
            Err(source) => self.fail(Error::SerializeForm { source }),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    /// Fails with the first error recorded by a setter, or an invalid URI.
    pub fn build(self) -> Result<Request> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let uri = parse_uri(&append_query_pairs(&self.uri, &self.query_pairs))?;
        Ok(Request {
            method: self.method,
            uri,
            headers: self.headers,
            body: self.body,
            timeout: self.timeout,
        })
    }
}
