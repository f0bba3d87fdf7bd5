use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::Result;
use crate::decode::BodyDecoder;
use crate::error::Error;
use crate::util::truncate_body;

/// A completed response whose body has been decoded into `T`.
#[derive(Clone, Debug)]
pub struct Response<T> {
    status: StatusCode,
    headers: HeaderMap,
    body: T,
}

/// A response as the transport produced it, before any decoding.
pub type RawResponse = Response<Bytes>;

impl<T> Response<T> {
    pub fn new(status: StatusCode, headers: HeaderMap, body: T) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &T {
        &self.body
    }

    pub fn into_body(self) -> T {
        self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, T) {
        (self.status, self.headers, self.body)
    }

    pub fn map<U, F>(self, map: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            status: self.status,
            headers: self.headers,
            body: map(self.body),
        }
    }
}

impl Response<Bytes> {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn decode<D>(self, decoder: &D) -> Result<Response<D::Output>>
    where
        D: BodyDecoder + ?Sized,
    {
        let Self {
            status,
            headers,
            body,
        } = self;
        match decoder.decode(status, &headers, body.clone()) {
            Ok(decoded) => Ok(Response::new(status, headers, decoded)),
            Err(source) => Err(Error::Decode {
                status: status.as_u16(),
                body: truncate_body(&body),
                source,
            }),
        }
    }
}
