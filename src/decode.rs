//! Response body decoders.
//!
//! The transport always hands back raw bytes; a [`BodyDecoder`] turns them
//! into whatever the caller asked for once the exchange (and any token
//! refresh) is finished.

use std::marker::PhantomData;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::BoxError;

pub trait BodyDecoder: Send + Sync {
    type Output;

    fn decode(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Self::Output, BoxError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BytesBody;

impl BodyDecoder for BytesBody {
    type Output = Bytes;

    fn decode(
        &self,
        _status: StatusCode,
        _headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Bytes, BoxError> {
        Ok(body)
    }
}

/// Strict UTF-8.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextBody;

impl BodyDecoder for TextBody {
    type Output = String;

    fn decode(
        &self,
        _status: StatusCode,
        _headers: &HeaderMap,
        body: Bytes,
    ) -> Result<String, BoxError> {
        Ok(String::from_utf8(body.to_vec())?)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Discard;

impl BodyDecoder for Discard {
    type Output = ();

    fn decode(
        &self,
        _status: StatusCode,
        _headers: &HeaderMap,
        _body: Bytes,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

pub struct JsonBody<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonBody<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonBody<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonBody<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonBody<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("JsonBody")
    }
}

impl<T> BodyDecoder for JsonBody<T>
where
    T: DeserializeOwned,
{
    type Output = T;

    fn decode(
        &self,
        _status: StatusCode,
        _headers: &HeaderMap,
        body: Bytes,
    ) -> Result<T, BoxError> {
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Adapts a closure into a [`BodyDecoder`]; see [`decode_with`].
#[derive(Clone)]
pub struct FnDecoder<F> {
    decode: F,
}

pub fn decode_with<F, T, E>(decode: F) -> FnDecoder<F>
where
    F: Fn(StatusCode, &HeaderMap, Bytes) -> Result<T, E> + Send + Sync,
    E: Into<BoxError>,
{
    FnDecoder { decode }
}

impl<F, T, E> BodyDecoder for FnDecoder<F>
where
    F: Fn(StatusCode, &HeaderMap, Bytes) -> Result<T, E> + Send + Sync,
    E: Into<BoxError>,
{
    type Output = T;

    fn decode(&self, status: StatusCode, headers: &HeaderMap, body: Bytes) -> Result<T, BoxError> {
        (self.decode)(status, headers, body).map_err(Into::into)
    }
}
