use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use serde_json::Value;

use crate::error::Error;
use crate::oauth::store::AccessToken;
use crate::request::Request;
use crate::response::RawResponse;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenNotFoundReason {
    Unparseable,
    NotAnObject,
    MissingField,
    NotAString,
    Blank,
}

impl std::fmt::Display for TokenNotFoundReason {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Unparseable => "body is not valid json",
            Self::NotAnObject => "body is not a json object",
            Self::MissingField => "token field is missing",
            Self::NotAString => "token field is not a string",
            Self::Blank => "token field is blank",
        };
        formatter.write_str(text)
    }
}

/// Pulls the access token out of a token endpoint response.
///
/// Failures must be [`Error::AccessTokenNotFound`]; they end the OAuth flow
/// without a retry.
pub trait TokenExtractor: Send + Sync {
    fn extract(&self, response: &RawResponse) -> crate::Result<AccessToken>;
}

impl<F> TokenExtractor for F
where
    F: Fn(&RawResponse) -> crate::Result<AccessToken> + Send + Sync,
{
    fn extract(&self, response: &RawResponse) -> crate::Result<AccessToken> {
        self(response)
    }
}

/// Reads a top-level string field from a JSON object body.
#[derive(Clone, Debug)]
pub struct JsonFieldExtractor {
    field: String,
}

impl JsonFieldExtractor {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn access_token() -> Self {
        Self::new("access_token")
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl Default for JsonFieldExtractor {
    fn default() -> Self {
        Self::access_token()
    }
}

impl TokenExtractor for JsonFieldExtractor {
    fn extract(&self, response: &RawResponse) -> crate::Result<AccessToken> {
        let status = response.status().as_u16();
        let not_found = |reason: TokenNotFoundReason| Error::AccessTokenNotFound {
            status,
            reason,
            source: None,
        };

        let value: Value =
            serde_json::from_slice(response.body()).map_err(|source| Error::AccessTokenNotFound {
                status,
                reason: TokenNotFoundReason::Unparseable,
                source: Some(source),
            })?;
        let object = value
            .as_object()
            .ok_or_else(|| not_found(TokenNotFoundReason::NotAnObject))?;
        let field = match object.get(&self.field) {
            None | Some(Value::Null) => return Err(not_found(TokenNotFoundReason::MissingField)),
            Some(field) => field,
        };
        let token = field
            .as_str()
            .ok_or_else(|| not_found(TokenNotFoundReason::NotAString))?;
        if token.trim().is_empty() {
            return Err(not_found(TokenNotFoundReason::Blank));
        }
        Ok(AccessToken::new(token))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientAuthStyle {
    /// `Authorization: Basic base64(client_id:client_secret)`.
    #[default]
    Basic,
    /// `client_id` and `client_secret` as form fields.
    RequestBody,
}

/// OAuth2 client-credentials grant parameters.
#[derive(Clone)]
pub struct ClientCredentials {
    token_url: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    audience: Option<String>,
    auth_style: ClientAuthStyle,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ClientCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("audience", &self.audience)
            .field("auth_style", &self.auth_style)
            .finish()
    }
}

impl ClientCredentials {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: Vec::new(),
            audience: None,
            auth_style: ClientAuthStyle::default(),
        }
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn auth_style(mut self, auth_style: ClientAuthStyle) -> Self {
        self.auth_style = auth_style;
        self
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Builds the `POST` form request sent to the token endpoint.
    pub fn to_request(&self) -> crate::Result<Request> {
        let scope = self.scopes.join(" ");
        let mut form: Vec<(&str, &str)> = vec![("grant_type", "client_credentials")];
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }
        if let Some(audience) = &self.audience {
            form.push(("audience", audience.as_str()));
        }

        let mut builder = Request::post(self.token_url.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        match self.auth_style {
            ClientAuthStyle::Basic => {
                let encoded = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
                let mut value = HeaderValue::from_str(&format!("Basic {encoded}")).map_err(
                    |source| Error::InvalidHeaderValue {
                        name: AUTHORIZATION.as_str().to_owned(),
                        source,
                    },
                )?;
                value.set_sensitive(true);
                builder = builder.header(AUTHORIZATION, value);
            }
            ClientAuthStyle::RequestBody => {
                form.push(("client_id", self.client_id.as_str()));
                form.push(("client_secret", self.client_secret.as_str()));
            }
        }
        builder.form(&form).build()
    }
}
