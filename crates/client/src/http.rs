//! Thin HTTP wrapper used for negotiation, SSE, and long-polling.
//!
//! One instance per connection: configured headers and the bearer token are
//! applied to every request, and a token handed back by a negotiate
//! redirect overrides the configured provider for the rest of the
//! connection's lifetime.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use url::Url;

use crate::config::HttpOptions;
use crate::error::ConnectionError;

pub(crate) struct HttpClient {
    client: reqwest::Client,
    options: HttpOptions,
    token_override: Mutex<Option<String>>,
}

impl HttpClient {
    pub(crate) fn new(options: HttpOptions) -> Result<Self, ConnectionError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ConnectionError::TransportConnect(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            options,
            token_override: Mutex::new(None),
        })
    }

    /// The bearer token for the next request: a negotiate-redirect token if
    /// one was issued, otherwise whatever the configured provider returns.
    pub(crate) fn access_token(&self) -> Option<String> {
        if let Ok(guard) = self.token_override.lock()
            && let Some(token) = guard.as_ref()
        {
            return Some(token.clone());
        }
        self.options
            .access_token_provider
            .as_ref()
            .and_then(|provider| provider())
    }

    /// Installs the access token returned by a negotiate redirect.
    pub(crate) fn set_access_token(&self, token: String) {
        if let Ok(mut guard) = self.token_override.lock() {
            *guard = Some(token);
        }
    }

    /// A request builder with configured headers and bearer auth applied.
    /// No timeout is set; bounded requests add their own.
    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut builder = self.client.request(method, url);
        for (name, value) in &self.options.headers {
            builder = builder.header(name, value);
        }
        if let Some(token) = self.access_token() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn bounded(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.request(method, url);
        match self.options.request_timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    pub(crate) async fn post(
        &self,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> Result<Response, reqwest::Error> {
        let mut builder = self.bounded(Method::POST, url);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        builder.send().await
    }

    pub(crate) async fn get(
        &self,
        url: Url,
        timeout: Option<Duration>,
    ) -> Result<Response, reqwest::Error> {
        let mut builder = self.bounded(Method::GET, url);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        builder.send().await
    }

    pub(crate) async fn delete(&self, url: Url) -> Result<Response, reqwest::Error> {
        self.bounded(Method::DELETE, url).send().await
    }
}

/// Appends the access token as a query parameter for transports that cannot
/// carry an `Authorization` header (WebSocket, SSE).
pub(crate) fn append_access_token(url: &mut Url, http: &HttpClient) {
    if let Some(token) = http.access_token() {
        url.query_pairs_mut().append_pair("access_token", &token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn provider_token_is_used() {
        let options = HttpOptions {
            access_token_provider: Some(Arc::new(|| Some("abc".into()))),
            ..HttpOptions::default()
        };
        let http = HttpClient::new(options).unwrap();
        assert_eq!(http.access_token().as_deref(), Some("abc"));
    }

    #[test]
    fn redirect_token_overrides_provider() {
        let options = HttpOptions {
            access_token_provider: Some(Arc::new(|| Some("from-provider".into()))),
            ..HttpOptions::default()
        };
        let http = HttpClient::new(options).unwrap();
        http.set_access_token("from-redirect".into());
        assert_eq!(http.access_token().as_deref(), Some("from-redirect"));
    }

    #[test]
    fn no_provider_means_no_token() {
        let http = HttpClient::new(HttpOptions::default()).unwrap();
        assert_eq!(http.access_token(), None);
    }

    #[test]
    fn access_token_query_parameter() {
        let options = HttpOptions {
            access_token_provider: Some(Arc::new(|| Some("tok".into()))),
            ..HttpOptions::default()
        };
        let http = HttpClient::new(options).unwrap();
        let mut url = Url::parse("wss://example.com/hub?id=abc").unwrap();
        append_access_token(&mut url, &http);
        assert_eq!(url.as_str(), "wss://example.com/hub?id=abc&access_token=tok");
    }
}
