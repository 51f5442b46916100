//! Negotiation with the hub endpoint.
//!
//! Obtains a connection id and the server's supported transports before a
//! transport is connected, following redirects to other endpoints up to a
//! fixed depth. Skipped entirely when the connection is configured for a
//! single known transport.

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::ConnectionError;
use crate::http::HttpClient;

/// Redirect depth at which negotiation fails instead of following further.
const MAX_REDIRECTS: usize = 100;

/// One transport the server offers, with the encodings it can carry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct NegotiatePayload {
    connection_id: Option<String>,
    connection_token: Option<String>,
    available_transports: Vec<AvailableTransport>,
    url: Option<String>,
    access_token: Option<String>,
    error: Option<String>,
}

/// Outcome of a successful negotiation.
#[derive(Debug)]
pub(crate) struct NegotiatedConnection {
    /// The hub URL negotiation settled on (differs from the configured one
    /// after a redirect).
    pub url: Url,
    pub connection_id: String,
    /// Issued under negotiate version 1; when present it, not the
    /// connection id, goes into the transport `id` query parameter.
    pub connection_token: Option<String>,
    pub available_transports: Vec<AvailableTransport>,
}

impl NegotiatedConnection {
    /// The value for the transport URL's `id` query parameter.
    pub(crate) fn transport_query_id(&self) -> &str {
        self.connection_token
            .as_deref()
            .unwrap_or(&self.connection_id)
    }
}

/// Builds `{base}/negotiate?negotiateVersion=1`, preserving the hub URL's
/// query parameters.
fn negotiate_url(base_url: &Url) -> Url {
    let mut url = base_url.clone();
    let path = format!("{}/negotiate", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_fragment(None);
    url.query_pairs_mut().append_pair("negotiateVersion", "1");
    url
}

/// Performs the negotiate exchange, following redirects.
pub(crate) async fn negotiate(
    http: &HttpClient,
    base_url: &Url,
) -> Result<NegotiatedConnection, ConnectionError> {
    let mut url = base_url.clone();
    for _ in 0..MAX_REDIRECTS {
        let request_url = negotiate_url(&url);
        debug!(url = %request_url, "negotiating");

        let response = http
            .post(request_url, None)
            .await
            .map_err(|e| ConnectionError::Negotiate(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConnectionError::Negotiate(format!(
                "server returned status {status}"
            )));
        }
        let payload: NegotiatePayload = response
            .json()
            .await
            .map_err(|e| ConnectionError::Negotiate(format!("malformed response: {e}")))?;

        if let Some(error) = payload.error {
            return Err(ConnectionError::Negotiate(error));
        }

        if let Some(redirect) = payload.url {
            if let Some(token) = payload.access_token {
                http.set_access_token(token);
            }
            url = Url::parse(&redirect)
                .map_err(|e| ConnectionError::Negotiate(format!("bad redirect url: {e}")))?;
            debug!(url = %url, "negotiate redirected");
            continue;
        }

        let connection_id = payload.connection_id.ok_or_else(|| {
            ConnectionError::Negotiate("response missing connectionId".into())
        })?;
        return Ok(NegotiatedConnection {
            url,
            connection_id,
            connection_token: payload.connection_token,
            available_transports: payload.available_transports,
        });
    }
    Err(ConnectionError::Negotiate(format!(
        "redirect depth exceeded ({MAX_REDIRECTS})"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_url_appends_segment_and_version() {
        let base = Url::parse("https://example.com/chathub").unwrap();
        let url = negotiate_url(&base);
        assert_eq!(
            url.as_str(),
            "https://example.com/chathub/negotiate?negotiateVersion=1"
        );
    }

    #[test]
    fn negotiate_url_normalizes_trailing_slash_and_keeps_query() {
        let base = Url::parse("https://example.com/chathub/?tenant=7").unwrap();
        let url = negotiate_url(&base);
        assert_eq!(
            url.as_str(),
            "https://example.com/chathub/negotiate?tenant=7&negotiateVersion=1"
        );
    }

    #[test]
    fn payload_with_transports_parses() {
        let payload: NegotiatePayload = serde_json::from_str(
            r#"{"connectionId":"abc","availableTransports":[
                {"transport":"WebSocket","transferFormats":["Text","Binary"]},
                {"transport":"LongPolling","transferFormats":["Text"]}]}"#,
        )
        .unwrap();
        assert_eq!(payload.connection_id.as_deref(), Some("abc"));
        assert_eq!(payload.available_transports.len(), 2);
        assert_eq!(payload.available_transports[0].transport, "WebSocket");
        assert_eq!(
            payload.available_transports[1].transfer_formats,
            vec!["Text"]
        );
    }

    #[test]
    fn version_one_payload_carries_token() {
        let payload: NegotiatePayload = serde_json::from_str(
            r#"{"connectionId":"abc","connectionToken":"tok-1","availableTransports":[]}"#,
        )
        .unwrap();
        let negotiated = NegotiatedConnection {
            url: Url::parse("https://example.com/hub").unwrap(),
            connection_id: payload.connection_id.unwrap(),
            connection_token: payload.connection_token,
            available_transports: payload.available_transports,
        };
        assert_eq!(negotiated.transport_query_id(), "tok-1");
    }

    #[test]
    fn redirect_payload_parses() {
        let payload: NegotiatePayload = serde_json::from_str(
            r#"{"url":"https://other.example.com/hub","accessToken":"jwt"}"#,
        )
        .unwrap();
        assert_eq!(payload.url.as_deref(), Some("https://other.example.com/hub"));
        assert_eq!(payload.access_token.as_deref(), Some("jwt"));
        assert!(payload.connection_id.is_none());
    }
}
