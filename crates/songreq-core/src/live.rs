//! Stream-status check against the Twitch Helix API.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::UpstreamError;
use crate::token::AccessToken;

const ENDPOINT: &str = "helix streams";

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    // Offline and unknown channels both come back with an empty list.
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Clone)]
pub struct LiveGuard {
    http: Client,
    api_base: String,
    client_id: String,
}

impl LiveGuard {
    pub fn new(http: Client, api_base: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
        }
    }

    /// True iff the provider lists at least one active stream for `channel`.
    pub async fn is_live(&self, channel: &str, token: &AccessToken) -> Result<bool, UpstreamError> {
        let url = format!("{}/streams", self.api_base);
        let response = self
            .http
            .get(&url)
            .query(&[("user_login", channel)])
            .bearer_auth(token.bearer())
            .header("Client-Id", &self.client_id)
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                endpoint: ENDPOINT,
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| UpstreamError::Transport {
                endpoint: ENDPOINT,
                source,
            })?;
        if !status.is_success() {
            return Err(UpstreamError::Status {
                endpoint: ENDPOINT,
                status: status.as_u16(),
                body,
            });
        }

        let streams: StreamsResponse =
            serde_json::from_str(&body).map_err(|source| UpstreamError::Malformed {
                endpoint: ENDPOINT,
                source,
            })?;
        debug!("{} active stream entries for #{}", streams.data.len(), channel);
        Ok(!streams.data.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Provider;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token() -> AccessToken {
        AccessToken::new(Provider::ChatService, "tw-access", None)
    }

    async fn guard_answering(template: ResponseTemplate) -> (MockServer, LiveGuard) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/helix/streams"))
            .and(query_param("user_login", "somestreamer"))
            .and(header("authorization", "Bearer tw-access"))
            .and(header("client-id", "tw-id"))
            .respond_with(template)
            .expect(1)
            .mount(&server)
            .await;
        let guard = LiveGuard::new(Client::new(), format!("{}/helix/", server.uri()), "tw-id");
        (server, guard)
    }

    #[tokio::test]
    async fn live_when_data_has_entries() {
        let (_server, guard) = guard_answering(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "1", "user_login": "somestreamer", "type": "live" }],
            "pagination": {}
        })))
        .await;
        assert!(guard.is_live("somestreamer", &token()).await.unwrap());
    }

    #[tokio::test]
    async fn offline_when_data_is_empty() {
        let (_server, guard) =
            guard_answering(ResponseTemplate::new(200).set_body_json(json!({ "data": [] }))).await;
        assert!(!guard.is_live("somestreamer", &token()).await.unwrap());
    }

    #[tokio::test]
    async fn unauthorized_is_an_auth_class_upstream_error() {
        let (_server, guard) =
            guard_answering(ResponseTemplate::new(401).set_body_string("invalid token")).await;
        let err = guard.is_live("somestreamer", &token()).await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let (_server, guard) =
            guard_answering(ResponseTemplate::new(200).set_body_string("<html>")).await;
        assert!(matches!(
            guard.is_live("somestreamer", &token()).await,
            Err(UpstreamError::Malformed { .. })
        ));
    }
}
