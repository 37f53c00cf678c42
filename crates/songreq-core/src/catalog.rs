//! Spotify Web API: track search and playback queue.

use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::debug;

use crate::error::{CatalogError, UpstreamError};
use crate::token::AccessToken;

const SEARCH: &str = "spotify search";
const QUEUE: &str = "spotify queue";

/// Opaque playable identifier, e.g. `spotify:track:4uLU6hMCjMI75M1A2tKUQC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: TrackPage,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<Track>,
}

#[derive(Debug, Deserialize)]
struct Track {
    uri: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Clone)]
pub struct CatalogClient {
    http: Client,
    api_base: String,
}

impl CatalogClient {
    pub fn new(http: Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Top-ranked track for `query`.
    pub async fn search(&self, query: &str, token: &AccessToken) -> Result<CatalogItem, CatalogError> {
        let url = format!("{}/search", self.api_base);
        let response = self
            .http
            .get(&url)
            .query(&[("q", query), ("type", "track"), ("limit", "1")])
            .bearer_auth(token.bearer())
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                endpoint: SEARCH,
                source,
            })?;

        let body = success_body(response, SEARCH).await?;
        let page: SearchResponse =
            serde_json::from_str(&body).map_err(|source| UpstreamError::Malformed {
                endpoint: SEARCH,
                source,
            })?;

        let track = page
            .tracks
            .items
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::NotFound {
                query: query.to_string(),
            })?;
        debug!("search {:?} resolved to {} ({:?})", query, track.uri, track.name);
        Ok(CatalogItem { uri: track.uri })
    }

    /// Appends `item` to the active player's queue. Not idempotent.
    pub async fn enqueue(&self, item: &CatalogItem, token: &AccessToken) -> Result<(), UpstreamError> {
        let url = format!("{}/me/player/queue", self.api_base);
        let response = self
            .http
            .post(&url)
            .query(&[("uri", item.uri.as_str())])
            .bearer_auth(token.bearer())
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                endpoint: QUEUE,
                source,
            })?;

        success_body(response, QUEUE).await?;
        Ok(())
    }
}

async fn success_body(response: Response, endpoint: &'static str) -> Result<String, UpstreamError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| UpstreamError::Transport { endpoint, source })?;
    if !status.is_success() {
        return Err(UpstreamError::Status {
            endpoint,
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}
