//! Access-token broker for the two identity providers.
//!
//! Each provider gets one slot holding its long-lived [`Credential`] and the
//! currently cached [`AccessToken`]. The slot's mutex is held for the whole
//! refresh exchange; concurrent callers wait on that one refresh.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AuthError;

/// Tokens this close to their reported expiry are treated as already expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Spotify: catalog search and playback queue.
    MusicService,
    /// Twitch: chat session and stream status.
    ChatService,
}

/// Where the client id/secret go on a token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    BasicHeader,
    FormBody,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::MusicService => "Spotify",
            Provider::ChatService => "Twitch",
        }
    }

    pub fn client_auth(self) -> ClientAuth {
        match self {
            Provider::MusicService => ClientAuth::BasicHeader,
            Provider::ChatService => ClientAuth::FormBody,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Long-lived refresh secret plus the client it was issued to.
#[derive(Clone)]
pub struct Credential {
    provider: Provider,
    refresh_token: String,
    client: ClientCredentials,
}

impl Credential {
    pub fn new(provider: Provider, refresh_token: impl Into<String>, client: ClientCredentials) -> Self {
        Self {
            provider,
            refresh_token: refresh_token.into(),
            client,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("provider", &self.provider)
            .field("client", &self.client)
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Short-lived bearer token. Replaced wholesale on refresh, never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    provider: Provider,
    bearer: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(provider: Provider, bearer: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            provider,
            bearer: bearer.into(),
            expires_at,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn bearer(&self) -> &str {
        &self.bearer
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Tokens without a reported expiry stay valid until a call is rejected.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => at
                .checked_sub_signed(Duration::seconds(EXPIRY_MARGIN_SECS))
                .map_or(true, |deadline| deadline <= Utc::now()),
            None => false,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("provider", &self.provider)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Body of a successful token endpoint answer.
#[derive(Deserialize)]
pub struct TokenGrant {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    pub fn into_access_token(self, provider: Provider, issued_at: DateTime<Utc>) -> AccessToken {
        // An expiry chrono cannot represent is treated as no reported expiry.
        let expires_at = self
            .expires_in
            .and_then(Duration::try_seconds)
            .and_then(|ttl| issued_at.checked_add_signed(ttl));
        AccessToken::new(provider, self.access_token, expires_at)
    }
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// A provider's OAuth token endpoint.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    provider: Provider,
    url: String,
}

impl TokenEndpoint {
    pub fn new(provider: Provider, url: impl Into<String>) -> Self {
        Self {
            provider,
            url: url.into(),
        }
    }

    /// `grant_type=refresh_token` exchange.
    pub async fn refresh(&self, http: &Client, credential: &Credential) -> Result<TokenGrant, AuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", credential.refresh_token.as_str()),
        ];
        self.request(http, &credential.client, &params).await
    }

    /// `grant_type=authorization_code` exchange, used by the one-shot login flow.
    pub async fn exchange_code(
        &self,
        http: &Client,
        client: &ClientCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        self.request(http, client, &params).await
    }

    async fn request(
        &self,
        http: &Client,
        client: &ClientCredentials,
        params: &[(&str, &str)],
    ) -> Result<TokenGrant, AuthError> {
        let provider = self.provider;
        let mut form = params.to_vec();
        let mut request = http.post(&self.url);
        match provider.client_auth() {
            ClientAuth::BasicHeader => {
                request = request.basic_auth(&client.client_id, Some(&client.client_secret));
            }
            ClientAuth::FormBody => {
                form.push(("client_id", client.client_id.as_str()));
                form.push(("client_secret", client.client_secret.as_str()));
            }
        }

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|source| AuthError::Transport { provider, source })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| AuthError::Transport { provider, source })?;

        if !status.is_success() {
            return Err(AuthError::Rejected {
                provider,
                status: status.as_u16(),
                body,
            });
        }

        let grant: TokenGrant = serde_json::from_str(&body)
            .map_err(|source| AuthError::Malformed { provider, source })?;
        if grant.access_token.trim().is_empty() {
            return Err(AuthError::MissingAccessToken { provider });
        }
        Ok(grant)
    }
}

struct TokenSlot {
    endpoint: TokenEndpoint,
    credential: Credential,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenSlot {
    fn new(endpoint: TokenEndpoint, credential: Credential) -> Self {
        Self {
            endpoint,
            credential,
            cached: Mutex::new(None),
        }
    }
}

pub struct TokenBroker {
    http: Client,
    music: TokenSlot,
    chat: TokenSlot,
}

impl TokenBroker {
    pub fn new(http: Client, config: &Config) -> Self {
        let music = config.provider(Provider::MusicService);
        let chat = config.provider(Provider::ChatService);
        Self {
            http,
            music: TokenSlot::new(music.token_endpoint(), music.credential()),
            chat: TokenSlot::new(chat.token_endpoint(), chat.credential()),
        }
    }

    fn slot(&self, provider: Provider) -> &TokenSlot {
        match provider {
            Provider::MusicService => &self.music,
            Provider::ChatService => &self.chat,
        }
    }

    /// Returns the cached token, refreshing first if it is absent or expired.
    pub async fn get_token(&self, provider: Provider) -> Result<AccessToken, AuthError> {
        let slot = self.slot(provider);
        let mut cached = slot.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.clone());
            }
            debug!("{} access token expired, refreshing", provider);
            *cached = None;
        }

        let grant = slot.endpoint.refresh(&self.http, &slot.credential).await?;
        let token = grant.into_access_token(provider, Utc::now());
        info!(
            "Refreshed {} access token (expires at {:?})",
            provider,
            token.expires_at()
        );
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drops the cached token if it is still the one a caller saw rejected.
    ///
    /// A token refreshed by a concurrent run in the meantime is left alone.
    pub async fn invalidate(&self, provider: Provider, stale: &AccessToken) {
        let mut cached = self.slot(provider).cached.lock().await;
        if cached.as_ref() == Some(stale) {
            warn!("{} rejected the cached access token; discarding it", provider);
            *cached = None;
        }
    }
}
