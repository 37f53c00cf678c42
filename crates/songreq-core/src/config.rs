use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;
use crate::error::ConfigError;
use crate::token::{ClientCredentials, Credential, Provider, TokenEndpoint};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub twitch: TwitchConfig,
    #[serde(default)]
    pub spotify: SpotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Login name the bot authenticates as.
    #[serde(default)]
    pub username: String,
    /// Broadcast channel to watch, without the leading `#`.
    #[serde(default)]
    pub channel: String,
    #[serde(default = "default_irc_server")]
    pub server: String,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TwitchConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_twitch_token_url")]
    pub token_url: String,
    #[serde(default = "default_twitch_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_twitch_api_base")]
    pub api_base: String,
    #[serde(default = "default_twitch_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_twitch_scopes")]
    pub scopes: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_spotify_token_url")]
    pub token_url: String,
    #[serde(default = "default_spotify_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_spotify_api_base")]
    pub api_base: String,
    #[serde(default = "default_spotify_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_spotify_scopes")]
    pub scopes: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            channel: String::new(),
            server: default_irc_server(),
            command_prefix: default_command_prefix(),
        }
    }
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            token_url: default_twitch_token_url(),
            authorize_url: default_twitch_authorize_url(),
            api_base: default_twitch_api_base(),
            redirect_uri: default_twitch_redirect_uri(),
            scopes: default_twitch_scopes(),
        }
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            token_url: default_spotify_token_url(),
            authorize_url: default_spotify_authorize_url(),
            api_base: default_spotify_api_base(),
            redirect_uri: default_spotify_redirect_uri(),
            scopes: default_spotify_scopes(),
        }
    }
}

// Secrets stay out of Debug output.
impl std::fmt::Debug for TwitchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwitchConfig")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .field("api_base", &self.api_base)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for SpotifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotifyConfig")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .field("api_base", &self.api_base)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

fn default_irc_server() -> String {
    platform::TWITCH_IRC_ADDRESS.to_string()
}

fn default_command_prefix() -> String {
    "!sr".to_string()
}

fn default_twitch_token_url() -> String {
    "https://id.twitch.tv/oauth2/token".to_string()
}

fn default_twitch_authorize_url() -> String {
    "https://id.twitch.tv/oauth2/authorize".to_string()
}

fn default_twitch_api_base() -> String {
    "https://api.twitch.tv/helix".to_string()
}

fn default_twitch_redirect_uri() -> String {
    "http://localhost:8081/twitch_callback".to_string()
}

fn default_twitch_scopes() -> String {
    "chat:read chat:edit".to_string()
}

fn default_spotify_token_url() -> String {
    "https://accounts.spotify.com/api/token".to_string()
}

fn default_spotify_authorize_url() -> String {
    "https://accounts.spotify.com/authorize".to_string()
}

fn default_spotify_api_base() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_spotify_redirect_uri() -> String {
    "http://127.0.0.1:8080/callback".to_string()
}

fn default_spotify_scopes() -> String {
    "user-modify-playback-state".to_string()
}

/// Borrowed view over one provider's section, whichever table it came from.
#[derive(Clone, Copy)]
pub struct ProviderSettings<'a> {
    pub provider: Provider,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub refresh_token: &'a str,
    pub token_url: &'a str,
    pub authorize_url: &'a str,
    pub redirect_uri: &'a str,
    pub scopes: &'a str,
}

impl ProviderSettings<'_> {
    pub fn client(&self) -> ClientCredentials {
        ClientCredentials::new(self.client_id, self.client_secret)
    }

    pub fn credential(&self) -> Credential {
        Credential::new(self.provider, self.refresh_token, self.client())
    }

    pub fn token_endpoint(&self) -> TokenEndpoint {
        TokenEndpoint::new(self.provider, self.token_url)
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads `path`, writing a default file there first if none exists.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Overlays non-empty environment values on top of the file contents.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides: [(&str, &mut String); 10] = [
            ("TWITCH_USERNAME", &mut self.chat.username),
            ("TWITCH_CHANNEL", &mut self.chat.channel),
            ("TWITCH_OAUTH", &mut self.twitch.refresh_token),
            ("TWITCH_CLIENT_ID", &mut self.twitch.client_id),
            ("TWITCH_CLIENT_SECRET", &mut self.twitch.client_secret),
            ("TWITCH_SCOPES", &mut self.twitch.scopes),
            ("SPOTIFY_TOKEN", &mut self.spotify.refresh_token),
            ("CLIENT_ID", &mut self.spotify.client_id),
            ("CLIENT_SECRET", &mut self.spotify.client_secret),
            ("SCOPES", &mut self.spotify.scopes),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = value.trim().to_string();
            }
        }
        self.chat.channel = normalize_channel(&self.chat.channel);
    }

    /// Everything the request pipeline needs before it may start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("TWITCH_USERNAME", &self.chat.username),
            ("TWITCH_OAUTH", &self.twitch.refresh_token),
            ("TWITCH_CHANNEL", &self.chat.channel),
            ("SPOTIFY_TOKEN", &self.spotify.refresh_token),
            ("TWITCH_CLIENT_ID", &self.twitch.client_id),
            ("TWITCH_CLIENT_SECRET", &self.twitch.client_secret),
            ("CLIENT_ID", &self.spotify.client_id),
            ("CLIENT_SECRET", &self.spotify.client_secret),
        ];
        missing(&required)
    }

    /// Client identifiers needed to run an authorization flow for `provider`.
    pub fn validate_client(&self, provider: Provider) -> Result<(), ConfigError> {
        match provider {
            Provider::ChatService => missing(&[
                ("TWITCH_CLIENT_ID", &self.twitch.client_id),
                ("TWITCH_CLIENT_SECRET", &self.twitch.client_secret),
            ]),
            Provider::MusicService => missing(&[
                ("CLIENT_ID", &self.spotify.client_id),
                ("CLIENT_SECRET", &self.spotify.client_secret),
            ]),
        }
    }

    pub fn provider(&self, provider: Provider) -> ProviderSettings<'_> {
        match provider {
            Provider::ChatService => ProviderSettings {
                provider,
                client_id: &self.twitch.client_id,
                client_secret: &self.twitch.client_secret,
                refresh_token: &self.twitch.refresh_token,
                token_url: &self.twitch.token_url,
                authorize_url: &self.twitch.authorize_url,
                redirect_uri: &self.twitch.redirect_uri,
                scopes: &self.twitch.scopes,
            },
            Provider::MusicService => ProviderSettings {
                provider,
                client_id: &self.spotify.client_id,
                client_secret: &self.spotify.client_secret,
                refresh_token: &self.spotify.refresh_token,
                token_url: &self.spotify.token_url,
                authorize_url: &self.spotify.authorize_url,
                redirect_uri: &self.spotify.redirect_uri,
                scopes: &self.spotify.scopes,
            },
        }
    }
}

fn missing(required: &[(&'static str, &String)]) -> Result<(), ConfigError> {
    let absent: Vec<&'static str> = required
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| *key)
        .collect();
    if absent.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Missing(absent))
    }
}

fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}
