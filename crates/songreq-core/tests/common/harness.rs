#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;
use songreq_core::catalog::CatalogClient;
use songreq_core::chat::{self, ChatConnection, ChatEvent};
use songreq_core::command::CommandParser;
use songreq_core::config::Config;
use songreq_core::live::LiveGuard;
use songreq_core::pipeline::Pipeline;
use songreq_core::token::{AccessToken, Provider, TokenBroker};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CHANNEL: &str = "somestreamer";
pub const BOT: &str = "songbot";

/// Config whose provider endpoints all point at `server`.
pub fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.chat.username = BOT.into();
    config.chat.channel = CHANNEL.into();
    config.twitch.client_id = "tw-id".into();
    config.twitch.client_secret = "tw-secret".into();
    config.twitch.refresh_token = "tw-refresh".into();
    config.twitch.token_url = format!("{}/twitch/token", server.uri());
    config.twitch.api_base = format!("{}/helix", server.uri());
    config.spotify.client_id = "sp-id".into();
    config.spotify.client_secret = "sp-secret".into();
    config.spotify.refresh_token = "sp-refresh".into();
    config.spotify.token_url = format!("{}/spotify/token", server.uri());
    config.spotify.api_base = format!("{}/v1", server.uri());
    config
}

fn grant(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": token,
        "expires_in": 3600,
        "token_type": "bearer"
    }))
}

pub async fn mount_twitch_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/twitch/token"))
        .respond_with(grant("tw-access"))
        .mount(server)
        .await;
}

pub async fn mount_twitch_token_expecting(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/twitch/token"))
        .respond_with(grant("tw-access"))
        .expect(expected_calls)
        .mount(server)
        .await;
}

pub async fn mount_spotify_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/spotify/token"))
        .respond_with(grant("sp-access"))
        .expect(expected_calls)
        .mount(server)
        .await;
}

pub async fn mount_live(server: &MockServer, live: bool) {
    let data = if live {
        json!([{ "id": "42", "user_login": CHANNEL, "type": "live" }])
    } else {
        json!([])
    };
    Mock::given(method("GET"))
        .and(path("/helix/streams"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
        .mount(server)
        .await;
}

pub fn search_hit(uri: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "tracks": { "items": [{ "uri": uri, "name": "A Song" }] }
    }))
}

pub fn search_miss() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "tracks": { "items": [] } }))
}

/// Server side of an in-memory IRC session.
pub struct FakeIrc {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeIrc {
    pub async fn next_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    pub async fn say(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
    }

    pub async fn privmsg(&mut self, author: &str, text: &str) {
        let line = format!(":{author}!{author}@{author}.tmi.twitch.tv PRIVMSG #{CHANNEL} :{text}");
        self.say(&line).await;
    }
}

/// Logs a chat session in over a duplex pipe and returns both ends.
pub async fn chat_session() -> (ChatConnection, FakeIrc) {
    let (client, server) = tokio::io::duplex(16 * 1024);
    let (read_half, writer) = tokio::io::split(server);
    let mut irc = FakeIrc {
        reader: BufReader::new(read_half),
        writer,
    };

    let server_side = tokio::spawn(async move {
        assert_eq!(irc.next_line().await, "PASS oauth:tw-access");
        assert_eq!(irc.next_line().await, format!("NICK {BOT}"));
        irc.say(&format!(":tmi.twitch.tv 001 {BOT} :Welcome, GLHF!")).await;
        assert_eq!(irc.next_line().await, format!("JOIN #{CHANNEL}"));
        irc
    });

    let token = AccessToken::new(Provider::ChatService, "tw-access", None);
    let connection = chat::establish(client, BOT, CHANNEL, &token).await.unwrap();
    (connection, server_side.await.unwrap())
}

pub fn build_pipeline(config: &Config, connection: &ChatConnection) -> Pipeline {
    let http = reqwest::Client::new();
    Pipeline::new(
        CommandParser::new(config.chat.command_prefix.clone()),
        Arc::new(TokenBroker::new(http.clone(), config)),
        LiveGuard::new(http.clone(), config.twitch.api_base.clone(), config.twitch.client_id.clone()),
        CatalogClient::new(http, config.spotify.api_base.clone()),
        connection.handle.clone(),
        config.chat.channel.clone(),
    )
}

pub fn event(author: &str, text: &str) -> ChatEvent {
    ChatEvent {
        author: author.into(),
        text: text.into(),
        channel: CHANNEL.into(),
    }
}
