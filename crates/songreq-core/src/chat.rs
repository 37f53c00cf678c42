//! Twitch IRC chat session with separated reader/writer tasks.
//!
//! Architecture:
//!
//! ```text
//!   chat::connect() / chat::establish()
//!         │  PASS, NICK, wait for 001, JOIN
//!         │
//!         ├── writer_task   ← receives Outbound lines via mpsc → socket
//!         └── reader_task   ← reads IRC lines from socket
//!                                ├── PING     → PONG via the writer
//!                                └── PRIVMSG  → ChatEvent channel
//! ```
//!
//! Public API:
//!   - `ChatHandle`: cheap to clone. `send(channel, text)` resolves once
//!     the line has been written to the socket.
//!   - `ChatConnection::events`: the inbound stream. It ends when the server
//!     disconnects; the session join handle then reports why.

use std::time::Duration;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::error::ChannelError;
use crate::token::AccessToken;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Twitch drops PRIVMSG bodies longer than this.
const MAX_MESSAGE_CHARS: usize = 500;

/// Inbound lines longer than this (tags included) are skipped.
const MAX_LINE_BYTES: u64 = 16 * 1024;

/// One inbound chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub author: String,
    pub text: String,
    /// Channel name without the leading `#`.
    pub channel: String,
}

// ── internal channel types ────────────────────────────────────────────────────

struct Outbound {
    line: String,
    written: Option<oneshot::Sender<Result<(), ChannelError>>>,
}

// ── public handle ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ChatHandle {
    tx: mpsc::Sender<Outbound>,
}

impl ChatHandle {
    /// Posts `text` to `channel`. CR/LF are flattened so a message can never
    /// smuggle a second IRC command.
    pub async fn send(&self, channel: &str, text: &str) -> Result<(), ChannelError> {
        let line = format!(
            "PRIVMSG #{} :{}",
            channel.trim_start_matches('#'),
            sanitize(text)
        );
        let (written_tx, written_rx) = oneshot::channel();
        self.tx
            .send(Outbound {
                line,
                written: Some(written_tx),
            })
            .await
            .map_err(|_| ChannelError::Closed)?;
        written_rx.await.map_err(|_| ChannelError::Closed)?
    }
}

pub struct ChatConnection {
    pub handle: ChatHandle,
    pub events: mpsc::Receiver<ChatEvent>,
    /// Finishes when the server goes away.
    pub session: JoinHandle<Result<(), ChannelError>>,
}

// ── connect ───────────────────────────────────────────────────────────────────

pub async fn connect(config: &ChatConfig, token: &AccessToken) -> Result<ChatConnection, ChannelError> {
    info!("Connecting to chat server {}", config.server);
    let stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(&config.server))
        .await
        .map_err(|_| ChannelError::Timeout)??;
    establish(stream, &config.username, &config.channel, token).await
}

/// Runs the login handshake over an already-open stream and starts the I/O tasks.
pub async fn establish<S>(
    stream: S,
    username: &str,
    channel: &str,
    token: &AccessToken,
) -> Result<ChatConnection, ChannelError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let channel = channel.trim_start_matches('#').to_lowercase();
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    write_line(&mut write_half, &format!("PASS oauth:{}", token.bearer())).await?;
    write_line(&mut write_half, &format!("NICK {}", username.to_lowercase())).await?;
    tokio::time::timeout(HANDSHAKE_TIMEOUT, await_welcome(&mut reader, &mut write_half))
        .await
        .map_err(|_| ChannelError::Timeout)??;

    info!("Connected to Twitch chat. Joining #{}", channel);
    write_line(&mut write_half, &format!("JOIN #{}", channel)).await?;

    let (out_tx, out_rx) = mpsc::channel::<Outbound>(64);
    let (event_tx, event_rx) = mpsc::channel::<ChatEvent>(256);

    tokio::spawn(writer_task(write_half, out_rx));
    let session = tokio::spawn(reader_task(reader, out_tx.clone(), event_tx));

    Ok(ChatConnection {
        handle: ChatHandle { tx: out_tx },
        events: event_rx,
        session,
    })
}

async fn await_welcome<R, W>(reader: &mut R, writer: &mut W) -> Result<(), ChannelError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let Some(line) = next_line(reader, &mut buf).await? else {
            return Err(ChannelError::Closed);
        };
        let Some(msg) = IrcLine::parse(&line) else {
            continue;
        };
        match msg.command {
            "001" => return Ok(()),
            "PING" => write_line(writer, &msg.pong()).await?,
            "NOTICE" => {
                let text = msg.trailing().unwrap_or_default();
                if is_login_failure(text) {
                    return Err(ChannelError::Rejected(text.to_string()));
                }
                debug!("chat notice during handshake: {}", text);
            }
            _ => {}
        }
    }
}

fn is_login_failure(notice: &str) -> bool {
    let lower = notice.to_lowercase();
    lower.contains("authentication failed") || lower.contains("improperly formatted auth")
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: R,
    outbound: mpsc::Sender<Outbound>,
    events: mpsc::Sender<ChatEvent>,
) -> Result<(), ChannelError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let line = match next_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                warn!("chat reader: server closed the connection");
                return Err(ChannelError::Closed);
            }
            Err(e) => {
                warn!("chat reader: read error: {}", e);
                return Err(e.into());
            }
        };

        let Some(msg) = IrcLine::parse(&line) else {
            continue;
        };
        match msg.command {
            "PING" => {
                let pong = Outbound {
                    line: msg.pong(),
                    written: None,
                };
                if outbound.send(pong).await.is_err() {
                    return Err(ChannelError::Closed);
                }
            }
            "PRIVMSG" => {
                let Some(event) = msg.chat_event() else {
                    continue;
                };
                if events.send(event).await.is_err() {
                    debug!("chat reader: event consumer gone, stopping");
                    return Ok(());
                }
            }
            "RECONNECT" => {
                warn!("chat reader: server requested reconnect");
                return Err(ChannelError::Closed);
            }
            "NOTICE" => info!("chat notice: {}", msg.trailing().unwrap_or_default()),
            _ => {}
        }
    }
}

/// Next inbound line, `None` at EOF.
///
/// Bytes that are not UTF-8 are replaced rather than failing the session, and
/// lines over [`MAX_LINE_BYTES`] are dropped whole.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        buf.clear();
        let n = AsyncReadExt::take(&mut *reader, MAX_LINE_BYTES)
            .read_until(b'\n', buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.ends_with(b"\n") || (n as u64) < MAX_LINE_BYTES {
            return Ok(Some(String::from_utf8_lossy(&buf[..]).into_owned()));
        }

        debug!("chat reader: skipping line longer than {} bytes", MAX_LINE_BYTES);
        loop {
            buf.clear();
            let n = AsyncReadExt::take(&mut *reader, MAX_LINE_BYTES)
                .read_until(b'\n', buf)
                .await?;
            if n == 0 {
                return Ok(None);
            }
            if buf.ends_with(b"\n") {
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(out) = rx.recv().await {
        let result = write_line(&mut writer, &out.line).await;
        let failed = result.is_err();
        if let Err(e) = &result {
            warn!("chat writer: write error: {}", e);
        }
        if let Some(written) = out.written {
            let _ = written.send(result.map_err(ChannelError::from));
        }
        if failed {
            break;
        }
    }
    debug!("chat writer: stopped");
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .take(MAX_MESSAGE_CHARS)
        .collect()
}

// ── IRC line parsing ──────────────────────────────────────────────────────────

/// One parsed IRC line, borrowing from the raw text.
#[derive(Debug, PartialEq, Eq)]
struct IrcLine<'a> {
    prefix: Option<&'a str>,
    command: &'a str,
    params: Vec<&'a str>,
}

impl<'a> IrcLine<'a> {
    fn parse(raw: &'a str) -> Option<Self> {
        let mut rest = raw.trim_end_matches(['\r', '\n']);
        // IRCv3 tags are not requested, but skip them if a server sends them.
        if let Some(tagged) = rest.strip_prefix('@') {
            rest = tagged.split_once(' ')?.1;
        }
        let prefix = match rest.strip_prefix(':') {
            Some(prefixed) => {
                let (prefix, tail) = prefixed.split_once(' ')?;
                rest = tail;
                Some(prefix)
            }
            None => None,
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };
        let mut words = head.split_whitespace();
        let command = words.next()?;
        let mut params: Vec<&str> = words.collect();
        params.extend(trailing);

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    fn trailing(&self) -> Option<&'a str> {
        self.params.last().copied()
    }

    fn pong(&self) -> String {
        format!("PONG :{}", self.trailing().unwrap_or("tmi.twitch.tv"))
    }

    fn nick(&self) -> Option<&'a str> {
        let prefix = self.prefix?;
        prefix.split('!').next().filter(|nick| !nick.is_empty())
    }

    fn chat_event(&self) -> Option<ChatEvent> {
        let [target, text] = self.params.as_slice() else {
            return None;
        };
        Some(ChatEvent {
            author: self.nick()?.to_string(),
            text: text.to_string(),
            channel: target.trim_start_matches('#').to_string(),
        })
    }
}
