//! Per-event request pipeline.
//!
//! ```text
//!   Received → Parsed → LiveChecked → Authenticated → Searched → Queued → Reported
//!       └──────────┴────────┴──────────────┴─────────────┴──────────┴─→ Dropped | Failed
//! ```
//!
//! Each chat event is handled by its own task. Runs share nothing but the
//! token broker, and every run ends in exactly one [`Outcome`], which is
//! reported once.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::catalog::{CatalogClient, CatalogItem};
use crate::chat::{ChatEvent, ChatHandle};
use crate::command::{CommandParser, Parse, RequestCommand};
use crate::error::{CatalogError, ChannelError, RequestError, UpstreamError};
use crate::live::LiveGuard;
use crate::token::{AccessToken, Provider, TokenBroker};

/// Step a failed run was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LiveCheck,
    Authenticate,
    Search,
    Enqueue,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::LiveCheck => "live-check",
            Stage::Authenticate => "authenticate",
            Stage::Search => "search",
            Stage::Enqueue => "enqueue",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotACommand,
    EmptyQuery,
    NotLive,
}

/// Terminal state of one pipeline run.
#[derive(Debug)]
pub enum Outcome {
    Dropped {
        reason: DropReason,
        user: String,
    },
    Failed {
        stage: Stage,
        request: RequestCommand,
        error: RequestError,
    },
    /// The track is queued. `confirmation` is the best-effort chat reply and
    /// does not affect the queue action.
    Reported {
        request: RequestCommand,
        item: CatalogItem,
        confirmation: Result<(), ChannelError>,
    },
}

impl Outcome {
    /// Emits the single log event for this run.
    pub fn report(&self) {
        match self {
            Outcome::Dropped {
                reason: DropReason::NotACommand,
                user,
            } => trace!(user = %user, "Not a request command"),
            Outcome::Dropped {
                reason: DropReason::EmptyQuery,
                user,
            } => warn!(user = %user, "Empty song request"),
            Outcome::Dropped {
                reason: DropReason::NotLive,
                user,
            } => info!(user = %user, "Ignoring song request, channel is not live"),
            Outcome::Failed {
                stage,
                request,
                error,
            } => error!(
                user = %request.user,
                query = %request.query,
                stage = %stage,
                kind = ?error.kind(),
                "Song request failed: {}",
                error
            ),
            Outcome::Reported {
                request,
                item,
                confirmation,
            } => {
                info!(
                    user = %request.user,
                    query = %request.query,
                    uri = %item.uri,
                    "Added to queue"
                );
                if let Err(e) = confirmation {
                    warn!(user = %request.user, "Could not send chat confirmation: {}", e);
                }
            }
        }
    }
}

pub struct Pipeline {
    parser: CommandParser,
    broker: Arc<TokenBroker>,
    live: LiveGuard,
    catalog: CatalogClient,
    chat: ChatHandle,
    broadcast_channel: String,
}

impl Pipeline {
    pub fn new(
        parser: CommandParser,
        broker: Arc<TokenBroker>,
        live: LiveGuard,
        catalog: CatalogClient,
        chat: ChatHandle,
        broadcast_channel: impl Into<String>,
    ) -> Self {
        Self {
            parser,
            broker,
            live,
            catalog,
            chat,
            broadcast_channel: broadcast_channel.into(),
        }
    }

    /// Consumes chat events until the stream ends, one task per event.
    ///
    /// Runs still in flight when this returns are left to finish or be
    /// abandoned with the runtime.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ChatEvent>) {
        info!("Listening for {} requests", self.parser.prefix());
        while let Some(event) = events.recv().await {
            let pipeline = Arc::clone(&self);
            tokio::spawn(async move {
                pipeline.handle(event).await.report();
            });
        }
        info!("Chat event stream ended");
    }

    /// Drives one event to its terminal state.
    pub async fn handle(&self, event: ChatEvent) -> Outcome {
        let request = match self.parser.parse(&event.text, &event.author) {
            Parse::Miss => {
                return Outcome::Dropped {
                    reason: DropReason::NotACommand,
                    user: event.author,
                }
            }
            Parse::Empty { user } => {
                return Outcome::Dropped {
                    reason: DropReason::EmptyQuery,
                    user,
                }
            }
            Parse::Request(request) => request,
        };
        debug!("{} requested {:?}", request.user, request.query);

        let item = match self.fulfil(&request).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                return Outcome::Dropped {
                    reason: DropReason::NotLive,
                    user: request.user,
                }
            }
            Err((stage, error)) => {
                return Outcome::Failed {
                    stage,
                    request,
                    error,
                }
            }
        };

        let message = format!(
            "Added to queue: {} (requested by {})",
            request.query, request.user
        );
        let confirmation = self.chat.send(&event.channel, &message).await;
        Outcome::Reported {
            request,
            item,
            confirmation,
        }
    }

    /// Live check, token, search and enqueue. `Ok(None)` means not live.
    async fn fulfil(&self, request: &RequestCommand) -> Result<Option<CatalogItem>, (Stage, RequestError)> {
        let chat_token = self
            .broker
            .get_token(Provider::ChatService)
            .await
            .map_err(|e| (Stage::LiveCheck, RequestError::from(e)))?;
        let live = match self.live.is_live(&self.broadcast_channel, &chat_token).await {
            Ok(live) => live,
            Err(e) => {
                self.discard_if_rejected(&chat_token, &e).await;
                return Err((Stage::LiveCheck, e.into()));
            }
        };
        if !live {
            return Ok(None);
        }

        let token = self
            .broker
            .get_token(Provider::MusicService)
            .await
            .map_err(|e| (Stage::Authenticate, RequestError::from(e)))?;

        let item = match self.catalog.search(&request.query, &token).await {
            Ok(item) => item,
            Err(CatalogError::Upstream(e)) => {
                self.discard_if_rejected(&token, &e).await;
                return Err((Stage::Search, e.into()));
            }
            Err(e) => return Err((Stage::Search, e.into())),
        };

        if let Err(e) = self.catalog.enqueue(&item, &token).await {
            self.discard_if_rejected(&token, &e).await;
            return Err((Stage::Enqueue, e.into()));
        }
        Ok(Some(item))
    }

    async fn discard_if_rejected(&self, token: &AccessToken, error: &UpstreamError) {
        if error.is_auth() {
            self.broker.invalidate(token.provider(), token).await;
        }
    }
}
