//! One-time OAuth authorization-code login.
//!
//! Prints the provider's consent URL, waits on the redirect URI for the
//! browser callback, trades the code for tokens and prints them. The printed
//! refresh token is what goes into `SPOTIFY_TOKEN` / `TWITCH_OAUTH`.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, Url};
use serde::Deserialize;
use songreq_core::config::{Config, ProviderSettings};
use songreq_core::token::{ClientCredentials, Provider, TokenEndpoint, TokenGrant};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

/// Everything the callback needs to finish one login.
struct Login {
    provider: Provider,
    http: Client,
    endpoint: TokenEndpoint,
    client: ClientCredentials,
    redirect_uri: String,
    state: String,
}

struct CallbackState {
    login: Login,
    grant: Mutex<Option<TokenGrant>>,
    done: Notify,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub async fn run(config: &Config, http: Client, provider: Provider) -> anyhow::Result<()> {
    config.validate_client(provider)?;
    let settings = config.provider(provider);

    let state = random_state();
    let consent = authorize_url(&settings, &state)?;
    let redirect = Url::parse(settings.redirect_uri)
        .with_context(|| format!("invalid redirect URI {}", settings.redirect_uri))?;
    let host = redirect
        .host_str()
        .ok_or_else(|| anyhow!("redirect URI {} has no host", redirect))?
        .to_string();
    let port = redirect
        .port_or_known_default()
        .ok_or_else(|| anyhow!("redirect URI {} has no port", redirect))?;

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding callback listener on {}:{}", host, port))?;
    info!("{} login listening on {}:{}{}", provider, host, port, redirect.path());

    println!("Go to the following link in your browser:\n{}", consent);

    let login = Login {
        provider,
        http,
        endpoint: settings.token_endpoint(),
        client: settings.client(),
        redirect_uri: settings.redirect_uri.to_string(),
        state,
    };
    let grant = serve(listener, redirect.path(), login).await?;

    let token = grant.access_token.clone();
    let refresh = grant.refresh_token.clone();
    let access = grant.into_access_token(provider, chrono::Utc::now());
    println!("Access Token: {}", token);
    println!("Refresh Token: {}", refresh.as_deref().unwrap_or("(none issued)"));
    match access.expires_at() {
        Some(at) => println!("Expiry: {}", at),
        None => println!("Expiry: (none)"),
    }
    Ok(())
}

/// Serves `path` until one callback completes the code exchange.
async fn serve(listener: TcpListener, path: &str, login: Login) -> anyhow::Result<TokenGrant> {
    let shared = Arc::new(CallbackState {
        login,
        grant: Mutex::new(None),
        done: Notify::new(),
    });
    let app = Router::new()
        .route(path, get(callback))
        .with_state(Arc::clone(&shared));

    let shutdown = Arc::clone(&shared);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.done.notified().await })
        .await
        .context("callback listener failed")?;

    let grant = shared.grant.lock().await.take();
    grant.ok_or_else(|| anyhow!("callback listener stopped before a token was issued"))
}

async fn callback(
    State(shared): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, String) {
    let login = &shared.login;
    if params.state.as_deref() != Some(login.state.as_str()) {
        warn!("{} callback with mismatched state", login.provider);
        return (StatusCode::BAD_REQUEST, "State mismatch".to_string());
    }
    if let Some(error) = params.error {
        warn!("{} denied authorization: {}", login.provider, error);
        return (StatusCode::BAD_REQUEST, format!("Authorization denied: {}", error));
    }
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing code".to_string());
    };

    match login
        .endpoint
        .exchange_code(&login.http, &login.client, &code, &login.redirect_uri)
        .await
    {
        Ok(grant) => {
            *shared.grant.lock().await = Some(grant);
            shared.done.notify_one();
            info!("{} authorization complete", login.provider);
            (
                StatusCode::OK,
                format!("{} authorization complete! You can close this tab.", login.provider),
            )
        }
        Err(e) => {
            warn!("{} code exchange failed: {}", login.provider, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Token exchange failed".to_string(),
            )
        }
    }
}

fn authorize_url(settings: &ProviderSettings<'_>, state: &str) -> anyhow::Result<Url> {
    Url::parse_with_params(
        settings.authorize_url,
        &[
            ("client_id", settings.client_id),
            ("response_type", "code"),
            ("redirect_uri", settings.redirect_uri),
            ("scope", settings.scopes),
            ("state", state),
        ],
    )
    .with_context(|| format!("invalid authorize URL {}", settings.authorize_url))
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
