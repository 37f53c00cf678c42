mod common;

use std::sync::Arc;
use std::time::Duration;

use common::harness::{
    build_pipeline, chat_session, config_for, event, mount_live, mount_spotify_token,
    mount_twitch_token, mount_twitch_token_expecting, search_hit, search_miss, CHANNEL,
};
use songreq_core::error::{ErrorKind, RequestError};
use songreq_core::pipeline::{DropReason, Outcome, Stage};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_search(server: &MockServer, response: ResponseTemplate, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(response)
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_queue(server: &MockServer, response: ResponseTemplate, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/me/player/queue"))
        .respond_with(response)
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn live_request_is_queued_and_confirmed() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    mount_twitch_token(&server).await;
    mount_spotify_token(&server, 1).await;
    mount_live(&server, true).await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("q", "here is a song"))
        .and(query_param("limit", "1"))
        .respond_with(search_hit("spotify:track:abc"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/me/player/queue"))
        .and(query_param("uri", "spotify:track:abc"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let (connection, mut irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);

    let outcome = pipeline
        .handle(event("viewer", "!sr  here is a song https://x.co/abc  "))
        .await;
    match outcome {
        Outcome::Reported {
            request,
            item,
            confirmation,
        } => {
            assert_eq!(request.query, "here is a song");
            assert_eq!(request.user, "viewer");
            assert_eq!(item.uri, "spotify:track:abc");
            assert!(confirmation.is_ok());
        }
        other => panic!("expected Reported, got {other:?}"),
    }

    assert_eq!(
        irc.next_line().await,
        "PRIVMSG #somestreamer :Added to queue: here is a song (requested by viewer)"
    );
    connection.handle.send(CHANNEL, "sentinel").await.unwrap();
    assert_eq!(irc.next_line().await, "PRIVMSG #somestreamer :sentinel");
}

#[tokio::test]
async fn offline_channel_drops_before_music_token_or_catalog() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    mount_twitch_token(&server).await;
    mount_spotify_token(&server, 0).await;
    mount_live(&server, false).await;
    mount_search(&server, search_hit("spotify:track:abc"), 0).await;
    mount_queue(&server, ResponseTemplate::new(204), 0).await;

    let (connection, mut irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);

    let outcome = pipeline
        .handle(event("viewer", "!sr  here is a song https://x.co/abc  "))
        .await;
    assert!(matches!(
        outcome,
        Outcome::Dropped {
            reason: DropReason::NotLive,
            ..
        }
    ));

    connection.handle.send(CHANNEL, "sentinel").await.unwrap();
    assert_eq!(irc.next_line().await, "PRIVMSG #somestreamer :sentinel");
}

#[tokio::test]
async fn no_search_results_fails_without_enqueue_or_confirmation() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    mount_twitch_token(&server).await;
    mount_spotify_token(&server, 1).await;
    mount_live(&server, true).await;
    mount_search(&server, search_miss(), 1).await;
    mount_queue(&server, ResponseTemplate::new(204), 0).await;

    let (connection, mut irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);

    match pipeline.handle(event("viewer", "!sr nothing matches this")).await {
        Outcome::Failed {
            stage,
            request,
            error,
        } => {
            assert_eq!(stage, Stage::Search);
            assert_eq!(error.kind(), ErrorKind::NotFound);
            assert_eq!(request.query, "nothing matches this");
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    connection.handle.send(CHANNEL, "sentinel").await.unwrap();
    assert_eq!(irc.next_line().await, "PRIVMSG #somestreamer :sentinel");
}

#[tokio::test]
async fn enqueue_failure_is_not_retried_or_confirmed() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    mount_twitch_token(&server).await;
    mount_spotify_token(&server, 1).await;
    mount_live(&server, true).await;
    mount_search(&server, search_hit("spotify:track:abc"), 1).await;
    mount_queue(&server, ResponseTemplate::new(502), 1).await;

    let (connection, mut irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);

    match pipeline.handle(event("viewer", "!sr some song")).await {
        Outcome::Failed { stage, error, .. } => {
            assert_eq!(stage, Stage::Enqueue);
            assert_eq!(error.kind(), ErrorKind::Upstream);
        }
        other => panic!("expected Failed, got {other:?}"),
    }

    connection.handle.send(CHANNEL, "sentinel").await.unwrap();
    assert_eq!(irc.next_line().await, "PRIVMSG #somestreamer :sentinel");
}

#[tokio::test]
async fn rejected_music_token_is_refreshed_for_the_next_run() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    mount_twitch_token(&server).await;
    mount_spotify_token(&server, 2).await;
    mount_live(&server, true).await;
    mount_search(
        &server,
        ResponseTemplate::new(401).set_body_string("The access token expired"),
        2,
    )
    .await;
    mount_queue(&server, ResponseTemplate::new(204), 0).await;

    let (connection, _irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);

    for _ in 0..2 {
        match pipeline.handle(event("viewer", "!sr some song")).await {
            Outcome::Failed {
                stage: Stage::Search,
                error: RequestError::Upstream(e),
                ..
            } => assert!(e.is_auth()),
            other => panic!("expected an auth-class search failure, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn rejected_chat_token_is_refreshed_for_the_next_run() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    mount_twitch_token_expecting(&server, 2).await;
    mount_spotify_token(&server, 0).await;
    Mock::given(method("GET"))
        .and(path("/helix/streams"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid OAuth token"))
        .expect(2)
        .mount(&server)
        .await;
    mount_search(&server, search_hit("spotify:track:abc"), 0).await;

    let (connection, _irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);

    for _ in 0..2 {
        match pipeline.handle(event("viewer", "!sr some song")).await {
            Outcome::Failed {
                stage: Stage::LiveCheck,
                error: RequestError::Upstream(e),
                ..
            } => assert!(e.is_auth()),
            other => panic!("expected an auth-class live-check failure, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn rejected_enqueue_refreshes_the_music_token() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    mount_twitch_token_expecting(&server, 1).await;
    mount_spotify_token(&server, 2).await;
    mount_live(&server, true).await;
    mount_search(&server, search_hit("spotify:track:abc"), 2).await;
    mount_queue(&server, ResponseTemplate::new(403).set_body_string("forbidden"), 2).await;

    let (connection, mut irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);

    for _ in 0..2 {
        match pipeline.handle(event("viewer", "!sr some song")).await {
            Outcome::Failed {
                stage: Stage::Enqueue,
                error: RequestError::Upstream(e),
                ..
            } => assert!(e.is_auth()),
            other => panic!("expected an auth-class enqueue failure, got {other:?}"),
        }
    }

    connection.handle.send(CHANNEL, "sentinel").await.unwrap();
    assert_eq!(irc.next_line().await, "PRIVMSG #somestreamer :sentinel");
}

#[tokio::test]
async fn chat_token_failure_stops_at_the_live_check() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    Mock::given(method("POST"))
        .and(path("/twitch/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Invalid refresh token"))
        .expect(1)
        .mount(&server)
        .await;
    mount_spotify_token(&server, 0).await;
    Mock::given(method("GET"))
        .and(path("/helix/streams"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (connection, _irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);

    match pipeline.handle(event("viewer", "!sr some song")).await {
        Outcome::Failed { stage, error, .. } => {
            assert_eq!(stage, Stage::LiveCheck);
            assert_eq!(error.kind(), ErrorKind::Auth);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn live_check_failure_stops_the_run() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    mount_twitch_token(&server).await;
    mount_spotify_token(&server, 0).await;
    Mock::given(method("GET"))
        .and(path("/helix/streams"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    mount_search(&server, search_hit("spotify:track:abc"), 0).await;

    let (connection, _irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);

    match pipeline.handle(event("viewer", "!sr some song")).await {
        Outcome::Failed { stage, error, .. } => {
            assert_eq!(stage, Stage::LiveCheck);
            assert_eq!(error.kind(), ErrorKind::Upstream);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn music_token_failure_is_an_auth_failure() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    mount_twitch_token(&server).await;
    mount_live(&server, true).await;
    Mock::given(method("POST"))
        .and(path("/spotify/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .expect(1)
        .mount(&server)
        .await;
    mount_search(&server, search_hit("spotify:track:abc"), 0).await;

    let (connection, _irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);

    match pipeline.handle(event("viewer", "!sr some song")).await {
        Outcome::Failed { stage, error, .. } => {
            assert_eq!(stage, Stage::Authenticate);
            assert_eq!(error.kind(), ErrorKind::Auth);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
}

#[tokio::test]
async fn chatter_and_empty_requests_make_no_calls() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let (connection, _irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);

    assert!(matches!(
        pipeline.handle(event("viewer", "great stream!")).await,
        Outcome::Dropped {
            reason: DropReason::NotACommand,
            ..
        }
    ));
    match pipeline.handle(event("viewer", "!sr   ")).await {
        Outcome::Dropped {
            reason: DropReason::EmptyQuery,
            user,
        } => assert_eq!(user, "viewer"),
        other => panic!("expected EmptyQuery, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_confirmation_keeps_the_queued_outcome() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    mount_twitch_token(&server).await;
    mount_spotify_token(&server, 1).await;
    mount_live(&server, true).await;
    mount_search(&server, search_hit("spotify:track:abc"), 1).await;
    mount_queue(&server, ResponseTemplate::new(204), 1).await;

    let (connection, irc) = chat_session().await;
    let pipeline = build_pipeline(&config, &connection);
    drop(irc);

    match pipeline.handle(event("viewer", "!sr some song")).await {
        Outcome::Reported {
            item, confirmation, ..
        } => {
            assert_eq!(item.uri, "spotify:track:abc");
            assert!(confirmation.is_err());
        }
        other => panic!("expected Reported, got {other:?}"),
    }
}

#[tokio::test]
async fn run_loop_serves_requests_from_chat_until_disconnect() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    mount_twitch_token(&server).await;
    mount_spotify_token(&server, 1).await;
    mount_live(&server, true).await;
    mount_search(&server, search_hit("spotify:track:xyz"), 1).await;
    mount_queue(&server, ResponseTemplate::new(204), 1).await;

    let (connection, mut irc) = chat_session().await;
    let pipeline = Arc::new(build_pipeline(&config, &connection));
    let running = tokio::spawn(pipeline.run(connection.events));

    irc.privmsg("viewer", "hello there").await;
    irc.privmsg("viewer", "!sr never gonna give you up").await;
    let confirmation = tokio::time::timeout(Duration::from_secs(5), irc.next_line())
        .await
        .expect("confirmation within 5s");
    assert_eq!(
        confirmation,
        "PRIVMSG #somestreamer :Added to queue: never gonna give you up (requested by viewer)"
    );

    drop(irc);
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("run loop ends after disconnect")
        .unwrap();
    assert!(connection.session.await.unwrap().is_err());
}
