//! Connection-loss and recovery behavior against a scripted server.

mod support;

use agentwire_client::types::{ConnectionState, MessageOptions, SessionState};
use agentwire_client::{Client, SessionOptions};
use agentwire_protocol::wire::{methods, Envelope};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use support::{scripted_factory, standard_behavior, test_options, wait_until, Behavior, ServerHandle};

#[tokio::test]
async fn crash_restarts_the_connection_and_resumes_sessions() {
    let (handle, _from_client) = ServerHandle::new();
    let client = Client::with_transport_factory(
        test_options(),
        scripted_factory(handle.clone(), standard_behavior()),
    )
    .unwrap();
    client.connect().await.unwrap();
    let session = client
        .create_session(SessionOptions::with_model("claude-sonnet-4.5"))
        .await
        .unwrap();

    handle.crash();

    wait_until("the connection to come back", || {
        client.state() == ConnectionState::Connected
            && handle.connects.load(Ordering::SeqCst) == 2
    })
    .await;
    wait_until("the session to be resumed", || {
        handle.saw_method(methods::SESSION_RESUME)
    })
    .await;
    let resume_params = handle.request_params(methods::SESSION_RESUME).unwrap();
    assert_eq!(resume_params["sessionId"], "s-1");
    wait_until("the session to become active again", || {
        session.state() == SessionState::Active
    })
    .await;

    // The resumed session accepts messages on the new connection.
    let accepted = session
        .send_message(MessageOptions::prompt("still there?"))
        .await
        .unwrap();
    assert!(!accepted.message_id.is_empty());
    client.force_stop().await;
}

#[tokio::test]
async fn crash_without_auto_restart_fails_sessions() {
    let (handle, _from_client) = ServerHandle::new();
    let mut options = test_options();
    options.auto_restart = false;
    let client = Client::with_transport_factory(
        options,
        scripted_factory(handle.clone(), standard_behavior()),
    )
    .unwrap();
    client.connect().await.unwrap();
    let session = client
        .create_session(SessionOptions::with_model("claude-sonnet-4.5"))
        .await
        .unwrap();

    handle.crash();

    wait_until("the session to be failed", || {
        session.state() == SessionState::Failed
    })
    .await;
    assert_eq!(client.state(), ConnectionState::Error);
    assert_eq!(handle.connects.load(Ordering::SeqCst), 1);
    assert!(session
        .send_message(MessageOptions::prompt("anyone?"))
        .await
        .is_err());
    client.force_stop().await;
}

#[tokio::test]
async fn crash_fails_requests_in_flight() {
    let (handle, _from_client) = ServerHandle::new();
    let base = standard_behavior();
    let behavior: Behavior = {
        let handle = handle.clone();
        Arc::new(move |request| {
            if request.method == methods::GET_STATUS {
                // Never answered; the caller is left in flight.
                handle.park(Envelope::response(request.id.clone(), json!({})));
                return vec![];
            }
            base(request)
        })
    };
    let mut options = test_options();
    options.auto_restart = false;
    let client =
        Client::with_transport_factory(options, scripted_factory(handle.clone(), behavior))
            .unwrap();
    client.connect().await.unwrap();

    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { client.get_status().await })
    };
    wait_until("the status request to arrive", || {
        handle.saw_method(methods::GET_STATUS)
    })
    .await;

    handle.crash();
    let result = tokio::time::timeout(Duration::from_secs(2), in_flight)
        .await
        .expect("in-flight request hung after the crash")
        .unwrap();
    assert!(result.is_err());
    client.force_stop().await;
}

#[tokio::test]
async fn restart_gives_up_after_the_configured_attempts() {
    let (handle, _from_client) = ServerHandle::new();
    // The first connect succeeds; every reconnect attempt fails, so the
    // restart loop runs out of attempts.
    let inner_factory = scripted_factory(handle.clone(), standard_behavior());
    let mut options = test_options();
    options.restart_attempts = 2;
    let client = Client::with_transport_factory(options, {
        let handle = handle.clone();
        Arc::new(move || {
            let inner_factory = Arc::clone(&inner_factory);
            let handle = handle.clone();
            Box::pin(async move {
                if handle.connects.load(Ordering::SeqCst) >= 1 {
                    handle.connects.fetch_add(1, Ordering::SeqCst);
                    return Err(agentwire_protocol::Error::transport("server unavailable"));
                }
                inner_factory().await
            })
        })
    })
    .unwrap();
    client.connect().await.unwrap();
    let session = client
        .create_session(SessionOptions::with_model("claude-sonnet-4.5"))
        .await
        .unwrap();

    handle.crash();

    wait_until("the session to be failed after retries ran out", || {
        session.state() == SessionState::Failed
    })
    .await;
    assert_eq!(client.state(), ConnectionState::Error);
    assert_eq!(handle.connects.load(Ordering::SeqCst), 3);
    client.force_stop().await;
}

#[tokio::test]
async fn stop_closes_sessions_and_rejects_further_operations() {
    let (handle, _from_client) = ServerHandle::new();
    let client = Client::with_transport_factory(
        test_options(),
        scripted_factory(handle.clone(), standard_behavior()),
    )
    .unwrap();
    client.connect().await.unwrap();
    let session = client
        .create_session(SessionOptions::with_model("claude-sonnet-4.5"))
        .await
        .unwrap();

    assert_ok!(client.stop().await);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.ping(None).await.is_err());
}
