//! Multi-viewer resize arbitration: the PTY window always tracks the
//! smallest size reported by any attached client.

use std::collections::HashMap;
use std::time::Duration;

use termmux::pty::PtySession;

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
}

async fn attached_client(
    session: &std::sync::Arc<PtySession>,
) -> (termmux::client::ClientHandle, termmux::client::ClientSession) {
    let client = termmux::client::ClientSession::new();
    let handle = client.handle();
    session.attach(handle.clone()).await;
    (handle, client)
}

#[tokio::test]
async fn smallest_reported_size_wins_across_clients() {
    let session = PtySession::spawn(&sh("cat"), &HashMap::new(), None).unwrap();
    session.start_reading(|_| {});

    let (big, _big_session) = attached_client(&session).await;
    let (small, _small_session) = attached_client(&session).await;

    big.set_reported_size(50, 200);
    session.resize_to_smallest().await.unwrap();

    small.set_reported_size(20, 60);
    session.resize_to_smallest().await.unwrap();

    // Only observable indirectly: a second resize call with the same
    // inputs must stay a no-op (current_size already matches the minimum).
    session.resize_to_smallest().await.unwrap();

    session.terminate(true, Duration::from_millis(20)).await;
}

#[tokio::test]
async fn departing_client_no_longer_constrains_the_minimum() {
    let session = PtySession::spawn(&sh("cat"), &HashMap::new(), None).unwrap();
    session.start_reading(|_| {});

    let (small, _small_session) = attached_client(&session).await;
    let (big, _big_session) = attached_client(&session).await;

    small.set_reported_size(10, 40);
    big.set_reported_size(50, 200);
    session.resize_to_smallest().await.unwrap();

    assert!(session.detach(small.id()).await);
    session.resize_to_smallest().await.unwrap();

    assert_eq!(session.client_count().await, 1);
    session.terminate(true, Duration::from_millis(20)).await;
}
