//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::mpsc;

use scribe::clock::VectorClock;
use scribe::config::SessionConfig;
use scribe::document::Snapshot;
use scribe::op::Operation;
use scribe::protocol::ServerFrame;
use scribe::session::SessionHandle;
use scribe::types::Revision;

/// Test error type
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Build a vector clock from literal entries.
pub fn clock(entries: &[(&str, u64)]) -> VectorClock {
    entries.iter().map(|(c, n)| (c.to_string(), *n)).collect()
}

/// Insert operation with the client's own counter at `seq`.
pub fn insert_op(client: &str, base: Revision, seq: u64, pos: usize, text: &str) -> Operation {
    Operation::insert(client, base, clock(&[(client, seq)]), pos, text)
}

/// Delete operation with the client's own counter at `seq`.
pub fn delete_op(client: &str, base: Revision, seq: u64, pos: usize, len: usize) -> Operation {
    Operation::delete(client, base, clock(&[(client, seq)]), pos, len)
}

/// Session configuration sized for tests.
pub fn test_session_config() -> SessionConfig {
    SessionConfig {
        history_limit: 128,
        idle_timeout: Duration::from_secs(120),
        max_clients: 16,
        outbound_queue: 128,
        command_queue: 64,
    }
}

/// Join a session, returning the snapshot and the outbound frame stream.
pub async fn join_session(
    session: &SessionHandle,
    client: &str,
    queue: usize,
) -> (Snapshot, mpsc::Receiver<ServerFrame>) {
    let (tx, rx) = mpsc::channel(queue);
    let snapshot = session
        .join(client.to_string(), tx)
        .await
        .expect("join failed");
    (snapshot, rx)
}

/// Receive the next frame, failing the test after one second.
pub async fn recv_frame(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("outbound channel closed")
}

/// Drain every frame currently queued.
pub fn drain_frames(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}
