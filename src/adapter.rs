//! WebSocket client adapter.
//!
//! One adapter per connection. It translates wire frames into session
//! calls and pumps the session's broadcasts back out. The session never
//! touches the socket: it enqueues frames on the adapter's bounded
//! outbound queue, and a dedicated pump task drives the transport, so a
//! stalled socket can only ever fill its own queue.
//!
//! The first frame on a connection must be `join`. Disconnects (clean or
//! not) deregister the client; reconnecting with the same `client_id`
//! joins again and must accept a possibly-resync snapshot.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ScribeError;
use crate::protocol::{decode_client_frame, encode_server_frame, ClientFrame, ServerFrame};
use crate::registry::SessionRegistry;
use crate::session::SessionHandle;
use crate::types::ClientId;

/// Drive one WebSocket connection to completion.
pub async fn handle_socket(socket: WebSocket, registry: Arc<SessionRegistry>, outbound_queue: usize) {
    let connection = Uuid::new_v4();
    let (sink, mut stream) = socket.split();

    let (outbound, rx) = mpsc::channel::<ServerFrame>(outbound_queue);
    let pump = tokio::spawn(pump_outbound(rx, sink));

    // The join handshake: reject anything else until the client joins.
    let joined = loop {
        let Some(Ok(message)) = stream.next().await else {
            debug!(%connection, "Connection closed before join");
            drop(outbound);
            let _ = pump.await;
            return;
        };
        let raw = match message {
            Message::Text(raw) => raw,
            Message::Close(_) => {
                drop(outbound);
                let _ = pump.await;
                return;
            }
            _ => continue,
        };
        match decode_client_frame(&raw) {
            Ok(ClientFrame::Join {
                document_id,
                client_id,
            }) => break (document_id, client_id),
            Ok(_) => {
                let err = ScribeError::InvalidOperation("first frame must be join".into());
                let _ = outbound.send(ServerFrame::error(&err)).await;
            }
            Err(err) => {
                let _ = outbound.send(ServerFrame::error(&err)).await;
            }
        }
    };
    let (document_id, client_id) = joined;

    let session = match registry.get_or_create(&document_id).await {
        Ok(session) => session,
        Err(err) => {
            warn!(%connection, document = %document_id, error = %err, "Session lookup failed");
            let _ = outbound.send(ServerFrame::error(&err)).await;
            drop(outbound);
            let _ = pump.await;
            return;
        }
    };

    match session.join(client_id.clone(), outbound.clone()).await {
        Ok(snapshot) => {
            let _ = outbound
                .send(ServerFrame::Snapshot {
                    revision: snapshot.revision,
                    content: snapshot.content,
                    clock: snapshot.clock,
                })
                .await;
        }
        Err(err) => {
            let _ = outbound.send(ServerFrame::error(&err)).await;
            drop(outbound);
            let _ = pump.await;
            return;
        }
    }

    debug!(%connection, document = %document_id, client = %client_id, "Client connected");
    read_frames(&mut stream, &session, &client_id, &outbound).await;

    // In-flight submits stay durable; pending broadcasts to this client
    // are simply dropped with the queue.
    let _ = session.leave(client_id.clone()).await;
    drop(outbound);
    let _ = pump.await;
    debug!(%connection, document = %document_id, client = %client_id, "Client disconnected");
}

/// Translate inbound frames into session calls until the peer goes away.
async fn read_frames(
    stream: &mut (impl Stream<Item = std::result::Result<Message, axum::Error>> + Unpin),
    session: &SessionHandle,
    client_id: &ClientId,
    outbound: &mpsc::Sender<ServerFrame>,
) {
    while let Some(Ok(message)) = stream.next().await {
        let raw = match message {
            Message::Text(raw) => raw,
            Message::Close(_) => return,
            _ => continue,
        };

        let frame = match decode_client_frame(&raw) {
            Ok(frame) => frame,
            Err(err) => {
                // Malformed frames cost the offending client only.
                let _ = outbound.send(ServerFrame::error(&err)).await;
                continue;
            }
        };

        let result = match frame {
            ClientFrame::Op { op } => session.submit(client_id.clone(), op).await,
            ClientFrame::Ack { revision } => session.ack(client_id.clone(), revision).await,
            ClientFrame::Cursor { cursor } => session.cursor(client_id.clone(), cursor).await,
            ClientFrame::Leave => return,
            ClientFrame::Join { .. } => {
                let err = ScribeError::InvalidOperation("already joined".into());
                let _ = outbound.send(ServerFrame::error(&err)).await;
                Ok(())
            }
        };

        if let Err(err) = result {
            // The session is gone; nothing more to translate.
            let _ = outbound.send(ServerFrame::error(&err)).await;
            return;
        }
    }
}

/// Forward queued frames to the socket until every sender is gone.
async fn pump_outbound(
    mut rx: mpsc::Receiver<ServerFrame>,
    mut sink: impl Sink<Message> + Unpin,
) {
    while let Some(frame) = rx.recv().await {
        let encoded = match encode_server_frame(&frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "Dropping unencodable frame");
                continue;
            }
        };
        if sink.send(Message::Text(encoded)).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}
