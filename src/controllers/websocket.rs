use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Reply};

use super::errors::Error;
use super::AppContext;
use crate::auth::{self, Identity};
use crate::hub::{ClientHandle, HubEvent, HubHandle};

/// Frames buffered per client before the hub gives up on it.
const OUTBOUND_BUFFER: usize = 32;

pub fn get_filters(
    ctx: Arc<AppContext>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    let hub = ctx.hub.clone();
    warp::path!("api" / "v1" / "ws")
        .and(warp::ws())
        .and(auth::identity(ctx.jwt_secret.clone()))
        .and(warp::any().map(move || hub.clone()))
        .map(
            |ws: Ws, identity: Option<Identity>, hub: HubHandle| match identity {
                Some(identity) => ws
                    .on_upgrade(move |socket| client_connection(socket, identity, hub))
                    .into_response(),
                None => Error::Unauthenticated.into_reply().into_response(),
            },
        )
}

/// Registers the socket with the hub, forwards hub frames to it, and
/// disconnects when the peer goes away.
async fn client_connection(socket: WebSocket, identity: Identity, hub: HubHandle) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let client = ClientHandle::new(identity.user_id, identity.role, outbound_tx);
    let info = client.info();

    if hub.connect(client).await.is_err() {
        warn!(user_id = %identity.user_id, "Hub unavailable, closing socket.");
        let _ = sink.close().await;
        return;
    }
    info!(user_id = %identity.user_id, role = ?identity.role, "WebSocket connected.");

    // Ends when the hub drops this client's handle or the socket breaks.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(err) = sink.send(Message::text(frame)).await {
                debug!(error = %err, "WebSocket write failed.");
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(message) if message.is_close() => break,
            Ok(message) => match message.to_str().map(HubEvent::from_frame) {
                Ok(Ok(event)) => debug!(kind = ?event.kind(), "Ignoring client event."),
                _ => debug!("Ignoring unrecognised client frame."),
            },
            Err(err) => {
                debug!(error = %err, "WebSocket read failed.");
                break;
            }
        }
    }

    let _ = hub.disconnect(info).await;
    let _ = writer.await;
    info!(user_id = %identity.user_id, "WebSocket disconnected.");
}
