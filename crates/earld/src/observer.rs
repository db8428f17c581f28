//! TCP event-stream observer.
//!
//! One JSON object per line. A connecting client first gets the
//! last-event-per-kind history (marked `isHistoric`), then the live
//! stream until it hangs up.

use std::net::SocketAddr;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use earl_bus::{AppEvent, ApplicationBus};

#[derive(Serialize)]
struct WireEvent<'a> {
    #[serde(flatten)]
    event: &'a AppEvent,
    #[serde(rename = "isHistoric", skip_serializing_if = "std::ops::Not::not")]
    is_historic: bool,
}

pub async fn serve(bus: ApplicationBus, port: u16) {
    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(port, %err, "cannot serve the event stream");
            return;
        }
    };
    info!(port, "event stream listening");
    serve_on(bus, listener).await;
}

pub async fn serve_on(bus: ApplicationBus, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                tokio::spawn(handle_client(bus.clone(), socket, peer));
            }
            Err(err) => warn!(%err, "event stream accept failed"),
        }
    }
}

async fn handle_client(bus: ApplicationBus, mut socket: TcpStream, peer: SocketAddr) {
    debug!(%peer, "event stream client connected");

    // Replay what we remember, so a fresh client knows the state of the
    // world, then follow the live stream.
    for event in bus.last_events() {
        if !write_event(&mut socket, &event, true).await {
            return;
        }
    }

    let mut events = bus.subscribe(3).await;
    while let Some(event) = events.recv().await {
        if !write_event(&mut socket, &event, false).await {
            break;
        }
    }
    bus.unsubscribe(&events).await;
    debug!(%peer, "event stream client gone");
}

async fn write_event(socket: &mut TcpStream, event: &AppEvent, historic: bool) -> bool {
    let wire = WireEvent {
        event,
        is_historic: historic,
    };
    let Ok(mut bytes) = serde_json::to_vec(&wire) else {
        return true; // Funny event; skip it.
    };
    bytes.push(b'\n');
    socket.write_all(&bytes).await.is_ok()
}
