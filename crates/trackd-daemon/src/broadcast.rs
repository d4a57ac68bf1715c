//! Event fan-out to connected clients.
//!
//! Background operations never write to client sockets directly: they hand
//! typed [`EventMessage`]s to an [`EventPublisher`], which pushes them onto
//! a channel. A single broadcaster task drains the channel and fans each
//! event out to a snapshot of the live-client registry, so one slow or dead
//! client can neither block the publisher nor starve the other clients.
//!
//! Delivery is best-effort: a write failure marks that client disconnected
//! and the broadcast continues; clients that connect later simply miss
//! earlier events. Because a single task performs all fan-out, each client
//! observes events in `publish` order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use trackd_proto::{EventMessage, JsonMap, ServerMessage};

use crate::clients::ClientRegistry;

/// Handle for publishing events from anywhere in the daemon.
///
/// Cheap to clone; `publish` is fire-and-forget and never blocks the caller
/// on socket I/O.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<EventMessage>,
}

impl EventPublisher {
    /// Publisher wired to a bare receiver, for tests that inspect events
    /// without running a broadcaster.
    #[cfg(test)]
    pub(crate) fn test_channel() -> (Self, mpsc::UnboundedReceiver<EventMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event for delivery to every connected client.
    pub fn publish(&self, event_type: &str, data: JsonMap) {
        let event = EventMessage::new(event_type, Some(data));
        if self.tx.send(event).is_err() {
            // Broadcaster is gone; events have no delivery guarantee anyway.
            warn!(event_type, "event dropped: broadcaster not running");
        }
    }
}

/// Task that drains the event channel and writes to client sockets.
pub struct Broadcaster {
    rx: mpsc::UnboundedReceiver<EventMessage>,
    clients: Arc<ClientRegistry>,
}

impl Broadcaster {
    /// Create a publisher/broadcaster pair over the given registry.
    #[must_use]
    pub fn channel(clients: Arc<ClientRegistry>) -> (EventPublisher, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventPublisher { tx }, Self { rx, clients })
    }

    /// Run until every publisher handle is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.fan_out(&event).await;
        }
        debug!("broadcaster stopped");
    }

    async fn fan_out(&self, event: &EventMessage) {
        let message = ServerMessage::Event(event.clone());
        let clients = self.clients.snapshot();
        let mut delivered = 0usize;

        for client in clients {
            if !client.is_connected() {
                // Marked dead by an earlier failure; its connection task
                // will evict it.
                continue;
            }

            match client.send(&message).await {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!(
                        client_id = %client.id,
                        event = %event.event,
                        error = %error,
                        "failed to deliver event, marking client disconnected"
                    );
                },
            }
        }

        debug!(event = %event.event, delivered, "broadcast event");
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;
    use tokio::net::UnixStream;
    use tokio_util::codec::Framed;
    use trackd_proto::FrameCodec;

    use super::*;
    use crate::clients::ClientConnection;

    fn connected_client(
        id: &str,
        registry: &ClientRegistry,
    ) -> (Arc<ClientConnection>, Framed<UnixStream, FrameCodec>) {
        let (server_side, client_side) = UnixStream::pair().unwrap();
        let (sink, _read) = Framed::new(server_side, FrameCodec::new()).split();
        let client = Arc::new(ClientConnection::new(id.to_string(), sink));
        registry.insert(Arc::clone(&client));
        (client, Framed::new(client_side, FrameCodec::new()))
    }

    fn event_data(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    async fn next_event(peer: &mut Framed<UnixStream, FrameCodec>) -> EventMessage {
        let frame = peer.next().await.unwrap().unwrap();
        match serde_json::from_slice::<ServerMessage>(&frame).unwrap() {
            ServerMessage::Event(event) => event,
            ServerMessage::Response(other) => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let registry = Arc::new(ClientRegistry::new());
        let (_client, mut peer) = connected_client("c", &registry);

        let (publisher, broadcaster) = Broadcaster::channel(Arc::clone(&registry));
        let handle = tokio::spawn(broadcaster.run());

        for name in ["alpha", "beta", "gamma"] {
            publisher.publish(name, event_data(json!({"name": name})));
        }

        for expected in ["alpha", "beta", "gamma"] {
            let event = next_event(&mut peer).await;
            assert_eq!(event.event, expected);
            assert!(!event.id.is_empty());
        }

        drop(publisher);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_dead_client_does_not_break_broadcast() {
        let registry = Arc::new(ClientRegistry::new());
        let (dead, dead_peer) = connected_client("dead", &registry);
        let (_alive, mut alive_peer) = connected_client("alive", &registry);

        // Kill one client's socket outright.
        drop(dead_peer);

        let (publisher, broadcaster) = Broadcaster::channel(Arc::clone(&registry));
        let handle = tokio::spawn(broadcaster.run());

        // Several rounds so the broken pipe definitely surfaces on the dead
        // socket; the survivor must receive every one of them.
        for round in 0..8 {
            publisher.publish("tick", event_data(json!({"round": round})));
        }
        for round in 0..8 {
            let event = next_event(&mut alive_peer).await;
            assert_eq!(event.event, "tick");
            assert_eq!(event.data.unwrap()["round"], json!(round));
        }

        drop(publisher);
        handle.await.unwrap();
        assert!(!dead.is_connected());
    }

    #[tokio::test]
    async fn test_marked_disconnected_clients_are_skipped() {
        let registry = Arc::new(ClientRegistry::new());
        let (marked, mut marked_peer) = connected_client("marked", &registry);
        let (_alive, mut alive_peer) = connected_client("alive", &registry);
        marked.mark_disconnected();

        let (publisher, broadcaster) = Broadcaster::channel(Arc::clone(&registry));
        let handle = tokio::spawn(broadcaster.run());

        publisher.publish("only_for_live_clients", JsonMap::new());
        let event = next_event(&mut alive_peer).await;
        assert_eq!(event.event, "only_for_live_clients");

        drop(publisher);
        handle.await.unwrap();

        // The marked client's socket never saw the event.
        let nothing =
            tokio::time::timeout(std::time::Duration::from_millis(50), marked_peer.next()).await;
        assert!(nothing.is_err(), "marked-disconnected client received data");
    }

    #[tokio::test]
    async fn test_publish_without_broadcaster_does_not_panic() {
        let registry = Arc::new(ClientRegistry::new());
        let (publisher, broadcaster) = Broadcaster::channel(registry);
        drop(broadcaster);
        publisher.publish("into_the_void", JsonMap::new());
    }
}
