//! The bus facade: publish with loop suppression and deferred self-delivery.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::envelope::{Envelope, EnvelopeKind, SourceRole};
use crate::error::{BusError, Result};
use crate::transport::Transport;

/// Check-and-set hook into the dedup ledger's broadcast set. Returns whether
/// this is the first time the id was seen.
pub type FirstBroadcastFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One window's handle on the broadcast bus.
///
/// Everything a window handles arrives through the single receiver returned
/// by [`BroadcastBus::new`], whether it came from a sibling or from this
/// window's own deferred self-delivery, so there is one code path for
/// applying bus traffic.
pub struct BroadcastBus {
    transport: Arc<Transport>,
    role: SourceRole,
    first_broadcast: FirstBroadcastFn,
    deliver_tx: mpsc::Sender<Envelope>,
}

impl BroadcastBus {
    /// Attach to a transport. Returns the bus handle and the stream of
    /// envelopes this window should handle.
    pub fn new(
        transport: Transport,
        role: SourceRole,
        first_broadcast: FirstBroadcastFn,
    ) -> (Self, mpsc::Receiver<Envelope>) {
        let transport = Arc::new(transport);
        let (deliver_tx, deliver_rx) = mpsc::channel(64);

        // Pump transport traffic into the delivery stream, dropping anything
        // the ledger has already seen (our own echoes, re-broadcast loops).
        let mut transport_rx = transport.subscribe();
        let pump_tx = deliver_tx.clone();
        let pump_check = first_broadcast.clone();
        tokio::spawn(async move {
            while let Some(envelope) = transport_rx.recv().await {
                if !pump_check(&envelope.unique_id) {
                    debug!(id = %envelope.unique_id, "suppressed re-broadcast");
                    continue;
                }
                if pump_tx.send(envelope).await.is_err() {
                    break;
                }
            }
        });

        (
            Self {
                transport,
                role,
                first_broadcast,
                deliver_tx,
            },
            deliver_rx,
        )
    }

    /// Publish an envelope to every sibling window.
    ///
    /// The publisher claims the envelope id in the ledger up front so the
    /// transport echo is dropped; kinds that self-deliver are then fed back
    /// into the local stream after a deferred tick.
    pub async fn publish(
        &self,
        kind: EnvelopeKind,
        payload: serde_json::Value,
        target_session: Option<String>,
    ) -> Result<Envelope> {
        let envelope = Envelope::new(kind, payload, target_session, self.role);

        let _ = (self.first_broadcast)(&envelope.unique_id);
        self.transport.send(&envelope).await?;

        if kind.self_delivers() {
            let tx = self.deliver_tx.clone();
            let own = envelope.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                let _ = tx.send(own).await;
            });
        }

        Ok(envelope)
    }

    /// Feed an externally constructed envelope into this window's handler
    /// (used by openers pushing snapshots down to companion windows).
    pub async fn deliver_local(&self, envelope: Envelope) -> Result<()> {
        self.deliver_tx
            .send(envelope)
            .await
            .map_err(|_| BusError::DeliveryClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ProcessHub;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    fn ledger_hook() -> FirstBroadcastFn {
        let seen = Mutex::new(HashSet::new());
        Arc::new(move |id: &str| seen.lock().unwrap().insert(id.to_string()))
    }

    async fn recv_timeout(rx: &mut mpsc::Receiver<Envelope>) -> Option<Envelope> {
        tokio::time::timeout(Duration::from_millis(300), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn new_message_not_self_delivered_but_reaches_sibling() {
        let hub = ProcessHub::new(16);
        let (bus_a, mut rx_a) = BroadcastBus::new(hub.attach(), SourceRole::Main, ledger_hook());
        let (_bus_b, mut rx_b) = BroadcastBus::new(hub.attach(), SourceRole::Main, ledger_hook());
        tokio::task::yield_now().await;

        bus_a
            .publish(
                EnvelopeKind::NewMessage,
                serde_json::json!({"id": "m1"}),
                Some("room1".into()),
            )
            .await
            .unwrap();

        let sibling = recv_timeout(&mut rx_b).await.expect("sibling delivery");
        assert_eq!(sibling.kind, EnvelopeKind::NewMessage);

        // The publisher applied the message on the outbound path already;
        // no self-delivery happens.
        assert!(recv_timeout(&mut rx_a).await.is_none());
    }

    #[tokio::test]
    async fn room_list_update_is_re_delivered_to_self_exactly_once() {
        let hub = ProcessHub::new(16);
        let (bus_a, mut rx_a) = BroadcastBus::new(hub.attach(), SourceRole::Main, ledger_hook());
        tokio::task::yield_now().await;

        bus_a
            .publish(EnvelopeKind::RoomListUpdate, serde_json::json!({}), None)
            .await
            .unwrap();

        let own = recv_timeout(&mut rx_a).await.expect("self delivery");
        assert_eq!(own.kind, EnvelopeKind::RoomListUpdate);
        assert!(recv_timeout(&mut rx_a).await.is_none(), "no double delivery");
    }

    #[tokio::test]
    async fn duplicate_envelope_from_transport_is_suppressed() {
        let hub = ProcessHub::new(16);
        let (_bus_b, mut rx_b) = BroadcastBus::new(hub.attach(), SourceRole::Main, ledger_hook());
        tokio::task::yield_now().await;

        // A misbehaving sibling sends the same envelope twice.
        let raw = hub.attach();
        let env = Envelope::new(
            EnvelopeKind::NewMessage,
            serde_json::json!({"id": "m1"}),
            None,
            SourceRole::Main,
        );
        raw.send(&env).await.unwrap();
        raw.send(&env).await.unwrap();

        assert!(recv_timeout(&mut rx_b).await.is_some());
        assert!(recv_timeout(&mut rx_b).await.is_none());
    }
}
