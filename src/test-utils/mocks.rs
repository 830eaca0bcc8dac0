use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use snafu::location;
use tokio::sync::Mutex;

use crate::core::codec::{ProstCodec, WireCodec};
use crate::core::endpoint::EndpointSnapshot;
use crate::core::event::{Event, MembershipSubscriber};
use crate::core::partition::{PartitionSink, PartitionUpdate};
use crate::core::transport::TransportLayer;
use crate::core::view::View;
use crate::error::{Error, Result};
use crate::pb::Envelope;

/// Records every datagram sent through it as `(target, envelope)`.
#[derive(Clone, Debug, Default)]
pub(crate) struct MockUdpSocket {
    transmitted: Arc<Mutex<Vec<(String, Envelope)>>>,
    fail_next: Arc<AtomicBool>,
}

impl MockUdpSocket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn transmitted(&self) -> Vec<(String, Envelope)> {
        let tx = self.transmitted.lock().await;
        (*tx).clone()
    }

    /// Makes the next `send_to` fail with an I/O error.
    pub(crate) fn fail_next_send(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportLayer for MockUdpSocket {
    async fn recv(&self, _buf: &mut [u8]) -> Result<usize> {
        std::future::pending().await
    }

    async fn send_to(&self, buf: &[u8], target: &str) -> Result<usize> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Io {
                message: format!("network unreachable: {target}"),
                location: location!(),
            });
        }

        let envelope = ProstCodec.from_wire_form(buf)?;
        self.transmitted
            .lock()
            .await
            .push((target.to_string(), envelope));

        Ok(buf.len())
    }

    fn local_addr(&self) -> Result<String> {
        Ok("MockUdpSocket".to_string())
    }
}

/// A codec failing every frame authentication.
#[derive(Debug)]
pub(crate) struct RejectingCodec;

impl WireCodec for RejectingCodec {
    fn to_wire_form(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        ProstCodec.to_wire_form(envelope)
    }

    fn from_wire_form(&self, _bytes: &[u8]) -> Result<Envelope> {
        Err(Error::Security {
            message: "frame signature mismatch".to_string(),
            location: location!(),
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingSubscriber {
    events: StdMutex<Vec<Event>>,
}

impl RecordingSubscriber {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn joined(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::NodeJoined(joined) => Some(joined.endpoint),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl MembershipSubscriber for RecordingSubscriber {
    fn on_join(&self, endpoint: &str, state: &EndpointSnapshot) {
        self.push(Event::new_node_joined("test", endpoint, *state));
    }

    fn on_alive(&self, endpoint: &str, state: &EndpointSnapshot) {
        self.push(Event::new_node_alive("test", endpoint, *state));
    }

    fn on_dead(&self, endpoint: &str, state: &EndpointSnapshot) {
        self.push(Event::new_node_dead("test", endpoint, *state));
    }

    fn on_remove(&self, endpoint: &str) {
        self.push(Event::new_node_removed("test", endpoint));
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    notifications: StdMutex<Vec<PartitionUpdate>>,
}

impl RecordingSink {
    pub(crate) fn notifications(&self) -> Vec<PartitionUpdate> {
        self.notifications.lock().unwrap().clone()
    }
}

impl PartitionSink for RecordingSink {
    fn notify(&self, view: &View, leader: Option<i32>) {
        self.notifications.lock().unwrap().push(PartitionUpdate {
            view: view.clone(),
            leader,
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::core::codec::{ProstCodec, WireCodec};
    use crate::core::transport::TransportLayer;
    use crate::pb::Envelope;

    use super::MockUdpSocket;

    #[tokio::test]
    async fn test_mock_socket_records_transmitted() {
        let socket = MockUdpSocket::new();
        let envelope = Envelope {
            cluster_id: "default".to_string(),
            sequence: 1,
            ..Default::default()
        };
        let buf = ProstCodec.to_wire_form(&envelope).unwrap();

        let sent = socket.send_to(&buf, "127.0.0.1:9000").await.unwrap();

        assert_eq!(sent, buf.len());
        assert_eq!(
            socket.transmitted().await,
            vec![("127.0.0.1:9000".to_string(), envelope)]
        );
    }
}
