//! The relay's view of the remote voice transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};

/// One Opus payload received from the remote side.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    pub payload: Bytes,
    pub sender_id: String,
}

/// Remote transport as seen by the relay engine.
///
/// Implemented by the session layer, which owns connection state. The
/// engine only borrows a session for the duration of one relay run and
/// never mutates it apart from the speaking advisory.
pub trait RelaySession: Send + Sync {
    /// Whether the transport currently accepts and delivers voice.
    fn is_ready(&self) -> bool;

    /// Channel for encoded packets. `None` until the session is established.
    ///
    /// Sends block while the transport's buffer is full.
    fn outbound(&self) -> Option<Sender<Bytes>>;

    /// Channel of received packets. Disconnects when the transport ends.
    fn inbound(&self) -> Option<Receiver<InboundPacket>>;

    /// Advisory "we are transmitting" flag, set at relay start and stop.
    fn set_speaking(&self, active: bool);
}

/// In-process session over crossbeam channels.
///
/// Readiness and both channels can be swapped at any time, which makes it
/// useful for driving the relay locally (see [`ChannelSession::loopback`]).
pub struct ChannelSession {
    ready: AtomicBool,
    outbound: Mutex<Option<Sender<Bytes>>>,
    inbound: Mutex<Option<Receiver<InboundPacket>>>,
    speaking: AtomicBool,
    speaking_changes: AtomicUsize,
}

impl ChannelSession {
    /// A session with no channels that is not ready.
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            outbound: Mutex::new(None),
            inbound: Mutex::new(None),
            speaking: AtomicBool::new(false),
            speaking_changes: AtomicUsize::new(0),
        }
    }

    /// A ready session whose outbound packets come straight back inbound.
    pub fn loopback(capacity: usize) -> Self {
        let (packet_tx, packet_rx) = crossbeam_channel::bounded::<Bytes>(capacity);
        let (inbound_tx, inbound_rx) = crossbeam_channel::bounded::<InboundPacket>(capacity);

        let spawned = std::thread::Builder::new()
            .name("loopback".into())
            .spawn(move || {
                for payload in packet_rx {
                    let packet = InboundPacket {
                        payload,
                        sender_id: "loopback".to_string(),
                    };
                    if inbound_tx.send(packet).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn loopback thread: {}", e);
        }

        let session = Self::new();
        session.set_outbound(Some(packet_tx));
        session.set_inbound(Some(inbound_rx));
        session.set_ready(true);
        session
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_outbound(&self, tx: Option<Sender<Bytes>>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = tx;
    }

    pub fn set_inbound(&self, rx: Option<Receiver<InboundPacket>>) {
        *self.inbound.lock().unwrap_or_else(PoisonError::into_inner) = rx;
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// How many times `set_speaking` was called.
    pub fn speaking_changes(&self) -> usize {
        self.speaking_changes.load(Ordering::SeqCst)
    }
}

impl Default for ChannelSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RelaySession for ChannelSession {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn outbound(&self) -> Option<Sender<Bytes>> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn inbound(&self) -> Option<Receiver<InboundPacket>> {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_speaking(&self, active: bool) {
        self.speaking.store(active, Ordering::SeqCst);
        self.speaking_changes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_session_is_idle() {
        let session = ChannelSession::new();
        assert!(!session.is_ready());
        assert!(session.outbound().is_none());
        assert!(session.inbound().is_none());
    }

    #[test]
    fn test_loopback_echoes_packets() {
        let session = ChannelSession::loopback(4);
        assert!(session.is_ready());

        let tx = session.outbound().unwrap();
        let rx = session.inbound().unwrap();
        tx.send(Bytes::from_static(b"opus")).unwrap();

        let packet = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(&packet.payload[..], b"opus");
        assert_eq!(packet.sender_id, "loopback");
    }

    #[test]
    fn test_speaking_is_recorded() {
        let session = ChannelSession::new();
        session.set_speaking(true);
        assert!(session.is_speaking());
        session.set_speaking(false);
        assert!(!session.is_speaking());
        assert_eq!(session.speaking_changes(), 2);
    }
}
