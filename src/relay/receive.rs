//! Inbound → decode → reconcile → playback.

use crossbeam_channel::select;

use super::control::RelayControl;
use super::session::RelaySession;
use crate::audio::{FrameReconciler, PlaybackPort, StreamDecoder};
use crate::constants::READINESS_POLL_INTERVAL;

/// Counters of one receive pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub received: u64,
    pub decode_errors: u64,
    pub decoded_samples: u64,
    pub blocks_played: u64,
    pub write_errors: u64,
}

/// Why the receive pipeline returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveExit {
    /// The stop signal was asserted
    Cancelled,
    /// The session's inbound channel disconnected
    InboundClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOutcome {
    pub stats: ReceiveStats,
    pub exit: ReceiveExit,
}

/// Decode received packets and play them in fixed-size blocks.
///
/// While the session is not ready (or has no inbound channel) this polls
/// every [`READINESS_POLL_INTERVAL`]. Decode and write failures skip the
/// packet or block. When the inbound channel disconnects, `stop` is
/// asserted so the rest of the relay winds down too.
pub fn run_receive_pipeline(
    playback: &mut dyn PlaybackPort,
    decoder: &mut dyn StreamDecoder,
    reconciler: &mut FrameReconciler,
    session: &dyn RelaySession,
    stop: &RelayControl,
) -> ReceiveOutcome {
    let mut stats = ReceiveStats::default();
    let mut waiting = false;

    log::info!(
        "Receive pipeline started ({} samples/block)",
        reconciler.output_frames()
    );

    let exit = loop {
        if stop.is_shutdown() {
            break ReceiveExit::Cancelled;
        }

        let inbound = match session.inbound() {
            Some(rx) if session.is_ready() => rx,
            _ => {
                if !waiting {
                    log::debug!("Session not ready, waiting");
                    waiting = true;
                }
                stop.wait_timeout(READINESS_POLL_INTERVAL);
                continue;
            }
        };
        if waiting {
            log::debug!("Session ready");
            waiting = false;
        }

        let packet = select! {
            recv(inbound) -> msg => match msg {
                Ok(packet) => packet,
                Err(_) => {
                    log::info!("Inbound channel closed");
                    stop.shutdown();
                    break ReceiveExit::InboundClosed;
                }
            },
            recv(stop.wake_channel()) -> _ => break ReceiveExit::Cancelled,
        };
        stats.received += 1;

        let pcm = match decoder.decode(&packet.payload) {
            Ok(pcm) => pcm,
            Err(e) => {
                stats.decode_errors += 1;
                log::warn!("Dropping packet from {}: {}", packet.sender_id, e);
                continue;
            }
        };
        stats.decoded_samples += pcm.len() as u64;
        reconciler.push(pcm);

        for block in reconciler.drain() {
            match playback.write_block(&block) {
                Ok(()) => stats.blocks_played += 1,
                Err(e) => {
                    stats.write_errors += 1;
                    log::warn!("Playback write failed: {}", e);
                }
            }
        }
    };

    log::info!("Receive pipeline stopped ({:?}): {:?}", exit, stats);
    ReceiveOutcome { stats, exit }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::session::{ChannelSession, InboundPacket};
    use crate::relay::testing::{fake_packet, FakeDecoder, FakePlayback, PortLog};
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    fn packet(payload: Bytes) -> InboundPacket {
        InboundPacket {
            payload,
            sender_id: "peer".to_string(),
        }
    }

    fn playback() -> (FakePlayback, Arc<Mutex<Vec<Vec<i16>>>>) {
        let played = Arc::new(Mutex::new(Vec::new()));
        (
            FakePlayback::new(Arc::new(PortLog::default()), played.clone()),
            played,
        )
    }

    #[test]
    fn test_two_packets_form_one_block() {
        let session = ChannelSession::new();
        let (tx, rx) = crossbeam_channel::bounded(8);
        session.set_inbound(Some(rx));
        session.set_ready(true);

        tx.send(packet(fake_packet(1, 960))).unwrap();
        tx.send(packet(fake_packet(2, 960))).unwrap();
        drop(tx);

        let (mut playback, played) = playback();
        let mut decoder = FakeDecoder::default();
        let mut reconciler = FrameReconciler::new(1920);
        let stop = RelayControl::new();

        let outcome =
            run_receive_pipeline(&mut playback, &mut decoder, &mut reconciler, &session, &stop);

        assert_eq!(outcome.exit, ReceiveExit::InboundClosed);
        assert_eq!(outcome.stats.received, 2);
        assert_eq!(outcome.stats.blocks_played, 1);

        let played = played.lock().unwrap();
        assert_eq!(played.len(), 1);
        assert_eq!(played[0].len(), 1920);
        assert!(played[0][..960].iter().all(|s| *s == 1));
        assert!(played[0][960..].iter().all(|s| *s == 2));
    }

    #[test]
    fn test_inbound_closed_asserts_stop() {
        let session = ChannelSession::new();
        let (tx, rx) = crossbeam_channel::bounded::<InboundPacket>(1);
        drop(tx);
        session.set_inbound(Some(rx));
        session.set_ready(true);

        let (mut playback, _) = playback();
        let mut decoder = FakeDecoder::default();
        let mut reconciler = FrameReconciler::new(1920);
        let stop = RelayControl::new();

        let outcome =
            run_receive_pipeline(&mut playback, &mut decoder, &mut reconciler, &session, &stop);
        assert_eq!(outcome.exit, ReceiveExit::InboundClosed);
        assert!(stop.is_shutdown());
    }

    #[test]
    fn test_short_remainder_is_held() {
        let session = ChannelSession::new();
        let (tx, rx) = crossbeam_channel::bounded(8);
        session.set_inbound(Some(rx));
        session.set_ready(true);

        tx.send(packet(fake_packet(7, 2500))).unwrap();
        drop(tx);

        let (mut playback, played) = playback();
        let mut decoder = FakeDecoder::default();
        let mut reconciler = FrameReconciler::new(1920);
        let stop = RelayControl::new();

        run_receive_pipeline(&mut playback, &mut decoder, &mut reconciler, &session, &stop);

        assert_eq!(played.lock().unwrap().len(), 1);
        assert_eq!(reconciler.pending_len(), 580);
    }

    #[test]
    fn test_decode_and_write_errors_continue() {
        let session = ChannelSession::new();
        let (tx, rx) = crossbeam_channel::bounded(8);
        session.set_inbound(Some(rx));
        session.set_ready(true);

        tx.send(packet(fake_packet(1, 960))).unwrap();
        tx.send(packet(Bytes::from_static(&[0xFF]))).unwrap();
        tx.send(packet(fake_packet(2, 960))).unwrap();
        tx.send(packet(fake_packet(3, 1920))).unwrap();
        drop(tx);

        let (mut playback, played) = playback();
        playback.fail_writes.insert(0);
        let mut decoder = FakeDecoder::default();
        let mut reconciler = FrameReconciler::new(1920);
        let stop = RelayControl::new();

        let outcome =
            run_receive_pipeline(&mut playback, &mut decoder, &mut reconciler, &session, &stop);

        assert_eq!(outcome.stats.received, 4);
        assert_eq!(outcome.stats.decode_errors, 1);
        assert_eq!(outcome.stats.write_errors, 1);
        assert_eq!(outcome.stats.blocks_played, 1);

        let played = played.lock().unwrap();
        assert_eq!(played.len(), 1);
        assert!(played[0].iter().all(|s| *s == 3));
    }

    #[test]
    fn test_cancelled_while_waiting_for_ready() {
        let session = ChannelSession::new();
        let stop = RelayControl::new();

        let remote = stop.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.shutdown();
        });

        let (mut playback, played) = playback();
        let mut decoder = FakeDecoder::default();
        let mut reconciler = FrameReconciler::new(1920);
        let start = Instant::now();
        let outcome =
            run_receive_pipeline(&mut playback, &mut decoder, &mut reconciler, &session, &stop);

        assert_eq!(outcome.exit, ReceiveExit::Cancelled);
        assert!(start.elapsed() < READINESS_POLL_INTERVAL + Duration::from_millis(150));
        assert!(played.lock().unwrap().is_empty());
        canceller.join().unwrap();
    }

    #[test]
    fn test_cancelled_while_blocked_on_receive() {
        let session = ChannelSession::new();
        let (_tx, rx) = crossbeam_channel::bounded::<InboundPacket>(8);
        session.set_inbound(Some(rx));
        session.set_ready(true);
        let stop = RelayControl::new();

        let remote = stop.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.shutdown();
        });

        let (mut playback, _) = playback();
        let mut decoder = FakeDecoder::default();
        let mut reconciler = FrameReconciler::new(1920);
        let start = Instant::now();
        let outcome =
            run_receive_pipeline(&mut playback, &mut decoder, &mut reconciler, &session, &stop);

        assert_eq!(outcome.exit, ReceiveExit::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
        canceller.join().unwrap();
    }

    #[test]
    fn test_ready_without_inbound_keeps_polling() {
        let session = Arc::new(ChannelSession::new());
        session.set_ready(true);
        let stop = RelayControl::new();

        let (tx, rx) = crossbeam_channel::bounded(8);
        let late = session.clone();
        let feeder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            tx.send(packet(fake_packet(5, 1920))).unwrap();
            late.set_inbound(Some(rx));
        });

        let (mut playback, played) = playback();
        let mut decoder = FakeDecoder::default();
        let mut reconciler = FrameReconciler::new(1920);
        let outcome = run_receive_pipeline(
            &mut playback,
            &mut decoder,
            &mut reconciler,
            session.as_ref(),
            &stop,
        );

        feeder.join().unwrap();
        // The feeder dropped its sender after installing the receiver.
        assert_eq!(outcome.exit, ReceiveExit::InboundClosed);
        assert_eq!(played.lock().unwrap().len(), 1);
    }
}
