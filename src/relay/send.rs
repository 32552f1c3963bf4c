//! Capture → encode → outbound.

use std::time::Duration;

use crossbeam_channel::select;

use super::control::RelayControl;
use super::session::RelaySession;
use crate::audio::{CapturePort, StreamEncoder};
use crate::constants::FRAME_DURATION_MS;

/// Counters of one send pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendStats {
    pub captured: u64,
    pub capture_errors: u64,
    pub encode_errors: u64,
    pub sent: u64,
    /// Encoded while the session was not ready
    pub dropped_not_ready: u64,
    /// Encoded after the outbound channel was closed
    pub dropped_closed: u64,
}

/// Read fixed 20 ms blocks, encode them, and hand them to the session.
///
/// Packets produced while the session is not ready are dropped, never
/// queued. Read and encode failures skip the block. A blocked send is
/// abandoned when `stop` is asserted. Returns once `stop` is observed.
pub fn run_send_pipeline(
    capture: &mut dyn CapturePort,
    encoder: &mut dyn StreamEncoder,
    session: &dyn RelaySession,
    stop: &RelayControl,
) -> SendStats {
    let mut block = vec![0i16; encoder.frame_samples()];
    let mut stats = SendStats::default();
    let mut closed_logged = false;

    log::info!("Send pipeline started ({} samples/frame)", block.len());

    while !stop.is_shutdown() {
        if let Err(e) = capture.read_block(&mut block) {
            stats.capture_errors += 1;
            log::warn!("Capture read failed: {}", e);
            // Don't spin on a device that fails immediately.
            stop.wait_timeout(Duration::from_millis(u64::from(FRAME_DURATION_MS)));
            continue;
        }
        stats.captured += 1;

        let packet = match encoder.encode(&block) {
            Ok(packet) => packet,
            Err(e) => {
                stats.encode_errors += 1;
                log::warn!("Opus encode error: {}", e);
                continue;
            }
        };

        if !session.is_ready() {
            stats.dropped_not_ready += 1;
            continue;
        }
        let Some(outbound) = session.outbound() else {
            stats.dropped_not_ready += 1;
            continue;
        };

        select! {
            send(outbound, packet) -> res => match res {
                Ok(()) => {
                    stats.sent += 1;
                    closed_logged = false;
                }
                Err(_) => {
                    stats.dropped_closed += 1;
                    if !closed_logged {
                        log::warn!("Outbound channel closed, dropping packets");
                        closed_logged = true;
                    }
                }
            },
            recv(stop.wake_channel()) -> _ => break,
        }
    }

    log::info!("Send pipeline stopped: {:?}", stats);
    stats
}
