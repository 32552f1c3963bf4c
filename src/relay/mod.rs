//! The relay engine: two pipelines between a PCM device pair and a session.

pub mod config;
pub mod control;
pub mod receive;
pub mod send;
pub mod session;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{RelayConfig, RelayMode};
pub use control::RelayControl;
pub use receive::{ReceiveExit, ReceiveOutcome, ReceiveStats};
pub use send::SendStats;
pub use session::{ChannelSession, InboundPacket, RelaySession};
pub use supervisor::{
    run_relay, AlsaBackend, AudioBackend, Relay, RelayExit, RelayReport, RelayState,
};
