//! WebSocket transport implementing [`RelaySession`].
//!
//! The link task owns the socket and reconnects with exponential backoff.
//! Binary frames carry one Opus packet each, in both directions; text
//! frames carry JSON control messages (`hello`, `speaking`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::config::SessionConfig;
use crate::constants::{CHANNELS, FRAME_DURATION_MS, SAMPLE_RATE};
use crate::error::{Error, Result};
use crate::relay::{InboundPacket, RelaySession};

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum NetCommand {
    SendText(String),
    SendBinary(Bytes),
}

// 音频参数结构体
#[derive(Debug, Serialize)]
struct AudioParams {
    format: &'static str,
    sample_rate: u32,
    channels: u16,
    frame_duration: u32,
}

#[derive(Debug, Serialize)]
struct HelloMessage {
    #[serde(rename = "type")]
    msg_type: &'static str,
    version: u8,
    transport: &'static str,
    audio_params: AudioParams,
}

impl HelloMessage {
    fn new() -> Self {
        Self {
            msg_type: "hello",
            version: 1,
            transport: "websocket",
            audio_params: AudioParams {
                format: "opus",
                sample_rate: SAMPLE_RATE,
                channels: CHANNELS,
                frame_duration: FRAME_DURATION_MS,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct SpeakingMessage<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    state: &'static str,
}

// 服务器消息结构体
#[derive(Debug, Deserialize)]
struct ServerMessage {
    #[serde(rename = "type")]
    msg_type: String,
    session_id: Option<String>,
    state: Option<String>,
}

/// State shared between the link task and its session handle.
struct Shared {
    ready: AtomicBool,
    closing: AtomicBool,
    close: Notify,
    session_id: Mutex<Option<String>>,
    inbound_dropped: AtomicU64,
}

impl Shared {
    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session_id(&self, id: Option<String>) {
        *self.session_id.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }
}

/// Session handle handed to the relay.
pub struct WsSession {
    shared: Arc<Shared>,
    outbound: Sender<Bytes>,
    inbound: Receiver<InboundPacket>,
    cmd_tx: mpsc::Sender<NetCommand>,
}

impl WsSession {
    /// Close the socket and stop reconnecting. The inbound channel
    /// disconnects once the link task has exited.
    pub fn disconnect(&self) {
        if !self.shared.closing.swap(true, Ordering::SeqCst) {
            log::info!("Disconnecting session");
            self.shared.ready.store(false, Ordering::SeqCst);
            self.shared.close.notify_one();
        }
    }

    /// Server-assigned id of the current session, if established.
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id()
    }

    /// Inbound packets discarded because the relay was not keeping up.
    pub fn inbound_dropped(&self) -> u64 {
        self.shared.inbound_dropped.load(Ordering::Relaxed)
    }
}

impl RelaySession for WsSession {
    fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    fn outbound(&self) -> Option<Sender<Bytes>> {
        self.is_ready().then(|| self.outbound.clone())
    }

    fn inbound(&self) -> Option<Receiver<InboundPacket>> {
        Some(self.inbound.clone())
    }

    fn set_speaking(&self, active: bool) {
        if !self.is_ready() {
            return;
        }
        let session_id = self.shared.session_id();
        let msg = SpeakingMessage {
            msg_type: "speaking",
            session_id: session_id.as_deref(),
            state: if active { "start" } else { "stop" },
        };
        match serde_json::to_string(&msg) {
            Ok(text) => {
                if let Err(e) = self.cmd_tx.try_send(NetCommand::SendText(text)) {
                    log::warn!("Failed to queue speaking update: {}", e);
                }
            }
            Err(e) => log::error!("Failed to serialize speaking message: {}", e),
        }
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Owns the WebSocket connection. Drive it with [`NetLink::run`].
pub struct NetLink {
    config: SessionConfig,
    shared: Arc<Shared>,
    in_tx: Sender<InboundPacket>,
    rx_cmd: mpsc::Receiver<NetCommand>,
}

impl NetLink {
    /// Create a link and the session handle that talks to it.
    ///
    /// Spawns the thread forwarding the relay's outbound packets to the
    /// link task; it exits when the session handle is dropped.
    pub fn new(config: SessionConfig) -> Result<(Self, WsSession)> {
        let (out_tx, out_rx) = crossbeam_channel::bounded::<Bytes>(config.outbound_capacity);
        let (in_tx, in_rx) = crossbeam_channel::bounded::<InboundPacket>(config.inbound_capacity);
        let (cmd_tx, rx_cmd) = mpsc::channel::<NetCommand>(config.outbound_capacity);

        let bridge_tx = cmd_tx.clone();
        std::thread::Builder::new()
            .name("ws-outbound".into())
            .spawn(move || {
                for payload in out_rx {
                    if bridge_tx.blocking_send(NetCommand::SendBinary(payload)).is_err() {
                        break;
                    }
                }
                log::debug!("Outbound bridge stopped");
            })
            .map_err(Error::Spawn)?;

        let shared = Arc::new(Shared {
            ready: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            close: Notify::new(),
            session_id: Mutex::new(None),
            inbound_dropped: AtomicU64::new(0),
        });

        let link = Self {
            config,
            shared: shared.clone(),
            in_tx,
            rx_cmd,
        };
        let session = WsSession {
            shared,
            outbound: out_tx,
            inbound: in_rx,
            cmd_tx,
        };
        Ok((link, session))
    }

    /// Connect and serve until the session is disconnected, reconnecting
    /// with exponential backoff after every failure.
    pub async fn run(mut self) {
        let mut retry_delay = INITIAL_RETRY_DELAY;
        while !self.shared.closing.load(Ordering::SeqCst) {
            let result = self.connect_and_loop().await;
            let was_ready = self.shared.ready.swap(false, Ordering::SeqCst);
            self.shared.set_session_id(None);

            match result {
                Ok(()) => break,
                Err(e) => {
                    if was_ready {
                        retry_delay = INITIAL_RETRY_DELAY;
                    }
                    log::warn!(
                        "Connection error: {:#}. Retrying in {}s...",
                        e,
                        retry_delay.as_secs()
                    );
                    if !self.backoff(retry_delay).await {
                        break;
                    }
                    retry_delay = next_retry_delay(retry_delay);
                }
            }
        }
        log::info!("Net link stopped");
    }

    /// Sleep for `delay`, discarding queued commands. `false` if the
    /// session was disconnected meanwhile.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                _ = self.shared.close.notified() => return false,
                cmd = self.rx_cmd.recv() => {
                    if cmd.is_none() {
                        return false;
                    }
                }
            }
        }
    }

    fn build_request(
        &self,
    ) -> anyhow::Result<tokio_tungstenite::tungstenite::http::Request<()>> {
        let url = Url::parse(&self.config.url).context("invalid session url")?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("session url has no host"))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let mut builder = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Client-Id", &self.config.client_id)
            .header("Protocol-Version", "1");
        if !self.config.token.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.config.token));
        }
        Ok(builder.body(())?)
    }

    // 建立连接、握手，然后进入主循环
    async fn connect_and_loop(&mut self) -> anyhow::Result<()> {
        let request = self.build_request()?;

        log::info!("Connecting to {}...", self.config.url);
        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| anyhow!("connect timed out"))??;
        let (mut write, mut read) = ws_stream.split();

        let hello_json = serde_json::to_string(&HelloMessage::new())?;
        log::debug!("Sending hello: {}", hello_json);
        write.send(Message::Text(hello_json.into())).await?;

        // Wait for the server's hello before carrying any audio.
        let session_id = tokio::time::timeout(HELLO_TIMEOUT, async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(msg) = serde_json::from_str::<ServerMessage>(text.as_str()) {
                            if msg.msg_type == "hello" {
                                return Ok(msg.session_id);
                            }
                        }
                        log::debug!("Ignoring message before hello: {}", text.as_str());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(anyhow!("server closed connection: {:?}", frame));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(anyhow!("connection closed")),
                }
            }
        })
        .await
        .map_err(|_| anyhow!("no hello from server"))??;

        self.shared.set_session_id(session_id.clone());
        self.shared.ready.store(true, Ordering::SeqCst);
        log::info!("Session established (session_id={:?})", session_id);

        let sender_id = session_id.unwrap_or_else(|| "server".to_string());
        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => self.deliver(data, &sender_id),
                        Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                        Some(Ok(Message::Close(frame))) => {
                            return Err(anyhow!("server closed connection: {:?}", frame));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(anyhow!("connection closed")),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::SendText(text)) => {
                            write.send(Message::Text(text.into())).await?;
                        }
                        Some(NetCommand::SendBinary(data)) => {
                            write.send(Message::Binary(data)).await?;
                        }
                        None => break,
                    }
                }
                _ = self.shared.close.notified() => break,
            }
        }

        self.shared.ready.store(false, Ordering::SeqCst);
        if let Err(e) = write.send(Message::Close(None)).await {
            log::debug!("Close frame not sent: {}", e);
        }
        Ok(())
    }

    fn deliver(&self, payload: Bytes, sender_id: &str) {
        let packet = InboundPacket {
            payload,
            sender_id: sender_id.to_string(),
        };
        match self.in_tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.shared.inbound_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    log::warn!("Inbound queue full, {} packets dropped so far", dropped);
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => match msg.msg_type.as_str() {
                "hello" => {
                    if msg.session_id.is_some() {
                        self.shared.set_session_id(msg.session_id);
                    }
                }
                "speaking" => log::debug!("Remote speaking: {:?}", msg.state),
                other => log::debug!("Unhandled message type '{}'", other),
            },
            Err(_) => log::debug!("Received non-JSON text: {}", text),
        }
    }
}

fn next_retry_delay(current: Duration) -> Duration {
    std::cmp::min(current * 2, MAX_RETRY_DELAY)
}
