//! Two-party TCP demo wiring a `SessionController` end-to-end: one side
//! listens (initiator), the other connects (participant), they complete the
//! handshake over a line-delimited JSON signalling channel, round-trip a
//! handful of demo frames through the pipeline adapter, and optionally
//! exchange one chat message.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use exchange::{Role, SignallingTransport, TransportError};
use pipeline::{FrameOutcome, FrameTransport, MediaKind, PlatformVariant};
use serde::{Deserialize, Serialize};
use session::{SessionConfig, SessionController, SessionStatus};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AppRole {
    Initiator,
    Participant,
}

impl From<AppRole> for Role {
    fn from(role: AppRole) -> Self {
        match role {
            AppRole::Initiator => Role::Initiator,
            AppRole::Participant => Role::Participant,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "End-to-end encrypted media pipeline demo", long_about = None)]
struct Args {
    /// Initiator listens; participant connects.
    #[arg(long)]
    mode: AppRole,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 7878)]
    port: u16,

    #[arg(long, default_value = "demo-room")]
    room_id: String,

    #[arg(long, default_value = "local")]
    node_id: String,

    #[arg(long, default_value = "remote")]
    peer_id: String,

    /// Optional chat message to send once the session is active.
    #[arg(long)]
    chat_message: Option<String>,

    /// Print config and exit.
    #[arg(long)]
    print_config: bool,
}

/// Signalling-channel envelope: distinguishes key-exchange traffic from
/// chat traffic, since the inner JSON payloads carry no shared tag.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum WireMessage {
    #[serde(rename = "exchange")]
    Exchange { body: String },
    #[serde(rename = "chat")]
    Chat { body: String },
}

struct TcpSignallingTransport {
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpSignallingTransport {
    async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        let line = serde_json::to_string(&message).map_err(|e| TransportError::Failed(e.to_string()))?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        writer.write_all(b"\n").await.map_err(|e| TransportError::Failed(e.to_string()))
    }
}

#[async_trait::async_trait]
impl SignallingTransport for TcpSignallingTransport {
    async fn send_key_offer(&self, _room_id: &str, _peer_id: &str, json: String) -> Result<(), TransportError> {
        self.send(WireMessage::Exchange { body: json }).await
    }

    async fn send_key_answer(&self, _room_id: &str, _peer_id: &str, json: String) -> Result<(), TransportError> {
        self.send(WireMessage::Exchange { body: json }).await
    }

    async fn send_key_rotation(&self, _room_id: &str, _peer_id: &str, json: String) -> Result<(), TransportError> {
        self.send(WireMessage::Exchange { body: json }).await
    }

    async fn send_chat(&self, _room_id: &str, _peer_id: &str, json: String) -> Result<(), TransportError> {
        self.send(WireMessage::Chat { body: json }).await
    }
}

/// Always reports chain-of-transforms support — there is no real encoded
/// frame hook to probe in a CLI demo.
struct DemoFrameTransport;

impl FrameTransport for DemoFrameTransport {
    fn platform_variant(&self) -> Option<PlatformVariant> {
        Some(PlatformVariant::ChainOfTransforms)
    }
}

async fn dispatch_exchange(controller: &Arc<SessionController>, body: &str) -> Result<()> {
    #[derive(Deserialize)]
    struct Tagged {
        #[serde(rename = "type")]
        kind: String,
    }
    let tagged: Tagged = serde_json::from_str(body).context("exchange message missing a type tag")?;
    match tagged.kind.as_str() {
        "keyOffer" => controller.handle_key_offer(body).await.map_err(Into::into),
        "keyAnswer" => controller.handle_key_answer(body).await.map_err(Into::into),
        "keyRotation" => controller.handle_key_rotation(body).await.map_err(Into::into),
        other => bail!("unknown exchange message type {other}"),
    }
}

async fn reader_loop(read_half: OwnedReadHalf, controller: Arc<SessionController>) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                info!("peer closed the signalling connection");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<WireMessage>(trimmed) {
                    Ok(WireMessage::Exchange { body }) => {
                        if let Err(err) = dispatch_exchange(&controller, &body).await {
                            warn!(%err, "failed to handle incoming key-exchange message");
                        }
                    }
                    Ok(WireMessage::Chat { body }) => match controller.handle_chat(&body).await {
                        Ok(message) => {
                            info!(
                                verified = message.verified,
                                "chat: {}",
                                String::from_utf8_lossy(&message.plaintext)
                            );
                        }
                        Err(err) => warn!(%err, "failed to decrypt incoming chat message"),
                    },
                    Err(err) => warn!(%err, "ignoring malformed signalling line"),
                }
            }
            Err(err) => {
                warn!(%err, "signalling read failed");
                break;
            }
        }
    }
}

async fn wait_for_active(controller: &Arc<SessionController>) {
    loop {
        if controller.status().await.is_active() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Round-trips a handful of synthetic frames through the pipeline adapter
/// to demonstrate the crypto end-to-end in the absence of a real camera.
async fn run_media_demo(controller: &Arc<SessionController>) -> Result<()> {
    let sender = controller.pipeline().attach_sender(MediaKind::Video).await?;
    let receiver = controller.pipeline().attach_receiver(MediaKind::Video).await?;

    for i in 0..5u8 {
        let frame = vec![i; 64];
        let aad = b"demo-frame".to_vec();
        match sender.process(frame.clone(), aad.clone()).await {
            FrameOutcome::Processed(ciphertext) => match receiver.process(ciphertext, aad).await {
                FrameOutcome::Processed(plaintext) => {
                    info!(frame = i, round_tripped = plaintext == frame, "demo frame processed");
                }
                other => warn!(?other, frame = i, "demo frame failed to decrypt"),
            },
            other => warn!(?other, frame = i, "demo frame was not encrypted"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if args.print_config {
        println!("=== Configuration ===");
        println!("Mode:     {:?}", args.mode);
        println!("Host:     {}", args.host);
        println!("Port:     {}", args.port);
        println!("Room ID:  {}", args.room_id);
        println!("Node ID:  {}", args.node_id);
        println!("Peer ID:  {}", args.peer_id);
        return Ok(());
    }

    crypto::capability::log_hardware_crypto_support();

    let stream = match args.mode {
        AppRole::Initiator => {
            let addr = format!("{}:{}", args.host, args.port);
            info!("listening on {addr}");
            let listener = TcpListener::bind(&addr).await.context("failed to bind")?;
            let (stream, peer_addr) = listener.accept().await.context("failed to accept connection")?;
            info!("accepted connection from {peer_addr}");
            stream
        }
        AppRole::Participant => {
            let addr = format!("{}:{}", args.host, args.port);
            info!("connecting to {addr}");
            TcpStream::connect(&addr).await.context("failed to connect")?
        }
    };

    let (read_half, write_half) = stream.into_split();
    let transport = Arc::new(TcpSignallingTransport { writer: Mutex::new(write_half) });

    let controller = SessionController::new(
        args.mode.into(),
        args.room_id.clone(),
        args.peer_id.clone(),
        transport,
        Arc::new(DemoFrameTransport),
        SessionConfig::default(),
    );

    tokio::spawn(reader_loop(read_half, Arc::clone(&controller)));

    controller.start().await;
    info!("waiting for key exchange to complete...");
    wait_for_active(&controller).await;
    info!("session active at generation {}", controller.generation());
    info!("local fingerprint:  {}", controller.local_fingerprint());
    if let Some(remote) = controller.remote_fingerprint().await {
        info!("remote fingerprint: {remote}");
    }

    run_media_demo(&controller).await?;

    if let Some(message) = args.chat_message {
        controller.send_chat(message.as_bytes()).await?;
        info!("sent chat message: {message}");
    }

    tokio::time::sleep(Duration::from_secs(5)).await;

    if matches!(controller.status().await, SessionStatus::Error(_)) {
        warn!("session ended in an error state");
    }

    controller.teardown().await;
    Ok(())
}
