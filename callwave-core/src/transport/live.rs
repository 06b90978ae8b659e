//! WebSocket transport for the bidirectional native-audio API.
//!
//! `connect` performs TCP + TLS + WebSocket handshakes, sends `setup`, and
//! waits for `setupComplete`. After that a dedicated I/O thread owns the
//! socket: it writes queued outbound messages and polls reads with a short
//! timeout, forwarding parsed events to the [`InboundSink`].

use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use native_tls::TlsStream;
use tracing::{debug, error, info, warn};
use tungstenite::{Message, WebSocket};

use super::{
    protocol::{self, ServerFrame, SetupParams},
    Connector, InboundEvent, InboundSink, OutboundMessage, RemoteStream,
};
use crate::error::{CallError, Result};

type Socket = WebSocket<TlsStream<TcpStream>>;

pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Aoede";

/// Connection settings for [`LiveConnector`].
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
    /// Rate advertised on outbound audio. Must match the capture rate.
    pub input_sample_rate: u32,
    pub connect_timeout: Duration,
    pub setup_timeout: Duration,
    /// Read timeout while streaming; bounds outbound latency.
    pub poll_interval: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: None,
            input_sample_rate: 16_000,
            connect_timeout: Duration::from_secs(10),
            setup_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveConnector {
    config: LiveConfig,
}

impl LiveConnector {
    pub fn new(config: LiveConfig) -> Self {
        Self { config }
    }
}

impl Connector for LiveConnector {
    fn connect(&self, inbound: InboundSink) -> Result<Box<dyn RemoteStream>> {
        if self.config.api_key.trim().is_empty() {
            return Err(CallError::Connection("no API key configured".into()));
        }

        let mut socket = open_socket(&self.config)?;

        let setup = protocol::setup_message(&SetupParams {
            model: &self.config.model,
            voice: &self.config.voice,
            system_instruction: self.config.system_instruction.as_deref(),
        });
        if let Err(e) = socket.send(Message::Text(setup.into())) {
            let _ = socket.close(None);
            return Err(CallError::Connection(format!("setup failed: {e}")));
        }

        if let Err(e) = await_setup_complete(&mut socket, self.config.setup_timeout) {
            let _ = socket.close(None);
            let _ = socket.flush();
            return Err(e);
        }

        socket
            .get_mut()
            .get_mut()
            .set_read_timeout(Some(self.config.poll_interval))?;
        info!(model = self.config.model.as_str(), "live session established");

        let (outbound_tx, outbound_rx) = unbounded();
        let closing = Arc::new(AtomicBool::new(false));
        let io_closing = Arc::clone(&closing);
        let input_rate = self.config.input_sample_rate;

        let worker = thread::Builder::new()
            .name("callwave-live-io".into())
            .spawn(move || run_io(socket, outbound_rx, inbound, io_closing, input_rate))?;

        Ok(Box::new(LiveLink {
            outbound: outbound_tx,
            closing,
            worker: Some(worker),
        }))
    }
}

fn open_socket(config: &LiveConfig) -> Result<Socket> {
    let ws_url = format!("{}?key={}", config.endpoint, config.api_key);
    let url = url::Url::parse(&ws_url).map_err(|e| CallError::Connection(format!("bad endpoint: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| CallError::Connection("no host in endpoint".into()))?;
    let port = url.port_or_known_default().unwrap_or(443);

    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| CallError::Connection(format!("failed to resolve {host}")))?;

    let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout)
        .map_err(|e| CallError::Connection(format!("connect to {host}: {e}")))?;
    tcp.set_read_timeout(Some(config.setup_timeout))?;
    tcp.set_write_timeout(Some(config.setup_timeout))?;
    tcp.set_nodelay(true)?;

    let tls = native_tls::TlsConnector::new()
        .map_err(|e| CallError::Connection(e.to_string()))?
        .connect(host, tcp)
        .map_err(|e| CallError::Connection(format!("tls handshake: {e}")))?;

    let (socket, _response) = tungstenite::client::client(ws_url.as_str(), tls)
        .map_err(|e| CallError::Connection(format!("websocket handshake: {e}")))?;
    Ok(socket)
}

fn await_setup_complete(socket: &mut Socket, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    loop {
        if started.elapsed() > timeout {
            return Err(CallError::Connection("setup timed out".into()));
        }
        let text = match socket.read() {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                return Err(CallError::Connection(format!("closed during setup: {reason}")));
            }
            Ok(_) => continue,
            Err(tungstenite::Error::Io(ref e)) if is_timeout(e.kind()) => continue,
            Err(e) => return Err(CallError::Connection(format!("setup error: {e}"))),
        };

        match protocol::parse_server_message(&text)? {
            ServerFrame::SetupComplete => return Ok(()),
            ServerFrame::Events(events) => {
                for event in events {
                    if let InboundEvent::Error(message) = event {
                        return Err(CallError::Protocol(message));
                    }
                }
            }
            ServerFrame::GoAway => {
                return Err(CallError::Connection("server going away".into()));
            }
        }
    }
}

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn run_io(
    mut socket: Socket,
    outbound: Receiver<OutboundMessage>,
    inbound: InboundSink,
    closing: Arc<AtomicBool>,
    input_rate: u32,
) {
    let mut frames_out = 0u64;

    'io: loop {
        if closing.load(Ordering::Acquire) {
            let _ = socket.close(None);
            let _ = socket.flush();
            break;
        }

        let mut wrote = false;
        while let Ok(message) = outbound.try_recv() {
            let text = match protocol::encode_outbound(&message, input_rate) {
                Ok(text) => text,
                Err(e) => {
                    warn!("dropping unencodable outbound message: {e}");
                    continue;
                }
            };
            if let Err(e) = socket.write(Message::Text(text.into())) {
                error!("live write failed: {e}");
                inbound.emit(InboundEvent::Error(e.to_string()));
                break 'io;
            }
            frames_out += 1;
            wrote = true;
        }
        if wrote {
            if let Err(e) = socket.flush() {
                error!("live flush failed: {e}");
                inbound.emit(InboundEvent::Error(e.to_string()));
                break;
            }
        }

        let text = match socket.read() {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => {
                if !closing.load(Ordering::Acquire) {
                    inbound.emit(InboundEvent::Closed);
                }
                break;
            }
            Ok(_) => continue,
            Err(tungstenite::Error::Io(ref e)) if is_timeout(e.kind()) => continue,
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                if !closing.load(Ordering::Acquire) {
                    inbound.emit(InboundEvent::Closed);
                }
                break;
            }
            Err(e) => {
                if !closing.load(Ordering::Acquire) {
                    error!("live read failed: {e}");
                    inbound.emit(InboundEvent::Error(e.to_string()));
                }
                break;
            }
        };

        match protocol::parse_server_message(&text) {
            Ok(ServerFrame::Events(events)) => {
                for event in events {
                    if !inbound.emit(event) {
                        debug!("inbound sink gone, stopping reader");
                        break 'io;
                    }
                }
            }
            Ok(ServerFrame::GoAway) => warn!("server announced disconnect"),
            Ok(ServerFrame::SetupComplete) => {}
            Err(e) => warn!("ignoring unparseable server message: {e}"),
        }
    }

    debug!(frames_out, "live io thread exiting");
}

struct LiveLink {
    outbound: Sender<OutboundMessage>,
    closing: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl RemoteStream for LiveLink {
    fn send(&mut self, message: OutboundMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| CallError::Connection("live stream is closed".into()))
    }

    fn close(&mut self) {
        self.closing.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("live io thread panicked");
            }
            info!("live session closed");
        }
    }
}

impl Drop for LiveLink {
    fn drop(&mut self) {
        self.close();
    }
}
