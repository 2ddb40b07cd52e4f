//! One live bidirectional socket to the translation backend.
//!
//! A transport handle is single-use: Opening -> Open -> Closing -> Closed,
//! never backwards. The socket loop runs on its own thread; frames go in
//! through a channel, events come out through another.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use native_tls::TlsStream;
use tungstenite::WebSocket;

use crate::audio::codec::EncodedFrame;
use crate::bridge::protocol::{build_audio_chunk, build_setup, parse_server_message, ServerEvent};
use crate::bridge::SellerLanguage;
use crate::error::{BridgeError, Result};

const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Lifecycle of one transport handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleState {
    Opening = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl HandleState {
    fn from_u8(v: u8) -> HandleState {
        match v {
            0 => HandleState::Opening,
            1 => HandleState::Open,
            2 => HandleState::Closing,
            _ => HandleState::Closed,
        }
    }
}

/// Everything needed to open a live session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub api_key: String,
    pub model: String,
    pub seller_language: SellerLanguage,
}

/// What the socket loop reports back to the session.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    Message(ServerEvent),
    Error(BridgeError),
    Closed,
}

/// Seam over the live socket so the session can run against a fake.
pub trait LiveTransport: Send {
    /// Connect, perform the setup handshake, and start the socket loop.
    fn open(&mut self, config: &SessionConfig, events: mpsc::Sender<TransportEvent>)
        -> Result<()>;
    /// Queue one audio frame. Dropped silently unless the handle is Open.
    fn send(&mut self, frame: EncodedFrame);
    /// Begin closing. Idempotent; a closed handle never reopens.
    fn close(&mut self);
    fn state(&self) -> HandleState;
}

/// Live socket to the Gemini bidirectional endpoint.
pub struct GeminiLiveTransport {
    state: Arc<AtomicU8>,
    frame_tx: Option<mpsc::Sender<EncodedFrame>>,
}

impl GeminiLiveTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(HandleState::Opening as u8)),
            frame_tx: None,
        }
    }
}

impl Default for GeminiLiveTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveTransport for GeminiLiveTransport {
    fn open(
        &mut self,
        config: &SessionConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        if self.state() != HandleState::Opening {
            return Err(BridgeError::Session {
                message: "transport handle already used".to_string(),
            });
        }

        let mut socket = connect_websocket(&config.api_key)?;

        let setup = build_setup(&config.model, config.seller_language);
        socket
            .write(tungstenite::Message::Text(setup.into()))
            .and_then(|_| socket.flush())
            .map_err(|e| classify_socket_error(&config.model, e))?;

        wait_for_setup_complete(&mut socket, &config.model)?;

        // Short read timeout for the polling loop.
        socket
            .get_mut()
            .get_mut()
            .set_read_timeout(Some(Duration::from_millis(50)))
            .map_err(BridgeError::from)?;

        let (frame_tx, frame_rx) = mpsc::channel();
        self.frame_tx = Some(frame_tx);
        self.state.store(HandleState::Open as u8, Ordering::SeqCst);

        let state = self.state.clone();
        std::thread::spawn(move || {
            run_socket_loop(socket, frame_rx, events, state);
        });

        Ok(())
    }

    fn send(&mut self, frame: EncodedFrame) {
        if self.state() != HandleState::Open {
            return;
        }
        if let Some(tx) = &self.frame_tx {
            let _ = tx.send(frame);
        }
    }

    fn close(&mut self) {
        let _ = self.state.compare_exchange(
            HandleState::Opening as u8,
            HandleState::Closed as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let _ = self.state.compare_exchange(
            HandleState::Open as u8,
            HandleState::Closing as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.frame_tx = None;
    }

    fn state(&self) -> HandleState {
        HandleState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// TLS WebSocket connect with explicit DNS resolve and timeouts.
fn connect_websocket(api_key: &str) -> Result<WebSocket<TlsStream<TcpStream>>> {
    let ws_url = format!(
        "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent?key={}",
        api_key
    );

    let url = url::Url::parse(&ws_url).map_err(|e| BridgeError::Session {
        message: format!("bad endpoint URL: {}", e),
    })?;
    let host = url.host_str().ok_or_else(|| BridgeError::Session {
        message: "no host in endpoint URL".to_string(),
    })?;

    let addr = format!("{}:443", host)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| BridgeError::TransientBackend {
            message: format!("failed to resolve hostname: {}", host),
        })?;

    let tcp_stream = TcpStream::connect_timeout(&addr, Duration::from_secs(10))?;
    tcp_stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    tcp_stream.set_write_timeout(Some(Duration::from_secs(30)))?;
    tcp_stream.set_nodelay(true)?;

    let connector = native_tls::TlsConnector::new().map_err(|e| BridgeError::TransientBackend {
        message: e.to_string(),
    })?;
    let tls_stream = connector
        .connect(host, tcp_stream)
        .map_err(|e| BridgeError::TransientBackend {
            message: e.to_string(),
        })?;

    let (socket, _response) =
        tungstenite::client::client(&ws_url, tls_stream).map_err(|e| {
            crate::error::classify_backend_message("live", &e.to_string())
        })?;

    Ok(socket)
}

fn wait_for_setup_complete(
    socket: &mut WebSocket<TlsStream<TcpStream>>,
    model: &str,
) -> Result<()> {
    let started = Instant::now();
    loop {
        match socket.read() {
            Ok(tungstenite::Message::Text(msg)) => {
                for event in parse_server_message(msg.as_str()) {
                    match event {
                        ServerEvent::SetupComplete => return Ok(()),
                        ServerEvent::ServerError(message) => {
                            return Err(crate::error::classify_backend_message(model, &message));
                        }
                        _ => {}
                    }
                }
            }
            Ok(tungstenite::Message::Binary(data)) => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    if text.contains("setupComplete") {
                        return Ok(());
                    }
                }
            }
            Ok(tungstenite::Message::Close(frame)) => {
                let detail = frame
                    .map(|f| format!("code={}, reason={}", f.code, f.reason))
                    .unwrap_or_else(|| "no close frame".to_string());
                return Err(crate::error::classify_backend_message(model, &detail));
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(classify_socket_error(model, e)),
        }

        if started.elapsed() > SETUP_TIMEOUT {
            return Err(BridgeError::TransientBackend {
                message: "setup timeout, no response from server".to_string(),
            });
        }
    }
}

fn classify_socket_error(model: &str, e: tungstenite::Error) -> BridgeError {
    match e {
        tungstenite::Error::Io(io) => io.into(),
        other => crate::error::classify_backend_message(model, &other.to_string()),
    }
}

/// Pump frames out and events in until told to close or the socket dies.
fn run_socket_loop(
    mut socket: WebSocket<TlsStream<TcpStream>>,
    frame_rx: mpsc::Receiver<EncodedFrame>,
    events: mpsc::Sender<TransportEvent>,
    state: Arc<AtomicU8>,
) {
    loop {
        if HandleState::from_u8(state.load(Ordering::SeqCst)) != HandleState::Open {
            break;
        }

        // Drain queued microphone frames first; audio latency matters more
        // than read latency.
        let mut write_failed = false;
        loop {
            match frame_rx.try_recv() {
                Ok(frame) => {
                    let msg = build_audio_chunk(&frame);
                    if let Err(e) = socket
                        .write(tungstenite::Message::Text(msg.into()))
                        .and_then(|_| socket.flush())
                    {
                        let _ = events.send(TransportEvent::Error(classify_socket_error(
                            "live",
                            e,
                        )));
                        write_failed = true;
                        break;
                    }
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => break,
            }
        }
        if write_failed {
            break;
        }

        match socket.read() {
            Ok(tungstenite::Message::Text(msg)) => {
                for event in parse_server_message(msg.as_str()) {
                    if events.send(TransportEvent::Message(event)).is_err() {
                        // Session gone; nothing left to report to.
                        state.store(HandleState::Closed as u8, Ordering::SeqCst);
                        let _ = socket.close(None);
                        return;
                    }
                }
            }
            Ok(tungstenite::Message::Binary(data)) => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    for event in parse_server_message(text) {
                        let _ = events.send(TransportEvent::Message(event));
                    }
                }
            }
            Ok(tungstenite::Message::Close(_)) => break,
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error(classify_socket_error("live", e)));
                break;
            }
        }
    }

    let _ = socket.close(None);
    state.store(HandleState::Closed as u8, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed);
}
