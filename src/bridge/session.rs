//! Session lifecycle: owns the capture, transport, playback, and transcript
//! of one live conversation.
//!
//! At most one session runs at a time. The worker thread drives everything;
//! `stop` bumps a generation counter so a worker that outlives its session
//! can never touch state owned by a newer one.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::audio::capture::{CaptureSource, MicCapture};
use crate::audio::codec::{decode_frame, encode_frame};
use crate::audio::playback::{AudioOut, PlaybackScheduler, SpeakerOut};
use crate::audio::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::bridge::protocol::ServerEvent;
use crate::bridge::transcript::{TranscriptAggregator, Utterance};
use crate::bridge::transport::{GeminiLiveTransport, LiveTransport, SessionConfig, TransportEvent};
use crate::bridge::Role;
use crate::error::{BridgeError, Result};

/// Observable state of the bridge session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Connecting = 1,
    Listening = 2,
    Speaking = 3,
    Error = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> SessionState {
        match v {
            0 => SessionState::Idle,
            1 => SessionState::Connecting,
            2 => SessionState::Listening,
            3 => SessionState::Speaking,
            _ => SessionState::Error,
        }
    }
}

pub type TransportFactory = Arc<dyn Fn() -> Box<dyn LiveTransport> + Send + Sync>;
pub type OutputFactory = Arc<dyn Fn() -> Result<Box<dyn AudioOut>> + Send + Sync>;
pub type CaptureFactory =
    Arc<dyn Fn(mpsc::Sender<Vec<f32>>, Arc<AtomicBool>) -> Result<Box<dyn CaptureSource>> + Send + Sync>;

/// Shared handles the worker thread keeps after `start` returns.
#[derive(Clone)]
struct Shared {
    state: Arc<AtomicU8>,
    error_message: Arc<Mutex<Option<String>>>,
    generation: Arc<AtomicU64>,
    stop_signal: Arc<AtomicBool>,
    transcript: Arc<Mutex<TranscriptAggregator>>,
}

impl Shared {
    /// A worker is current while no stop has bumped the generation since it
    /// was captured at start.
    fn is_current(&self, my_generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == my_generation
    }

    fn set_state_if_current(&self, my_generation: u64, state: SessionState) {
        if self.is_current(my_generation) {
            self.state.store(state as u8, Ordering::SeqCst);
        }
    }

    fn fail_if_current(&self, my_generation: u64, err: &BridgeError) {
        if !self.is_current(my_generation) {
            return;
        }
        eprintln!("[Session] failed: {}", err);
        if let Ok(mut message) = self.error_message.lock() {
            *message = Some(err.to_string());
        }
        self.state.store(SessionState::Error as u8, Ordering::SeqCst);
    }
}

pub struct BridgeSession {
    shared: Shared,
    config: SessionConfig,
    transport_factory: TransportFactory,
    output_factory: OutputFactory,
    capture_factory: CaptureFactory,
}

impl BridgeSession {
    /// Session wired to the real microphone, speaker, and live socket.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(|| Box::new(GeminiLiveTransport::new()) as Box<dyn LiveTransport>),
            Arc::new(|| {
                let out = SpeakerOut::open()?;
                Ok(Box::new(out) as Box<dyn AudioOut>)
            }),
            Arc::new(|frame_tx, stop_signal| {
                let mic = MicCapture::start(frame_tx, stop_signal)?;
                Ok(Box::new(mic) as Box<dyn CaptureSource>)
            }),
        )
    }

    pub fn with_parts(
        config: SessionConfig,
        transport_factory: TransportFactory,
        output_factory: OutputFactory,
        capture_factory: CaptureFactory,
    ) -> Self {
        Self {
            shared: Shared {
                state: Arc::new(AtomicU8::new(SessionState::Idle as u8)),
                error_message: Arc::new(Mutex::new(None)),
                generation: Arc::new(AtomicU64::new(0)),
                stop_signal: Arc::new(AtomicBool::new(false)),
                transcript: Arc::new(Mutex::new(TranscriptAggregator::new())),
            },
            config,
            transport_factory,
            output_factory,
            capture_factory,
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.error_message.lock().ok().and_then(|m| m.clone())
    }

    /// Snapshot of the transcript so far.
    pub fn utterances(&self) -> Vec<Utterance> {
        self.shared
            .transcript
            .lock()
            .map(|t| t.utterances().to_vec())
            .unwrap_or_default()
    }

    /// Start a session. Fails while one is already running; restarting from
    /// Error is allowed and clears the stored error.
    pub fn start(&self) -> Result<()> {
        let from_idle = self.shared.state.compare_exchange(
            SessionState::Idle as u8,
            SessionState::Connecting as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if from_idle.is_err() {
            let from_error = self.shared.state.compare_exchange(
                SessionState::Error as u8,
                SessionState::Connecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            if from_error.is_err() {
                return Err(BridgeError::Session {
                    message: "a session is already active".to_string(),
                });
            }
        }

        if self.config.api_key.trim().is_empty() {
            self.shared
                .state
                .store(SessionState::Idle as u8, Ordering::SeqCst);
            return Err(BridgeError::Configuration {
                message: "no API key configured".to_string(),
            });
        }

        if let Ok(mut message) = self.shared.error_message.lock() {
            *message = None;
        }
        if let Ok(mut transcript) = self.shared.transcript.lock() {
            transcript.clear();
        }
        self.shared.stop_signal.store(false, Ordering::SeqCst);

        let my_generation = self.shared.generation.load(Ordering::SeqCst);
        let shared = self.shared.clone();
        let config = self.config.clone();
        let transport_factory = self.transport_factory.clone();
        let output_factory = self.output_factory.clone();
        let capture_factory = self.capture_factory.clone();

        println!("[Session] starting ({})", config.seller_language.display_name());
        std::thread::spawn(move || {
            run_bridge(
                shared,
                my_generation,
                config,
                transport_factory,
                output_factory,
                capture_factory,
            );
        });

        Ok(())
    }

    /// Stop the running session. Safe to call at any time, including while
    /// still Connecting; the worker notices and tears down.
    pub fn stop(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.stop_signal.store(true, Ordering::SeqCst);
        // Error state survives a stop so the user can still read it.
        if self.state() != SessionState::Error {
            self.shared
                .state
                .store(SessionState::Idle as u8, Ordering::SeqCst);
        }
        println!("[Session] stopped");
    }
}

fn run_bridge(
    shared: Shared,
    my_generation: u64,
    config: SessionConfig,
    transport_factory: TransportFactory,
    output_factory: OutputFactory,
    capture_factory: CaptureFactory,
) {
    let mut transport = transport_factory();
    let (event_tx, event_rx) = mpsc::channel();

    if let Err(e) = transport.open(&config, event_tx) {
        shared.fail_if_current(my_generation, &e);
        return;
    }

    // Stopped while the handshake was in flight: tear down without touching
    // state the next session may own.
    if !shared.is_current(my_generation) || shared.stop_signal.load(Ordering::SeqCst) {
        transport.close();
        return;
    }

    let (frame_tx, frame_rx) = mpsc::channel();
    let mut capture = match capture_factory(frame_tx, shared.stop_signal.clone()) {
        Ok(c) => c,
        Err(e) => {
            transport.close();
            shared.fail_if_current(my_generation, &e);
            return;
        }
    };

    let mut scheduler = match output_factory() {
        Ok(out) => PlaybackScheduler::new(out),
        Err(e) => {
            capture.stop();
            transport.close();
            shared.fail_if_current(my_generation, &e);
            return;
        }
    };

    shared.set_state_if_current(my_generation, SessionState::Listening);
    println!("[Session] live");

    let mut failure: Option<BridgeError> = None;

    'main: loop {
        if shared.stop_signal.load(Ordering::SeqCst) || !shared.is_current(my_generation) {
            break;
        }

        while let Ok(frame) = frame_rx.try_recv() {
            transport.send(encode_frame(&frame, INPUT_SAMPLE_RATE));
        }

        while let Ok(event) = event_rx.try_recv() {
            match event {
                TransportEvent::Message(ServerEvent::InputDelta(text)) => {
                    if let Ok(mut transcript) = shared.transcript.lock() {
                        transcript.append_delta(Role::Traveler, &text);
                    }
                }
                TransportEvent::Message(ServerEvent::OutputDelta(text)) => {
                    if let Ok(mut transcript) = shared.transcript.lock() {
                        transcript.append_delta(Role::Seller, &text);
                    }
                }
                TransportEvent::Message(ServerEvent::Audio(data)) => {
                    match decode_frame(&data, OUTPUT_SAMPLE_RATE, 1) {
                        Ok(audio) => {
                            scheduler.enqueue(&audio);
                            shared.set_state_if_current(my_generation, SessionState::Speaking);
                        }
                        Err(e) => {
                            // Drop the chunk; one bad frame is not fatal.
                            eprintln!("[Session] undecodable audio chunk: {}", e);
                        }
                    }
                }
                TransportEvent::Message(ServerEvent::TurnComplete) => {
                    if let Ok(mut transcript) = shared.transcript.lock() {
                        transcript.complete_turn();
                    }
                }
                TransportEvent::Message(ServerEvent::ServerError(message)) => {
                    failure = Some(crate::error::classify_backend_message(
                        &config.model,
                        &message,
                    ));
                    break 'main;
                }
                TransportEvent::Message(ServerEvent::SetupComplete) => {}
                TransportEvent::Error(e) => {
                    failure = Some(e);
                    break 'main;
                }
                TransportEvent::Closed => {
                    if !shared.stop_signal.load(Ordering::SeqCst) {
                        failure = Some(BridgeError::TransientBackend {
                            message: "connection closed unexpectedly".to_string(),
                        });
                    }
                    break 'main;
                }
            }
        }

        if !scheduler.poll()
            && SessionState::from_u8(shared.state.load(Ordering::SeqCst)) == SessionState::Speaking
        {
            shared.set_state_if_current(my_generation, SessionState::Listening);
        }

        std::thread::sleep(Duration::from_millis(10));
    }

    capture.stop();
    transport.close();
    scheduler.clear();

    if let Some(e) = failure {
        shared.fail_if_current(my_generation, &e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::encode_frame as encode_test_frame;
    use crate::bridge::transport::HandleState;
    use crate::bridge::SellerLanguage;
    use std::time::Instant;

    fn test_config(api_key: &str) -> SessionConfig {
        SessionConfig {
            api_key: api_key.to_string(),
            model: "test-model".to_string(),
            seller_language: SellerLanguage::Urdu,
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[derive(Default)]
    struct FakeTransportState {
        events: Option<mpsc::Sender<TransportEvent>>,
        sent: Vec<crate::audio::codec::EncodedFrame>,
        state: Option<HandleState>,
        // open() blocks until this flips, when set
        hold_open: bool,
        release_open: bool,
    }

    struct FakeTransport {
        shared: Arc<Mutex<FakeTransportState>>,
    }

    impl LiveTransport for FakeTransport {
        fn open(
            &mut self,
            _config: &SessionConfig,
            events: mpsc::Sender<TransportEvent>,
        ) -> crate::error::Result<()> {
            loop {
                let mut s = self.shared.lock().unwrap();
                if !s.hold_open || s.release_open {
                    s.events = Some(events);
                    s.state = Some(HandleState::Open);
                    return Ok(());
                }
                drop(s);
                std::thread::sleep(Duration::from_millis(2));
            }
        }

        fn send(&mut self, frame: crate::audio::codec::EncodedFrame) {
            self.shared.lock().unwrap().sent.push(frame);
        }

        fn close(&mut self) {
            self.shared.lock().unwrap().state = Some(HandleState::Closed);
        }

        fn state(&self) -> HandleState {
            self.shared
                .lock()
                .unwrap()
                .state
                .unwrap_or(HandleState::Opening)
        }
    }

    struct FakeCapture {
        stopped: Arc<AtomicBool>,
    }

    impl CaptureSource for FakeCapture {
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeOutState {
        now: f64,
        scheduled: usize,
        finished: Vec<u64>,
        stopped: bool,
    }

    struct FakeOut {
        shared: Arc<Mutex<FakeOutState>>,
        next_id: u64,
    }

    impl AudioOut for FakeOut {
        fn now(&self) -> f64 {
            self.shared.lock().unwrap().now
        }

        fn schedule(&mut self, _samples: &[f32], _sample_rate: u32, _start_time: f64) -> u64 {
            let id = self.next_id;
            self.next_id += 1;
            self.shared.lock().unwrap().scheduled += 1;
            id
        }

        fn take_finished(&mut self) -> Vec<u64> {
            std::mem::take(&mut self.shared.lock().unwrap().finished)
        }

        fn stop_all(&mut self) {
            self.shared.lock().unwrap().stopped = true;
        }
    }

    struct Fixture {
        session: BridgeSession,
        transport: Arc<Mutex<FakeTransportState>>,
        capture_stopped: Arc<AtomicBool>,
        capture_frames: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>>,
        out: Arc<Mutex<FakeOutState>>,
    }

    fn fixture(api_key: &str, hold_open: bool) -> Fixture {
        let transport = Arc::new(Mutex::new(FakeTransportState {
            hold_open,
            ..Default::default()
        }));
        let capture_stopped = Arc::new(AtomicBool::new(false));
        let capture_frames: Arc<Mutex<Option<mpsc::Sender<Vec<f32>>>>> =
            Arc::new(Mutex::new(None));
        let out = Arc::new(Mutex::new(FakeOutState::default()));

        let t = transport.clone();
        let stopped = capture_stopped.clone();
        let frames = capture_frames.clone();
        let o = out.clone();

        let session = BridgeSession::with_parts(
            test_config(api_key),
            Arc::new(move || {
                Box::new(FakeTransport { shared: t.clone() }) as Box<dyn LiveTransport>
            }),
            Arc::new(move || {
                Ok(Box::new(FakeOut {
                    shared: o.clone(),
                    next_id: 1,
                }) as Box<dyn AudioOut>)
            }),
            Arc::new(move |frame_tx, _stop| {
                *frames.lock().unwrap() = Some(frame_tx);
                Ok(Box::new(FakeCapture {
                    stopped: stopped.clone(),
                }) as Box<dyn CaptureSource>)
            }),
        );

        Fixture {
            session,
            transport,
            capture_stopped,
            capture_frames,
            out,
        }
    }

    fn events_sender(fx: &Fixture) -> mpsc::Sender<TransportEvent> {
        fx.transport.lock().unwrap().events.clone().unwrap()
    }

    #[test]
    fn empty_api_key_is_rejected_before_connecting() {
        let fx = fixture("", false);
        assert!(matches!(
            fx.session.start(),
            Err(BridgeError::Configuration { .. })
        ));
        assert_eq!(fx.session.state(), SessionState::Idle);
    }

    #[test]
    fn second_start_is_rejected_while_active() {
        let fx = fixture("key", false);
        fx.session.start().unwrap();
        assert!(wait_until(|| fx.session.state() == SessionState::Listening));

        assert!(matches!(
            fx.session.start(),
            Err(BridgeError::Session { .. })
        ));

        fx.session.stop();
    }

    #[test]
    fn stop_during_connecting_discards_the_handshake() {
        let fx = fixture("key", true);
        fx.session.start().unwrap();
        assert_eq!(fx.session.state(), SessionState::Connecting);

        fx.session.stop();
        assert_eq!(fx.session.state(), SessionState::Idle);

        fx.transport.lock().unwrap().release_open = true;
        assert!(wait_until(|| {
            fx.transport.lock().unwrap().state == Some(HandleState::Closed)
        }));
        // Never went live: no capture was acquired, state stayed Idle.
        assert!(fx.capture_frames.lock().unwrap().is_none());
        assert_eq!(fx.session.state(), SessionState::Idle);
    }

    #[test]
    fn captured_frames_flow_to_the_transport_encoded_at_16k() {
        let fx = fixture("key", false);
        fx.session.start().unwrap();
        assert!(wait_until(|| fx.session.state() == SessionState::Listening));

        let frame_tx = fx.capture_frames.lock().unwrap().clone().unwrap();
        frame_tx.send(vec![0.0f32; 4096]).unwrap();

        assert!(wait_until(|| !fx.transport.lock().unwrap().sent.is_empty()));
        let sent = fx.transport.lock().unwrap().sent.clone();
        assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");

        fx.session.stop();
    }

    #[test]
    fn deltas_build_the_transcript_and_turns_finalize_it() {
        let fx = fixture("key", false);
        fx.session.start().unwrap();
        assert!(wait_until(|| fx.session.state() == SessionState::Listening));

        let events = events_sender(&fx);
        events
            .send(TransportEvent::Message(ServerEvent::InputDelta(
                "how ".to_string(),
            )))
            .unwrap();
        events
            .send(TransportEvent::Message(ServerEvent::InputDelta(
                "much".to_string(),
            )))
            .unwrap();
        events
            .send(TransportEvent::Message(ServerEvent::OutputDelta(
                "کتنے".to_string(),
            )))
            .unwrap();
        events
            .send(TransportEvent::Message(ServerEvent::TurnComplete))
            .unwrap();

        assert!(wait_until(|| {
            let utterances = fx.session.utterances();
            utterances.len() == 2 && utterances.iter().all(|u| u.is_final)
        }));
        let utterances = fx.session.utterances();
        assert_eq!(utterances[0].text, "how much");
        assert_eq!(utterances[0].role, Role::Traveler);
        assert_eq!(utterances[1].text, "کتنے");
        assert_eq!(utterances[1].role, Role::Seller);

        fx.session.stop();
    }

    #[test]
    fn audio_chunks_drive_speaking_then_back_to_listening() {
        let fx = fixture("key", false);
        fx.session.start().unwrap();
        assert!(wait_until(|| fx.session.state() == SessionState::Listening));

        let chunk = encode_test_frame(&[0.1f32; 2400], OUTPUT_SAMPLE_RATE);
        events_sender(&fx)
            .send(TransportEvent::Message(ServerEvent::Audio(chunk.data)))
            .unwrap();

        assert!(wait_until(|| fx.session.state() == SessionState::Speaking));
        assert_eq!(fx.out.lock().unwrap().scheduled, 1);

        // Playback finishes: handle 1 retires, session returns to Listening.
        fx.out.lock().unwrap().finished.push(1);
        assert!(wait_until(|| fx.session.state() == SessionState::Listening));

        fx.session.stop();
    }

    #[test]
    fn server_error_lands_in_error_state_with_a_message() {
        let fx = fixture("key", false);
        fx.session.start().unwrap();
        assert!(wait_until(|| fx.session.state() == SessionState::Listening));

        events_sender(&fx)
            .send(TransportEvent::Message(ServerEvent::ServerError(
                "429 RESOURCE_EXHAUSTED".to_string(),
            )))
            .unwrap();

        assert!(wait_until(|| fx.session.state() == SessionState::Error));
        assert!(fx.session.last_error().unwrap().contains("rate limit"));
        assert!(fx.capture_stopped.load(Ordering::SeqCst));

        // Error state is restartable.
        fx.session.start().unwrap();
        assert!(wait_until(|| fx.session.state() == SessionState::Listening));
        assert!(fx.session.last_error().is_none());
        fx.session.stop();
    }

    #[test]
    fn unexpected_close_is_a_transient_failure() {
        let fx = fixture("key", false);
        fx.session.start().unwrap();
        assert!(wait_until(|| fx.session.state() == SessionState::Listening));

        events_sender(&fx).send(TransportEvent::Closed).unwrap();

        assert!(wait_until(|| fx.session.state() == SessionState::Error));
        assert!(fx
            .session
            .last_error()
            .unwrap()
            .contains("closed unexpectedly"));
    }

    #[test]
    fn stop_tears_down_capture_transport_and_playback() {
        let fx = fixture("key", false);
        fx.session.start().unwrap();
        assert!(wait_until(|| fx.session.state() == SessionState::Listening));

        fx.session.stop();
        assert_eq!(fx.session.state(), SessionState::Idle);
        assert!(wait_until(|| fx.capture_stopped.load(Ordering::SeqCst)));
        assert!(wait_until(|| {
            fx.transport.lock().unwrap().state == Some(HandleState::Closed)
        }));
        assert!(wait_until(|| fx.out.lock().unwrap().stopped));
    }
}
