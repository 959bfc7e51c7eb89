// ABOUTME: HTTP byte-stream sink
// ABOUTME: Pulls the fallback stream with ureq, probes the container with symphonia, and meters traffic

use crate::transport::sink::{
    AudioSink, PlayError, SinkError, SinkEvent, SinkHandler, SinkHandlers, SinkSource,
    SinkSubscription,
};
use crate::transport::stats::{StreamCounters, TransportStats};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bytes buffered before the container is probed and `CanPlay` fires
const DEFAULT_PROBE_BYTES: usize = 32 * 1024;

/// Read timeout after which the stream is reported stalled
const DEFAULT_STALL_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Read chunk size
const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProbeState {
    Pending,
    Ready(String),
    Failed(String),
}

struct SinkState {
    source: Option<SinkSource>,
    probe: ProbeState,
    playing: bool,
    stop: Option<Arc<AtomicBool>>,
}

/// Sink that pulls a continuous HTTP stream and validates it
///
/// The sink buffers the head of the stream, probes the container with
/// symphonia, and then keeps draining the connection while counting bytes.
/// Audible output is left to a device-backed [`AudioSink`]; this sink is what
/// the command-line client uses to exercise and meter the fallback path.
pub struct HttpStreamSink {
    handlers: SinkHandlers,
    counters: Arc<StreamCounters>,
    state: Arc<Mutex<SinkState>>,
    probe_bytes: usize,
    stall_read_timeout: Duration,
}

impl HttpStreamSink {
    /// Create a sink with default buffering thresholds
    pub fn new() -> Self {
        Self {
            handlers: SinkHandlers::new(),
            counters: Arc::new(StreamCounters::new()),
            state: Arc::new(Mutex::new(SinkState {
                source: None,
                probe: ProbeState::Pending,
                playing: false,
                stop: None,
            })),
            probe_bytes: DEFAULT_PROBE_BYTES,
            stall_read_timeout: DEFAULT_STALL_READ_TIMEOUT,
        }
    }

    /// Set how many bytes are buffered before probing
    pub fn probe_bytes(mut self, bytes: usize) -> Self {
        self.probe_bytes = bytes.max(1);
        self
    }

    /// Set the read timeout that counts as a stall
    pub fn stall_read_timeout(mut self, timeout: Duration) -> Self {
        self.stall_read_timeout = timeout;
        self
    }

    /// Whether playback has been started on the current source
    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn stop_current(state: &mut SinkState) {
        if let Some(stop) = state.stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
        state.source = None;
        state.playing = false;
        state.probe = ProbeState::Pending;
    }

    fn spawn_fetch(&self, url: String, stop: Arc<AtomicBool>) {
        let fetch = Fetch {
            url,
            handlers: self.handlers.clone(),
            counters: Arc::clone(&self.counters),
            state: Arc::clone(&self.state),
            stop,
            probe_bytes: self.probe_bytes,
            read_timeout: self.stall_read_timeout,
        };

        let spawned = std::thread::Builder::new()
            .name("nowplaying-fetch".to_string())
            .spawn(move || fetch.run());
        if let Err(e) = spawned {
            log::error!("Failed to spawn stream fetch thread: {}", e);
            self.handlers
                .emit(SinkEvent::Error(SinkError::Network(e.to_string())));
        }
    }
}

impl Default for HttpStreamSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSink for HttpStreamSink {
    fn attach(&self, source: SinkSource) {
        let mut state = self.state.lock();
        Self::stop_current(&mut state);
        self.counters.reset();

        match &source {
            SinkSource::Url(url) => {
                let stop = Arc::new(AtomicBool::new(false));
                state.stop = Some(Arc::clone(&stop));
                state.source = Some(source.clone());
                drop(state);
                self.spawn_fetch(url.clone(), stop);
            }
            SinkSource::Track(track) => {
                log::info!("Attached remote track {}", track.id);
                state.probe = ProbeState::Ready(format!("remote track {}", track.id));
                state.source = Some(source.clone());
            }
        }
    }

    fn detach(&self) {
        Self::stop_current(&mut self.state.lock());
    }

    async fn play(&self) -> Result<(), PlayError> {
        {
            let mut state = self.state.lock();
            if state.source.is_none() {
                return Err(PlayError::Unsupported("no source attached".to_string()));
            }
            match &state.probe {
                ProbeState::Pending => {
                    // Playback starts once the probe completes
                    log::info!("Play requested while buffering");
                    state.playing = true;
                    return Ok(());
                }
                ProbeState::Failed(reason) => return Err(PlayError::Unsupported(reason.clone())),
                ProbeState::Ready(description) => {
                    log::info!("Playing {}", description);
                }
            }
            state.playing = true;
        }
        self.handlers.emit(SinkEvent::Playing);
        Ok(())
    }

    fn pause(&self) {
        self.state.lock().playing = false;
    }

    fn subscribe(&self, handler: SinkHandler) -> SinkSubscription {
        self.handlers.add(handler)
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

/// One blocking fetch of the stream URL
struct Fetch {
    url: String,
    handlers: SinkHandlers,
    counters: Arc<StreamCounters>,
    state: Arc<Mutex<SinkState>>,
    stop: Arc<AtomicBool>,
    probe_bytes: usize,
    read_timeout: Duration,
}

impl Fetch {
    fn run(self) {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(self.read_timeout)
            .build();

        let response = match agent.get(&self.url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                self.emit(SinkEvent::Error(SinkError::Network(format!("HTTP {}", code))));
                return;
            }
            Err(e) => {
                self.emit(SinkEvent::Error(SinkError::Network(e.to_string())));
                return;
            }
        };

        let content_type = response.content_type().to_string();
        log::debug!("Stream Content-Type: {}", content_type);
        let extension = extension_for_content_type(&content_type)
            .or_else(|| format_from_url(&self.url))
            .unwrap_or("mp3");

        let mut reader = response.into_reader();
        let mut head: Option<Vec<u8>> = Some(Vec::with_capacity(self.probe_bytes));
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        let mut stalled = false;

        while !self.stop.load(Ordering::SeqCst) {
            match reader.read(&mut chunk) {
                Ok(0) => {
                    log::info!("Stream ended after {} bytes", self.counters.snapshot().bytes_received);
                    self.emit(SinkEvent::Ended);
                    return;
                }
                Ok(n) => {
                    self.counters.record(n);
                    if stalled {
                        stalled = false;
                        self.emit(SinkEvent::Progress);
                    }

                    let Some(buffer) = head.as_mut() else {
                        continue;
                    };
                    buffer.extend_from_slice(&chunk[..n]);
                    if buffer.len() < self.probe_bytes {
                        continue;
                    }

                    let buffer = head.take().unwrap_or_default();
                    match probe_format(buffer, extension) {
                        Ok(description) => {
                            let waiting = self.set_probe(ProbeState::Ready(description.clone()));
                            self.emit(SinkEvent::CanPlay);
                            if waiting {
                                log::info!("Playing {}", description);
                                self.emit(SinkEvent::Playing);
                            }
                        }
                        Err(reason) => {
                            self.set_probe(ProbeState::Failed(reason.clone()));
                            self.emit(SinkEvent::Error(SinkError::Unsupported(reason)));
                            return;
                        }
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    if !stalled {
                        stalled = true;
                        log::debug!("No stream data for {:?}", self.read_timeout);
                        self.emit(SinkEvent::Stalled);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.emit(SinkEvent::Error(SinkError::Network(e.to_string())));
                    return;
                }
            }
        }
    }

    /// Record the probe result; true when a play request is waiting on it
    fn set_probe(&self, probe: ProbeState) -> bool {
        if self.stop.load(Ordering::SeqCst) {
            return false;
        }
        let mut state = self.state.lock();
        state.probe = probe;
        state.playing
    }

    fn emit(&self, event: SinkEvent) {
        // A detached source must not leak events into the next one
        if !self.stop.load(Ordering::SeqCst) {
            self.handlers.emit(event);
        }
    }
}

/// Probe the buffered stream head; returns a short description of the track
fn probe_format(head: Vec<u8>, extension: &str) -> Result<String, String> {
    use symphonia::core::codecs::CODEC_TYPE_NULL;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let mut hint = Hint::new();
    hint.with_extension(extension);

    let mss = MediaSourceStream::new(Box::new(std::io::Cursor::new(head)), Default::default());
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| format!("unrecognized stream: {}", e))?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| "no audio track found in stream".to_string())?;

    let codec = symphonia::default::get_codecs()
        .get_codec(track.codec_params.codec)
        .map(|d| d.short_name)
        .unwrap_or("unknown");

    Ok(match track.codec_params.sample_rate {
        Some(rate) => format!("{} at {} Hz", codec, rate),
        None => codec.to_string(),
    })
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    match content_type {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/flac" => Some("flac"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/aac" | "audio/x-aac" => Some("aac"),
        "audio/ogg" | "audio/opus" => Some("ogg"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        _ => None,
    }
}

fn format_from_url(url: &str) -> Option<&'static str> {
    let query = url.split_once('?')?.1;
    let format = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("format="))?;
    match format {
        "mp3" => Some("mp3"),
        "aac" => Some("aac"),
        "opus" | "ogg" => Some("ogg"),
        "flac" => Some("flac"),
        "wav" => Some("wav"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, FormatHint};
    use crate::transport::fallback::{FallbackEvent, FallbackTransport};
    use crate::transport::tasks::TaskTracker;
    use std::io::Write;
    use std::net::TcpListener;

    fn wav_bytes(samples: usize) -> Vec<u8> {
        let data_len = (samples * 4) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&2u16.to_le_bytes()); // stereo
        out.extend_from_slice(&44_100u32.to_le_bytes());
        out.extend_from_slice(&(44_100u32 * 4).to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.resize(out.len() + samples * 4, 0);
        out
    }

    #[test]
    fn test_probe_accepts_wav_head() {
        let description = probe_format(wav_bytes(4096), "wav").unwrap();
        assert!(description.contains("44100"), "got {}", description);
    }

    #[test]
    fn test_probe_rejects_garbage() {
        let garbage = vec![0x42u8; 4096];
        assert!(probe_format(garbage, "wav").is_err());
    }

    #[test]
    fn test_format_from_url() {
        assert_eq!(
            format_from_url("http://h/api/stream/live?format=opus&t=1"),
            Some("ogg")
        );
        assert_eq!(format_from_url("http://h/api/stream/live?t=1"), None);
        assert_eq!(format_from_url("http://h/live"), None);
    }

    #[test]
    fn test_content_type_mapping() {
        assert_eq!(extension_for_content_type("audio/mpeg"), Some("mp3"));
        assert_eq!(extension_for_content_type("text/html"), None);
    }

    #[tokio::test]
    async fn test_play_requires_probed_source() {
        let sink = HttpStreamSink::new();
        assert!(matches!(sink.play().await, Err(PlayError::Unsupported(_))));

        sink.attach(SinkSource::Track(crate::transport::peer::RemoteTrack {
            id: "audio0".to_string(),
        }));
        assert!(sink.play().await.is_ok());
        assert!(sink.is_playing());

        sink.detach();
        assert!(!sink.is_playing());
        assert!(matches!(sink.play().await, Err(PlayError::Unsupported(_))));
    }

    /// Serve a WAV stream in small pieces, well below the buffering threshold rate
    fn spawn_trickle_server(piece: usize, every: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let Ok((mut socket, _)) = listener.accept() else {
                return;
            };
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request);
            let header = "HTTP/1.1 200 OK\r\nContent-Type: audio/wav\r\nConnection: close\r\n\r\n";
            if socket.write_all(header.as_bytes()).is_err() {
                return;
            }
            for chunk in wav_bytes(64 * 1024).chunks(piece) {
                if socket.write_all(chunk).is_err() {
                    return;
                }
                std::thread::sleep(every);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_slow_stream_survives_readiness_backup() {
        let base = spawn_trickle_server(600, Duration::from_millis(100));
        let config = Arc::new(
            ClientConfig::new(base)
                .readiness_backup(Duration::from_millis(200))
                .play_retry(3, Duration::from_millis(50)),
        );
        let sink = Arc::new(HttpStreamSink::new());
        let mut transport = FallbackTransport::new(config, sink.clone(), TaskTracker::new());

        let mut events = transport.start(FormatHint::Wav).await;
        let url = transport.source_url().unwrap().to_string();
        sink.attach(SinkSource::Url(url));

        let first = tokio::time::timeout(Duration::from_secs(2), events.recv()).await;
        assert_eq!(first.unwrap(), Some(FallbackEvent::Ready));
        let second = tokio::time::timeout(Duration::from_secs(2), events.recv()).await;
        assert_eq!(second.unwrap(), Some(FallbackEvent::Playing));

        // Well past the retry window the stream is still buffering, not failed
        let later = tokio::time::timeout(Duration::from_millis(1500), events.recv()).await;
        assert!(later.is_err(), "unexpected event {:?}", later);
        assert!(sink.is_playing());
        assert!(sink.stats().bytes_received > 0);

        transport.dispose().await;
        sink.detach();
    }
}
