// ABOUTME: Client configuration
// ABOUTME: Defines endpoints, timer budgets, and retry policy for a streaming session

use std::time::Duration;

/// Encoding requested from the fallback stream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatHint {
    /// MPEG layer 3
    #[default]
    Mp3,
    /// AAC in ADTS
    Aac,
    /// Opus in Ogg
    Opus,
    /// FLAC
    Flac,
    /// Uncompressed WAV
    Wav,
}

impl FormatHint {
    /// Convert to the `format` query value
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatHint::Mp3 => "mp3",
            FormatHint::Aac => "aac",
            FormatHint::Opus => "opus",
            FormatHint::Flac => "flac",
            FormatHint::Wav => "wav",
        }
    }

    /// Container extension used as a probe hint
    pub fn extension(&self) -> &'static str {
        match self {
            FormatHint::Opus => "ogg",
            other => other.as_str(),
        }
    }
}

impl std::str::FromStr for FormatHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(FormatHint::Mp3),
            "aac" => Ok(FormatHint::Aac),
            "opus" | "ogg" => Ok(FormatHint::Opus),
            "flac" => Ok(FormatHint::Flac),
            "wav" => Ok(FormatHint::Wav),
            other => Err(format!("unknown format '{}'", other)),
        }
    }
}

/// Client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// HTTP base URL of the playback server (no trailing slash)
    pub base_url: String,
    /// Signaling WebSocket URL
    pub signaling_url: String,
    /// Feature probe path
    pub probe_path: String,
    /// Fallback byte-stream path
    pub stream_path: String,
    /// Status endpoint path
    pub status_path: String,
    /// Playlist endpoint prefix (`{prefix}/{list_id}`)
    pub playlist_path: String,
    /// Signaling open timeout
    pub connect_timeout: Duration,
    /// Time from signaling open until the media path must report connected
    pub negotiation_timeout: Duration,
    /// Ping interval while connecting or connected
    pub heartbeat_interval: Duration,
    /// Missed intervals before the link is considered dead
    pub heartbeat_miss_limit: u32,
    /// First reconnect delay, doubled on every attempt
    pub reconnect_base_delay: Duration,
    /// Reconnect attempts before the primary transport gives up
    pub max_reconnect_attempts: u32,
    /// Backup window for fallback readiness
    pub readiness_backup: Duration,
    /// Playback start attempts on interrupted plays
    pub play_retry_attempts: u32,
    /// Delay between playback start attempts
    pub play_retry_delay: Duration,
    /// Stall time tolerated before the fallback stream is reported closed
    pub stall_grace: Duration,
    /// Operation lock watchdog interval
    pub lock_watchdog_interval: Duration,
    /// Longest a single lock holder may stay registered
    pub lock_max_hold: Duration,
    /// Status poll interval
    pub poll_interval: Duration,
    /// HTTP request timeout for non-streaming calls
    pub http_timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration for the server at `base_url`
    ///
    /// The signaling URL is derived by swapping the scheme to `ws`/`wss`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let signaling_url = derive_signaling_url(&base_url);
        Self {
            base_url,
            signaling_url,
            ..Default::default()
        }
    }

    /// Set the signaling URL
    pub fn signaling_url(mut self, url: impl Into<String>) -> Self {
        self.signaling_url = url.into();
        self
    }

    /// Set the heartbeat interval and miss limit
    pub fn heartbeat(mut self, interval: Duration, miss_limit: u32) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_miss_limit = miss_limit.max(1);
        self
    }

    /// Set the negotiation deadline for each signaling connection
    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Set the reconnect backoff policy
    pub fn reconnect(mut self, base_delay: Duration, max_attempts: u32) -> Self {
        self.reconnect_base_delay = base_delay;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Set the readiness backup window
    pub fn readiness_backup(mut self, window: Duration) -> Self {
        self.readiness_backup = window;
        self
    }

    /// Set the playback start retry policy
    pub fn play_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.play_retry_attempts = attempts.max(1);
        self.play_retry_delay = delay;
        self
    }

    /// Set the stall grace window
    pub fn stall_grace(mut self, grace: Duration) -> Self {
        self.stall_grace = grace;
        self
    }

    /// Set the status poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the lock watchdog interval and maximum hold time
    pub fn lock_watchdog(mut self, interval: Duration, max_hold: Duration) -> Self {
        self.lock_watchdog_interval = interval;
        self.lock_max_hold = max_hold;
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.reconnect_base_delay * (1u32 << shift)
    }

    /// Liveness deadline derived from the heartbeat settings
    pub fn liveness_deadline(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_miss_limit
    }

    /// Feature probe URL
    pub fn probe_url(&self) -> String {
        format!("{}{}", self.base_url, self.probe_path)
    }

    /// Fallback stream URL for `format` with a cache-busting `token`
    pub fn stream_url(&self, format: FormatHint, token: &str) -> String {
        format!(
            "{}{}?format={}&t={}",
            self.base_url,
            self.stream_path,
            format.as_str(),
            token
        )
    }

    /// Status URL
    pub fn status_url(&self) -> String {
        format!("{}{}", self.base_url, self.status_path)
    }

    /// Playlist URL for `list_id`
    pub fn playlist_url(&self, list_id: &str) -> String {
        format!("{}{}/{}", self.base_url, self.playlist_path, list_id)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        let base_url = "http://localhost:8080".to_string();
        Self {
            signaling_url: derive_signaling_url(&base_url),
            base_url,
            probe_path: "/api/stream/config".to_string(),
            stream_path: "/api/stream/live".to_string(),
            status_path: "/api/status".to_string(),
            playlist_path: "/api/playlists".to_string(),
            connect_timeout: Duration::from_secs(10),
            negotiation_timeout: Duration::from_secs(20),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_miss_limit: 3,
            reconnect_base_delay: Duration::from_secs(2),
            max_reconnect_attempts: 3,
            readiness_backup: Duration::from_secs(3),
            play_retry_attempts: 3,
            play_retry_delay: Duration::from_millis(500),
            stall_grace: Duration::from_secs(8),
            lock_watchdog_interval: Duration::from_secs(5),
            lock_max_hold: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
            http_timeout: Duration::from_secs(10),
        }
    }
}

fn derive_signaling_url(base_url: &str) -> String {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };
    format!("{}/ws/stream", ws_base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signaling_url_derivation() {
        let config = ClientConfig::new("https://music.example.com/");
        assert_eq!(config.base_url, "https://music.example.com");
        assert_eq!(config.signaling_url, "wss://music.example.com/ws/stream");

        let config = ClientConfig::new("http://127.0.0.1:9000");
        assert_eq!(config.signaling_url, "ws://127.0.0.1:9000/ws/stream");
    }

    #[test]
    fn test_backoff_doubles() {
        let config = ClientConfig::default().reconnect(Duration::from_secs(2), 3);
        assert_eq!(config.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_stream_url_carries_format_and_token() {
        let config = ClientConfig::new("http://host");
        let url = config.stream_url(FormatHint::Opus, "abc");
        assert_eq!(url, "http://host/api/stream/live?format=opus&t=abc");
    }

    #[test]
    fn test_format_hint_parse() {
        assert_eq!("OGG".parse::<FormatHint>(), Ok(FormatHint::Opus));
        assert!("midi".parse::<FormatHint>().is_err());
    }
}
