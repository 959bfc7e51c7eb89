// ABOUTME: Command-line argument parsing for the nowplaying client
// ABOUTME: Tracing setup, startup logging, and ClientConfig construction from flags

use crate::config::{ClientConfig, FormatHint};
use clap::Args;
use std::time::Duration;

/// Client arguments
///
/// Use with `#[command(flatten)]` in the binary's Args struct.
#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Base URL of the playback server
    #[arg(short, long, default_value = "http://localhost:8080")]
    pub server: String,

    /// Signaling WebSocket URL (derived from --server when omitted)
    #[arg(long)]
    pub signaling_url: Option<String>,

    /// Preferred fallback stream encoding (mp3, aac, opus, flac, wav)
    #[arg(short, long, default_value = "mp3")]
    pub format: FormatHint,

    /// Heartbeat ping interval in seconds
    #[arg(long, default_value = "5")]
    pub heartbeat_secs: u64,

    /// Reconnect attempts before falling back
    #[arg(long, default_value = "3")]
    pub reconnect_attempts: u32,

    /// Readiness backup timer in milliseconds
    #[arg(long, default_value = "3000")]
    pub readiness_backup_ms: u64,

    /// Poll server playback status while streaming
    #[arg(long)]
    pub poll_status: bool,

    /// Status poll interval in seconds
    #[arg(long, default_value = "2")]
    pub poll_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ClientArgs {
    /// Initialize tracing based on verbosity flag
    pub fn init_tracing(&self) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let filter = if self.verbose {
            "nowplaying=debug"
        } else {
            "nowplaying=info"
        };

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| filter.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    /// Log startup information
    pub fn log_startup_info(&self, config: &ClientConfig) {
        tracing::info!("nowplaying v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!("Server: {}", config.base_url);
        tracing::info!("Signaling: {}", config.signaling_url);
        tracing::info!("Fallback format: {}", self.format.as_str());
    }

    /// Build ClientConfig from these args
    pub fn build_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.server.clone())
            .heartbeat(Duration::from_secs(self.heartbeat_secs.max(1)), 3)
            .readiness_backup(Duration::from_millis(self.readiness_backup_ms))
            .poll_interval(Duration::from_secs(self.poll_secs.max(1)));
        let base_delay = config.reconnect_base_delay;
        config = config.reconnect(base_delay, self.reconnect_attempts);
        if let Some(url) = &self.signaling_url {
            config = config.signaling_url(url.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestArgs {
        #[command(flatten)]
        client: ClientArgs,
    }

    #[test]
    fn test_default_args() {
        let args = TestArgs::parse_from(["nowplaying"]).client;
        assert_eq!(args.server, "http://localhost:8080");
        assert_eq!(args.format, FormatHint::Mp3);
        assert_eq!(args.reconnect_attempts, 3);
        assert!(!args.poll_status);
    }

    #[test]
    fn test_build_config() {
        let args = TestArgs::parse_from([
            "nowplaying",
            "--server",
            "https://radio.example.com/",
            "--format",
            "flac",
            "--reconnect-attempts",
            "5",
            "--readiness-backup-ms",
            "1500",
        ])
        .client;

        let config = args.build_config();
        assert_eq!(config.base_url, "https://radio.example.com");
        assert_eq!(config.signaling_url, "wss://radio.example.com/ws/stream");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(
            config.reconnect_base_delay,
            ClientConfig::default().reconnect_base_delay
        );
        assert_eq!(config.readiness_backup, Duration::from_millis(1500));
        assert_eq!(args.format, FormatHint::Flac);
    }

    #[test]
    fn test_signaling_override() {
        let args = TestArgs::parse_from([
            "nowplaying",
            "--signaling-url",
            "ws://127.0.0.1:9000/signal",
        ])
        .client;
        assert_eq!(args.build_config().signaling_url, "ws://127.0.0.1:9000/signal");
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(TestArgs::try_parse_from(["nowplaying", "--format", "midi"]).is_err());
    }
}
