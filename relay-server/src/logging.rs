use relay_sfu::PeerId;
use std::sync::Arc;
use tracing::{Level, Span};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::{LogFormat, LoggingConfig};

/// Crates of the WebRTC stack that log every packet-level detail at debug.
const MEDIA_STACK_TARGETS: &[&str] = &[
    "webrtc",
    "webrtc_ice",
    "webrtc_dtls",
    "webrtc_srtp",
    "webrtc_sctp",
    "webrtc_mdns",
    "interceptor",
];

type OutputLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` takes precedence. Otherwise the configured level applies to
/// the SFU itself while the media stack is held at `warn`.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(&config.level)?)?,
    };

    let (writer, ansi) = match &config.file_path {
        Some(path) => (BoxMakeWriter::new(Arc::new(open_log_file(path)?)), false),
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    // Peer spans are entered for a whole session, so only their CLOSE is
    // worth an event; the current span carries the peer id on every line.
    let output: OutputLayer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_target(true)
            .with_line_number(true)
            .with_file(false)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(output)
        .try_init()?;

    Ok(())
}

/// Span wrapping everything logged on behalf of one signaling connection
pub fn peer_span(peer_id: &PeerId) -> Span {
    tracing::info_span!("peer", peer_id = %peer_id)
}

fn default_directives(level: &str) -> anyhow::Result<String> {
    let level: Level = level
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid log level: {level}"))?;
    let media = if level == Level::ERROR {
        Level::ERROR
    } else {
        Level::WARN
    };

    let mut directives = level.to_string().to_lowercase();
    for target in MEDIA_STACK_TARGETS {
        directives.push_str(&format!(",{target}={}", media.to_string().to_lowercase()));
    }
    Ok(directives)
}

fn open_log_file(path: &str) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}
