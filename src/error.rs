use crate::frame::Frame;
use httparse::Error as HttpParseError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use tokio::time::error::Elapsed;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    // Sender / Receiver Errors
    #[error("{source}")]
    SendError {
        #[from]
        source: SendError<Frame>,
    },

    #[error("send attempted on a session that is already closed")]
    SessionClosed,

    // General Errors
    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Handshake Errors
    #[error("server answered the upgrade request with status {0}")]
    UpgradeRefused(u16),

    #[error("server didn't send a Sec-WebSocket-Accept header")]
    MissingAcceptHeader,

    #[error("server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("connection closed before the handshake response was complete")]
    IncompleteHandshake,

    #[error("handshake response headers exceed the maximum allowed size")]
    HeaderTooLarge,

    // Framing Errors
    #[error("control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("frame payload exceeds the maximum allowed size")]
    MaxFrameSize,

    #[error("invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    #[error("invalid opcode: {0}")]
    InvalidOpcode(u8),

    // URL Errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("invalid scheme in WebSocket URL, only ws:// targets are supported")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    // Driver configuration errors
    #[error("ramp schedule must contain at least one stage")]
    EmptySchedule,

    #[error("ramp stage duration must be greater than zero")]
    ZeroDurationStage,

    #[error("invalid ramp stage spec: `{0}`, expected <duration>:<target> such as 30s:100")]
    InvalidStageSpec(String),

    #[error("pass-rate threshold `{0}` is out of range, expected a value in (0, 1]")]
    InvalidThreshold(f64),
}
