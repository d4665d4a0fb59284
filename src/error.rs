//! Error types shared across the session engine.

use thiserror::Error;

/// A fatal decode error reported by [`H2Codec`](crate::h2_codec::H2Codec).
///
/// Once a codec has failed it keeps reporting the same error; the byte
/// stream can't be resynchronised after a framing error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame of {length} bytes exceeds the maximum frame size {max}")]
    FrameTooLarge { length: u32, max: u32 },

    #[error("{frame} frame too short")]
    FrameTooShort { frame: &'static str },

    #[error("{frame} frame has invalid length {length}")]
    InvalidFrameLength { frame: &'static str, length: usize },

    #[error("invalid padding length in {frame} frame")]
    InvalidPadding { frame: &'static str },

    #[error("header block too large ({size} bytes, max {max})")]
    HeaderBlockTooLarge { size: usize, max: usize },

    #[error("CONTINUATION for stream {got} but pending headers on stream {pending}")]
    ContinuationStreamMismatch { got: u32, pending: u32 },

    #[error("unexpected CONTINUATION frame for stream {0}")]
    UnexpectedContinuation(u32),

    #[error("expected CONTINUATION for stream {pending}, got frame type {frame_type:#x}")]
    ContinuationExpected { pending: u32, frame_type: u8 },
}

/// An HPACK header block that could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("HPACK decode error: {0}")]
pub struct HpackError(pub String);

/// Errors returned to stream handlers by [`StreamHandle`](crate::stream::StreamHandle).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// The stream was reset by the peer or the session has stopped.
    #[error("stream aborted")]
    Aborted,

    /// The handler already sent a frame flagged as final.
    #[error("stream already finished")]
    AlreadyFinished,

    /// DATA was sent before the leading HEADERS frame.
    #[error("leading HEADERS frame not sent yet")]
    HeadersNotSent,

    /// A second leading HEADERS frame was sent before any DATA.
    #[error("leading HEADERS frame already sent")]
    HeadersAlreadySent,

    /// The push could not be started (push disabled, peer going away or session draining).
    #[error("server push refused")]
    PushRefused,

    /// Pushes may only be associated with peer-initiated streams.
    #[error("pushed streams can't start further pushes")]
    NotPushCapable,
}

/// A peer SETTINGS value the session refuses. Always answered with a
/// PROTOCOL_ERROR GOAWAY.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    #[error("INITIAL_WINDOW_SIZE sent on a protocol version without flow control")]
    FlowControlUnsupported,

    #[error("INITIAL_WINDOW_SIZE {0:#x} outside (0, 0x7fffffff]")]
    InvalidInitialWindow(u32),

    #[error("ENABLE_PUSH must be 0 or 1, got {0}")]
    InvalidEnablePush(u32),

    #[error("MAX_FRAME_SIZE {0} outside [16384, 16777215]")]
    InvalidMaxFrameSize(u32),
}

/// Stream-level flow-control violations. Answered with
/// RST_STREAM(FLOW_CONTROL_ERROR).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlError {
    #[error("WINDOW_UPDATE of {increment} overflows send window {window}")]
    WindowOverflow { window: i32, increment: u32 },

    #[error("{len} bytes of DATA exceed receive window {window}")]
    WindowExceeded { len: usize, window: i64 },
}
