//! The session's view of its transport.
//!
//! [`SessionIo`] is everything the session needs from a connection: whether
//! the peer is still there, more decoded input, and a way to write one
//! encoded frame. [`TcpSessionIo`] implements it over a plain `TcpStream`.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::CodecError;
use crate::h2_codec::{H2Codec, H2Frame};

/// Outcome of [`SessionIo::read_more`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Zero or more frames were decoded.
    Success,
    /// The input could not be decoded. Frames decoded before the bad bytes
    /// are still available from the decoder.
    Error,
    /// The peer closed its side; no more input will arrive.
    ConnectionClosed,
}

/// Outcome of [`SessionIo::write_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Success,
    ConnectionClosed,
}

/// Decodes bytes handed over by a [`SessionIo`] into frames for the session.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    codec: H2Codec,
    frames: VecDeque<H2Frame>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw input. Returns false once the input is undecodable; every
    /// later call also returns false.
    pub fn process_input(&mut self, data: &[u8]) -> bool {
        let mut decoded = Vec::new();
        let result = self.codec.process_into(data, &mut decoded);
        self.frames.extend(decoded);
        match result {
            Ok(()) => true,
            Err(err) => {
                debug!(%err, "frame decode failed");
                false
            }
        }
    }

    pub fn error(&self) -> Option<&CodecError> {
        self.codec.error()
    }

    pub fn next_frame(&mut self) -> Option<H2Frame> {
        self.frames.pop_front()
    }

    pub fn has_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    pub(crate) fn set_max_frame_size(&mut self, max: u32) {
        self.codec.set_max_frame_size(max);
    }
}

/// The connection as seen by a session.
pub trait SessionIo {
    /// True once the peer is known to be unreachable. The session then
    /// stops without writing anything else.
    fn is_peer_gone(&mut self) -> bool;

    /// Read whatever input is available and push it into `decoder`. With
    /// `block` set, wait until at least some input (or EOF) arrives.
    fn read_more(&mut self, block: bool, decoder: &mut FrameDecoder) -> ReadStatus;

    /// Write one encoded frame in full.
    fn write_frame(&mut self, frame: &[u8]) -> WriteStatus;
}

/// How long a non-blocking [`TcpSessionIo::read_more`] waits for input.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// [`SessionIo`] over a TCP connection.
#[derive(Debug)]
pub struct TcpSessionIo {
    stream: TcpStream,
    poll_interval: Duration,
    buffer: Box<[u8]>,
    eof: bool,
    peer_gone: bool,
}

impl TcpSessionIo {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            poll_interval: DEFAULT_POLL_INTERVAL,
            buffer: vec![0; 16 * 1024].into_boxed_slice(),
            eof: false,
            peer_gone: false,
        }
    }

    /// Non-blocking reads wait up to `interval` for input before returning.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl SessionIo for TcpSessionIo {
    fn is_peer_gone(&mut self) -> bool {
        self.peer_gone
    }

    fn read_more(&mut self, block: bool, decoder: &mut FrameDecoder) -> ReadStatus {
        if self.eof {
            // Nothing more will arrive; don't spin while streams drain.
            if !block {
                std::thread::sleep(self.poll_interval);
            }
            return ReadStatus::ConnectionClosed;
        }

        let timeout = if block { None } else { Some(self.poll_interval) };
        if let Err(err) = self.stream.set_read_timeout(timeout) {
            warn!(%err, "failed to set read timeout");
            self.peer_gone = true;
            return ReadStatus::ConnectionClosed;
        }

        match self.stream.read(&mut self.buffer) {
            Ok(0) => {
                debug!("peer closed its side of the connection");
                self.eof = true;
                ReadStatus::ConnectionClosed
            }
            Ok(n) => {
                trace!(bytes = n, "read");
                if decoder.process_input(&self.buffer[..n]) {
                    ReadStatus::Success
                } else {
                    ReadStatus::Error
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                ReadStatus::Success
            }
            Err(err) => {
                debug!(%err, "read failed");
                self.peer_gone = true;
                self.eof = true;
                ReadStatus::ConnectionClosed
            }
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> WriteStatus {
        match self.stream.write_all(frame) {
            Ok(()) => WriteStatus::Success,
            Err(err) => {
                debug!(%err, "write failed");
                self.peer_gone = true;
                WriteStatus::ConnectionClosed
            }
        }
    }
}
