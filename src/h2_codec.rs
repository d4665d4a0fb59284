//! HTTP/2-layout frame codec.
//!
//! A sans-I/O frame parser and encoder. The session feeds raw bytes in through
//! [`FrameDecoder`](crate::io::FrameDecoder) and gets typed [`H2Frame`]s back;
//! outgoing frames are serialized with [`H2Frame::encode`] or the `create_*`
//! builders. Both protocol versions share this 9-byte-header layout.
//!
//! Reference: RFC 7540 (HTTP/2)

use crate::error::CodecError;

/// Frame types (RFC 7540 Section 6)
#[allow(dead_code)]
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// Frame flags
#[allow(dead_code)]
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;

    /// Every flag a HEADERS frame may legally carry.
    pub const HEADERS_ALLOWED: u8 = END_STREAM | END_HEADERS | PADDED | PRIORITY;
}

/// SETTINGS identifiers (RFC 7540 Section 6.5.2)
#[allow(dead_code)]
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// Error codes carried by RST_STREAM and GOAWAY (RFC 7540 Section 7)
#[allow(dead_code)]
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const SETTINGS_TIMEOUT: u32 = 0x4;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
    pub const COMPRESSION_ERROR: u32 = 0x9;
    pub const CONNECT_ERROR: u32 = 0xa;
    pub const ENHANCE_YOUR_CALM: u32 = 0xb;
    pub const INADEQUATE_SECURITY: u32 = 0xc;
    pub const HTTP_1_1_REQUIRED: u32 = 0xd;
}

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Default and minimum SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest legal SETTINGS_MAX_FRAME_SIZE.
pub const MAX_ALLOWED_FRAME_SIZE: u32 = 16_777_215;

/// Maximum accumulated header block size (256 KB).
/// Prevents unbounded memory growth from malicious/buggy CONTINUATION floods.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// The client connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// A parsed frame header (9 bytes)
#[derive(Debug, Clone)]
pub struct H2FrameHeader {
    pub length: u32, // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32, // 31 bits (high bit reserved)
}

impl H2FrameHeader {
    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }

        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & 0x7FFF_FFFF;

        Some(Self {
            length,
            frame_type: data[3],
            flags: data[4],
            stream_id,
        })
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }
}

fn push_frame_header(buf: &mut Vec<u8>, length: usize, frame_type: u8, flags: u8, stream_id: u32) {
    let length = length as u32;
    buf.push((length >> 16) as u8);
    buf.push((length >> 8) as u8);
    buf.push(length as u8);
    buf.push(frame_type);
    buf.push(flags);
    buf.extend_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());
}

/// Fixed-size frames must carry exactly `len` payload bytes.
fn expect_length(frame: &'static str, payload: &[u8], len: usize) -> Result<(), CodecError> {
    if payload.len() < len {
        return Err(CodecError::FrameTooShort { frame });
    }
    if payload.len() != len {
        return Err(CodecError::InvalidFrameLength {
            frame,
            length: payload.len(),
        });
    }
    Ok(())
}

/// Stream priority information carried by HEADERS frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2Priority {
    pub dependency: u32,
    pub exclusive: bool,
    /// Wire weight byte (actual weight minus one).
    pub weight: u8,
}

impl H2Priority {
    /// Priority block carrying only a weight, with no dependency.
    pub fn with_weight(weight: u8) -> Self {
        Self {
            dependency: 0,
            exclusive: false,
            weight,
        }
    }
}

/// A typed frame, as decoded from the wire or about to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H2Frame {
    Data {
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
    },
    /// A complete header block (CONTINUATION frames already reassembled).
    Headers {
        stream_id: u32,
        /// HPACK-encoded header block.
        header_block: Vec<u8>,
        end_stream: bool,
        priority: Option<H2Priority>,
        /// Raw flag byte as received. When encoding, bits here are sent in
        /// addition to the flags derived from the other fields.
        flags: u8,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        header_block: Vec<u8>,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
    Settings {
        ack: bool,
        /// (identifier, value) pairs. Empty for ACK frames.
        settings: Vec<(u16, u32)>,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: u32,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
}

impl H2Frame {
    /// Stream the frame is addressed to (0 for connection-level frames).
    pub fn stream_id(&self) -> u32 {
        match self {
            H2Frame::Data { stream_id, .. }
            | H2Frame::Headers { stream_id, .. }
            | H2Frame::PushPromise { stream_id, .. }
            | H2Frame::RstStream { stream_id, .. }
            | H2Frame::WindowUpdate { stream_id, .. } => *stream_id,
            H2Frame::Settings { .. } | H2Frame::Ping { .. } | H2Frame::GoAway { .. } => 0,
        }
    }

    /// Serialize the frame. Header blocks larger than `max_frame_size` are
    /// split across CONTINUATION frames, so the result may hold more than one
    /// wire frame; use [`H2Frame::encode_frames`] to keep them apart.
    pub fn encode(&self, max_frame_size: u32) -> Vec<u8> {
        self.encode_frames(max_frame_size).concat()
    }

    /// Serialize the frame into one buffer per wire frame.
    pub fn encode_frames(&self, max_frame_size: u32) -> Vec<Vec<u8>> {
        match self {
            H2Frame::Data {
                stream_id,
                data,
                end_stream,
            } => vec![H2Codec::create_data_frame(*stream_id, data, *end_stream)],
            H2Frame::Headers {
                stream_id,
                header_block,
                end_stream,
                priority,
                flags,
            } => H2Codec::create_headers_frames(
                *stream_id,
                header_block,
                *end_stream,
                *priority,
                *flags,
                max_frame_size,
            ),
            H2Frame::PushPromise {
                stream_id,
                promised_stream_id,
                header_block,
            } => H2Codec::create_push_promise_frames(
                *stream_id,
                *promised_stream_id,
                header_block,
                max_frame_size,
            ),
            H2Frame::RstStream {
                stream_id,
                error_code,
            } => vec![H2Codec::create_rst_stream(*stream_id, *error_code)],
            H2Frame::Settings { ack: true, .. } => vec![H2Codec::create_settings_ack()],
            H2Frame::Settings {
                ack: false,
                settings,
            } => vec![H2Codec::create_settings(settings)],
            H2Frame::Ping { ack, data } => vec![H2Codec::create_ping(*ack, *data)],
            H2Frame::GoAway {
                last_stream_id,
                error_code,
            } => vec![H2Codec::create_goaway(*last_stream_id, *error_code)],
            H2Frame::WindowUpdate {
                stream_id,
                increment,
            } => vec![H2Codec::create_window_update(*stream_id, *increment)],
        }
    }
}

/// Header block waiting for CONTINUATION frames.
#[derive(Debug)]
struct PendingHeaderBlock {
    stream_id: u32,
    /// `None` for HEADERS, `Some(promised id)` for PUSH_PROMISE.
    promised_stream_id: Option<u32>,
    end_stream: bool,
    priority: Option<H2Priority>,
    flags: u8,
    block: Vec<u8>,
}

/// Incremental frame parser.
///
/// Decoding errors are terminal: after the first one every call to
/// [`H2Codec::process`] returns the same error.
#[derive(Debug)]
pub struct H2Codec {
    /// Buffer for incomplete frames
    buffer: Vec<u8>,
    /// Whether the client preface has been consumed (or ruled out)
    preface_checked: bool,
    preface_received: bool,
    max_frame_size: u32,
    pending_headers: Option<PendingHeaderBlock>,
    failed: Option<CodecError>,
}

impl Default for H2Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl H2Codec {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            preface_checked: false,
            preface_received: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            pending_headers: None,
            failed: None,
        }
    }

    /// Largest frame payload this decoder accepts.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, max: u32) {
        self.max_frame_size = max.clamp(DEFAULT_MAX_FRAME_SIZE, MAX_ALLOWED_FRAME_SIZE);
    }

    /// Whether the input started with the client connection preface.
    pub fn preface_received(&self) -> bool {
        self.preface_received
    }

    /// The error that stopped this codec, if any.
    pub fn error(&self) -> Option<&CodecError> {
        self.failed.as_ref()
    }

    /// Bytes buffered but not yet forming a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed raw bytes and get back every frame they complete.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<H2Frame>, CodecError> {
        let mut frames = Vec::new();
        self.process_into(data, &mut frames)?;
        Ok(frames)
    }

    /// Like [`H2Codec::process`], but appends to `frames`. Frames decoded
    /// before an error are kept in `frames`.
    pub fn process_into(&mut self, data: &[u8], frames: &mut Vec<H2Frame>) -> Result<(), CodecError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        self.buffer.extend_from_slice(data);

        if !self.preface_checked {
            let n = self.buffer.len().min(CONNECTION_PREFACE.len());
            if self.buffer[..n] == CONNECTION_PREFACE[..n] {
                if n < CONNECTION_PREFACE.len() {
                    // Could still be the preface; wait for the rest.
                    return Ok(());
                }
                self.buffer.drain(..CONNECTION_PREFACE.len());
                self.preface_received = true;
            }
            self.preface_checked = true;
        }

        match self.parse_buffered(frames) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.buffer.clear();
                self.pending_headers = None;
                self.failed = Some(err.clone());
                Err(err)
            }
        }
    }

    fn parse_buffered(&mut self, frames: &mut Vec<H2Frame>) -> Result<(), CodecError> {
        loop {
            let header = match H2FrameHeader::parse(&self.buffer) {
                Some(h) => h,
                None => return Ok(()),
            };

            // Reject oversized frames before waiting for their payload.
            if header.length > self.max_frame_size {
                return Err(CodecError::FrameTooLarge {
                    length: header.length,
                    max: self.max_frame_size,
                });
            }

            let total_size = header.total_size();
            if self.buffer.len() < total_size {
                return Ok(());
            }

            // Split the buffer instead of copying the payload out.
            let remainder = self.buffer.split_off(total_size);
            let mut payload = std::mem::replace(&mut self.buffer, remainder);
            payload.drain(..FRAME_HEADER_LEN);

            if let Some(frame) = self.parse_frame(&header, payload)? {
                frames.push(frame);
            }
        }
    }

    /// Parse a single frame and return it if it completes one
    fn parse_frame(&mut self, header: &H2FrameHeader, payload: Vec<u8>) -> Result<Option<H2Frame>, CodecError> {
        if let Some(pending) = &self.pending_headers {
            if header.frame_type != frame_type::CONTINUATION {
                return Err(CodecError::ContinuationExpected {
                    pending: pending.stream_id,
                    frame_type: header.frame_type,
                });
            }
        }

        match header.frame_type {
            frame_type::DATA => {
                let data = Self::strip_padding(header, payload, "DATA")?;
                Ok(Some(H2Frame::Data {
                    stream_id: header.stream_id,
                    data,
                    end_stream: header.is_end_stream(),
                }))
            }
            frame_type::HEADERS => {
                let mut payload = Self::strip_padding(header, payload, "HEADERS")?;
                let priority = if header.flags & flags::PRIORITY != 0 {
                    if payload.len() < 5 {
                        return Err(CodecError::FrameTooShort { frame: "HEADERS" });
                    }
                    let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                    let weight = payload[4];
                    payload.drain(..5);
                    Some(H2Priority {
                        dependency: raw & 0x7FFF_FFFF,
                        exclusive: raw & 0x8000_0000 != 0,
                        weight,
                    })
                } else {
                    None
                };
                self.start_header_block(PendingHeaderBlock {
                    stream_id: header.stream_id,
                    promised_stream_id: None,
                    end_stream: header.is_end_stream(),
                    priority,
                    flags: header.flags,
                    block: payload,
                }, header.is_end_headers())
            }
            frame_type::PUSH_PROMISE => {
                let mut payload = Self::strip_padding(header, payload, "PUSH_PROMISE")?;
                if payload.len() < 4 {
                    return Err(CodecError::FrameTooShort { frame: "PUSH_PROMISE" });
                }
                let promised = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
                payload.drain(..4);
                self.start_header_block(PendingHeaderBlock {
                    stream_id: header.stream_id,
                    promised_stream_id: Some(promised),
                    end_stream: false,
                    priority: None,
                    flags: header.flags,
                    block: payload,
                }, header.is_end_headers())
            }
            frame_type::CONTINUATION => {
                let Some(mut pending) = self.pending_headers.take() else {
                    return Err(CodecError::UnexpectedContinuation(header.stream_id));
                };
                if pending.stream_id != header.stream_id {
                    return Err(CodecError::ContinuationStreamMismatch {
                        got: header.stream_id,
                        pending: pending.stream_id,
                    });
                }
                let new_size = pending.block.len() + payload.len();
                if new_size > MAX_HEADER_BLOCK_SIZE {
                    return Err(CodecError::HeaderBlockTooLarge {
                        size: new_size,
                        max: MAX_HEADER_BLOCK_SIZE,
                    });
                }
                pending.block.extend_from_slice(&payload);
                if header.is_end_headers() {
                    Ok(Some(Self::finish_header_block(pending)))
                } else {
                    self.pending_headers = Some(pending);
                    Ok(None)
                }
            }
            frame_type::RST_STREAM => {
                expect_length("RST_STREAM", &payload, 4)?;
                Ok(Some(H2Frame::RstStream {
                    stream_id: header.stream_id,
                    error_code: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
                }))
            }
            frame_type::SETTINGS => {
                let ack = header.flags & flags::ACK != 0;
                if (ack && !payload.is_empty()) || payload.len() % 6 != 0 {
                    return Err(CodecError::InvalidFrameLength {
                        frame: "SETTINGS",
                        length: payload.len(),
                    });
                }
                let settings = if ack {
                    Vec::new()
                } else {
                    payload
                        .chunks_exact(6)
                        .map(|entry| {
                            let id = u16::from_be_bytes([entry[0], entry[1]]);
                            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
                            (id, value)
                        })
                        .collect()
                };
                Ok(Some(H2Frame::Settings { ack, settings }))
            }
            frame_type::GOAWAY => {
                if payload.len() < 8 {
                    return Err(CodecError::FrameTooShort { frame: "GOAWAY" });
                }
                let last_stream_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
                let error_code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
                Ok(Some(H2Frame::GoAway {
                    last_stream_id,
                    error_code,
                }))
            }
            frame_type::WINDOW_UPDATE => {
                expect_length("WINDOW_UPDATE", &payload, 4)?;
                let increment = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
                Ok(Some(H2Frame::WindowUpdate {
                    stream_id: header.stream_id,
                    increment,
                }))
            }
            frame_type::PING => {
                expect_length("PING", &payload, 8)?;
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload[..8]);
                Ok(Some(H2Frame::Ping {
                    ack: header.flags & flags::ACK != 0,
                    data,
                }))
            }
            // PRIORITY frames only re-weight streams; scheduling uses the
            // priority given at stream creation.
            frame_type::PRIORITY => Ok(None),
            // Unknown frame types must be ignored
            _ => Ok(None),
        }
    }

    fn start_header_block(&mut self, pending: PendingHeaderBlock, end_headers: bool) -> Result<Option<H2Frame>, CodecError> {
        if end_headers {
            return Ok(Some(Self::finish_header_block(pending)));
        }
        if pending.block.len() > MAX_HEADER_BLOCK_SIZE {
            return Err(CodecError::HeaderBlockTooLarge {
                size: pending.block.len(),
                max: MAX_HEADER_BLOCK_SIZE,
            });
        }
        self.pending_headers = Some(pending);
        Ok(None)
    }

    fn finish_header_block(pending: PendingHeaderBlock) -> H2Frame {
        match pending.promised_stream_id {
            Some(promised_stream_id) => H2Frame::PushPromise {
                stream_id: pending.stream_id,
                promised_stream_id,
                header_block: pending.block,
            },
            None => H2Frame::Headers {
                stream_id: pending.stream_id,
                header_block: pending.block,
                end_stream: pending.end_stream,
                priority: pending.priority,
                flags: pending.flags,
            },
        }
    }

    /// Remove the PADDED prefix byte and trailing padding.
    fn strip_padding(header: &H2FrameHeader, mut payload: Vec<u8>, frame: &'static str) -> Result<Vec<u8>, CodecError> {
        if header.flags & flags::PADDED == 0 {
            return Ok(payload);
        }
        if payload.is_empty() {
            return Err(CodecError::FrameTooShort { frame });
        }
        let pad_length = payload[0] as usize;
        if pad_length >= payload.len() {
            return Err(CodecError::InvalidPadding { frame });
        }
        payload.truncate(payload.len() - pad_length);
        payload.remove(0);
        Ok(payload)
    }

    /// Create a DATA frame
    pub fn create_data_frame(stream_id: u32, data: &[u8], end_stream: bool) -> Vec<u8> {
        let flags_byte = if end_stream { flags::END_STREAM } else { 0 };
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + data.len());
        push_frame_header(&mut frame, data.len(), frame_type::DATA, flags_byte, stream_id);
        frame.extend_from_slice(data);
        frame
    }

    /// Create a HEADERS frame followed by as many CONTINUATION frames as the
    /// header block needs to fit in `max_frame_size`.
    pub fn create_headers_frames(
        stream_id: u32,
        header_block: &[u8],
        end_stream: bool,
        priority: Option<H2Priority>,
        extra_flags: u8,
        max_frame_size: u32,
    ) -> Vec<Vec<u8>> {
        let mut prefix = Vec::new();
        let mut flags_byte = extra_flags;
        if end_stream {
            flags_byte |= flags::END_STREAM;
        }
        if let Some(p) = priority {
            flags_byte |= flags::PRIORITY;
            let mut dependency = p.dependency & 0x7FFF_FFFF;
            if p.exclusive {
                dependency |= 0x8000_0000;
            }
            prefix.extend_from_slice(&dependency.to_be_bytes());
            prefix.push(p.weight);
        }
        Self::create_header_block_frames(frame_type::HEADERS, stream_id, flags_byte, &prefix, header_block, max_frame_size)
    }

    /// Create a PUSH_PROMISE frame (plus CONTINUATION frames if needed)
    pub fn create_push_promise_frames(
        stream_id: u32,
        promised_stream_id: u32,
        header_block: &[u8],
        max_frame_size: u32,
    ) -> Vec<Vec<u8>> {
        let prefix = (promised_stream_id & 0x7FFF_FFFF).to_be_bytes();
        Self::create_header_block_frames(frame_type::PUSH_PROMISE, stream_id, 0, &prefix, header_block, max_frame_size)
    }

    fn create_header_block_frames(
        first_type: u8,
        stream_id: u32,
        first_flags: u8,
        prefix: &[u8],
        header_block: &[u8],
        max_frame_size: u32,
    ) -> Vec<Vec<u8>> {
        let max = (max_frame_size as usize).max(prefix.len() + 1);
        let first_len = header_block.len().min(max - prefix.len());
        let (first, mut rest) = header_block.split_at(first_len);

        let mut flags_byte = first_flags & !flags::END_HEADERS;
        if rest.is_empty() {
            flags_byte |= flags::END_HEADERS;
        }
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + prefix.len() + first.len());
        push_frame_header(&mut frame, prefix.len() + first.len(), first_type, flags_byte, stream_id);
        frame.extend_from_slice(prefix);
        frame.extend_from_slice(first);

        let mut frames = vec![frame];
        while !rest.is_empty() {
            let n = rest.len().min(max);
            let (chunk, tail) = rest.split_at(n);
            frames.push(Self::create_continuation_frame(stream_id, chunk, tail.is_empty()));
            rest = tail;
        }
        frames
    }

    /// Create a CONTINUATION frame to continue a header block
    pub fn create_continuation_frame(stream_id: u32, payload: &[u8], end_headers: bool) -> Vec<u8> {
        let flags_byte = if end_headers { flags::END_HEADERS } else { 0 };
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        push_frame_header(&mut frame, payload.len(), frame_type::CONTINUATION, flags_byte, stream_id);
        frame.extend_from_slice(payload);
        frame
    }

    /// Create a RST_STREAM frame
    pub fn create_rst_stream(stream_id: u32, error_code: u32) -> Vec<u8> {
        let mut frame = Vec::with_capacity(13);
        push_frame_header(&mut frame, 4, frame_type::RST_STREAM, 0, stream_id);
        frame.extend_from_slice(&error_code.to_be_bytes());
        frame
    }

    /// Create a GOAWAY frame
    pub fn create_goaway(last_stream_id: u32, error_code: u32) -> Vec<u8> {
        let mut frame = Vec::with_capacity(17);
        push_frame_header(&mut frame, 8, frame_type::GOAWAY, 0, 0);
        frame.extend_from_slice(&(last_stream_id & 0x7FFF_FFFF).to_be_bytes());
        frame.extend_from_slice(&error_code.to_be_bytes());
        frame
    }

    /// Create a SETTINGS ACK frame
    pub fn create_settings_ack() -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN);
        push_frame_header(&mut frame, 0, frame_type::SETTINGS, flags::ACK, 0);
        frame
    }

    /// Create a SETTINGS frame carrying the given (identifier, value) pairs
    pub fn create_settings(settings: &[(u16, u32)]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + settings.len() * 6);
        push_frame_header(&mut frame, settings.len() * 6, frame_type::SETTINGS, 0, 0);
        for (id, value) in settings {
            frame.extend_from_slice(&id.to_be_bytes());
            frame.extend_from_slice(&value.to_be_bytes());
        }
        frame
    }

    /// Create a PING frame (a reply when `ack` is set)
    pub fn create_ping(ack: bool, data: [u8; 8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(17);
        push_frame_header(&mut frame, 8, frame_type::PING, if ack { flags::ACK } else { 0 }, 0);
        frame.extend_from_slice(&data);
        frame
    }

    /// Create a WINDOW_UPDATE frame
    /// stream_id=0 updates connection-level window, otherwise stream-level
    pub fn create_window_update(stream_id: u32, increment: u32) -> Vec<u8> {
        let mut frame = Vec::with_capacity(13);
        push_frame_header(&mut frame, 4, frame_type::WINDOW_UPDATE, 0, stream_id);
        frame.extend_from_slice(&(increment & 0x7FFF_FFFF).to_be_bytes());
        frame
    }
}
