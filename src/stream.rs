//! Per-stream state shared between the session thread and a stream task.
//!
//! The session thread feeds peer frames into a [`Stream`] and applies
//! WINDOW_UPDATE credit; the stream's task reads those frames and sends its
//! reply through a [`StreamHandle`]. Every mutable field sits behind the
//! stream's own mutex. Lock order is stream table, then stream, then output
//! queue.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::{FlowControlError, StreamError};
use crate::flow_control::{DataChunk, RecvWindow, SendWindow};
use crate::h2_codec::{H2Frame, DEFAULT_MAX_FRAME_SIZE};
use crate::hpack::H2Header;
use crate::output::{OutputFrame, OutputQueue};
use crate::session::SessionContext;

/// A frame delivered to a stream task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// The initiating request headers, or trailers.
    Headers {
        headers: Vec<H2Header>,
        end_stream: bool,
    },
    Data {
        data: Vec<u8>,
        end_stream: bool,
    },
}

impl InboundFrame {
    pub fn is_end_stream(&self) -> bool {
        match self {
            InboundFrame::Headers { end_stream, .. } | InboundFrame::Data { end_stream, .. } => *end_stream,
        }
    }
}

#[derive(Debug)]
struct StreamState {
    input: VecDeque<InboundFrame>,
    /// The peer has ended its side; no more input will arrive.
    peer_closed: bool,
    /// `None` when the protocol version has no flow control.
    recv_window: Option<RecvWindow>,
    send_window: SendWindow,
    /// DATA held back by the send window.
    pending: VecDeque<DataChunk>,
    headers_sent: bool,
    /// The handler has sent a frame flagged final.
    final_sent: bool,
    /// That final frame has reached the output queue.
    final_released: bool,
    aborted: bool,
}

/// Everything the session knows about one stream.
#[derive(Debug)]
pub(crate) struct Stream {
    stream_id: u32,
    associated_stream_id: u32,
    priority: u8,
    is_server_push: bool,
    state: Mutex<StreamState>,
    input_ready: Condvar,
    output: Arc<OutputQueue>,
}

pub(crate) struct StreamParams {
    pub stream_id: u32,
    pub associated_stream_id: u32,
    pub priority: u8,
    pub flow_control: bool,
    pub send_window: u32,
    pub recv_window: u32,
}

impl Stream {
    pub(crate) fn new(params: StreamParams, output: Arc<OutputQueue>) -> Self {
        let is_server_push = params.associated_stream_id != 0;
        Self {
            stream_id: params.stream_id,
            associated_stream_id: params.associated_stream_id,
            priority: params.priority,
            is_server_push,
            state: Mutex::new(StreamState {
                input: VecDeque::new(),
                peer_closed: false,
                recv_window: params.flow_control.then(|| RecvWindow::new(params.recv_window)),
                send_window: SendWindow::new(params.send_window, params.flow_control),
                pending: VecDeque::new(),
                headers_sent: false,
                final_sent: false,
                final_released: false,
                aborted: false,
            }),
            input_ready: Condvar::new(),
            output,
        }
    }

    pub(crate) fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub(crate) fn priority(&self) -> u8 {
        self.priority
    }

    /// True until the final frame has been released to the output queue or
    /// the stream is aborted.
    pub(crate) fn is_active(&self) -> bool {
        let state = self.state.lock();
        !(state.final_released || state.aborted)
    }

    pub(crate) fn is_server_push(&self) -> bool {
        self.is_server_push
    }

    pub(crate) fn is_peer_closed(&self) -> bool {
        self.state.lock().peer_closed
    }

    pub(crate) fn has_sent_final(&self) -> bool {
        self.state.lock().final_sent
    }

    /// Queue headers (initial request, pushed request, or trailers).
    pub(crate) fn push_headers(&self, headers: Vec<H2Header>, end_stream: bool) {
        let mut state = self.state.lock();
        if state.aborted {
            return;
        }
        state.peer_closed |= end_stream;
        state.input.push_back(InboundFrame::Headers { headers, end_stream });
        self.input_ready.notify_all();
    }

    /// Queue received DATA, charging it against the receive window.
    pub(crate) fn push_data(&self, data: Vec<u8>, end_stream: bool) -> Result<(), FlowControlError> {
        let mut state = self.state.lock();
        if state.aborted {
            return Ok(());
        }
        if let Some(window) = state.recv_window.as_mut() {
            window.consume(data.len())?;
        }
        state.peer_closed |= end_stream;
        state.input.push_back(InboundFrame::Data { data, end_stream });
        self.input_ready.notify_all();
        Ok(())
    }

    /// Apply WINDOW_UPDATE credit and release whatever DATA now fits.
    pub(crate) fn increase_send_window(&self, increment: u32) -> Result<(), FlowControlError> {
        let mut state = self.state.lock();
        if state.aborted {
            return Ok(());
        }
        state.send_window.replenish(increment)?;
        trace!(stream_id = self.stream_id, window = state.send_window.window(), "send window increased");
        self.release_pending(&mut state);
        Ok(())
    }

    /// Tear the stream down without telling the peer. Wakes a blocked reader.
    pub(crate) fn abort(&self) {
        let mut state = self.state.lock();
        if !state.aborted {
            state.aborted = true;
            state.pending.clear();
            self.input_ready.notify_all();
        }
    }

    /// Abort the stream and queue RST_STREAM, unless it already completed.
    pub(crate) fn reset(&self, code: u32) {
        let mut state = self.state.lock();
        if state.aborted || state.final_released {
            return;
        }
        state.aborted = true;
        state.pending.clear();
        self.input_ready.notify_all();
        debug!(stream_id = self.stream_id, error_code = code, "resetting stream");
        self.output.push(
            OutputFrame::Frame(H2Frame::RstStream {
                stream_id: self.stream_id,
                error_code: code,
            }),
            self.priority,
        );
    }

    /// Runs `promise` under the stream lock so a PUSH_PROMISE is queued
    /// before this stream's final frame.
    pub(crate) fn with_push_promise<T>(
        &self,
        promise: impl FnOnce() -> Result<T, StreamError>,
    ) -> Result<T, StreamError> {
        let state = self.state.lock();
        if state.aborted {
            return Err(StreamError::Aborted);
        }
        if state.final_sent {
            return Err(StreamError::PushRefused);
        }
        promise()
    }

    fn release_pending(&self, state: &mut StreamState) {
        for chunk in state.send_window.take_releasable(&mut state.pending) {
            if chunk.end_stream {
                state.final_released = true;
            }
            self.output.push(
                OutputFrame::Frame(H2Frame::Data {
                    stream_id: self.stream_id,
                    data: chunk.data,
                    end_stream: chunk.end_stream,
                }),
                self.priority,
            );
        }
    }

    fn next_input(&self, block: bool) -> Option<InboundFrame> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return None;
            }
            if let Some(frame) = state.input.pop_front() {
                if let InboundFrame::Data { data, .. } = &frame {
                    let len = data.len();
                    let peer_closed = state.peer_closed;
                    if let Some(increment) = state.recv_window.as_mut().and_then(|w| w.credit(len)) {
                        // No point crediting a peer that won't send more.
                        if !peer_closed {
                            self.output.push(
                                OutputFrame::Frame(H2Frame::WindowUpdate {
                                    stream_id: self.stream_id,
                                    increment,
                                }),
                                self.priority,
                            );
                        }
                    }
                }
                return Some(frame);
            }
            if state.peer_closed || !block {
                return None;
            }
            self.input_ready.wait(&mut state);
        }
    }

    fn send_headers(&self, headers: Vec<H2Header>, end_stream: bool) -> Result<(), StreamError> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(StreamError::Aborted);
        }
        if state.final_sent {
            return Err(StreamError::AlreadyFinished);
        }
        if state.headers_sent {
            return Err(StreamError::HeadersAlreadySent);
        }
        state.headers_sent = true;
        if end_stream {
            state.final_sent = true;
            state.final_released = true;
        }
        self.output.push(
            OutputFrame::Headers {
                stream_id: self.stream_id,
                headers,
                end_stream,
                priority: None,
            },
            self.priority,
        );
        Ok(())
    }

    fn send_data(&self, data: &[u8], end_stream: bool, max_frame_size: usize) -> Result<(), StreamError> {
        let mut state = self.state.lock();
        if state.aborted {
            return Err(StreamError::Aborted);
        }
        if state.final_sent {
            return Err(StreamError::AlreadyFinished);
        }
        if !state.headers_sent {
            return Err(StreamError::HeadersNotSent);
        }
        if data.is_empty() {
            state.pending.push_back(DataChunk::new(Vec::new(), end_stream));
        } else {
            let mut chunks = data.chunks(max_frame_size.max(1)).peekable();
            while let Some(chunk) = chunks.next() {
                let last = chunks.peek().is_none();
                state.pending.push_back(DataChunk::new(chunk, end_stream && last));
            }
        }
        state.final_sent |= end_stream;
        self.release_pending(&mut state);
        Ok(())
    }
}

/// A stream task's view of its stream.
///
/// Handles stay valid after the stream completes or the session stops; every
/// send then fails with [`StreamError::Aborted`] or
/// [`StreamError::AlreadyFinished`] and reads return `None`.
#[derive(Debug)]
pub struct StreamHandle {
    stream: Arc<Stream>,
    session: Weak<SessionContext>,
}

impl StreamHandle {
    pub(crate) fn new(stream: Arc<Stream>, session: Weak<SessionContext>) -> Self {
        Self { stream, session }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream.stream_id
    }

    /// The peer-initiated stream a pushed stream belongs to; 0 otherwise.
    pub fn associated_stream_id(&self) -> u32 {
        self.stream.associated_stream_id
    }

    /// Scheduling priority, 0 most urgent.
    pub fn priority(&self) -> u8 {
        self.stream.priority
    }

    pub fn is_server_push(&self) -> bool {
        self.stream.is_server_push
    }

    /// Take the next frame the peer sent on this stream.
    ///
    /// With `block` set, waits until a frame arrives. Returns `None` once the
    /// peer has ended its side and everything was read, or the stream was
    /// aborted. For a pushed stream the first frame is the promised request.
    pub fn get_input_frame(&self, block: bool) -> Option<InboundFrame> {
        self.stream.next_input(block)
    }

    /// Send the reply (or pushed response) headers. Exactly once, before any
    /// DATA.
    pub fn send_headers(&self, headers: Vec<H2Header>, end_stream: bool) -> Result<(), StreamError> {
        self.stream.send_headers(headers, end_stream)
    }

    /// Send response body bytes. Large payloads are split at the peer's
    /// maximum frame size, and the send window may hold part of it back
    /// until the peer grants credit.
    pub fn send_data(&self, data: &[u8], end_stream: bool) -> Result<(), StreamError> {
        let max_frame_size = self
            .session
            .upgrade()
            .map(|s| s.peer_max_frame_size())
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE);
        self.stream.send_data(data, end_stream, max_frame_size as usize)
    }

    /// Promise `request_headers` to the peer and start a pushed stream for
    /// them, associated with this stream. Returns the pushed stream's id.
    pub fn start_server_push(&self, request_headers: Vec<H2Header>, priority: u8) -> Result<u32, StreamError> {
        if self.stream.is_server_push {
            return Err(StreamError::NotPushCapable);
        }
        let session = self.session.upgrade().ok_or(StreamError::Aborted)?;
        session.start_server_push(&self.stream, request_headers, priority)
    }
}
