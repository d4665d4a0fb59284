//! The per-connection session: control loop, frame dispatch and shutdown.
//!
//! A [`Session`] owns one connection. Its [`Session::run`] loop reads and
//! dispatches peer frames, hands new streams to an [`Executor`], and writes
//! whatever the streams queue, until the connection is done with. Stream
//! tasks run elsewhere and reach the session only through their
//! [`StreamHandle`] and the shared output queue.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, debug_span, error, trace, warn};

use crate::config::{
    priority_from_weight, PeerSettings, ProtocolVersion, SessionConfig, LOWEST_PRIORITY,
};
use crate::error::StreamError;
use crate::executor::{Executor, Task};
use crate::h2_codec::{error_code, flags, H2Codec, H2Frame, H2Priority};
use crate::hpack::{H2Header, HpackDecoder, HpackEncoder};
use crate::io::{FrameDecoder, ReadStatus, SessionIo, WriteStatus};
use crate::output::{OutputFrame, OutputQueue};
use crate::stream::{Stream, StreamHandle, StreamParams};

/// Largest stream identifier (31 bits).
const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Builds the handler for each new stream.
pub trait StreamTaskFactory: Send + Sync {
    /// Called once per stream, peer-initiated or pushed, on the thread that
    /// created the stream.
    fn new_stream_task(&self, stream: StreamHandle) -> Box<dyn Task>;
}

/// Why [`Session::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The initial SETTINGS frame could not be written.
    InitialWriteFailed,
    /// The transport reported the peer gone.
    PeerGone,
    /// Writing a frame failed.
    WriteFailed,
    /// GOAWAY was sent and every stream finished.
    Finished,
}

#[derive(Debug)]
struct PushState {
    peer_enable_push: bool,
    goaway_received: bool,
    next_stream_id: u32,
}

/// State shared between the session thread and stream handles.
pub(crate) struct SessionContext {
    version: ProtocolVersion,
    output: Arc<OutputQueue>,
    streams: Mutex<HashMap<u32, Arc<Stream>>>,
    executor: Arc<dyn Executor>,
    factory: Arc<dyn StreamTaskFactory>,
    push: Mutex<PushState>,
    peer_max_frame_size: AtomicU32,
    peer_initial_window: AtomicU32,
    local_initial_window: u32,
    /// Set once GOAWAY is sent or the session stops.
    draining: AtomicBool,
    this: Weak<SessionContext>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("version", &self.version)
            .field("streams", &self.streams.lock().len())
            .field("draining", &self.draining.load(Ordering::Relaxed))
            .finish()
    }
}

impl SessionContext {
    pub(crate) fn peer_max_frame_size(&self) -> u32 {
        self.peer_max_frame_size.load(Ordering::Relaxed)
    }

    fn new_stream(&self, stream_id: u32, associated_stream_id: u32, priority: u8) -> Arc<Stream> {
        Arc::new(Stream::new(
            StreamParams {
                stream_id,
                associated_stream_id,
                priority,
                flow_control: self.version.supports_flow_control(),
                send_window: self.peer_initial_window.load(Ordering::Relaxed),
                recv_window: self.local_initial_window,
            },
            self.output.clone(),
        ))
    }

    /// Build the stream's task and submit it. Must be called with no locks
    /// held: an inline executor runs the task right here.
    fn spawn_stream_task(&self, stream: Arc<Stream>) {
        let handle = StreamHandle::new(stream.clone(), self.this.clone());
        let task = self.factory.new_stream_task(handle);
        let priority = stream.priority();
        self.executor.add_task(Box::new(StreamTaskWrapper { task, stream }), priority);
    }

    pub(crate) fn start_server_push(
        &self,
        associated: &Arc<Stream>,
        request_headers: Vec<H2Header>,
        priority: u8,
    ) -> Result<u32, StreamError> {
        if self.draining.load(Ordering::Acquire) {
            return Err(StreamError::PushRefused);
        }

        let pushed = {
            let mut streams = self.streams.lock();
            associated.with_push_promise(|| {
                let mut push = self.push.lock();
                if !push.peer_enable_push || push.goaway_received || self.draining.load(Ordering::Acquire) {
                    return Err(StreamError::PushRefused);
                }
                if push.next_stream_id > MAX_STREAM_ID {
                    return Err(StreamError::PushRefused);
                }
                let stream_id = push.next_stream_id;
                push.next_stream_id += 2;

                let promise = OutputFrame::PushPromise {
                    stream_id: associated.stream_id(),
                    promised_stream_id: stream_id,
                    headers: request_headers.clone(),
                };
                if !self.output.push(promise, associated.priority()) {
                    return Err(StreamError::Aborted);
                }

                let stream = self.new_stream(stream_id, associated.stream_id(), priority.min(LOWEST_PRIORITY));
                // The promised request is the pushed stream's only input.
                stream.push_headers(request_headers, true);
                streams.insert(stream_id, stream.clone());
                Ok(stream)
            })?
        };

        let stream_id = pushed.stream_id();
        debug!(
            stream_id,
            associated_stream_id = associated.stream_id(),
            priority = pushed.priority(),
            "server push started"
        );
        self.spawn_stream_task(pushed);
        Ok(stream_id)
    }
}

/// Runs a stream task and cleans up after it.
///
/// A task that panics or returns without sending a final frame gets its
/// stream reset with INTERNAL_ERROR; a cancelled task aborts its stream.
struct StreamTaskWrapper {
    task: Box<dyn Task>,
    stream: Arc<Stream>,
}

impl Task for StreamTaskWrapper {
    fn run(self: Box<Self>) {
        let StreamTaskWrapper { task, stream } = *self;
        let stream_id = stream.stream_id();

        if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
            error!(stream_id, "stream task panicked");
            stream.reset(error_code::INTERNAL_ERROR);
            return;
        }
        if stream.is_active() && !stream.has_sent_final() {
            warn!(stream_id, "stream task returned without finishing the stream");
            stream.reset(error_code::INTERNAL_ERROR);
        }
    }

    fn cancel(self: Box<Self>) {
        let StreamTaskWrapper { task, stream } = *self;
        trace!(stream_id = stream.stream_id(), "stream task cancelled");
        task.cancel();
        stream.abort();
    }
}

/// One connection's session.
pub struct Session<I: SessionIo> {
    io: I,
    ctx: Arc<SessionContext>,
    config: SessionConfig,
    decoder: FrameDecoder,
    hpack_decoder: HpackDecoder,
    hpack_encoder: HpackEncoder,
    peer_settings: PeerSettings,
    /// Highest stream id the peer has opened (or tried to).
    last_peer_stream_id: u32,
    goaway_sent: bool,
    stop_reason: Option<StopReason>,
}

impl<I: SessionIo> std::fmt::Debug for Session<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("ctx", &self.ctx)
            .field("last_peer_stream_id", &self.last_peer_stream_id)
            .field("goaway_sent", &self.goaway_sent)
            .field("stop_reason", &self.stop_reason)
            .finish()
    }
}

impl<I: SessionIo> Session<I> {
    pub fn new(
        version: ProtocolVersion,
        config: SessionConfig,
        io: I,
        factory: Arc<dyn StreamTaskFactory>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let peer_settings = PeerSettings::default();
        let ctx = Arc::new_cyclic(|this| SessionContext {
            version,
            output: Arc::new(OutputQueue::new()),
            streams: Mutex::new(HashMap::new()),
            executor,
            factory,
            push: Mutex::new(PushState {
                peer_enable_push: peer_settings.enable_push,
                goaway_received: false,
                next_stream_id: 2,
            }),
            peer_max_frame_size: AtomicU32::new(peer_settings.max_frame_size),
            peer_initial_window: AtomicU32::new(peer_settings.initial_window_size),
            local_initial_window: config.initial_window_size,
            draining: AtomicBool::new(false),
            this: this.clone(),
        });

        let mut decoder = FrameDecoder::new();
        decoder.set_max_frame_size(config.max_frame_size);

        Self {
            io,
            ctx,
            config,
            decoder,
            hpack_decoder: HpackDecoder::new(),
            hpack_encoder: HpackEncoder::new(),
            peer_settings,
            last_peer_stream_id: 0,
            goaway_sent: false,
            stop_reason: None,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.ctx.version
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    pub fn into_io(self) -> I {
        self.io
    }

    pub fn is_goaway_sent(&self) -> bool {
        self.goaway_sent
    }

    /// Streams that have not finished yet.
    pub fn active_stream_count(&self) -> usize {
        self.ctx.streams.lock().values().filter(|s| s.is_active()).count()
    }

    /// Active streams the peer opened; pushed streams don't count against
    /// `max_concurrent_streams`.
    fn peer_stream_count(&self) -> usize {
        self.ctx
            .streams
            .lock()
            .values()
            .filter(|s| s.is_active() && !s.is_server_push())
            .count()
    }

    /// Drive the connection until it is finished. Streams still running are
    /// aborted and the executor is stopped before this returns.
    pub fn run(&mut self) -> StopReason {
        if let Some(reason) = self.stop_reason {
            return reason;
        }
        let span = debug_span!("h2_session", version = ?self.ctx.version);
        let _enter = span.enter();

        let reason = self.run_loop();
        self.shutdown();
        debug!(?reason, "session stopped");
        self.stop_reason = Some(reason);
        reason
    }

    fn run_loop(&mut self) -> StopReason {
        let params = self.config.settings_frame_params(self.ctx.version);
        if self.io.write_frame(&H2Codec::create_settings(&params)) != WriteStatus::Success {
            warn!("failed to write initial SETTINGS");
            return StopReason::InitialWriteFailed;
        }

        loop {
            if self.io.is_peer_gone() {
                debug!("peer gone");
                return StopReason::PeerGone;
            }

            self.prune_streams();
            let idle = self.is_idle();
            if idle && self.goaway_sent {
                return StopReason::Finished;
            }

            match self.io.read_more(idle, &mut self.decoder) {
                ReadStatus::Success => self.dispatch_decoded(),
                ReadStatus::Error => {
                    self.dispatch_decoded();
                    if !self.goaway_sent {
                        warn!(error = ?self.decoder.error(), "undecodable input");
                    }
                    self.send_goaway(error_code::PROTOCOL_ERROR);
                }
                ReadStatus::ConnectionClosed => {
                    self.dispatch_decoded();
                    self.prune_streams();
                    if self.is_idle() {
                        self.send_goaway(error_code::NO_ERROR);
                    }
                }
            }

            if !self.flush_output() {
                return StopReason::WriteFailed;
            }

            self.prune_streams();
            if self.goaway_sent && self.is_idle() {
                return StopReason::Finished;
            }
        }
    }

    fn shutdown(&mut self) {
        self.ctx.draining.store(true, Ordering::Release);
        self.ctx.output.close();
        let streams: Vec<Arc<Stream>> = self.ctx.streams.lock().drain().map(|(_, s)| s).collect();
        for stream in &streams {
            stream.abort();
        }
        if !streams.is_empty() {
            debug!(aborted = streams.len(), "aborted unfinished streams");
        }
        self.ctx.executor.stop();
    }

    fn is_idle(&self) -> bool {
        let no_streams = !self.ctx.streams.lock().values().any(|s| s.is_active());
        no_streams && self.ctx.output.is_empty()
    }

    fn prune_streams(&self) {
        self.ctx.streams.lock().retain(|&stream_id, stream| {
            let active = stream.is_active();
            if !active {
                debug!(stream_id, "stream finished");
            }
            active
        });
    }

    fn active_stream(&self, stream_id: u32) -> Option<Arc<Stream>> {
        self.ctx
            .streams
            .lock()
            .get(&stream_id)
            .filter(|s| s.is_active())
            .cloned()
    }

    fn send_goaway(&mut self, code: u32) {
        if self.goaway_sent {
            return;
        }
        self.goaway_sent = true;
        self.ctx.draining.store(true, Ordering::Release);
        debug!(
            last_stream_id = self.last_peer_stream_id,
            error_code = code,
            "sending GOAWAY"
        );
        self.ctx.output.push(
            OutputFrame::Frame(H2Frame::GoAway {
                last_stream_id: self.last_peer_stream_id,
                error_code: code,
            }),
            0,
        );
    }

    fn protocol_error(&mut self, reason: &str, stream_id: u32) {
        warn!(stream_id, reason, "protocol error");
        self.send_goaway(error_code::PROTOCOL_ERROR);
    }

    /// Write everything queued. Returns false if a write failed.
    fn flush_output(&mut self) -> bool {
        while let Some(frame) = self.ctx.output.pop() {
            for bytes in self.encode_output(frame) {
                if self.io.write_frame(&bytes) != WriteStatus::Success {
                    warn!("write failed, dropping remaining output");
                    return false;
                }
            }
        }
        true
    }

    fn encode_output(&mut self, frame: OutputFrame) -> Vec<Vec<u8>> {
        let max_frame_size = self.peer_settings.max_frame_size;
        match frame {
            OutputFrame::Frame(frame) => {
                trace!(?frame, "writing frame");
                frame.encode_frames(max_frame_size)
            }
            OutputFrame::Headers {
                stream_id,
                headers,
                end_stream,
                priority,
            } => {
                trace!(stream_id, end_stream, "writing HEADERS");
                let block = self.hpack_encoder.encode(&headers);
                H2Codec::create_headers_frames(stream_id, &block, end_stream, priority, 0, max_frame_size)
            }
            OutputFrame::PushPromise {
                stream_id,
                promised_stream_id,
                headers,
            } => {
                trace!(stream_id, promised_stream_id, "writing PUSH_PROMISE");
                let block = self.hpack_encoder.encode(&headers);
                H2Codec::create_push_promise_frames(stream_id, promised_stream_id, &block, max_frame_size)
            }
        }
    }

    fn dispatch_decoded(&mut self) {
        while let Some(frame) = self.decoder.next_frame() {
            self.dispatch(frame);
        }
    }

    fn dispatch(&mut self, frame: H2Frame) {
        trace!(?frame, "received frame");
        match frame {
            H2Frame::Ping { ack: false, data } => {
                self.ctx
                    .output
                    .push(OutputFrame::Frame(H2Frame::Ping { ack: true, data }), 0);
            }
            H2Frame::Ping { ack: true, .. } | H2Frame::Settings { ack: true, .. } => {}
            H2Frame::Settings { ack: false, settings } => self.on_settings(&settings),
            H2Frame::Headers {
                stream_id,
                header_block,
                end_stream,
                priority,
                flags,
            } => self.on_headers(stream_id, &header_block, end_stream, priority, flags),
            H2Frame::Data {
                stream_id,
                data,
                end_stream,
            } => self.on_data(stream_id, data, end_stream),
            H2Frame::WindowUpdate { stream_id, increment } => self.on_window_update(stream_id, increment),
            H2Frame::RstStream { stream_id, error_code } => {
                debug!(stream_id, error_code, "stream reset by peer");
                if let Some(stream) = self.ctx.streams.lock().get(&stream_id) {
                    stream.abort();
                }
            }
            H2Frame::GoAway {
                last_stream_id,
                error_code,
            } => {
                debug!(last_stream_id, error_code, "peer sent GOAWAY");
                self.ctx.push.lock().goaway_received = true;
            }
            H2Frame::PushPromise { stream_id, .. } => {
                self.protocol_error("PUSH_PROMISE from client", stream_id);
            }
        }
    }

    fn on_settings(&mut self, settings: &[(u16, u32)]) {
        let mut updated = self.peer_settings.clone();
        for &(id, value) in settings {
            if let Err(err) = updated.apply(self.ctx.version, id, value) {
                warn!(%err, "rejecting SETTINGS");
                self.send_goaway(error_code::PROTOCOL_ERROR);
                return;
            }
        }

        self.ctx
            .peer_initial_window
            .store(updated.initial_window_size, Ordering::Relaxed);
        self.ctx
            .peer_max_frame_size
            .store(updated.max_frame_size, Ordering::Relaxed);
        self.ctx.push.lock().peer_enable_push = updated.enable_push;
        self.peer_settings = updated;

        self.ctx
            .output
            .push(OutputFrame::Frame(H2Frame::Settings { ack: true, settings: Vec::new() }), 0);
    }

    fn on_headers(
        &mut self,
        stream_id: u32,
        header_block: &[u8],
        end_stream: bool,
        priority: Option<H2Priority>,
        frame_flags: u8,
    ) {
        // Decode even if the frame gets rejected; the decoder's dynamic table
        // must see every header block.
        let decoded = self.hpack_decoder.decode(header_block);

        let existing = self.ctx.streams.lock().get(&stream_id).cloned();
        if let Some(stream) = existing {
            // Only a final HEADERS on a live stream counts as trailers.
            if !end_stream || !stream.is_active() || stream.is_peer_closed() {
                self.protocol_error("duplicate stream id", stream_id);
                return;
            }
            match decoded {
                Ok(headers) => stream.push_headers(headers, end_stream),
                Err(err) => {
                    warn!(stream_id, %err, "bad trailers");
                    self.send_goaway(error_code::PROTOCOL_ERROR);
                }
            }
            return;
        }

        if self.goaway_sent {
            debug!(stream_id, "ignoring new stream after GOAWAY");
            return;
        }
        if stream_id == 0 || stream_id % 2 == 0 {
            self.protocol_error("invalid stream id", stream_id);
            return;
        }
        if stream_id <= self.last_peer_stream_id {
            self.protocol_error("stream id reused", stream_id);
            return;
        }
        if frame_flags & !flags::HEADERS_ALLOWED != 0 {
            self.protocol_error("invalid HEADERS flags", stream_id);
            return;
        }
        let headers = match decoded {
            Ok(headers) => headers,
            Err(err) => {
                warn!(stream_id, %err, "header block failed to decode");
                self.send_goaway(error_code::PROTOCOL_ERROR);
                return;
            }
        };
        self.last_peer_stream_id = stream_id;

        let priority = priority
            .map(|p| priority_from_weight(p.weight))
            .unwrap_or(LOWEST_PRIORITY);

        if self.peer_stream_count() >= self.config.max_concurrent_streams as usize {
            debug!(stream_id, "refusing stream over the concurrency limit");
            self.ctx.output.push(
                OutputFrame::Frame(H2Frame::RstStream {
                    stream_id,
                    error_code: error_code::REFUSED_STREAM,
                }),
                priority,
            );
            return;
        }

        let stream = self.ctx.new_stream(stream_id, 0, priority);
        stream.push_headers(headers, end_stream);
        self.ctx.streams.lock().insert(stream_id, stream.clone());
        debug!(stream_id, priority, "stream opened");
        self.ctx.spawn_stream_task(stream);
    }

    fn on_data(&mut self, stream_id: u32, data: Vec<u8>, end_stream: bool) {
        let Some(stream) = self.active_stream(stream_id) else {
            self.protocol_error("DATA for unknown or finished stream", stream_id);
            return;
        };
        if stream.is_peer_closed() {
            warn!(stream_id, "DATA after the peer ended the stream");
            stream.reset(error_code::STREAM_CLOSED);
            return;
        }
        if let Err(err) = stream.push_data(data, end_stream) {
            warn!(stream_id, %err, "flow control violation");
            stream.reset(error_code::FLOW_CONTROL_ERROR);
        }
    }

    fn on_window_update(&mut self, stream_id: u32, increment: u32) {
        if !self.ctx.version.supports_flow_control() {
            self.protocol_error("WINDOW_UPDATE without flow control", stream_id);
            return;
        }
        if stream_id == 0 {
            return;
        }
        if increment == 0 {
            self.protocol_error("WINDOW_UPDATE with zero increment", stream_id);
            return;
        }
        let Some(stream) = self.active_stream(stream_id) else {
            trace!(stream_id, "WINDOW_UPDATE for finished stream ignored");
            return;
        };
        if let Err(err) = stream.increase_send_window(increment) {
            warn!(stream_id, %err, "flow control violation");
            stream.reset(error_code::FLOW_CONTROL_ERROR);
        }
    }
}
