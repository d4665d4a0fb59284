//! Test doubles: a scripted connection, a recording task factory and a peer
//! that builds request frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use h2_session::config::weight_from_priority;
use h2_session::{
    find_header, FrameDecoder, H2Codec, H2Frame, H2Header, H2Priority, HpackDecoder, HpackEncoder,
    InboundFrame, ReadStatus, SessionIo, StreamHandle, StreamTaskFactory, Task, WriteStatus,
};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A frame the session wrote, with its header block already decoded.
#[derive(Debug, Clone)]
pub struct Written {
    pub frame: H2Frame,
    pub headers: Vec<H2Header>,
}

impl Written {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// [`SessionIo`] fed from a list of byte chunks, one chunk per read.
/// Once the chunks run out the connection reads as closed.
pub struct ScriptedIo {
    input: VecDeque<Vec<u8>>,
    written: Vec<Written>,
    codec: H2Codec,
    hpack: HpackDecoder,
    writes: usize,
    fail_writes_after: Option<usize>,
    peer_gone_polls: usize,
    peer_gone_after: Option<usize>,
    echo_window_updates: bool,
    on_poll: Option<Box<dyn FnMut()>>,
}

impl ScriptedIo {
    pub fn new() -> Self {
        let mut codec = H2Codec::new();
        codec.set_max_frame_size(16_777_215);
        Self {
            input: VecDeque::new(),
            written: Vec::new(),
            codec,
            hpack: HpackDecoder::new(),
            writes: 0,
            fail_writes_after: None,
            peer_gone_polls: 0,
            peer_gone_after: None,
            echo_window_updates: false,
            on_poll: None,
        }
    }

    pub fn push_input(mut self, chunk: Vec<u8>) -> Self {
        self.input.push_back(chunk);
        self
    }

    /// Writes after the first `n` report the peer gone.
    pub fn fail_writes_after(mut self, n: usize) -> Self {
        self.fail_writes_after = Some(n);
        self
    }

    /// `is_peer_gone` answers true from its `n + 1`th call on.
    pub fn peer_gone_after(mut self, n: usize) -> Self {
        self.peer_gone_after = Some(n);
        self
    }

    /// Answer every written DATA frame with a WINDOW_UPDATE for its length.
    pub fn echo_window_updates(mut self) -> Self {
        self.echo_window_updates = true;
        self
    }

    /// Run `f` at the top of every loop iteration.
    pub fn on_poll(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_poll = Some(Box::new(f));
        self
    }

    pub fn written(&self) -> &[Written] {
        &self.written
    }

    pub fn frames(&self) -> Vec<H2Frame> {
        self.written.iter().map(|w| w.frame.clone()).collect()
    }

    /// DATA payloads written for `stream_id`, with their END_STREAM flags.
    pub fn data_for(&self, stream_id: u32) -> Vec<(Vec<u8>, bool)> {
        self.written
            .iter()
            .filter_map(|w| match &w.frame {
                H2Frame::Data { stream_id: id, data, end_stream } if *id == stream_id => {
                    Some((data.clone(), *end_stream))
                }
                _ => None,
            })
            .collect()
    }

    pub fn goaways(&self) -> Vec<(u32, u32)> {
        self.written
            .iter()
            .filter_map(|w| match w.frame {
                H2Frame::GoAway { last_stream_id, error_code } => Some((last_stream_id, error_code)),
                _ => None,
            })
            .collect()
    }

    pub fn resets(&self) -> Vec<(u32, u32)> {
        self.written
            .iter()
            .filter_map(|w| match w.frame {
                H2Frame::RstStream { stream_id, error_code } => Some((stream_id, error_code)),
                _ => None,
            })
            .collect()
    }
}

impl SessionIo for ScriptedIo {
    fn is_peer_gone(&mut self) -> bool {
        if let Some(f) = self.on_poll.as_mut() {
            f();
        }
        let polls = self.peer_gone_polls;
        self.peer_gone_polls += 1;
        matches!(self.peer_gone_after, Some(n) if polls >= n)
    }

    fn read_more(&mut self, block: bool, decoder: &mut FrameDecoder) -> ReadStatus {
        match self.input.pop_front() {
            Some(chunk) => {
                if decoder.process_input(&chunk) {
                    ReadStatus::Success
                } else {
                    ReadStatus::Error
                }
            }
            None => {
                if !block {
                    // Streams are still busy on other threads.
                    std::thread::sleep(Duration::from_millis(1));
                }
                ReadStatus::ConnectionClosed
            }
        }
    }

    fn write_frame(&mut self, bytes: &[u8]) -> WriteStatus {
        if matches!(self.fail_writes_after, Some(n) if self.writes >= n) {
            return WriteStatus::ConnectionClosed;
        }
        self.writes += 1;

        let frames = self.codec.process(bytes).expect("session wrote an undecodable frame");
        for frame in frames {
            let headers = match &frame {
                H2Frame::Headers { header_block, .. } | H2Frame::PushPromise { header_block, .. } => self
                    .hpack
                    .decode(header_block)
                    .expect("session wrote an undecodable header block"),
                _ => Vec::new(),
            };
            if self.echo_window_updates {
                if let H2Frame::Data { stream_id, data, .. } = &frame {
                    if !data.is_empty() {
                        self.input
                            .push_back(H2Codec::create_window_update(*stream_id, data.len() as u32));
                    }
                }
            }
            self.written.push(Written { frame, headers });
        }
        WriteStatus::Success
    }
}

/// Builds client frames, keeping one HPACK encoder for the connection.
pub struct Peer {
    encoder: HpackEncoder,
}

impl Peer {
    pub fn new() -> Self {
        Self {
            encoder: HpackEncoder::new(),
        }
    }

    pub fn request_headers(path: &str) -> Vec<H2Header> {
        vec![
            H2Header::new(":method", "GET"),
            H2Header::new(":scheme", "https"),
            H2Header::new(":authority", "example.com"),
            H2Header::new(":path", path),
        ]
    }

    /// A GET request opening `stream_id`, optionally at an explicit priority.
    pub fn request(&mut self, stream_id: u32, end_stream: bool, priority: Option<u8>) -> Vec<u8> {
        self.request_with_flags(stream_id, end_stream, priority, 0)
    }

    pub fn request_with_flags(&mut self, stream_id: u32, end_stream: bool, priority: Option<u8>, extra_flags: u8) -> Vec<u8> {
        let header_block = self.encoder.encode(&Self::request_headers("/index.html"));
        H2Frame::Headers {
            stream_id,
            header_block,
            end_stream,
            priority: priority.map(|p| H2Priority::with_weight(weight_from_priority(p))),
            flags: extra_flags,
        }
        .encode(16_384)
    }

    pub fn trailers(&mut self, stream_id: u32) -> Vec<u8> {
        let header_block = self.encoder.encode(&[H2Header::new("x-checksum", "abc")]);
        H2Frame::Headers {
            stream_id,
            header_block,
            end_stream: true,
            priority: None,
            flags: 0,
        }
        .encode(16_384)
    }
}

type Handler = dyn Fn(StreamHandle) + Send + Sync;

/// Records every stream it is asked for and runs `handler` as its task.
pub struct RecordingFactory {
    created: Mutex<Vec<(u32, u32, u8)>>,
    cancelled: Arc<AtomicUsize>,
    handler: Arc<Handler>,
}

impl RecordingFactory {
    pub fn new(handler: impl Fn(StreamHandle) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            created: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicUsize::new(0)),
            handler: Arc::new(handler),
        })
    }

    /// Every stream gets [`fake_reply`].
    pub fn fake_replies() -> Arc<Self> {
        Self::new(fake_reply)
    }

    /// (stream_id, associated_stream_id, priority) per created task.
    pub fn created(&self) -> Vec<(u32, u32, u8)> {
        self.created.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl StreamTaskFactory for RecordingFactory {
    fn new_stream_task(&self, stream: StreamHandle) -> Box<dyn Task> {
        self.created.lock().unwrap().push((
            stream.stream_id(),
            stream.associated_stream_id(),
            stream.priority(),
        ));
        Box::new(HandlerTask {
            stream,
            handler: self.handler.clone(),
            cancelled: self.cancelled.clone(),
        })
    }
}

struct HandlerTask {
    stream: StreamHandle,
    handler: Arc<Handler>,
    cancelled: Arc<AtomicUsize>,
}

impl Task for HandlerTask {
    fn run(self: Box<Self>) {
        (self.handler)(self.stream)
    }

    fn cancel(self: Box<Self>) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reads the request, then replies with headers, "foobar" and "quux".
pub fn fake_reply(stream: StreamHandle) {
    match stream.get_input_frame(false) {
        Some(InboundFrame::Headers { .. }) => {}
        other => panic!("expected request headers, got {:?}", other),
    }
    stream
        .send_headers(vec![H2Header::new(":status", "200")], false)
        .unwrap();
    stream.send_data(b"foobar", false).unwrap();
    stream.send_data(b"quux", true).unwrap();
}
