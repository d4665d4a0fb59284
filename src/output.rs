//! The session's outgoing frame queue.
//!
//! Stream tasks push from worker threads; the session thread pops and writes.
//! Session-level frames always go out before stream frames, stream frames go
//! out by stream priority, and frames of equal rank keep their push order so
//! a single stream's frames are never reordered.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use parking_lot::Mutex;

use crate::h2_codec::{H2Frame, H2Priority};
use crate::hpack::H2Header;

/// A frame waiting to be written.
///
/// Header-bearing frames keep their headers uncompressed; the session encodes
/// them when writing so HPACK state follows wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    Frame(H2Frame),
    Headers {
        stream_id: u32,
        headers: Vec<H2Header>,
        end_stream: bool,
        priority: Option<H2Priority>,
    },
    PushPromise {
        stream_id: u32,
        promised_stream_id: u32,
        headers: Vec<H2Header>,
    },
}

impl OutputFrame {
    pub fn stream_id(&self) -> u32 {
        match self {
            OutputFrame::Frame(frame) => frame.stream_id(),
            OutputFrame::Headers { stream_id, .. } | OutputFrame::PushPromise { stream_id, .. } => *stream_id,
        }
    }

    /// Frames that bypass both flow control and stream priority.
    pub fn is_session_level(&self) -> bool {
        match self {
            OutputFrame::Frame(H2Frame::Data { .. })
            | OutputFrame::Frame(H2Frame::Headers { .. })
            | OutputFrame::Frame(H2Frame::RstStream { .. })
            | OutputFrame::Headers { .. } => false,
            OutputFrame::Frame(_) | OutputFrame::PushPromise { .. } => true,
        }
    }
}

struct Entry {
    rank: u16,
    seq: u64,
    frame: OutputFrame,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl Entry {
    /// Max-heap key: lowest rank first, then oldest.
    fn key(&self) -> Reverse<(u16, u64)> {
        Reverse((self.rank, self.seq))
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
}

/// Thread-safe, priority-ordered frame queue shared by the session and its
/// streams.
pub struct OutputQueue {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for OutputQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("OutputQueue")
            .field("len", &inner.heap.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl Default for OutputQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
        }
    }

    /// Queue a frame. `priority` orders stream-level frames and is ignored
    /// for session-level ones. Returns false if the queue has been closed and
    /// the frame was dropped.
    pub fn push(&self, frame: OutputFrame, priority: u8) -> bool {
        let rank = if frame.is_session_level() {
            0
        } else {
            1 + priority as u16
        };
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Entry { rank, seq, frame });
        true
    }

    pub fn pop(&self) -> Option<OutputFrame> {
        self.inner.lock().heap.pop().map(|e| e.frame)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Drop everything queued and refuse later pushes.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.heap.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
