//! Per-stream flow control.
//!
//! [`SendWindow`] gates the DATA a stream handler produces: frames that do not
//! fit are split at the window boundary and the remainder waits in the
//! stream's pending queue until WINDOW_UPDATE credit arrives. [`RecvWindow`]
//! polices what the peer sends us.

use std::collections::VecDeque;

use crate::config::MAX_WINDOW_SIZE;
use crate::error::FlowControlError;

/// A DATA payload waiting to be released to the output queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub data: Vec<u8>,
    pub end_stream: bool,
}

impl DataChunk {
    pub fn new(data: impl Into<Vec<u8>>, end_stream: bool) -> Self {
        Self {
            data: data.into(),
            end_stream,
        }
    }
}

/// Bytes we may still send on a stream before the peer grants more credit.
#[derive(Debug)]
pub struct SendWindow {
    /// Can go negative if the window shrinks while data is in flight.
    window: i32,
    enabled: bool,
}

impl SendWindow {
    /// A window of `initial` bytes. With `enabled` false every frame is
    /// released whole and the window is never consulted.
    pub fn new(initial: u32, enabled: bool) -> Self {
        Self {
            window: initial.min(MAX_WINDOW_SIZE) as i32,
            enabled,
        }
    }

    pub fn window(&self) -> i32 {
        self.window
    }

    /// Add credit from a WINDOW_UPDATE.
    pub fn replenish(&mut self, increment: u32) -> Result<(), FlowControlError> {
        let new_window = self.window as i64 + increment as i64;
        if new_window > MAX_WINDOW_SIZE as i64 {
            return Err(FlowControlError::WindowOverflow {
                window: self.window,
                increment,
            });
        }
        self.window = new_window as i32;
        Ok(())
    }

    /// Take every chunk at the front of `pending` the window lets through,
    /// in order.
    ///
    /// A chunk larger than the remaining window is split: the fitting prefix
    /// is returned (never flagged final) and the rest stays at the front of
    /// `pending`. Empty chunks are never held back by the window, only by
    /// chunks queued before them.
    pub fn take_releasable(&mut self, pending: &mut VecDeque<DataChunk>) -> Vec<DataChunk> {
        let mut released = Vec::new();
        while let Some(front) = pending.front_mut() {
            let len = front.data.len();
            if len == 0 || !self.enabled || len as i64 <= self.window as i64 {
                self.consume(len);
                if let Some(chunk) = pending.pop_front() {
                    released.push(chunk);
                }
                continue;
            }
            if self.window > 0 {
                let n = self.window as usize;
                let rest = front.data.split_off(n);
                let prefix = std::mem::replace(&mut front.data, rest);
                self.window = 0;
                released.push(DataChunk::new(prefix, false));
            }
            break;
        }
        released
    }

    fn consume(&mut self, len: usize) {
        if self.enabled {
            self.window = (self.window as i64 - len as i64).max(i32::MIN as i64) as i32;
        }
    }
}

/// Bytes the peer may still send on a stream.
#[derive(Debug)]
pub struct RecvWindow {
    window: i64,
}

impl RecvWindow {
    pub fn new(initial: u32) -> Self {
        Self {
            window: initial as i64,
        }
    }

    pub fn window(&self) -> i64 {
        self.window
    }

    /// Account for `len` bytes of received DATA.
    pub fn consume(&mut self, len: usize) -> Result<(), FlowControlError> {
        if len as i64 > self.window {
            return Err(FlowControlError::WindowExceeded {
                len,
                window: self.window,
            });
        }
        self.window -= len as i64;
        Ok(())
    }

    /// Give back `len` bytes once the handler has read them. Returns the
    /// WINDOW_UPDATE increment to send, if any.
    pub fn credit(&mut self, len: usize) -> Option<u32> {
        if len == 0 {
            return None;
        }
        let increment = (len as i64).min(MAX_WINDOW_SIZE as i64 - self.window);
        if increment <= 0 {
            return None;
        }
        self.window += increment;
        Some(increment as u32)
    }
}
