//! Session configuration and the peer's announced settings.

use crate::error::SettingsError;
use crate::h2_codec::{settings_id, DEFAULT_MAX_FRAME_SIZE, MAX_ALLOWED_FRAME_SIZE};

/// Initial flow-control window for new streams (RFC 7540 Section 6.9.2).
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Largest legal flow-control window.
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// Lowest scheduling priority; lower numbers are more urgent.
pub const LOWEST_PRIORITY: u8 = 7;

/// Negotiated protocol revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// No flow control.
    Spdy2,
    /// Per-stream flow control windows.
    Spdy3,
}

impl ProtocolVersion {
    pub fn supports_flow_control(self) -> bool {
        matches!(self, ProtocolVersion::Spdy3)
    }
}

/// Local settings, advertised to the peer in the session's first frame.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_concurrent_streams: u32,
    /// Receive window for each stream. Only advertised when the protocol
    /// version has flow control.
    pub initial_window_size: u32,
    /// Largest frame payload we accept.
    pub max_frame_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 100,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl SessionConfig {
    /// (identifier, value) pairs for the initial SETTINGS frame.
    pub fn settings_frame_params(&self, version: ProtocolVersion) -> Vec<(u16, u32)> {
        let mut params = vec![(settings_id::MAX_CONCURRENT_STREAMS, self.max_concurrent_streams)];
        if version.supports_flow_control() {
            params.push((settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size.min(MAX_WINDOW_SIZE)));
        }
        if self.max_frame_size != DEFAULT_MAX_FRAME_SIZE {
            params.push((settings_id::MAX_FRAME_SIZE, self.max_frame_size));
        }
        params
    }
}

/// Settings announced by the peer.
#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub enable_push: bool,
    /// Starting send window for streams created from now on.
    pub initial_window_size: u32,
    pub max_frame_size: u32,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            enable_push: true,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl PeerSettings {
    /// Apply one settings parameter. On error nothing is changed.
    pub fn apply(&mut self, version: ProtocolVersion, id: u16, value: u32) -> Result<(), SettingsError> {
        match id {
            settings_id::INITIAL_WINDOW_SIZE => {
                if !version.supports_flow_control() {
                    return Err(SettingsError::FlowControlUnsupported);
                }
                if value == 0 || value > MAX_WINDOW_SIZE {
                    return Err(SettingsError::InvalidInitialWindow(value));
                }
                self.initial_window_size = value;
            }
            settings_id::ENABLE_PUSH => {
                if value > 1 {
                    return Err(SettingsError::InvalidEnablePush(value));
                }
                self.enable_push = value != 0;
            }
            settings_id::MAX_FRAME_SIZE => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&value) {
                    return Err(SettingsError::InvalidMaxFrameSize(value));
                }
                self.max_frame_size = value;
            }
            // Ignore unknown settings
            _ => {}
        }
        Ok(())
    }
}

/// Map a HEADERS weight byte to an executor priority (0 most urgent).
pub fn priority_from_weight(weight: u8) -> u8 {
    LOWEST_PRIORITY - (weight >> 5)
}

/// Inverse of [`priority_from_weight`], picking the heaviest weight in the band.
pub fn weight_from_priority(priority: u8) -> u8 {
    ((LOWEST_PRIORITY - priority.min(LOWEST_PRIORITY)) << 5) | 0x1F
}
