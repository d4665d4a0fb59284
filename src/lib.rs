//! h2-session: a threaded session engine for HTTP/2-framed, SPDY-style
//! multiplexed connections
//!
//! One [`Session`] owns one connection. It runs a control loop on the calling
//! thread that reads and dispatches peer frames, creates a stream for every
//! request, and writes back whatever the stream handlers produce, honouring
//! per-stream flow control. Handlers run as [`Task`]s on an [`Executor`]:
//! inline on the session thread (handy for tests) or on a [`ThreadPool`].
//!
//! # Features
//!
//! - **Transport-agnostic**: the session only talks to a [`SessionIo`];
//!   [`TcpSessionIo`] covers plain TCP
//! - **Flow Control**: per-stream send and receive windows, with DATA split
//!   at the window boundary and released as WINDOW_UPDATE credit arrives
//! - **Orderly shutdown**: protocol errors answer with GOAWAY and let running
//!   streams drain; a dead peer stops the session at once
//! - **Server Push**: handlers can promise and serve associated streams
//! - **HPACK Support**: Header compression via fluke-hpack
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::net::TcpListener;
//! use std::sync::Arc;
//!
//! use h2_session::{
//!     H2Header, ProtocolVersion, Session, SessionConfig, StreamHandle, StreamTaskFactory,
//!     Task, TcpSessionIo, ThreadPool,
//! };
//!
//! struct Hello(StreamHandle);
//!
//! impl Task for Hello {
//!     fn run(self: Box<Self>) {
//!         let _request = self.0.get_input_frame(true);
//!         let _ = self.0.send_headers(vec![H2Header::new(":status", "200")], false);
//!         let _ = self.0.send_data(b"hello", true);
//!     }
//! }
//!
//! struct HelloFactory;
//!
//! impl StreamTaskFactory for HelloFactory {
//!     fn new_stream_task(&self, stream: StreamHandle) -> Box<dyn Task> {
//!         Box::new(Hello(stream))
//!     }
//! }
//!
//! let pool = ThreadPool::new(4)?;
//! let listener = TcpListener::bind("127.0.0.1:8080")?;
//! for conn in listener.incoming() {
//!     let mut session = Session::new(
//!         ProtocolVersion::Spdy3,
//!         SessionConfig::default(),
//!         TcpSessionIo::new(conn?),
//!         Arc::new(HelloFactory),
//!         pool.new_executor(),
//!     );
//!     session.run();
//! }
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! # Architecture
//!
//! - `h2_codec`: frame parsing (bytes → frames) and encoding
//! - `hpack`: header compression
//! - `session`: control loop and dispatch
//! - `stream` / `flow_control` / `output`: per-stream state and the shared
//!   outgoing queue
//! - `executor` / `thread_pool`: where stream handlers run
//! - `io`: the transport boundary

pub mod config;
pub mod error;
pub mod executor;
pub mod flow_control;
pub mod h2_codec;
pub mod hpack;
pub mod io;
pub mod output;
pub mod session;
pub mod stream;
pub mod thread_pool;

pub use config::{ProtocolVersion, SessionConfig};
pub use error::{CodecError, FlowControlError, HpackError, SettingsError, StreamError};
pub use executor::{task_fn, Executor, InlineExecutor, Task};
pub use h2_codec::{
    error_code, flags, frame_type, settings_id, H2Codec, H2Frame, H2FrameHeader, H2Priority,
    CONNECTION_PREFACE, MAX_HEADER_BLOCK_SIZE,
};
pub use hpack::{find_header, H2Header, HpackDecoder, HpackEncoder};
pub use io::{FrameDecoder, ReadStatus, SessionIo, TcpSessionIo, WriteStatus};
pub use session::{Session, StopReason, StreamTaskFactory};
pub use stream::{InboundFrame, StreamHandle};
pub use thread_pool::{ThreadPool, ThreadPoolExecutor};
