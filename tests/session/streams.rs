//! Stream creation, dispatch of stream frames and handler outcomes

use std::sync::{Arc, Mutex};

use h2_session::{
    error_code, H2Codec, H2Frame, H2Header, InboundFrame, InlineExecutor, ProtocolVersion, Session,
    SessionConfig, StopReason, StreamError, StreamHandle,
};

use crate::support::{fake_reply, init_tracing, Peer, RecordingFactory, ScriptedIo};

fn inline_run_on_add() -> Arc<InlineExecutor> {
    let executor = Arc::new(InlineExecutor::new());
    executor.set_run_on_add(true);
    executor
}

/// An inline executor whose queued tasks run at the top of each loop
/// iteration rather than on submission.
fn deferred(io: ScriptedIo) -> (ScriptedIo, Arc<InlineExecutor>) {
    let executor = Arc::new(InlineExecutor::new());
    let runner = executor.clone();
    (io.on_poll(move || runner.run_all()), executor)
}

/// The reply `fake_reply` sends, minus its read of the request.
fn fake_reply_body(stream: &StreamHandle) {
    stream.send_headers(vec![H2Header::new(":status", "200")], false).unwrap();
    stream.send_data(b"foobar", false).unwrap();
    stream.send_data(b"quux", true).unwrap();
}

fn assert_fake_reply(io: &ScriptedIo, stream_id: u32) {
    let headers: Vec<_> = io
        .written()
        .iter()
        .filter(|w| matches!(w.frame, H2Frame::Headers { stream_id: id, .. } if id == stream_id))
        .collect();
    assert_eq!(headers.len(), 1);
    assert_eq!(headers[0].header(":status"), Some("200"));
    assert_eq!(
        io.data_for(stream_id),
        vec![(b"foobar".to_vec(), false), (b"quux".to_vec(), true)]
    );
}

#[test]
fn test_single_stream_exchange() {
    init_tracing();
    let factory = RecordingFactory::fake_replies();
    let mut peer = Peer::new();
    let io = ScriptedIo::new().push_input(peer.request(1, true, None));
    let mut session = Session::new(
        ProtocolVersion::Spdy3,
        SessionConfig::default(),
        io,
        factory.clone(),
        inline_run_on_add(),
    );

    assert_eq!(session.run(), StopReason::Finished);
    assert_eq!(factory.created(), vec![(1, 0, 7)]);

    let io = session.into_io();
    assert_fake_reply(&io, 1);
    let frames = io.frames();
    assert_eq!(frames.len(), 5);
    assert!(matches!(frames[1], H2Frame::Headers { stream_id: 1, end_stream: false, .. }));
    assert_eq!(
        frames[4],
        H2Frame::GoAway { last_stream_id: 1, error_code: error_code::NO_ERROR }
    );
}

#[test]
fn test_stream_priority_and_ids_reach_the_factory() {
    let factory = RecordingFactory::fake_replies();
    let mut peer = Peer::new();
    let input = [peer.request(1, true, Some(2)), peer.request(3, true, Some(0)), peer.request(5, true, None)].concat();
    let mut session = Session::new(
        ProtocolVersion::Spdy3,
        SessionConfig::default(),
        ScriptedIo::new().push_input(input),
        factory.clone(),
        inline_run_on_add(),
    );

    session.run();
    assert_eq!(factory.created(), vec![(1, 0, 2), (3, 0, 0), (5, 0, 7)]);
    for id in [1, 3, 5] {
        assert_fake_reply(session.io(), id);
    }
}

#[test]
fn test_duplicate_stream_id() {
    let factory = RecordingFactory::fake_replies();
    let mut peer = Peer::new();
    let input = [peer.request(1, true, None), peer.request(1, true, None)].concat();
    let (io, executor) = deferred(ScriptedIo::new().push_input(input));
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory.clone(), executor);

    assert_eq!(session.run(), StopReason::Finished);
    assert_eq!(factory.created(), vec![(1, 0, 7)]);

    let io = session.io();
    assert_eq!(io.goaways(), vec![(1, error_code::PROTOCOL_ERROR)]);
    // The first stream still delivers its whole reply after the GOAWAY.
    assert_fake_reply(io, 1);
    let frames = io.frames();
    assert!(matches!(frames[1], H2Frame::GoAway { .. }));
    assert!(matches!(frames.last(), Some(H2Frame::Data { end_stream: true, .. })));
}

#[test]
fn test_repeated_headers_without_end_stream() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();
    let factory = RecordingFactory::new(move |stream| {
        while let Some(frame) = stream.get_input_frame(false) {
            log.lock().unwrap().push(frame);
        }
        fake_reply_body(&stream);
    });
    let mut peer = Peer::new();
    let input = [peer.request(1, false, None), peer.request(1, false, None)].concat();
    let (io, executor) = deferred(ScriptedIo::new().push_input(input));
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory.clone(), executor);

    assert_eq!(session.run(), StopReason::Finished);
    assert_eq!(factory.created(), vec![(1, 0, 7)]);
    assert_eq!(session.io().goaways(), vec![(1, error_code::PROTOCOL_ERROR)]);

    // The repeat never reaches the original stream.
    let frames = received.lock().unwrap().clone();
    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], InboundFrame::Headers { end_stream: false, .. }));
    assert_fake_reply(session.io(), 1);
}

#[test]
fn test_repeated_headers_after_reply_finished() {
    let factory = RecordingFactory::fake_replies();
    let mut peer = Peer::new();
    let input = [peer.request(1, false, None), peer.request(1, false, None)].concat();
    let io = ScriptedIo::new().push_input(input);
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory.clone(), inline_run_on_add());

    assert_eq!(session.run(), StopReason::Finished);
    assert_eq!(factory.created(), vec![(1, 0, 7)]);
    assert_eq!(session.io().goaways(), vec![(1, error_code::PROTOCOL_ERROR)]);
    assert_fake_reply(session.io(), 1);
}

#[test]
fn test_reused_id_after_stream_finished() {
    let factory = RecordingFactory::fake_replies();
    let mut peer = Peer::new();
    let io = ScriptedIo::new()
        .push_input(peer.request(3, true, None))
        .push_input(peer.request(3, true, None));
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory.clone(), inline_run_on_add());

    session.run();
    assert_eq!(factory.created().len(), 1);
    assert_eq!(session.io().goaways(), vec![(3, error_code::PROTOCOL_ERROR)]);
}

#[test]
fn test_bad_header_compression() {
    let factory = RecordingFactory::fake_replies();
    // Indexed field 62 refers to an empty dynamic table.
    let frame = H2Frame::Headers {
        stream_id: 1,
        header_block: vec![0xbe],
        end_stream: true,
        priority: None,
        flags: 0,
    };
    let io = ScriptedIo::new().push_input(frame.encode(16_384));
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory.clone(), inline_run_on_add());

    assert_eq!(session.run(), StopReason::Finished);
    assert!(factory.created().is_empty());
    assert_eq!(session.io().goaways(), vec![(0, error_code::PROTOCOL_ERROR)]);
}

#[test]
fn test_stream_id_zero() {
    let factory = RecordingFactory::fake_replies();
    let mut peer = Peer::new();
    let io = ScriptedIo::new().push_input(peer.request(0, true, None));
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory.clone(), inline_run_on_add());

    session.run();
    assert!(factory.created().is_empty());
    assert_eq!(session.io().goaways(), vec![(0, error_code::PROTOCOL_ERROR)]);
}

#[test]
fn test_even_stream_id_from_peer() {
    let factory = RecordingFactory::fake_replies();
    let mut peer = Peer::new();
    let io = ScriptedIo::new().push_input(peer.request(2, true, None));
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory.clone(), inline_run_on_add());

    session.run();
    assert!(factory.created().is_empty());
    assert_eq!(session.io().goaways(), vec![(0, error_code::PROTOCOL_ERROR)]);
}

#[test]
fn test_invalid_headers_flags() {
    let factory = RecordingFactory::fake_replies();
    let mut peer = Peer::new();
    // 0x47 on the wire: two undefined bits besides END_STREAM | END_HEADERS.
    let io = ScriptedIo::new().push_input(peer.request_with_flags(1, true, None, 0x42));
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory.clone(), inline_run_on_add());

    session.run();
    assert!(factory.created().is_empty());
    assert_eq!(session.io().goaways(), vec![(0, error_code::PROTOCOL_ERROR)]);
}

#[test]
fn test_new_streams_ignored_after_goaway() {
    let factory = RecordingFactory::fake_replies();
    let mut peer = Peer::new();
    let input = [
        H2Codec::create_push_promise_frames(1, 2, &[0x82], 16_384).concat(),
        peer.request(1, true, None),
    ]
    .concat();
    let io = ScriptedIo::new().push_input(input);
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory.clone(), inline_run_on_add());

    session.run();
    assert!(factory.created().is_empty());
    assert_eq!(session.io().goaways().len(), 1);
    assert!(session.io().data_for(1).is_empty());
}

#[test]
fn test_data_for_unknown_stream() {
    let io = ScriptedIo::new().push_input(H2Codec::create_data_frame(5, b"hi", true));
    let mut session = Session::new(
        ProtocolVersion::Spdy3,
        SessionConfig::default(),
        io,
        RecordingFactory::fake_replies(),
        inline_run_on_add(),
    );

    session.run();
    assert_eq!(session.io().goaways(), vec![(0, error_code::PROTOCOL_ERROR)]);
}

#[test]
fn test_concurrency_limit_refuses_stream() {
    let factory = RecordingFactory::fake_replies();
    let mut peer = Peer::new();
    let input = [peer.request(1, true, None), peer.request(3, true, None)].concat();
    let (io, executor) = deferred(ScriptedIo::new().push_input(input));
    let config = SessionConfig {
        max_concurrent_streams: 1,
        ..SessionConfig::default()
    };
    let mut session = Session::new(ProtocolVersion::Spdy3, config, io, factory.clone(), executor);

    assert_eq!(session.run(), StopReason::Finished);
    assert_eq!(factory.created(), vec![(1, 0, 7)]);
    let io = session.io();
    assert_eq!(io.resets(), vec![(3, error_code::REFUSED_STREAM)]);
    assert_fake_reply(io, 1);
    assert_eq!(io.goaways(), vec![(3, error_code::NO_ERROR)]);
}

#[test]
fn test_request_body_and_trailers_reach_handler() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();
    let factory = RecordingFactory::new(move |stream| {
        while let Some(frame) = stream.get_input_frame(false) {
            log.lock().unwrap().push(frame);
        }
    });
    let (io, executor) = deferred(ScriptedIo::new());
    let mut peer = Peer::new();
    let input = [
        peer.request(1, false, None),
        H2Codec::create_data_frame(1, b"body", false),
        peer.trailers(1),
    ]
    .concat();
    let mut session = Session::new(
        ProtocolVersion::Spdy3,
        SessionConfig::default(),
        io.push_input(input),
        factory,
        executor,
    );

    session.run();
    let frames = received.lock().unwrap().clone();
    assert_eq!(frames.len(), 3);
    assert!(matches!(&frames[0], InboundFrame::Headers { end_stream: false, .. }));
    assert_eq!(frames[1], InboundFrame::Data { data: b"body".to_vec(), end_stream: false });
    assert_eq!(
        frames[2],
        InboundFrame::Headers {
            headers: vec![H2Header::new("x-checksum", "abc")],
            end_stream: true,
        }
    );
    // The handler never replied, so the stream is reset.
    assert_eq!(session.io().resets(), vec![(1, error_code::INTERNAL_ERROR)]);
}

#[test]
fn test_handler_without_final_frame_is_reset() {
    let factory = RecordingFactory::new(|stream| {
        stream.send_headers(vec![H2Header::new(":status", "200")], false).unwrap();
        stream.send_data(b"partial", false).unwrap();
    });
    let mut peer = Peer::new();
    let io = ScriptedIo::new().push_input(peer.request(1, true, None));
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory, inline_run_on_add());

    assert_eq!(session.run(), StopReason::Finished);
    let frames = session.io().frames();
    assert!(matches!(frames[1], H2Frame::Headers { stream_id: 1, .. }));
    assert!(matches!(frames[2], H2Frame::Data { stream_id: 1, end_stream: false, .. }));
    assert_eq!(frames[3], H2Frame::RstStream { stream_id: 1, error_code: error_code::INTERNAL_ERROR });
}

#[test]
fn test_panicking_handler_is_reset() {
    let factory = RecordingFactory::new(|_stream| panic!("handler blew up"));
    let mut peer = Peer::new();
    let io = ScriptedIo::new()
        .push_input(peer.request(1, true, None))
        .push_input(peer.request(3, true, None));
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory, inline_run_on_add());

    assert_eq!(session.run(), StopReason::Finished);
    assert_eq!(
        session.io().resets(),
        vec![(1, error_code::INTERNAL_ERROR), (3, error_code::INTERNAL_ERROR)]
    );
    assert_eq!(session.io().goaways(), vec![(3, error_code::NO_ERROR)]);
}

#[test]
fn test_peer_reset_aborts_stream() {
    let outcome = Arc::new(Mutex::new(None));
    let seen = outcome.clone();
    let factory = RecordingFactory::new(move |stream| {
        let input = stream.get_input_frame(false);
        let sent = stream.send_headers(vec![H2Header::new(":status", "200")], true);
        *seen.lock().unwrap() = Some((input, sent));
    });
    let mut peer = Peer::new();
    let input = [peer.request(1, true, None), H2Codec::create_rst_stream(1, error_code::CANCEL)].concat();
    let (io, executor) = deferred(ScriptedIo::new().push_input(input));
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory, executor);

    assert_eq!(session.run(), StopReason::Finished);
    assert_eq!(*outcome.lock().unwrap(), Some((None, Err(StreamError::Aborted))));
    assert!(session.io().resets().is_empty());
    assert_eq!(session.io().goaways(), vec![(1, error_code::NO_ERROR)]);
}

#[test]
fn test_large_body_is_split_at_max_frame_size() {
    let factory = RecordingFactory::new(|stream| {
        stream.get_input_frame(false);
        stream.send_headers(vec![H2Header::new(":status", "200")], false).unwrap();
        stream.send_data(&vec![7u8; 40_000], true).unwrap();
    });
    let mut peer = Peer::new();
    let io = ScriptedIo::new().push_input(peer.request(1, true, None));
    let mut session = Session::new(ProtocolVersion::Spdy2, SessionConfig::default(), io, factory, inline_run_on_add());

    session.run();
    let sizes: Vec<(usize, bool)> = session
        .io()
        .data_for(1)
        .into_iter()
        .map(|(data, fin)| (data.len(), fin))
        .collect();
    assert_eq!(sizes, vec![(16_384, false), (16_384, false), (7_232, true)]);
}

#[test]
fn test_threaded_handlers_all_complete() {
    let pool = h2_session::ThreadPool::new(3).unwrap();
    let factory = RecordingFactory::new(fake_reply);
    let mut peer = Peer::new();
    let input: Vec<u8> = (0..10u32).flat_map(|i| peer.request(2 * i + 1, true, None)).collect();
    let io = ScriptedIo::new().push_input(input);
    let mut session = Session::new(ProtocolVersion::Spdy3, SessionConfig::default(), io, factory.clone(), pool.new_executor());

    assert_eq!(session.run(), StopReason::Finished);
    assert_eq!(factory.created().len(), 10);
    for i in 0..10u32 {
        assert_fake_reply(session.io(), 2 * i + 1);
    }
    assert_eq!(session.io().goaways(), vec![(19, error_code::NO_ERROR)]);
}
