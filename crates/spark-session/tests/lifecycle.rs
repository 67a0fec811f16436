//! `lifecycle` 集成测试：会话创建顺序、附件、优雅/立即关闭与工厂关闭回调。

mod support;

use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use spark_session::{
    Attachment, BoxError, Pipeline, Processor, Session, SessionConfig, SessionError,
    SessionFactory, SessionStatus, StateEvent,
};
use support::{Harness, LengthCodec, MockChannel, split_frames};

#[test]
fn graceful_close_drains_queue_before_closing() {
    let harness = Harness::new(SessionConfig::default());
    let (session, channel) = harness.open();

    for payload in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
        session.write(&payload).unwrap();
    }
    session.close_with(false);

    assert_eq!(session.status(), SessionStatus::Closing);
    assert_eq!(channel.close_calls(), 0, "排空之前不得关闭传输");
    assert!(matches!(
        session.write(&b"late".to_vec()),
        Err(SessionError::Closed { .. })
    ));

    channel.complete_all_writes();

    assert_eq!(session.status(), SessionStatus::Closed);
    assert_eq!(channel.close_calls(), 1);
    assert_eq!(
        split_frames(&channel.written()),
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
    );
    let events = harness.processor.events();
    assert_eq!(
        &events[events.len() - 2..],
        &[StateEvent::SessionClosing, StateEvent::SessionClosed]
    );
}

#[test]
fn graceful_close_of_idle_session_completes_at_once() {
    let harness = Harness::new(SessionConfig::default());
    let (session, channel) = harness.open();

    session.close_with(false);

    assert_eq!(session.status(), SessionStatus::Closed);
    assert_eq!(channel.close_calls(), 1);
}

#[test]
fn immediate_close_during_graceful_close_discards_pending() {
    let harness = Harness::new(SessionConfig::default());
    let (session, channel) = harness.open();

    session.write(&b"first".to_vec()).unwrap();
    session.write(&b"second".to_vec()).unwrap();
    session.close_with(false);
    session.close();

    assert_eq!(session.status(), SessionStatus::Closed);
    assert_eq!(session.outbound_bytes(), 0);
    channel.complete_all_writes();
    assert_eq!(split_frames(&channel.written()), vec![b"first".to_vec()]);
}

#[test]
fn session_closed_is_emitted_exactly_once() {
    let harness = Harness::new(SessionConfig::default());
    let (session, channel) = harness.open();

    session.close();
    session.close();
    session.close_with(false);
    // 关闭前提交的读此时才完成，不得再产生任何事件。
    channel.deliver_eof();
    assert_eq!(harness.processor.count(StateEvent::InputShutdown), 0);

    assert_eq!(harness.processor.count(StateEvent::SessionClosed), 1);
    assert_eq!(harness.processor.count(StateEvent::SessionClosing), 0);
    assert_eq!(channel.close_calls(), 1);
}

#[test]
fn session_ids_are_unique_and_increasing() {
    let harness = Harness::new(SessionConfig::default());
    let ids: Vec<u64> = (0..8).map(|_| harness.open().0.id()).collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

struct Greeting(&'static str);

/// 在 `on_new_session` 中记录首个读是否已提交，并返回附件。
struct ProbeProcessor {
    channel: Arc<MockChannel>,
    armed_at_creation: AtomicBool,
    armed_at_event: AtomicBool,
    events: Mutex<Vec<StateEvent>>,
}

impl Processor<Vec<u8>> for ProbeProcessor {
    fn on_new_session(&self, _session: &Session<Vec<u8>>) -> Option<Attachment> {
        self.armed_at_creation
            .store(self.channel.read_armed(), Ordering::SeqCst);
        Some(Box::new(Greeting("hello")))
    }

    fn on_message(&self, _session: &Session<Vec<u8>>, _message: &Vec<u8>) -> Result<(), BoxError> {
        Ok(())
    }

    fn on_state_change(
        &self,
        _session: &Session<Vec<u8>>,
        event: StateEvent,
        _error: Option<&(dyn Error + 'static)>,
    ) {
        if event == StateEvent::NewSession {
            self.armed_at_event
                .store(self.channel.read_armed(), Ordering::SeqCst);
        }
        self.events.lock().push(event);
    }
}

#[test]
fn new_session_is_announced_before_first_read() {
    let channel = MockChannel::new();
    let processor = Arc::new(ProbeProcessor {
        channel: Arc::clone(&channel),
        armed_at_creation: AtomicBool::new(true),
        armed_at_event: AtomicBool::new(true),
        events: Mutex::new(Vec::new()),
    });
    let factory = SessionFactory::new(
        SessionConfig::default(),
        LengthCodec::default(),
        Pipeline::with_processor(processor.clone()),
    )
    .unwrap();

    let session = factory.open(channel.clone());

    assert!(!processor.armed_at_creation.load(Ordering::SeqCst));
    assert!(
        !processor.armed_at_event.load(Ordering::SeqCst),
        "NewSession 必须先于首个读"
    );
    assert!(channel.read_armed(), "创建流程结束时首个读必须已提交");
    assert_eq!(*processor.events.lock(), vec![StateEvent::NewSession]);
    assert_eq!(
        session.with_attachment(|greeting: &mut Greeting| greeting.0),
        Some("hello")
    );
}

#[test]
fn attachments_are_typed() {
    let harness = Harness::new(SessionConfig::default());
    let (session, _channel) = harness.open();

    assert_eq!(session.take_attachment::<u32>(), None);
    session.set_attachment(41u32);
    assert_eq!(session.with_attachment(|n: &mut u32| *n += 1), Some(()));
    assert_eq!(session.take_attachment::<String>(), None, "类型不符时不得取走附件");
    assert_eq!(session.take_attachment::<u32>(), Some(42));
    assert_eq!(session.take_attachment::<u32>(), None);
}

#[test]
fn factory_shutdown_notifies_processor_once() {
    let harness = Harness::new(SessionConfig::default());
    harness.factory.shutdown();
    harness.factory.shutdown();

    assert!(harness.factory.is_shut_down());
    assert_eq!(harness.processor.shutdowns.load(Ordering::SeqCst), 1);
}

#[test]
fn invalid_config_is_rejected_by_factory() {
    let result = SessionFactory::<Vec<u8>>::new(
        SessionConfig::default().with_read_buffer_size(0),
        LengthCodec::default(),
        Pipeline::new(support::RecordingProcessor::default()),
    );
    assert!(result.is_err());
}
