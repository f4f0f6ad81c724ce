//! Delivery pipeline integration tests
//!
//! Drives `TtsTaskManager` against a scripted engine and a recording
//! transport; no network or audio hardware needed.

use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_test::{assert_err, assert_ok};

use companion_voice::pipeline::{
    Actions, AudioInput, AudioPayloadBuilder, Expression, ManagerConfig, Payload, PayloadBuilder,
    PayloadKind, Segment, Transport, TtsTaskManager,
};
use companion_voice::{Error, Result};

mod common;

use common::{FakeTts, RecordingTransport, manager, streaming, wait_for, whole_file};

#[tokio::test]
async fn test_delivery_follows_admission_under_random_latency() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let texts: Vec<String> = (0..12).map(|i| format!("Sentence number {i}.")).collect();

    let mut engine = FakeTts::new(dir.path());
    for text in &texts {
        engine = engine.with_latency(text, rng.gen_range(0..60));
    }
    let engine = Arc::new(engine);
    let transport = RecordingTransport::new();
    let mut tts = manager(whole_file(&engine), &transport, false);

    for (expected, text) in texts.iter().enumerate() {
        assert_eq!(tts.speak(Segment::new(text.as_str())).await.unwrap(), expected as u64);
    }
    assert_ok!(tts.drain().await);

    let expected: Vec<(u64, u64)> = (0..12).map(|p| (p, 0)).collect();
    assert_eq!(transport.slots(), expected);
    assert_eq!(transport.captions(), texts);
    assert!(transport.payloads().iter().all(|p| p["audio"].is_string()));
    assert_eq!(engine.released(), 12);
    assert_eq!(engine.files_left(), 0);
}

#[tokio::test]
async fn test_slow_first_segment_holds_back_later_ones() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(
        FakeTts::new(dir.path())
            .with_latency("Hello.", 50)
            .with_latency("World!", 10),
    );
    let transport = RecordingTransport::new();
    let mut tts = manager(whole_file(&engine), &transport, false);

    for text in ["Hello.", "", "World!"] {
        tts.speak(Segment::new(text)).await.unwrap();
    }
    assert_ok!(tts.drain().await);

    assert_eq!(transport.captions(), vec!["Hello.", "", "World!"]);
    let payloads = transport.payloads();
    assert!(payloads[0]["audio"].is_string());
    assert!(payloads[1]["audio"].is_null());
    assert!(payloads[2]["audio"].is_string());
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn test_punctuation_only_segment_skips_backend() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()));
    let transport = RecordingTransport::new();
    let mut tts = manager(whole_file(&engine), &transport, false);

    let actions = Actions {
        expressions: Some(vec![Expression::Name("smile".into())]),
        ..Actions::default()
    };
    tts.speak(Segment::new("...!?").with_actions(actions)).await.unwrap();
    assert_ok!(tts.drain().await);

    let payloads = transport.payloads();
    assert_eq!(payloads.len(), 1);
    assert!(payloads[0]["audio"].is_null());
    assert_eq!(payloads[0]["display_text"]["text"], "...!?");
    assert_eq!(payloads[0]["actions"]["expressions"][0], "smile");
    assert_eq!(engine.calls(), 0);
}

#[tokio::test]
async fn test_backend_failure_becomes_silent_payload() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()).failing("Broken."));
    let transport = RecordingTransport::new();
    let mut tts = manager(whole_file(&engine), &transport, false);

    for text in ["First.", "Broken.", "Last."] {
        tts.speak(Segment::new(text)).await.unwrap();
    }
    assert_ok!(tts.drain().await);

    assert_eq!(transport.slots(), vec![(0, 0), (1, 0), (2, 0)]);
    let payloads = transport.payloads();
    assert!(payloads[0]["audio"].is_string());
    assert!(payloads[1]["audio"].is_null());
    assert_eq!(payloads[1]["display_text"]["text"], "Broken.");
    assert!(payloads[2]["audio"].is_string());
    assert_eq!(engine.files_left(), 0);
}

#[tokio::test]
async fn test_streamed_fragments_stay_contiguous() {
    let dir = tempfile::tempdir().unwrap();
    let texts: Vec<String> = (0..7).map(|i| format!("Token {i}.")).collect();
    let engine = Arc::new(
        FakeTts::new(dir.path())
            .with_fragments("Token 5.", 3)
            .with_latency("Token 5.", 30)
            .with_latency("Token 6.", 5),
    );
    let transport = RecordingTransport::new();
    let mut tts = manager(streaming(&engine), &transport, true);

    for text in &texts {
        tts.speak(Segment::new(text.as_str())).await.unwrap();
    }
    assert_ok!(tts.drain().await);

    let slots = transport.slots();
    let start = slots.iter().position(|&(p, _)| p == 5).unwrap();
    assert_eq!(&slots[start..start + 4], &[(5, 0), (5, 1), (5, 2), (5, 3)]);
    assert_eq!(slots[start + 4], (6, 0));

    let payloads = transport.payloads();
    for fragment in &payloads[start..start + 3] {
        assert_eq!(fragment["type"], "tts-audio-chunk");
        assert_eq!(fragment["forwarded"], true);
        assert!(fragment.get("eos").is_none());
    }
    assert_eq!(payloads[start + 3]["eos"], true);
    assert_eq!(payloads[start + 3]["audio"], "");

    // Every position ends with exactly one end-of-stream marker
    let markers = payloads.iter().filter(|p| p["eos"] == true).count();
    assert_eq!(markers, texts.len());
    assert_eq!(engine.files_left(), 0);
}

#[tokio::test]
async fn test_stream_cut_short_still_closes_position() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(
        FakeTts::new(dir.path())
            .failing_after("Flaky.", 2)
            .failing_after("Dead.", 0)
            .failing("Refused."),
    );
    let transport = RecordingTransport::new();
    let mut tts = manager(streaming(&engine), &transport, true);

    for text in ["Flaky.", "Dead.", "Refused.", "Fine."] {
        tts.speak(Segment::new(text)).await.unwrap();
    }
    assert_ok!(tts.drain().await);

    assert_eq!(
        transport.slots(),
        vec![(0, 0), (0, 1), (0, 2), (1, 0), (2, 0), (3, 0), (3, 1)]
    );
    let payloads = transport.payloads();
    assert_eq!(payloads[2]["eos"], true);
    // Failures before any audio degrade to a single silent whole payload
    assert_eq!(payloads[3]["type"], "audio");
    assert!(payloads[3]["audio"].is_null());
    assert_eq!(payloads[4]["type"], "audio");
    assert!(payloads[4]["audio"].is_null());
}

#[tokio::test]
async fn test_engine_preference_enables_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()).preferring_streaming());
    let transport = RecordingTransport::new();
    let mut tts = manager(streaming(&engine), &transport, false);

    tts.speak(Segment::new("Hi there.")).await.unwrap();
    assert_ok!(tts.drain().await);

    assert_eq!(transport.slots(), vec![(0, 0), (0, 1)]);
}

#[tokio::test]
async fn test_streaming_backend_defaults_to_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()));
    let transport = RecordingTransport::new();
    let mut tts = manager(streaming(&engine), &transport, false);

    tts.speak(Segment::new("Hi there.")).await.unwrap();
    assert_ok!(tts.drain().await);

    let payloads = transport.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["type"], "audio");
    assert_eq!(engine.released(), 1);
}

#[tokio::test]
async fn test_admission_after_drain_continues_numbering() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()));
    let transport = RecordingTransport::new();
    let mut tts = manager(whole_file(&engine), &transport, false);

    tts.speak(Segment::new("One.")).await.unwrap();
    assert_ok!(tts.drain().await);
    assert_eq!(tts.speak(Segment::new("Two.")).await.unwrap(), 1);
    assert_ok!(tts.drain().await);

    assert_eq!(transport.slots(), vec![(0, 0), (1, 0)]);
    assert_eq!(tts.admitted(), 2);
}

#[tokio::test]
async fn test_clear_discards_work_and_restarts_at_zero() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()).with_latency("Slow.", 500));
    let transport = RecordingTransport::new();
    let mut tts = manager(whole_file(&engine), &transport, false);

    tts.speak(Segment::new("Slow.")).await.unwrap();
    tts.speak(Segment::new("Quick.")).await.unwrap();
    tts.clear();
    assert_eq!(tts.admitted(), 0);

    assert_eq!(tts.speak(Segment::new("Again.")).await.unwrap(), 0);
    assert_ok!(tts.drain().await);

    assert_eq!(transport.captions(), vec!["Again."]);
    assert!(wait_for(|| engine.files_left() == 0).await);
}

#[tokio::test]
async fn test_cancel_leaves_no_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = FakeTts::new(dir.path());
    for i in 0..5 {
        engine = engine.with_latency(&format!("Part {i}."), 1_000);
    }
    let engine = Arc::new(engine);
    let transport = RecordingTransport::new();
    let mut tts = manager(whole_file(&engine), &transport, false);

    for i in 0..5 {
        tts.speak(Segment::new(format!("Part {i}."))).await.unwrap();
    }
    assert!(wait_for(|| engine.calls() == 5).await);

    tts.cancel().await;

    assert_eq!(tts.pending(), 0);
    assert_eq!(engine.files_left(), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(transport.payloads().is_empty());
}

#[tokio::test]
async fn test_cancel_after_partial_delivery_then_fresh_turn() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()).with_latency("Pending.", 1_000));
    let transport = RecordingTransport::new();
    let mut tts = manager(whole_file(&engine), &transport, false);

    tts.speak(Segment::new("Done.")).await.unwrap();
    tts.speak(Segment::new("Pending.")).await.unwrap();
    assert!(wait_for(|| transport.payloads().len() == 1).await);

    tts.cancel().await;
    assert_eq!(engine.files_left(), 0);
    assert_eq!(transport.captions(), vec!["Done."]);

    for text in ["New one.", "New two."] {
        tts.speak(Segment::new(text)).await.unwrap();
    }
    assert_ok!(tts.drain().await);

    assert_eq!(transport.captions(), vec!["Done.", "New one.", "New two."]);
    assert_eq!(transport.slots(), vec![(0, 0), (0, 0), (1, 0)]);
    assert_eq!(engine.files_left(), 0);
}

#[tokio::test]
async fn test_dropping_manager_releases_everything() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()).with_latency("Never.", 1_000));
    let transport = RecordingTransport::new();
    let mut tts = manager(whole_file(&engine), &transport, false);

    tts.speak(Segment::new("Never.")).await.unwrap();
    assert!(wait_for(|| engine.calls() == 1).await);
    drop(tts);

    assert!(wait_for(|| engine.files_left() == 0).await);
    assert!(transport.payloads().is_empty());
}

#[tokio::test]
async fn test_transport_failure_surfaces_from_drain() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()));
    let transport = RecordingTransport::failing_after(1);
    let mut tts = manager(whole_file(&engine), &transport, false);

    for text in ["One.", "Two.", "Three."] {
        tts.speak(Segment::new(text)).await.unwrap();
    }
    let result = tts.drain().await;

    assert!(matches!(result, Err(Error::Transport(_))));
    assert_eq!(transport.payloads().len(), 1);
    assert!(wait_for(|| engine.files_left() == 0).await);
}

#[tokio::test]
async fn test_failed_sender_rejects_next_admission() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()));
    let transport = RecordingTransport::failing_after(0);
    let mut tts = manager(whole_file(&engine), &transport, false);

    tts.speak(Segment::new("One.")).await.unwrap();
    assert!(wait_for(|| engine.released() == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_err!(tts.speak(Segment::new("Two.")).await);
}

#[tokio::test]
async fn test_delivery_failure_persists_until_reset() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()));
    let transport = RecordingTransport::failing_once();
    let mut tts = manager(whole_file(&engine), &transport, false);

    tts.speak(Segment::new("One.")).await.unwrap();
    assert!(wait_for(|| transport.attempts() == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // the transport would accept these, but position 0 is already lost
    assert!(matches!(
        tts.speak(Segment::new("Two.")).await,
        Err(Error::Transport(_))
    ));
    assert!(tts.is_failed());
    assert!(matches!(
        tts.speak(Segment::new("Three.")).await,
        Err(Error::Pipeline(_))
    ));
    assert!(matches!(tts.drain().await, Err(Error::Pipeline(_))));
    assert!(transport.payloads().is_empty());

    tts.clear();
    assert!(!tts.is_failed());
    assert_eq!(assert_ok!(tts.speak(Segment::new("Fresh start.")).await), 0);
    assert_ok!(tts.drain().await);
    assert_eq!(transport.captions(), vec!["Fresh start."]);
}

/// Records which thread built each payload
#[derive(Default)]
struct ThreadRecordingBuilder {
    inner: AudioPayloadBuilder,
    threads: Mutex<Vec<ThreadId>>,
}

impl PayloadBuilder for ThreadRecordingBuilder {
    fn build(
        &self,
        audio: Option<AudioInput<'_>>,
        segment: &Segment,
        kind: PayloadKind,
    ) -> Result<Payload> {
        self.threads.lock().unwrap().push(thread::current().id());
        self.inner.build(audio, segment, kind)
    }
}

#[tokio::test]
async fn test_whole_file_payloads_are_built_off_the_runtime_thread() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeTts::new(dir.path()));
    let transport = RecordingTransport::new();
    let builder = Arc::new(ThreadRecordingBuilder::default());
    let mut tts = TtsTaskManager::new(
        whole_file(&engine),
        Arc::clone(&builder) as Arc<dyn PayloadBuilder>,
        Arc::clone(&transport) as Arc<dyn Transport>,
        ManagerConfig::default(),
    );

    for text in ["One.", "Two.", "Three."] {
        tts.speak(Segment::new(text)).await.unwrap();
    }
    assert_ok!(tts.drain().await);

    // current-thread runtime: every async task polls on this thread
    let runtime_thread = thread::current().id();
    let threads = builder.threads.lock().unwrap().clone();
    assert_eq!(threads.len(), 3);
    assert!(threads.iter().all(|id| *id != runtime_thread));
    assert_eq!(transport.captions(), vec!["One.", "Two.", "Three."]);
    assert!(transport.payloads().iter().all(|p| p["audio"].as_str().is_some_and(|a| !a.is_empty())));
    assert_eq!(engine.files_left(), 0);
}
