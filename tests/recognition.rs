//! Streaming recognition path tests
//!
//! Covers the close grace window (delayed frames still reach the
//! backend), session lifecycle accounting, and routing-mode fixation.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use parley_gateway::Config;
use parley_gateway::backends::RecognizerMode;

mod common;

use common::{Harness, MockRecognizer, settle, silence_frame, voice_frame};

fn stream_config() -> Config {
    let mut config = Config::default();
    config.backends.recognizer_mode = "stream".to_string();
    config
}

#[tokio::test(start_paused = true)]
async fn frames_arriving_during_grace_window_reach_the_backend() {
    let recognizer = Arc::new(MockRecognizer::new(RecognizerMode::Stream));
    recognizer.push_transcript("turn on the lights");
    let harness = Harness::spawn(stream_config(), recognizer);
    harness.llm.push_scripted(&["Done."]);

    // 5 voice frames, then the silence threshold: close is requested at
    // the 10th silence frame.
    harness.speak(5, 10).await;
    assert_eq!(harness.recognizer.opened(), 1);
    assert_eq!(harness.recognizer.closed(), 0);

    // Three frames arrive late, inside the grace window. They must still
    // be forwarded rather than dropped.
    for _ in 0..3 {
        harness.frame(voice_frame()).await;
    }
    settle().await;
    assert_eq!(harness.recognizer.chunk_count(), 5 + 10 + 3);

    // Grace elapses; the session finalizes exactly once.
    tokio::time::advance(Duration::from_millis(301)).await;
    settle().await;
    assert_eq!(harness.recognizer.closed(), 1);
    assert_eq!(
        harness.sink.heard_texts(),
        vec!["turn on the lights".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn repeated_close_requests_do_not_extend_the_deadline() {
    let recognizer = Arc::new(MockRecognizer::new(RecognizerMode::Stream));
    recognizer.push_transcript("ok");
    let harness = Harness::spawn(stream_config(), recognizer);
    harness.llm.push_scripted(&["Noted."]);

    harness.speak(5, 10).await;

    // More silence past the threshold while already Closing.
    for _ in 0..5 {
        harness.frame(silence_frame()).await;
    }
    settle().await;
    assert_eq!(harness.recognizer.closed(), 0);

    // The deadline is still the one set by the first close request.
    tokio::time::advance(Duration::from_millis(301)).await;
    settle().await;
    assert_eq!(harness.recognizer.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn each_utterance_gets_its_own_session() {
    let recognizer = Arc::new(MockRecognizer::new(RecognizerMode::Stream));
    recognizer.push_transcript("first");
    recognizer.push_transcript("second");
    let harness = Harness::spawn(stream_config(), recognizer);
    harness.llm.push_scripted(&["One."]);
    harness.llm.push_scripted(&["Two."]);

    harness.speak(8, 10).await;
    tokio::time::advance(Duration::from_millis(301)).await;
    settle().await;

    harness.speak(8, 10).await;
    tokio::time::advance(Duration::from_millis(301)).await;
    settle().await;

    assert_eq!(harness.recognizer.opened(), 2);
    assert_eq!(harness.recognizer.closed(), 2);
    assert_eq!(
        harness.sink.heard_texts(),
        vec!["first".to_string(), "second".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn random_interleavings_never_leak_sessions() {
    let recognizer = Arc::new(MockRecognizer::new(RecognizerMode::Stream));
    for _ in 0..64 {
        recognizer.push_transcript("noise");
        // Scripted replies for every transcript that might come through.
    }
    let harness = Harness::spawn(stream_config(), recognizer);
    for _ in 0..64 {
        harness.llm.push_scripted(&["Ok."]);
    }

    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..300 {
        if rng.gen_bool(0.5) {
            harness.frame(voice_frame()).await;
        } else {
            harness.frame(silence_frame()).await;
        }
        if rng.gen_bool(0.05) {
            tokio::time::advance(Duration::from_millis(150)).await;
            settle().await;
        }
    }
    // Drain: enough silence to close, then let the grace window elapse.
    for _ in 0..15 {
        harness.frame(silence_frame()).await;
    }
    settle().await;
    tokio::time::advance(Duration::from_millis(301)).await;
    settle().await;

    // Every opened session was finalized; none leaked or doubled up.
    assert_eq!(harness.recognizer.opened(), harness.recognizer.closed());
    assert!(harness.recognizer.opened() >= 1);
}

#[tokio::test(start_paused = true)]
async fn batch_mode_never_opens_streaming_sessions() {
    let recognizer = Arc::new(MockRecognizer::new(RecognizerMode::Batch));
    recognizer.push_transcript("hello world");
    let harness = Harness::spawn(Config::default(), recognizer);
    harness.llm.push_scripted(&["Hi."]);

    harness.speak(10, 10).await;

    assert_eq!(harness.recognizer.opened(), 0);
    assert_eq!(harness.recognizer.batch_count(), 1);
}
