//! End-to-end runs of the call service with scripted backends, in virtual time.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use yougood_core::{
    CallConfig, CallHandle, CallNotification, CallPhase, CallService, CallServiceParts, ChatTurn,
    CoreResult, Intensity, LifecycleConfig, PersonaRegistry, ReplyGateway, ReplyService, Role,
};
use yougood_voice::{PlaybackSink, Ringer, SpeechAudio, TtsBackend, VoiceResult};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn text_only(gateway: Option<Arc<dyn ReplyGateway>>) -> (CallHandle, tokio::task::JoinHandle<()>) {
    CallService::spawn(CallServiceParts::text_only(
        Arc::new(PersonaRegistry::builtin()),
        LifecycleConfig::default(),
        Arc::new(ReplyService::with_seed(gateway, 7)),
    ))
}

async fn next_matching(
    rx: &mut broadcast::Receiver<CallNotification>,
    pred: impl Fn(&CallNotification) -> bool,
) -> CallNotification {
    loop {
        let notification = rx.recv().await.expect("notification channel closed");
        if pred(&notification) {
            return notification;
        }
    }
}

struct SlowGateway {
    calls: AtomicUsize,
}

#[async_trait]
impl ReplyGateway for SlowGateway {
    async fn generate_reply(&self, _system_prompt: &str, _transcript: &[ChatTurn]) -> CoreResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(format!("Reply {}", call))
    }
}

struct FixedTts;

#[async_trait]
impl TtsBackend for FixedTts {
    async fn synthesize(&self, text: &str, _voice_id: &str) -> VoiceResult<SpeechAudio> {
        Ok(SpeechAudio::new(text.as_bytes().to_vec(), "audio/mpeg"))
    }
}

#[derive(Default)]
struct TimedPlayback {
    played: AtomicUsize,
}

#[async_trait]
impl PlaybackSink for TimedPlayback {
    async fn play(&self, _audio: SpeechAudio) -> VoiceResult<()> {
        self.played.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(())
    }

    fn stop(&self) {}
}

/// Takes half a second to open the device before anything is audible; `stop`
/// only reaches playback that has already opened.
#[derive(Default)]
struct SlowOpenPlayback {
    audible: AtomicUsize,
}

#[async_trait]
impl PlaybackSink for SlowOpenPlayback {
    async fn play(&self, _audio: SpeechAudio) -> VoiceResult<()> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.audible.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(())
    }

    fn stop(&self) {}
}

#[derive(Default)]
struct LogRinger {
    log: Mutex<Vec<String>>,
}

impl Ringer for LogRinger {
    fn start(&self, ringtone: &str) {
        self.log.lock().unwrap().push(format!("start:{}", ringtone));
    }

    fn stop(&self) {
        self.log.lock().unwrap().push("stop".to_string());
    }
}

#[tokio::test(start_paused = true)]
async fn typed_call_uses_fallback_lines() {
    init_tracing();
    let (handle, _task) = text_only(None);

    handle.arm(CallConfig::new("family", "1234")).await.unwrap();
    let snapshot = handle.wait_for(|s| s.phase == CallPhase::Ringing).await.unwrap();
    assert_eq!(snapshot.caller_name.as_deref(), Some("Mom"));
    assert_eq!(snapshot.ring_count, 1);

    handle.answer().unwrap();
    let snapshot = handle.wait_for(|s| s.messages.len() == 1).await.unwrap();
    assert_eq!(snapshot.phase, CallPhase::Connected);
    assert_eq!(snapshot.call_count, 1);
    assert_eq!(snapshot.messages[0].role, Role::Receiver);
    assert_eq!(snapshot.messages[0].text, "Honey, pipe burst. Need you home now.");
    assert!(!snapshot.messages[0].has_audio());

    handle.submit_caller_turn("What happened?").unwrap();
    let snapshot = handle.wait_for(|s| s.messages.len() == 3).await.unwrap();
    assert_eq!(snapshot.messages[1].role, Role::Caller);
    assert_eq!(snapshot.messages[2].text, "Water everywhere. Please just come.");
    assert_eq!(snapshot.turn.active_flags(), 0);

    handle.end_call().unwrap();
    let snapshot = handle.wait_for(|s| s.phase == CallPhase::Ended).await.unwrap();
    assert_eq!(snapshot.messages.len(), 3);
    let snapshot = handle.wait_for(|s| s.phase == CallPhase::Idle).await.unwrap();
    assert!(snapshot.messages.is_empty());
}

#[tokio::test(start_paused = true)]
async fn delayed_persistent_call_rings_again_after_decline() {
    init_tracing();
    let (handle, _task) = text_only(None);

    let config = CallConfig::new("professional", "2468")
        .with_delay(3)
        .with_intensity(Intensity::Persistent);
    handle.arm(config).await.unwrap();
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.phase, CallPhase::Waiting);
    assert_eq!(snapshot.waiting_secs, Some(3));

    let started = tokio::time::Instant::now();
    handle.wait_for(|s| s.phase == CallPhase::Ringing).await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(3));

    handle.decline().unwrap();
    let snapshot = handle.wait_for(|s| s.phase == CallPhase::Waiting).await.unwrap();
    assert_eq!(snapshot.waiting_secs, Some(7));

    let snapshot = handle
        .wait_for(|s| s.phase == CallPhase::Ringing && s.ring_count == 2)
        .await
        .unwrap();
    assert_eq!(snapshot.call_count, 0);
}

#[tokio::test(start_paused = true)]
async fn override_discards_reply_in_flight() {
    init_tracing();
    let gateway = Arc::new(SlowGateway {
        calls: AtomicUsize::new(0),
    });
    let (handle, _task) = text_only(Some(gateway.clone() as Arc<dyn ReplyGateway>));

    handle.arm(CallConfig::new("social", "1357")).await.unwrap();
    handle.wait_for(|s| s.phase == CallPhase::Ringing).await.unwrap();
    handle.answer().unwrap();
    handle.wait_for(|s| s.turn.is_thinking).await.unwrap();

    handle.emergency_override().unwrap();
    let snapshot = handle.wait_for(|s| s.phase == CallPhase::Idle).await.unwrap();
    assert_eq!(snapshot.turn.active_flags(), 0);

    // Re-arm before the first reply lands; only the new call's reply may show up.
    handle.arm(CallConfig::new("family", "1357")).await.unwrap();
    handle.wait_for(|s| s.phase == CallPhase::Ringing).await.unwrap();
    handle.answer().unwrap();
    handle.wait_for(|s| s.turn.is_thinking).await.unwrap();

    let snapshot = handle.wait_for(|s| s.messages.len() == 1).await.unwrap();
    assert_eq!(snapshot.messages[0].text, "Reply 2");
    assert_eq!(snapshot.persona_id.as_deref(), Some("family"));

    tokio::time::sleep(Duration::from_secs(20)).await;
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.phase, CallPhase::Connected);
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn override_silences_reply_that_has_not_started_playing() {
    init_tracing();
    let playback = Arc::new(SlowOpenPlayback::default());
    let mut parts = CallServiceParts::text_only(
        Arc::new(PersonaRegistry::builtin()),
        LifecycleConfig::default(),
        Arc::new(ReplyService::with_seed(None, 1)),
    );
    parts.tts = Some(Arc::new(FixedTts));
    parts.playback = playback.clone();
    let (handle, _task) = CallService::spawn(parts);

    handle.arm(CallConfig::new("family", "1234")).await.unwrap();
    handle.wait_for(|s| s.phase == CallPhase::Ringing).await.unwrap();
    handle.answer().unwrap();
    let snapshot = handle
        .wait_for(|s| s.turn.is_speaking && s.messages.len() == 1)
        .await
        .unwrap();
    assert!(snapshot.messages[0].has_audio());

    handle.emergency_override().unwrap();
    handle.wait_for(|s| s.phase == CallPhase::Idle).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(playback.audible.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn call_clock_counts_from_answer() {
    init_tracing();
    let (handle, _task) = text_only(None);

    handle.arm(CallConfig::new("professional", "1234")).await.unwrap();
    handle.wait_for(|s| s.phase == CallPhase::Ringing).await.unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;

    handle.answer().unwrap();
    handle.wait_for(|s| s.phase == CallPhase::Connected).await.unwrap();
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(handle.snapshot().duration_secs, 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.snapshot().duration_secs, 1);
}

#[tokio::test(start_paused = true)]
async fn spoken_reply_plays_before_turn_completes() {
    init_tracing();
    let playback = Arc::new(TimedPlayback::default());
    let ringer = Arc::new(LogRinger::default());
    let mut parts = CallServiceParts::text_only(
        Arc::new(PersonaRegistry::builtin()),
        LifecycleConfig::default(),
        Arc::new(ReplyService::with_seed(None, 1)),
    );
    parts.tts = Some(Arc::new(FixedTts));
    parts.playback = playback.clone();
    parts.ringer = ringer.clone();
    let (handle, _task) = CallService::spawn(parts);
    let mut notifications = handle.subscribe();

    handle
        .arm(CallConfig::new("family", "9999").with_ringtone("urgent"))
        .await
        .unwrap();
    handle.wait_for(|s| s.phase == CallPhase::Ringing).await.unwrap();
    handle.answer().unwrap();

    next_matching(&mut notifications, |n| matches!(n, CallNotification::MessageAppended { .. })).await;
    let snapshot = handle.wait_for(|s| s.turn.is_speaking).await.unwrap();
    assert!(snapshot.messages[0].has_audio());
    assert_eq!(snapshot.turn.current_speaker, Some(Role::Receiver));

    let started = tokio::time::Instant::now();
    next_matching(&mut notifications, |n| matches!(n, CallNotification::TurnComplete)).await;
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(playback.played.load(Ordering::SeqCst), 1);
    assert_eq!(
        *ringer.log.lock().unwrap(),
        vec!["start:urgent".to_string(), "stop".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn wrong_pin_counts_down_and_right_pin_disarms() {
    init_tracing();
    let (handle, _task) = text_only(None);
    let mut notifications = handle.subscribe();

    handle
        .arm(CallConfig::new("family", "4321").with_delay(30))
        .await
        .unwrap();
    assert_eq!(handle.snapshot().pin_attempts_remaining, 3);

    handle.request_pin_check("0000").unwrap();
    let rejected = next_matching(&mut notifications, |n| matches!(n, CallNotification::PinRejected { .. })).await;
    assert!(matches!(rejected, CallNotification::PinRejected { attempts_remaining: 2 }));

    for digit in "4321".chars() {
        handle.press_pin_digit(digit).unwrap();
    }
    next_matching(&mut notifications, |n| matches!(n, CallNotification::PinAccepted)).await;
    let snapshot = handle.wait_for(|s| s.phase == CallPhase::Idle).await.unwrap();
    assert!(snapshot.persona_id.is_none());
}

#[tokio::test]
async fn handle_reports_closed_service() {
    let (handle, task) = text_only(None);
    handle.shutdown().unwrap();
    task.await.unwrap();
    assert!(handle.answer().is_err());
    assert!(handle.arm(CallConfig::new("family", "1234")).await.is_err());
}
