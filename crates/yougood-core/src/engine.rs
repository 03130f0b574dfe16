//! **TurnEngine**: one conversational exchange at a time.
//!
//! A turn runs listen → record → transcribe → think → speak. The engine holds exactly
//! one [`TurnActivity`], so two sub-states can never be active together. Every async
//! step gets a fresh [`Ticket`]; a completion carrying any other ticket is stale and
//! dropped.

use crate::effect::{CallNotification, Completion, Effect, Ticket};
use crate::model::{Message, Role, TurnState};
use crate::persona::Persona;
use crate::reply::{ChatTurn, ReplyRequest};
use std::sync::Arc;
use tracing::{debug, info};
use yougood_voice::{CaptureEvent, SpeechAudio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnActivity {
    Idle,
    /// A recording cycle was requested; grace delay or microphone acquisition.
    Listening { ticket: Ticket },
    Recording { ticket: Ticket },
    Transcribing { ticket: Ticket },
    /// Waiting for the reply line.
    Thinking { ticket: Ticket },
    /// Waiting for synthesis, then for playback.
    Speaking { ticket: Ticket },
}

impl TurnActivity {
    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            TurnActivity::Idle => None,
            TurnActivity::Listening { ticket }
            | TurnActivity::Recording { ticket }
            | TurnActivity::Transcribing { ticket }
            | TurnActivity::Thinking { ticket }
            | TurnActivity::Speaking { ticket } => Some(*ticket),
        }
    }

    pub fn turn_state(&self) -> TurnState {
        let mut state = TurnState::default();
        match self {
            TurnActivity::Idle | TurnActivity::Listening { .. } => {}
            TurnActivity::Recording { .. } => {
                state.is_recording = true;
                state.current_speaker = Some(Role::Caller);
            }
            TurnActivity::Transcribing { .. } => {
                state.is_transcribing = true;
                state.current_speaker = Some(Role::Caller);
            }
            TurnActivity::Thinking { .. } => {
                state.is_thinking = true;
                state.current_speaker = Some(Role::Caller);
            }
            TurnActivity::Speaking { .. } => {
                state.is_speaking = true;
                state.current_speaker = Some(Role::Receiver);
            }
        }
        state
    }
}

/// Borrowed session state a turn operates on.
pub struct TurnContext<'a> {
    pub persona: &'a Arc<Persona>,
    pub voice_id: &'a str,
    pub messages: &'a mut Vec<Message>,
}

impl TurnContext<'_> {
    fn request(&self) -> ReplyRequest {
        ReplyRequest {
            persona: Arc::clone(self.persona),
            transcript: self.messages.iter().map(ChatTurn::from).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnEngine {
    activity: TurnActivity,
    last_ticket: u64,
    /// Whether caller speech is captured at all (microphone and STT available).
    listen: bool,
}

impl TurnEngine {
    pub fn new(listen: bool) -> Self {
        Self::resume(listen, 0)
    }

    /// A fresh engine whose tickets continue after `last_ticket`, so completions
    /// addressed to an earlier session never match.
    pub fn resume(listen: bool, last_ticket: u64) -> Self {
        Self {
            activity: TurnActivity::Idle,
            last_ticket,
            listen,
        }
    }

    pub fn last_ticket(&self) -> u64 {
        self.last_ticket
    }

    pub fn activity(&self) -> TurnActivity {
        self.activity
    }

    pub fn turn_state(&self) -> TurnState {
        self.activity.turn_state()
    }

    fn next_ticket(&mut self) -> Ticket {
        self.last_ticket += 1;
        Ticket(self.last_ticket)
    }

    /// The receiver speaks first: request the opening line.
    pub fn begin_call(&mut self, ctx: TurnContext<'_>) -> Vec<Effect> {
        let ticket = self.next_ticket();
        self.activity = TurnActivity::Thinking { ticket };
        vec![Effect::RequestReply {
            ticket,
            request: ctx.request(),
        }]
    }

    /// Drop whatever is in flight. Later completions find no matching ticket.
    pub fn stop(&mut self) -> Vec<Effect> {
        self.activity = TurnActivity::Idle;
        self.last_ticket += 1;
        vec![Effect::StopListening, Effect::StopPlayback]
    }

    /// A typed caller line.
    pub fn submit(&mut self, ctx: TurnContext<'_>, text: &str) -> Vec<Effect> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        let mut effects = Vec::new();
        match self.activity {
            TurnActivity::Thinking { ticket } | TurnActivity::Speaking { ticket } => {
                debug!(%ticket, "caller turn ignored, receiver turn in progress");
                return effects;
            }
            TurnActivity::Listening { .. } | TurnActivity::Recording { .. } => {
                effects.push(Effect::CancelCapture);
            }
            TurnActivity::Transcribing { ticket } => {
                debug!(%ticket, "typed turn supersedes transcription");
            }
            TurnActivity::Idle => {}
        }
        effects.extend(self.start_reply(ctx, text));
        effects
    }

    fn start_reply(&mut self, ctx: TurnContext<'_>, text: &str) -> Vec<Effect> {
        let message = Message::caller(text);
        ctx.messages.push(message.clone());
        let ticket = self.next_ticket();
        self.activity = TurnActivity::Thinking { ticket };
        vec![
            Effect::Notify(CallNotification::MessageAppended { message }),
            Effect::RequestReply {
                ticket,
                request: ctx.request(),
            },
        ]
    }

    /// Ask for another recording cycle, or go idle when listening is off.
    fn listen(&mut self) -> Vec<Effect> {
        if !self.listen {
            self.activity = TurnActivity::Idle;
            return Vec::new();
        }
        let ticket = self.next_ticket();
        self.activity = TurnActivity::Listening { ticket };
        vec![Effect::Listen { ticket }]
    }

    fn finish_turn(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::Notify(CallNotification::TurnComplete)];
        effects.extend(self.listen());
        effects
    }

    pub fn on_capture(&mut self, event: CaptureEvent) -> Vec<Effect> {
        let cycle = Ticket(event.cycle());
        let current = match self.activity {
            TurnActivity::Listening { ticket } | TurnActivity::Recording { ticket } => Some(ticket),
            _ => None,
        };
        if current != Some(cycle) {
            debug!(ticket = %cycle, "stale capture event discarded");
            return Vec::new();
        }
        match event {
            CaptureEvent::Started { .. } => {
                self.activity = TurnActivity::Recording { ticket: cycle };
                Vec::new()
            }
            CaptureEvent::Captured { clip, .. } => {
                let ticket = self.next_ticket();
                self.activity = TurnActivity::Transcribing { ticket };
                vec![Effect::Transcribe { ticket, clip }]
            }
            CaptureEvent::Discarded { bytes, .. } => {
                debug!(bytes, "near-silent clip, listening again");
                self.listen()
            }
            CaptureEvent::Unavailable { reason, .. } => {
                self.activity = TurnActivity::Idle;
                vec![Effect::Notify(CallNotification::MicrophoneUnavailable { reason })]
            }
        }
    }

    pub fn complete(&mut self, ctx: TurnContext<'_>, completion: Completion) -> Vec<Effect> {
        let ticket = completion.ticket();
        if self.activity.ticket() != Some(ticket) {
            debug!(%ticket, "stale completion discarded");
            return Vec::new();
        }
        match (self.activity, completion) {
            (TurnActivity::Transcribing { .. }, Completion::Transcript { text, .. }) => {
                match text.as_deref().map(str::trim) {
                    Some(text) if !text.is_empty() => {
                        let text = text.to_string();
                        self.start_reply(ctx, &text)
                    }
                    _ => {
                        debug!(%ticket, "nothing transcribed, listening again");
                        self.listen()
                    }
                }
            }
            (TurnActivity::Thinking { .. }, Completion::Reply { text, .. }) => {
                let ticket = self.next_ticket();
                self.activity = TurnActivity::Speaking { ticket };
                vec![Effect::Synthesize {
                    ticket,
                    text,
                    voice_id: ctx.voice_id.to_string(),
                }]
            }
            (TurnActivity::Speaking { .. }, Completion::Speech { text, audio, .. }) => {
                let audio = audio.filter(|a| !a.is_empty());
                let message = Message::receiver(text, audio.clone());
                ctx.messages.push(message.clone());
                let mut effects = vec![Effect::Notify(CallNotification::MessageAppended { message })];
                match audio {
                    Some(audio) => effects.push(self.play(audio)),
                    None => {
                        info!("speech unavailable, reply shown as text");
                        effects.extend(self.finish_turn());
                    }
                }
                effects
            }
            (TurnActivity::Speaking { .. }, Completion::PlaybackFinished { .. }) => self.finish_turn(),
            (activity, completion) => {
                debug!(?activity, ?completion, "completion does not match activity, discarded");
                Vec::new()
            }
        }
    }

    fn play(&mut self, audio: SpeechAudio) -> Effect {
        let ticket = self.next_ticket();
        self.activity = TurnActivity::Speaking { ticket };
        Effect::Play { ticket, audio }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::PersonaRegistry;
    use yougood_voice::CapturedClip;

    struct Harness {
        engine: TurnEngine,
        persona: Arc<Persona>,
        messages: Vec<Message>,
        states: Vec<TurnState>,
    }

    impl Harness {
        fn new(listen: bool) -> Self {
            Self {
                engine: TurnEngine::new(listen),
                persona: PersonaRegistry::builtin().resolve("family").unwrap(),
                messages: Vec::new(),
                states: Vec::new(),
            }
        }

        fn record(&mut self, effects: Vec<Effect>) -> Vec<Effect> {
            self.states.push(self.engine.turn_state());
            effects
        }

        fn begin(&mut self) -> Vec<Effect> {
            let ctx = TurnContext {
                persona: &self.persona,
                voice_id: "v1",
                messages: &mut self.messages,
            };
            let effects = self.engine.begin_call(ctx);
            self.record(effects)
        }

        fn submit(&mut self, text: &str) -> Vec<Effect> {
            let ctx = TurnContext {
                persona: &self.persona,
                voice_id: "v1",
                messages: &mut self.messages,
            };
            let effects = self.engine.submit(ctx, text);
            self.record(effects)
        }

        fn complete(&mut self, completion: Completion) -> Vec<Effect> {
            let ctx = TurnContext {
                persona: &self.persona,
                voice_id: "v1",
                messages: &mut self.messages,
            };
            let effects = self.engine.complete(ctx, completion);
            self.record(effects)
        }

        fn capture(&mut self, event: CaptureEvent) -> Vec<Effect> {
            let effects = self.engine.on_capture(event);
            self.record(effects)
        }
    }

    fn reply_ticket(effects: &[Effect]) -> Ticket {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::RequestReply { ticket, .. } => Some(*ticket),
                _ => None,
            })
            .expect("reply requested")
    }

    fn synth_ticket(effects: &[Effect]) -> Ticket {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::Synthesize { ticket, .. } => Some(*ticket),
                _ => None,
            })
            .expect("synthesis requested")
    }

    fn listen_ticket(effects: &[Effect]) -> Option<Ticket> {
        effects.iter().find_map(|e| match e {
            Effect::Listen { ticket } => Some(*ticket),
            _ => None,
        })
    }

    fn audio() -> SpeechAudio {
        SpeechAudio::new(vec![1, 2, 3], "audio/mpeg")
    }

    #[test]
    fn full_spoken_turn_keeps_one_substate() {
        let mut h = Harness::new(true);
        let effects = h.begin();
        assert!(h.engine.turn_state().is_thinking);
        let t = reply_ticket(&effects);

        let effects = h.complete(Completion::Reply { ticket: t, text: "Honey, pipe burst.".into() });
        let t = synth_ticket(&effects);
        assert!(h.engine.turn_state().is_speaking);

        let effects = h.complete(Completion::Speech { ticket: t, text: "Honey, pipe burst.".into(), audio: Some(audio()) });
        assert_eq!(h.messages.len(), 1);
        assert!(h.messages[0].has_audio());
        let t = match effects.last() {
            Some(Effect::Play { ticket, .. }) => *ticket,
            other => panic!("expected play, got {:?}", other),
        };

        let effects = h.complete(Completion::PlaybackFinished { ticket: t });
        assert!(effects.iter().any(|e| matches!(e, Effect::Notify(CallNotification::TurnComplete))));
        let cycle = listen_ticket(&effects).unwrap();

        h.capture(CaptureEvent::Started { cycle: cycle.0 });
        assert!(h.engine.turn_state().is_recording);
        let effects = h.capture(CaptureEvent::Captured { cycle: cycle.0, clip: CapturedClip::new(vec![0.1; 8000], 16000) });
        assert!(h.engine.turn_state().is_transcribing);
        let t = match &effects[0] {
            Effect::Transcribe { ticket, .. } => *ticket,
            other => panic!("expected transcribe, got {:?}", other),
        };

        let effects = h.complete(Completion::Transcript { ticket: t, text: Some("what happened?".into()) });
        assert!(h.engine.turn_state().is_thinking);
        assert_eq!(h.messages[1].role, Role::Caller);
        let request = effects
            .iter()
            .find_map(|e| match e {
                Effect::RequestReply { request, .. } => Some(request.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(request.transcript.len(), 2);
        assert_eq!(request.last_caller_text(), "what happened?");

        assert!(h.states.iter().all(|s| s.active_flags() <= 1));
    }

    #[test]
    fn synthesis_failure_completes_turn_with_text() {
        let mut h = Harness::new(false);
        let t = reply_ticket(&h.begin());
        let t = synth_ticket(&h.complete(Completion::Reply { ticket: t, text: "hi".into() }));
        let effects = h.complete(Completion::Speech { ticket: t, text: "hi".into(), audio: None });
        assert_eq!(h.messages.len(), 1);
        assert!(!h.messages[0].has_audio());
        assert!(effects.iter().any(|e| matches!(e, Effect::Notify(CallNotification::TurnComplete))));
        assert!(listen_ticket(&effects).is_none());
        assert_eq!(h.engine.activity(), TurnActivity::Idle);
    }

    #[test]
    fn empty_transcript_listens_again() {
        let mut h = Harness::new(true);
        let t = reply_ticket(&h.begin());
        let t = synth_ticket(&h.complete(Completion::Reply { ticket: t, text: "hi".into() }));
        let cycle = listen_ticket(&h.complete(Completion::Speech { ticket: t, text: "hi".into(), audio: None })).unwrap();
        let effects = h.capture(CaptureEvent::Captured { cycle: cycle.0, clip: CapturedClip::new(vec![0.1; 800], 16000) });
        let t = match &effects[0] {
            Effect::Transcribe { ticket, .. } => *ticket,
            _ => unreachable!(),
        };
        let effects = h.complete(Completion::Transcript { ticket: t, text: Some("   ".into()) });
        assert!(listen_ticket(&effects).is_some());
        assert_eq!(h.messages.len(), 1);
        let cycle = listen_ticket(&effects).unwrap();
        let effects = h.capture(CaptureEvent::Discarded { cycle: cycle.0, bytes: 44 });
        assert!(listen_ticket(&effects).is_some());
    }

    #[test]
    fn stale_completions_are_dropped() {
        let mut h = Harness::new(false);
        let t = reply_ticket(&h.begin());
        let effects = h.complete(Completion::Reply { ticket: Ticket(t.0 + 40), text: "late".into() });
        assert!(effects.is_empty());
        h.engine.stop();
        assert!(h.complete(Completion::Reply { ticket: t, text: "late".into() }).is_empty());
        assert!(h.messages.is_empty());
    }

    #[test]
    fn resumed_engine_never_reissues_tickets() {
        let mut h = Harness::new(false);
        let old = reply_ticket(&h.begin());
        h.engine = TurnEngine::resume(false, h.engine.last_ticket());
        let new = reply_ticket(&h.begin());
        assert!(new.0 > old.0);
        assert!(h.complete(Completion::Reply { ticket: old, text: "late".into() }).is_empty());
        assert!(h.engine.turn_state().is_thinking);
    }

    #[test]
    fn submit_while_receiver_busy_is_ignored() {
        let mut h = Harness::new(false);
        h.begin();
        assert!(h.submit("hello").is_empty());
        assert!(h.messages.is_empty());
    }

    #[test]
    fn typed_submit_cancels_listening_capture() {
        let mut h = Harness::new(true);
        let t = reply_ticket(&h.begin());
        let t = synth_ticket(&h.complete(Completion::Reply { ticket: t, text: "hi".into() }));
        let cycle = listen_ticket(&h.complete(Completion::Speech { ticket: t, text: "hi".into(), audio: None })).unwrap();
        h.capture(CaptureEvent::Started { cycle: cycle.0 });
        let effects = h.submit("on my way");
        assert!(matches!(effects[0], Effect::CancelCapture));
        assert!(h.engine.turn_state().is_thinking);
        // the aborted cycle can no longer land
        assert!(h.capture(CaptureEvent::Captured { cycle: cycle.0, clip: CapturedClip::new(vec![0.1; 800], 16000) }).is_empty());
    }

    #[test]
    fn microphone_unavailable_goes_idle_without_retry() {
        let mut h = Harness::new(true);
        let t = reply_ticket(&h.begin());
        let t = synth_ticket(&h.complete(Completion::Reply { ticket: t, text: "hi".into() }));
        let cycle = listen_ticket(&h.complete(Completion::Speech { ticket: t, text: "hi".into(), audio: None })).unwrap();
        let effects = h.capture(CaptureEvent::Unavailable { cycle: cycle.0, reason: "denied".into() });
        assert!(matches!(effects[0], Effect::Notify(CallNotification::MicrophoneUnavailable { .. })));
        assert_eq!(h.engine.activity(), TurnActivity::Idle);
        assert!(listen_ticket(&effects).is_none());
        // typed input still works
        assert!(h.submit("okay").iter().any(|e| matches!(e, Effect::RequestReply { .. })));
    }
}
