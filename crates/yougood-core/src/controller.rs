//! **CallController**: the call lifecycle state machine and the PIN kill switch.
//!
//! Phases run idle → waiting → ringing → connected → ended. Every input is a
//! synchronous transition that mutates the [`CallSession`] and returns the
//! [`Effect`]s for the runtime to carry out. Timers are tick counters on the session,
//! advanced by [`CallController::tick`] once per second.

use crate::config::LifecycleConfig;
use crate::effect::{CallNotification, Completion, Effect};
use crate::engine::{TurnContext, TurnEngine};
use crate::error::{CoreError, CoreResult};
use crate::model::{CallConfig, CallPhase, Message, TurnState};
use crate::persona::{Persona, PersonaRegistry};
use crate::pin::{PinOutcome, PinPad};
use crate::timers::{TimerKind, TimerSet};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use yougood_voice::CaptureEvent;

/// Everything that belongs to one armed call. Replaced wholesale on return to idle.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub phase: CallPhase,
    pub config: Option<CallConfig>,
    pub persona: Option<Arc<Persona>>,
    pub messages: Vec<Message>,
    pub engine: TurnEngine,
    /// Seconds connected in the current call.
    pub duration_secs: u32,
    /// Calls answered since arming. Only `answer` increments it.
    pub call_count: u32,
    /// Calls presented (rang) since arming.
    pub ring_count: u32,
    pub pin: PinPad,
    pub timers: TimerSet,
}

impl CallSession {
    /// `last_ticket` carries the ticket counter across sessions.
    fn new(listen: bool, pin_attempts: u32, last_ticket: u64) -> Self {
        Self {
            phase: CallPhase::Idle,
            config: None,
            persona: None,
            messages: Vec::new(),
            engine: TurnEngine::resume(listen, last_ticket),
            duration_secs: 0,
            call_count: 0,
            ring_count: 0,
            pin: PinPad::new(pin_attempts),
            timers: TimerSet::new(),
        }
    }
}

/// Read-only view published after every transition.
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub phase: CallPhase,
    pub persona_id: Option<String>,
    pub caller_name: Option<String>,
    pub messages: Vec<Message>,
    pub duration_secs: u32,
    pub turn: TurnState,
    pub call_count: u32,
    pub ring_count: u32,
    /// Seconds until the next ring while waiting.
    pub waiting_secs: Option<u32>,
    pub pin_attempts_remaining: u32,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            phase: CallPhase::Idle,
            persona_id: None,
            caller_name: None,
            messages: Vec::new(),
            duration_secs: 0,
            turn: TurnState::default(),
            call_count: 0,
            ring_count: 0,
            waiting_secs: None,
            pin_attempts_remaining: 0,
        }
    }
}

pub struct CallController {
    personas: Arc<PersonaRegistry>,
    lifecycle: LifecycleConfig,
    listen: bool,
    session: CallSession,
}

impl CallController {
    /// `listen` enables the microphone loop; without it callers type their lines.
    pub fn new(personas: Arc<PersonaRegistry>, lifecycle: LifecycleConfig, listen: bool) -> Self {
        let session = CallSession::new(listen, lifecycle.pin_attempts, 0);
        Self {
            personas,
            lifecycle,
            listen,
            session,
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.session.phase
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let s = &self.session;
        let caller_name = match (&s.config, &s.persona) {
            (Some(config), _) if !config.caller_name.trim().is_empty() => Some(config.caller_name.clone()),
            (_, Some(persona)) => Some(persona.display_name.clone()),
            _ => None,
        };
        let waiting_secs = match s.phase {
            CallPhase::Waiting => s
                .timers
                .remaining(TimerKind::PreCall)
                .or_else(|| s.timers.remaining(TimerKind::NextCall)),
            _ => None,
        };
        CallSnapshot {
            phase: s.phase,
            persona_id: s.persona.as_ref().map(|p| p.id.clone()),
            caller_name,
            messages: s.messages.clone(),
            duration_secs: s.duration_secs,
            turn: s.engine.turn_state(),
            call_count: s.call_count,
            ring_count: s.ring_count,
            waiting_secs,
            pin_attempts_remaining: s.pin.attempts_remaining(),
        }
    }

    fn set_phase(&mut self, to: CallPhase, effects: &mut Vec<Effect>) {
        let from = self.session.phase;
        if from == to {
            return;
        }
        self.session.phase = to;
        info!(phase = %to, from = %from, "call phase changed");
        effects.push(Effect::Notify(CallNotification::PhaseChanged { from, to }));
    }

    fn can_ring_again(&self) -> bool {
        let s = &self.session;
        let ceiling = self.lifecycle.persistent_call_ceiling;
        s.config.as_ref().is_some_and(CallConfig::is_persistent)
            && s.ring_count < ceiling
            && s.call_count < ceiling
    }

    /// Arm a call. Allowed from idle, or from waiting (replaces the pending countdown).
    pub fn arm(&mut self, config: CallConfig) -> CoreResult<Vec<Effect>> {
        let phase = self.session.phase;
        if !matches!(phase, CallPhase::Idle | CallPhase::Waiting) {
            return Err(CoreError::InvalidConfig(format!(
                "cannot arm while a call is {}",
                phase
            )));
        }
        config.validate(&self.personas)?;
        let persona = self.personas.resolve(&config.persona_id)?;
        let delay = config.delay();

        let mut session = CallSession::new(
            self.listen,
            self.lifecycle.pin_attempts,
            self.session.engine.last_ticket(),
        );
        session.phase = phase;
        session.persona = Some(persona);
        session.config = Some(config);
        self.session = session;
        info!(persona = %self.session.persona.as_ref().map(|p| p.id.as_str()).unwrap_or(""), delay, "call armed");

        let mut effects = Vec::new();
        if delay == 0 {
            self.enter_ringing(&mut effects);
        } else {
            self.session.timers.arm(TimerKind::PreCall, delay);
            self.set_phase(CallPhase::Waiting, &mut effects);
        }
        Ok(effects)
    }

    pub fn cancel_waiting(&mut self) -> Vec<Effect> {
        if self.session.phase != CallPhase::Waiting {
            debug!(phase = %self.session.phase, "cancel_waiting ignored");
            return Vec::new();
        }
        self.reset_to_idle()
    }

    pub fn answer(&mut self) -> Vec<Effect> {
        if self.session.phase != CallPhase::Ringing {
            debug!(phase = %self.session.phase, "answer ignored");
            return Vec::new();
        }
        let mut effects = vec![Effect::StopRinging];
        let s = &mut self.session;
        s.call_count += 1;
        s.duration_secs = 0;
        s.messages.clear();
        self.set_phase(CallPhase::Connected, &mut effects);
        effects.extend(self.with_turn(|engine, ctx| engine.begin_call(ctx)));
        effects
    }

    pub fn decline(&mut self) -> Vec<Effect> {
        if self.session.phase != CallPhase::Ringing {
            debug!(phase = %self.session.phase, "decline ignored");
            return Vec::new();
        }
        if !self.can_ring_again() {
            return self.reset_to_idle();
        }
        let mut effects = vec![Effect::StopRinging];
        self.session
            .timers
            .arm(TimerKind::NextCall, self.lifecycle.inter_call_delay_secs);
        self.set_phase(CallPhase::Waiting, &mut effects);
        effects
    }

    pub fn end_call(&mut self) -> Vec<Effect> {
        if self.session.phase != CallPhase::Connected {
            debug!(phase = %self.session.phase, "end_call ignored");
            return Vec::new();
        }
        let mut effects = self.session.engine.stop();
        if self.can_ring_again() {
            self.session
                .timers
                .arm(TimerKind::NextCall, self.lifecycle.inter_call_delay_secs);
        } else {
            self.session
                .timers
                .arm(TimerKind::EndedReset, self.lifecycle.ended_display_secs);
        }
        self.set_phase(CallPhase::Ended, &mut effects);
        effects
    }

    /// Always succeeds: back to idle with timers, capture and playback torn down.
    pub fn emergency_override(&mut self) -> Vec<Effect> {
        info!("emergency override");
        self.reset_to_idle()
    }

    /// Check a full PIN entry. Accepted in any armed phase.
    pub fn request_pin_check(&mut self, pin: &str) -> Vec<Effect> {
        let Some(safe_pin) = self.session.config.as_ref().map(|c| c.safe_pin.clone()) else {
            debug!("pin check ignored, nothing armed");
            return Vec::new();
        };
        match self.session.pin.check(pin, &safe_pin) {
            PinOutcome::Accepted => {
                info!("safe PIN accepted");
                let mut effects = vec![Effect::Notify(CallNotification::PinAccepted)];
                effects.extend(self.reset_to_idle());
                effects
            }
            PinOutcome::Rejected { attempts_remaining } => {
                info!(attempts_remaining, "safe PIN rejected");
                vec![Effect::Notify(CallNotification::PinRejected { attempts_remaining })]
            }
        }
    }

    /// Keypad entry; submits automatically once the PIN length is reached.
    pub fn press_pin_digit(&mut self, digit: char) -> Vec<Effect> {
        let Some(expected) = self.session.config.as_ref().map(|c| c.safe_pin.len()) else {
            return Vec::new();
        };
        match self.session.pin.press(digit, expected) {
            Some(entry) => self.request_pin_check(&entry),
            None => Vec::new(),
        }
    }

    pub fn delete_pin_digit(&mut self) {
        self.session.pin.delete();
    }

    pub fn submit_caller_turn(&mut self, text: &str) -> Vec<Effect> {
        if self.session.phase != CallPhase::Connected {
            debug!(phase = %self.session.phase, "caller turn ignored, not connected");
            return Vec::new();
        }
        self.with_turn(|engine, ctx| engine.submit(ctx, text))
    }

    pub fn on_capture(&mut self, event: CaptureEvent) -> Vec<Effect> {
        if self.session.phase != CallPhase::Connected {
            debug!(cycle = event.cycle(), phase = %self.session.phase, "capture event after call, discarded");
            return Vec::new();
        }
        self.session.engine.on_capture(event)
    }

    pub fn complete(&mut self, completion: Completion) -> Vec<Effect> {
        if self.session.phase != CallPhase::Connected {
            debug!(ticket = %completion.ticket(), phase = %self.session.phase, "stale completion discarded");
            return Vec::new();
        }
        self.with_turn(|engine, ctx| engine.complete(ctx, completion))
    }

    /// One second passed.
    pub fn tick(&mut self) -> Vec<Effect> {
        if self.session.phase == CallPhase::Connected {
            self.session.duration_secs += 1;
        }
        let mut effects = Vec::new();
        for fired in self.session.timers.tick() {
            match (fired, self.session.phase) {
                (TimerKind::PreCall, CallPhase::Waiting)
                | (TimerKind::NextCall, CallPhase::Waiting | CallPhase::Ended) => {
                    self.enter_ringing(&mut effects);
                }
                (TimerKind::EndedReset, CallPhase::Ended) => {
                    effects.extend(self.reset_to_idle());
                }
                (kind, phase) => debug!(?kind, %phase, "timer fired outside its phase"),
            }
        }
        effects
    }

    fn enter_ringing(&mut self, effects: &mut Vec<Effect>) {
        let s = &mut self.session;
        s.timers.cancel(TimerKind::PreCall);
        s.timers.cancel(TimerKind::NextCall);
        s.timers.cancel(TimerKind::EndedReset);
        s.messages.clear();
        s.duration_secs = 0;
        s.ring_count += 1;
        let ringtone = s
            .config
            .as_ref()
            .map(|c| c.ringtone.clone())
            .unwrap_or_default();
        effects.push(Effect::StartRinging { ringtone });
        self.set_phase(CallPhase::Ringing, effects);
    }

    fn reset_to_idle(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.session.phase {
            CallPhase::Ringing => effects.push(Effect::StopRinging),
            CallPhase::Connected => effects.extend(self.session.engine.stop()),
            _ => {}
        }
        self.session.timers.cancel_all();
        let from = self.session.phase;
        self.session = CallSession::new(
            self.listen,
            self.lifecycle.pin_attempts,
            self.session.engine.last_ticket(),
        );
        self.session.phase = from;
        self.set_phase(CallPhase::Idle, &mut effects);
        effects
    }

    fn with_turn<F>(&mut self, f: F) -> Vec<Effect>
    where
        F: FnOnce(&mut TurnEngine, TurnContext<'_>) -> Vec<Effect>,
    {
        let s = &mut self.session;
        let (Some(persona), Some(config)) = (s.persona.as_ref(), s.config.as_ref()) else {
            return Vec::new();
        };
        let voice_id = if config.voice_id.trim().is_empty() {
            persona.default_voice.as_deref().unwrap_or("")
        } else {
            config.voice_id.as_str()
        };
        let ctx = TurnContext {
            persona,
            voice_id,
            messages: &mut s.messages,
        };
        f(&mut s.engine, ctx)
    }
}
