//! Non-blocking debounce for the momentary input.
//!
//! Sampled once per loop iteration with the loop's timestamp:
//!
//! ```text
//! Idle ──pressed──▶ Candidate ──held ≥ debounce──▶ Confirmed ──released──▶ Cooldown ──elapsed──▶ Idle
//!                       │                          (emits Pressed)
//!                       └──released──▶ Idle
//! ```
//!
//! Holding the button after confirmation never retriggers, and release
//! bounce is swallowed by the cooldown.

use crate::config::ButtonConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Pressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPhase {
    Idle,
    Candidate { since_ms: u64 },
    Confirmed,
    Cooldown { since_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct ButtonDebouncer {
    debounce_ms: u64,
    cooldown_ms: u64,
    phase: ButtonPhase,
}

impl ButtonDebouncer {
    pub fn new(config: &ButtonConfig) -> Self {
        Self {
            debounce_ms: config.debounce_ms,
            cooldown_ms: config.cooldown_ms,
            phase: ButtonPhase::Idle,
        }
    }

    pub fn phase(&self) -> ButtonPhase {
        self.phase
    }

    /// `pressed` is the logical level, polarity already applied.
    pub fn poll(&mut self, now_ms: u64, pressed: bool) -> Option<ButtonEvent> {
        match self.phase {
            ButtonPhase::Idle => {
                if pressed {
                    self.phase = ButtonPhase::Candidate { since_ms: now_ms };
                }
                None
            }
            ButtonPhase::Candidate { since_ms } => {
                if !pressed {
                    self.phase = ButtonPhase::Idle;
                    return None;
                }
                if now_ms.saturating_sub(since_ms) < self.debounce_ms {
                    return None;
                }
                self.phase = ButtonPhase::Confirmed;
                Some(ButtonEvent::Pressed)
            }
            ButtonPhase::Confirmed => {
                if !pressed {
                    self.phase = ButtonPhase::Cooldown { since_ms: now_ms };
                }
                None
            }
            ButtonPhase::Cooldown { since_ms } => {
                if now_ms.saturating_sub(since_ms) >= self.cooldown_ms {
                    self.phase = ButtonPhase::Idle;
                }
                None
            }
        }
    }
}
