//! Safe-exit PIN: the kill switch that ends a session from the keypad.
//!
//! Attempts are a soft deterrent. The counter clamps at 0 and the correct PIN is
//! still accepted after it runs out.

use crate::model::PIN_MAX_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    Accepted,
    Rejected { attempts_remaining: u32 },
}

/// Digit-by-digit entry plus the attempt counter.
#[derive(Debug, Clone, Default)]
pub struct PinPad {
    entered: String,
    attempts_remaining: u32,
}

impl PinPad {
    pub fn new(attempts: u32) -> Self {
        Self {
            entered: String::new(),
            attempts_remaining: attempts,
        }
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    pub fn entered_len(&self) -> usize {
        self.entered.len()
    }

    /// Append a digit. Non-digits and digits past the maximum length are ignored.
    /// Returns the full entry once it reaches `expected_len`, for auto-submit.
    pub fn press(&mut self, digit: char, expected_len: usize) -> Option<String> {
        if !digit.is_ascii_digit() || self.entered.len() >= PIN_MAX_LEN {
            return None;
        }
        self.entered.push(digit);
        (self.entered.len() == expected_len).then(|| self.entered.clone())
    }

    pub fn delete(&mut self) {
        self.entered.pop();
    }

    pub fn clear(&mut self) {
        self.entered.clear();
    }

    /// Exact match against `safe_pin`. Entered digits are cleared either way.
    pub fn check(&mut self, candidate: &str, safe_pin: &str) -> PinOutcome {
        self.entered.clear();
        if candidate == safe_pin {
            PinOutcome::Accepted
        } else {
            self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
            PinOutcome::Rejected {
                attempts_remaining: self.attempts_remaining,
            }
        }
    }
}
