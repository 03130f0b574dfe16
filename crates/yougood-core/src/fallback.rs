//! Local reply policy used when the reply gateway is missing or fails.
//!
//! Keyword groups are checked in a fixed order against the lowercased caller text
//! (plain substring match, first group wins). No match picks uniformly from the
//! persona's generic pool.

use crate::persona::FallbackLines;
use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    Greeting,
    WhatHappened,
    Acknowledged,
    Goodbye,
    HowLong,
    Generic,
}

/// Checked in this order.
const KEYWORD_GROUPS: [(FallbackKind, &[&str]); 5] = [
    (FallbackKind::Greeting, &["hello", "hi", "hey"]),
    (FallbackKind::WhatHappened, &["what", "happen"]),
    (
        FallbackKind::Acknowledged,
        &["coming", "on my way", "be there", "okay", "ok", "alright"],
    ),
    (FallbackKind::Goodbye, &["bye", "goodbye", "see you"]),
    (FallbackKind::HowLong, &["minutes", "soon", "long"]),
];

pub fn classify(caller_text: &str) -> FallbackKind {
    let lower = caller_text.to_lowercase();
    KEYWORD_GROUPS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(kind, _)| *kind)
        .unwrap_or(FallbackKind::Generic)
}

/// The opening line of a call: always the persona's greeting.
pub fn opening_line(lines: &FallbackLines) -> String {
    lines.greeting.clone()
}

/// Reply to `caller_text`. Empty text is the call opener and gets the greeting.
pub fn fallback_reply<R: Rng + ?Sized>(lines: &FallbackLines, caller_text: &str, rng: &mut R) -> String {
    if caller_text.trim().is_empty() {
        return opening_line(lines);
    }
    match classify(caller_text) {
        FallbackKind::Greeting => lines.greeting.clone(),
        FallbackKind::WhatHappened => lines.what_happened.clone(),
        FallbackKind::Acknowledged => lines.acknowledged.clone(),
        FallbackKind::Goodbye => lines.goodbye.clone(),
        FallbackKind::HowLong => lines.how_long.clone(),
        FallbackKind::Generic => lines
            .generic
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| lines.greeting.clone()),
    }
}
