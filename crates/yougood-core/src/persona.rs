//! Caller personas: who is calling, how the model should play them, and the canned
//! lines used when no reply gateway answers.
//!
//! Personas differ only in data. The registry starts with the three built-in scenarios
//! and may be replaced or extended from a TOML file at startup:
//!
//! ```toml
//! [[persona]]
//! id = "sibling"
//! display_name = "Sis"
//! system_prompt = "You're calling your sibling..."
//!
//! [persona.fallback]
//! greeting = "Hey, can you come get me?"
//! what_happened = "My car won't start."
//! acknowledged = "Thanks. How long?"
//! how_long = "Okay, I'll wait."
//! goodbye = "Thanks, bye."
//! generic = ["Please hurry.", "I'm stuck here."]
//! ```

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Persona used when a config does not name one.
pub const DEFAULT_PERSONA: &str = "family";

/// Canned replies, one per keyword group plus a generic pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackLines {
    pub greeting: String,
    pub what_happened: String,
    pub acknowledged: String,
    pub how_long: String,
    pub goodbye: String,
    pub generic: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    /// Shown on the incoming-call screen unless the config names the caller.
    pub display_name: String,
    pub system_prompt: String,
    /// Voice used when the config does not pick one.
    #[serde(default)]
    pub default_voice: Option<String>,
    pub fallback: FallbackLines,
}

#[derive(Debug, Deserialize)]
struct PersonaFile {
    #[serde(default)]
    replace_builtin: bool,
    #[serde(default)]
    persona: Vec<Persona>,
}

/// Personas by id.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: BTreeMap<String, Arc<Persona>>,
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PersonaRegistry {
    /// The three built-in scenarios: `family`, `professional`, `social`.
    pub fn builtin() -> Self {
        let mut registry = Self {
            personas: BTreeMap::new(),
        };
        for persona in builtin_personas() {
            registry.insert(persona);
        }
        registry
    }

    /// Built-ins, then the personas in `path` (same id replaces). With
    /// `replace_builtin = true` at the top of the file, only the file's personas are kept.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut registry = Self::builtin();
        let Some(path) = path else {
            return Ok(registry);
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::PersonaFile(format!("{}: {}", path.display(), e)))?;
        let file: PersonaFile = toml::from_str(&raw)
            .map_err(|e| CoreError::PersonaFile(format!("{}: {}", path.display(), e)))?;
        if file.replace_builtin {
            registry.personas.clear();
        }
        for persona in file.persona {
            validate(&persona)?;
            registry.insert(persona);
        }
        if registry.personas.is_empty() {
            return Err(CoreError::PersonaFile(format!(
                "{}: no personas defined",
                path.display()
            )));
        }
        info!(count = registry.len(), "persona registry loaded");
        Ok(registry)
    }

    pub fn insert(&mut self, persona: Persona) {
        self.personas.insert(persona.id.clone(), Arc::new(persona));
    }

    pub fn get(&self, id: &str) -> Option<Arc<Persona>> {
        self.personas.get(id).cloned()
    }

    pub fn resolve(&self, id: &str) -> CoreResult<Arc<Persona>> {
        self.get(id)
            .ok_or_else(|| CoreError::UnknownPersona(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.personas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

fn validate(persona: &Persona) -> CoreResult<()> {
    if persona.id.trim().is_empty() {
        return Err(CoreError::PersonaFile("persona id must not be empty".to_string()));
    }
    if persona.fallback.generic.is_empty() {
        return Err(CoreError::PersonaFile(format!(
            "persona '{}' needs at least one generic fallback line",
            persona.id
        )));
    }
    Ok(())
}

fn lines(greeting: &str, what_happened: &str, acknowledged: &str, how_long: &str, goodbye: &str, generic: &[&str]) -> FallbackLines {
    FallbackLines {
        greeting: greeting.to_string(),
        what_happened: what_happened.to_string(),
        acknowledged: acknowledged.to_string(),
        how_long: how_long.to_string(),
        goodbye: goodbye.to_string(),
        generic: generic.iter().map(|s| s.to_string()).collect(),
    }
}

fn builtin_personas() -> Vec<Persona> {
    vec![
        Persona {
            id: "family".to_string(),
            display_name: "Mom".to_string(),
            system_prompt: "You're Mom calling about an emergency. Your child needs an excuse to leave.\n\n\
                RULES:\n\
                - MAX 10 words per response\n\
                - Sound natural, slightly stressed\n\
                - Use \"honey\", \"sweetie\", contractions\n\n\
                Emergency: pipe burst, water everywhere.\n\n\
                Examples:\n\
                - \"Honey, pipe burst. Need you home now.\"\n\
                - \"Water everywhere, please hurry.\"\n\
                - \"Okay, drive safe. Love you.\""
                .to_string(),
            default_voice: None,
            fallback: lines(
                "Honey, pipe burst. Need you home now.",
                "Water everywhere. Please just come.",
                "Thank you sweetie. How long?",
                "Okay, just hurry please.",
                "Love you, hurry. Bye.",
                &[
                    "Please just come home.",
                    "I really need you here.",
                    "Can you leave now?",
                    "Hurry please, honey.",
                ],
            ),
        },
        Persona {
            id: "professional".to_string(),
            display_name: "Office".to_string(),
            system_prompt: "You're a coworker calling about a work emergency. The person needs an excuse to leave.\n\n\
                RULES:\n\
                - MAX 10 words per response\n\
                - Sound professional but urgent\n\
                - Use their name or \"hey\"\n\n\
                Emergency: Server down, client presentation in 1 hour.\n\n\
                Examples:\n\
                - \"Hey, server's down. We need you now.\"\n\
                - \"Client presentation in an hour. Critical.\"\n\
                - \"Thanks, get here ASAP.\""
                .to_string(),
            default_voice: None,
            fallback: lines(
                "Hey, server's down. Need you at the office.",
                "Production crashed. Client demo in an hour.",
                "Thanks. How soon can you get here?",
                "Okay, just hurry. It's critical.",
                "See you soon. Thanks.",
                &[
                    "We really need you here.",
                    "This is pretty urgent.",
                    "Can you head over now?",
                    "It's kind of a crisis.",
                ],
            ),
        },
        Persona {
            id: "social".to_string(),
            display_name: "Best Friend".to_string(),
            system_prompt: "You're calling your best friend who needs an excuse to leave. You have a personal crisis.\n\n\
                RULES:\n\
                - MAX 10 words per response\n\
                - Sound upset/stressed but not dramatic\n\
                - Use casual friend language, maybe some slang\n\n\
                Crisis: Got dumped, crying, need support.\n\n\
                Examples:\n\
                - \"Hey, I really need you right now.\"\n\
                - \"Jake just broke up with me.\"\n\
                - \"Please, can you come over?\""
                .to_string(),
            default_voice: None,
            fallback: lines(
                "Hey, I really need you right now.",
                "Jake just broke up with me. I'm a mess.",
                "Thank you. Can you come soon?",
                "Okay, I'll be here. Hurry.",
                "Thanks, love you. Bye.",
                &[
                    "Please, I need you.",
                    "Can you come over?",
                    "I really can't be alone.",
                    "Just get here okay?",
                ],
            ),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_three_scenarios() {
        let registry = PersonaRegistry::builtin();
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["family", "professional", "social"]);
        let mom = registry.resolve(DEFAULT_PERSONA).unwrap();
        assert_eq!(mom.display_name, "Mom");
        assert_eq!(mom.fallback.greeting, "Honey, pipe burst. Need you home now.");
        assert_eq!(mom.fallback.generic.len(), 4);
    }

    #[test]
    fn unknown_persona_is_an_error() {
        let registry = PersonaRegistry::builtin();
        assert!(matches!(registry.resolve("uncle"), Err(CoreError::UnknownPersona(_))));
    }

    #[test]
    fn file_extends_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("personas.toml");
        std::fs::write(
            &path,
            r#"
[[persona]]
id = "family"
display_name = "Dad"
system_prompt = "You're Dad."
[persona.fallback]
greeting = "Kiddo, the dog got out."
what_happened = "Gate was open."
acknowledged = "Thanks. How long?"
how_long = "Okay, hurry."
goodbye = "Bye kiddo."
generic = ["Come help me look."]

[[persona]]
id = "sibling"
display_name = "Sis"
system_prompt = "You're a sibling."
default_voice = "voice-123"
[persona.fallback]
greeting = "Can you come get me?"
what_happened = "Car won't start."
acknowledged = "Thanks."
how_long = "I'll wait."
goodbye = "Bye."
generic = ["Please hurry."]
"#,
        )
        .unwrap();
        let registry = PersonaRegistry::load(Some(&path)).unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.resolve("family").unwrap().display_name, "Dad");
        assert_eq!(
            registry.resolve("sibling").unwrap().default_voice.as_deref(),
            Some("voice-123")
        );
    }

    #[test]
    fn persona_without_generic_pool_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("personas.toml");
        std::fs::write(
            &path,
            r#"
replace_builtin = true
[[persona]]
id = "empty"
display_name = "Nobody"
system_prompt = "..."
[persona.fallback]
greeting = "a"
what_happened = "b"
acknowledged = "c"
how_long = "d"
goodbye = "e"
generic = []
"#,
        )
        .unwrap();
        assert!(PersonaRegistry::load(Some(&path)).is_err());
    }
}
