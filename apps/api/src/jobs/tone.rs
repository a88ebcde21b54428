//! Tone calibration for cover letters: maps the requested tone to phrasing
//! guidance that is spliced into the prompt.

use serde::{Deserialize, Serialize};

/// Tone a user can pick for a cover letter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Professional,
    Formal,
    Friendly,
    Enthusiastic,
    Confident,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Formal => "formal",
            Tone::Friendly => "friendly",
            Tone::Enthusiastic => "enthusiastic",
            Tone::Confident => "confident",
        }
    }
}

/// Phrasing calibrated to a specific tone.
#[derive(Debug, Clone)]
pub struct ToneGuidance {
    pub voice: &'static str,
    pub preferred_phrases: Vec<&'static str>,
    pub avoid_phrases: Vec<&'static str>,
}

pub fn get_tone_guidance(tone: Tone) -> ToneGuidance {
    match tone {
        Tone::Professional => ToneGuidance {
            voice: "clear, polished and direct",
            preferred_phrases: vec!["I am writing to apply for", "In my role at", "I would welcome"],
            avoid_phrases: vec!["super excited", "rockstar", "To whom it may concern"],
        },
        Tone::Formal => ToneGuidance {
            voice: "formal and reserved, full sentences, no contractions",
            preferred_phrases: vec![
                "I wish to submit my application for",
                "I would be grateful for the opportunity",
                "Yours sincerely",
            ],
            avoid_phrases: vec!["I'm", "can't", "awesome", "Hi there"],
        },
        Tone::Friendly => ToneGuidance {
            voice: "warm and approachable while staying professional",
            preferred_phrases: vec!["I'd love to", "I really enjoyed", "Thanks so much for"],
            avoid_phrases: vec!["Dear Sir or Madam", "herewith", "pursuant to"],
        },
        Tone::Enthusiastic => ToneGuidance {
            voice: "energetic and eager, showing genuine excitement for the role",
            preferred_phrases: vec!["I was thrilled to see", "I am excited to bring", "I can't wait to"],
            avoid_phrases: vec!["I suppose", "if possible", "I am merely"],
        },
        Tone::Confident => ToneGuidance {
            voice: "assured and results-focused, leading with impact",
            preferred_phrases: vec!["I delivered", "I am confident that", "My track record shows"],
            avoid_phrases: vec!["I think I might", "I hope", "I am just"],
        },
    }
}

/// Renders guidance as prompt lines.
pub fn render_guidance(tone: Tone) -> String {
    let guidance = get_tone_guidance(tone);
    format!(
        "Tone: {} ({}).\nPrefer phrasing like: {}.\nAvoid: {}.",
        tone.as_str(),
        guidance.voice,
        guidance.preferred_phrases.join("; "),
        guidance.avoid_phrases.join("; "),
    )
}
