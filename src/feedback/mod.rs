//! Rule-based coaching cues derived from transcript text.
//!
//! Pure text analysis: filler-word detection against a fixed lexicon and a
//! speaking-rate estimate over the segment's audio range. The engine keeps
//! nothing but a short rolling history of recent cues.

use serde::Serialize;
use std::collections::VecDeque;

use crate::config::FeedbackConfig;

/// Filler lexicon, matched case-insensitively on whole words. Multi-word
/// entries match consecutive token runs.
pub const FILLER_LEXICON: &[&str] = &[
    "um",
    "uh",
    "er",
    "ah",
    "like",
    "you know",
    "i mean",
    "sort of",
    "kind of",
    "actually",
    "basically",
    "literally",
];

/// Rolling cue history cap.
pub const CUE_HISTORY_CAP: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CueKind {
    Filler,
    Pace,
}

/// One advisory coaching cue. Never blocks anything.
#[derive(Debug, Clone, Serialize)]
pub struct Cue {
    pub kind: CueKind,
    pub message: String,
}

/// Lowercased word tokens, split on everything except letters, digits and
/// apostrophes.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn count_sequence(tokens: &[String], needle: &[&str]) -> usize {
    if needle.is_empty() || tokens.len() < needle.len() {
        return 0;
    }
    tokens
        .windows(needle.len())
        .filter(|window| window.iter().zip(needle).all(|(t, n)| t == n))
        .count()
}

/// Occurrences of each lexicon entry in the text, skipping zero counts.
pub fn filler_counts(text: &str) -> Vec<(&'static str, usize)> {
    let tokens = tokenize(text);
    FILLER_LEXICON
        .iter()
        .filter_map(|entry| {
            let needle: Vec<&str> = entry.split_whitespace().collect();
            let count = count_sequence(&tokens, &needle);
            (count > 0).then_some((*entry, count))
        })
        .collect()
}

pub fn word_count(text: &str) -> usize {
    tokenize(text).len()
}

/// Words per minute over the given audio duration. `None` when the
/// duration is zero or there are no words to rate.
pub fn speaking_rate_wpm(words: usize, duration_ms: u64) -> Option<f64> {
    if duration_ms == 0 || words == 0 {
        return None;
    }
    Some(words as f64 * 60_000.0 / duration_ms as f64)
}

/// Analyze one transcript window. Pure function of its inputs.
pub fn analyze_segment(
    config: &FeedbackConfig,
    text: &str,
    audio_start: u64,
    audio_end: u64,
) -> Vec<Cue> {
    let mut cues = Vec::new();

    for (filler, count) in filler_counts(text) {
        let message = if count == 1 {
            format!("Filler \"{}\" slipped in", filler)
        } else {
            format!("Filler \"{}\" heard {} times", filler, count)
        };
        cues.push(Cue {
            kind: CueKind::Filler,
            message,
        });
    }

    let words = word_count(text);
    let duration_ms = audio_end.saturating_sub(audio_start);
    if let Some(wpm) = speaking_rate_wpm(words, duration_ms) {
        if wpm > config.fast_wpm {
            cues.push(Cue {
                kind: CueKind::Pace,
                message: format!("Pace is rushed ({:.0} wpm), try slowing down", wpm),
            });
        } else if wpm < config.slow_wpm {
            cues.push(Cue {
                kind: CueKind::Pace,
                message: format!("Pace is slow ({:.0} wpm), try picking it up", wpm),
            });
        }
    }

    cues
}

/// Stateful wrapper holding the bounded cue history.
#[derive(Debug)]
pub struct FeedbackEngine {
    config: FeedbackConfig,
    history: VecDeque<Cue>,
}

impl FeedbackEngine {
    pub fn new(config: FeedbackConfig) -> Self {
        Self {
            config,
            history: VecDeque::with_capacity(CUE_HISTORY_CAP),
        }
    }

    /// Analyze a finalized segment and fold its cues into the history.
    pub fn observe(&mut self, text: &str, audio_start: u64, audio_end: u64) -> Vec<Cue> {
        let cues = analyze_segment(&self.config, text, audio_start, audio_end);
        for cue in &cues {
            if self.history.len() == CUE_HISTORY_CAP {
                self.history.pop_front();
            }
            self.history.push_back(cue.clone());
        }
        cues
    }

    /// The most recent cues, oldest first. Never more than
    /// [`CUE_HISTORY_CAP`] entries.
    pub fn recent_cues(&self) -> impl Iterator<Item = &Cue> {
        self.history.iter()
    }
}
