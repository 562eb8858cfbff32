//! Transcript-to-phrase matching shared by the wake and cancel detectors.
//!
//! A transcript is normalized into words (lowercase, apostrophes dropped,
//! other punctuation treated as whitespace) and then searched for any of the
//! configured phrases. A phrase is found when its words appear contiguously,
//! when they appear run together as one word ("heycat"), or when every word
//! of four or more letters is within one edit of the spoken word.
//!
//! Rejection phrases guard against phonetic near-misses: if one is present
//! and the target phrase is not present verbatim, the transcript is rejected.
//! A rejection that is itself part of the phrase found ("hey" inside
//! "hey kitty") does not count against that phrase.

use crate::stt::transcriber::Transcription;

/// Split text into normalized words.
pub fn normalize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != '\'' && *c != '\u{2019}')
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

/// Levenshtein edit distance between two strings (character-level).
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let m = a.len();
    let n = b.len();

    let mut prev = (0..=n).collect::<Vec<_>>();
    let mut curr = vec![0; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Words shorter than this must match exactly.
const FUZZY_MIN_WORD_LEN: usize = 4;

fn words_close(expected: &str, heard: &str) -> bool {
    expected == heard
        || (expected.chars().count() >= FUZZY_MIN_WORD_LEN && edit_distance(expected, heard) <= 1)
}

fn contains_exact(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && haystack
            .windows(needle.len())
            .any(|window| window == needle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    Exact,
    Joined,
    Fuzzy,
}

#[derive(Debug, Clone)]
struct Phrase {
    display: String,
    words: Vec<String>,
    joined: String,
}

impl Phrase {
    fn new(text: &str) -> Option<Self> {
        let words = normalize(text);
        if words.is_empty() {
            return None;
        }
        Some(Self {
            display: words.join(" "),
            joined: words.concat(),
            words,
        })
    }

    /// Best way this phrase occurs in `words`, and how many words it spans.
    fn find_in(&self, words: &[String]) -> Option<(MatchKind, usize)> {
        if contains_exact(words, &self.words) {
            return Some((MatchKind::Exact, self.words.len()));
        }
        if self.words.len() > 1 && words.iter().any(|w| *w == self.joined) {
            return Some((MatchKind::Joined, 1));
        }
        let fuzzy = words.windows(self.words.len()).any(|window| {
            window
                .iter()
                .zip(&self.words)
                .all(|(heard, expected)| words_close(expected, heard))
        });
        fuzzy.then_some((MatchKind::Fuzzy, self.words.len()))
    }
}

/// A phrase found in a transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseMatch {
    /// The configured phrase that was found, normalized.
    pub phrase: String,
    /// The normalized transcript it was found in.
    pub matched_text: String,
    pub confidence: f32,
    /// True if the phrase appeared verbatim.
    pub exact: bool,
}

/// Verdict for one transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Phrase found with enough confidence.
    Matched(PhraseMatch),
    /// Phrase found, but the engine was not confident enough.
    BelowThreshold(PhraseMatch),
    /// A near-miss phrase was heard instead of the target.
    Rejected { rejection: String, text: String },
    /// Nothing relevant was said.
    NoMatch { text: String },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched(_))
    }
}

/// Matches transcripts against a phrase set.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    phrases: Vec<Phrase>,
    rejections: Vec<Phrase>,
    confidence_threshold: f32,
    max_extra_words: Option<usize>,
}

impl PhraseMatcher {
    /// Build a matcher. Phrases that normalize to nothing are dropped.
    pub fn new<S: AsRef<str>>(phrases: &[S], confidence_threshold: f32) -> Self {
        Self {
            phrases: phrases
                .iter()
                .filter_map(|p| Phrase::new(p.as_ref()))
                .collect(),
            rejections: Vec::new(),
            confidence_threshold,
            max_extra_words: None,
        }
    }

    pub fn with_rejections<S: AsRef<str>>(mut self, rejections: &[S]) -> Self {
        self.rejections = rejections
            .iter()
            .filter_map(|p| Phrase::new(p.as_ref()))
            .collect();
        self
    }

    /// Limit how many other words may surround the phrase.
    pub fn with_max_extra_words(mut self, max_extra_words: usize) -> Self {
        self.max_extra_words = Some(max_extra_words);
        self
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        self.phrases.iter().map(|p| p.display.as_str())
    }

    /// Judge a transcript.
    pub fn evaluate(&self, transcription: &Transcription) -> MatchOutcome {
        let words = normalize(&transcription.text);
        let text = words.join(" ");
        if words.is_empty() {
            return MatchOutcome::NoMatch { text };
        }

        let found = self
            .phrases
            .iter()
            .filter_map(|phrase| phrase.find_in(&words).map(|(kind, span)| (phrase, kind, span)))
            .min_by_key(|(_, kind, _)| *kind as u8);

        let exact = matches!(found, Some((_, MatchKind::Exact, _)));
        let target = found.map(|(phrase, _, _)| phrase);
        if !exact
            && let Some(rejection) = self.rejections.iter().find(|r| {
                contains_exact(&words, &r.words)
                    && !target.is_some_and(|phrase| contains_exact(&phrase.words, &r.words))
            })
        {
            return MatchOutcome::Rejected {
                rejection: rejection.display.clone(),
                text,
            };
        }

        let Some((phrase, kind, span)) = found else {
            return MatchOutcome::NoMatch { text };
        };

        if let Some(max_extra) = self.max_extra_words
            && words.len().saturating_sub(span) > max_extra
        {
            return MatchOutcome::NoMatch { text };
        }

        let found = PhraseMatch {
            phrase: phrase.display.clone(),
            matched_text: text,
            confidence: transcription.confidence,
            exact: kind == MatchKind::Exact,
        };

        if transcription.confidence < self.confidence_threshold {
            MatchOutcome::BelowThreshold(found)
        } else {
            MatchOutcome::Matched(found)
        }
    }
}
