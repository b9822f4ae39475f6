//! Word comparison used by the token-level strategies.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;

use crate::error::StrategyError;
use crate::text::Normalizer;

/// Similarity threshold of the fuzzy comparator when none is configured.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.99;

/// How a token is compared against a dictionary phrase, as configured per slot.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComparatorSpec {
    /// Byte-for-byte equality.
    Exact,
    /// Normalised Levenshtein similarity at or above `threshold`.
    Fuzzy {
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
    /// The phrase occurs in the token as a whole word.
    WholeWord,
    /// Token and phrase reduce to the same normal form.
    #[default]
    Lemma,
}

fn default_threshold() -> f64 {
    DEFAULT_FUZZY_THRESHOLD
}

/// A configured comparator, ready to use.
#[derive(Clone)]
pub struct WordComparator {
    spec: ComparatorSpec,
    normalizer: Arc<dyn Normalizer>,
}

impl fmt::Debug for WordComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WordComparator")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl WordComparator {
    pub fn new(spec: ComparatorSpec, normalizer: Arc<dyn Normalizer>) -> Self {
        Self { spec, normalizer }
    }

    pub fn spec(&self) -> &ComparatorSpec {
        &self.spec
    }

    /// Prepare `phrase` for comparison against many tokens.
    ///
    /// Whole-word patterns are compiled and lemma normal forms resolved here,
    /// once, instead of on every token.
    pub fn prepare(&self, phrase: &str) -> Result<PhraseMatcher, StrategyError> {
        let matcher = match &self.spec {
            ComparatorSpec::Exact => PhraseMatcher::Exact(phrase.to_string()),
            ComparatorSpec::Fuzzy { threshold } => PhraseMatcher::Fuzzy {
                phrase: phrase.to_string(),
                threshold: *threshold,
            },
            ComparatorSpec::WholeWord => PhraseMatcher::WholeWord(whole_word_pattern(phrase)?),
            ComparatorSpec::Lemma => PhraseMatcher::Lemma(self.normalizer.normal_form(phrase)),
        };
        Ok(matcher)
    }

    /// The form of `token` that prepared matchers compare against.
    ///
    /// Only the lemma comparator rewrites tokens; call this once per token.
    pub fn token_form<'a>(&self, token: &'a str) -> Cow<'a, str> {
        match self.spec {
            ComparatorSpec::Lemma => Cow::Owned(self.normalizer.normal_form(token)),
            _ => Cow::Borrowed(token),
        }
    }

    /// Does `token` match the dictionary `phrase`?
    ///
    /// Convenience for one-off checks; loops should [`prepare`](Self::prepare) instead.
    pub fn matches(&self, token: &str, phrase: &str) -> Result<bool, StrategyError> {
        Ok(self.prepare(phrase)?.matches(&self.token_form(token)))
    }
}

/// One dictionary phrase, prepared by [`WordComparator::prepare`].
#[derive(Debug, Clone)]
pub enum PhraseMatcher {
    Exact(String),
    Fuzzy { phrase: String, threshold: f64 },
    WholeWord(Regex),
    /// Normal form of the phrase.
    Lemma(String),
}

impl PhraseMatcher {
    /// `token` must come from [`WordComparator::token_form`] of the preparing comparator.
    pub fn matches(&self, token: &str) -> bool {
        match self {
            Self::Exact(phrase) | Self::Lemma(phrase) => token == phrase.as_str(),
            Self::Fuzzy { phrase, threshold } => {
                token == phrase.as_str() || similarity(token, phrase) >= *threshold
            }
            Self::WholeWord(pattern) => pattern.is_match(token),
        }
    }
}

/// Case-insensitive `\b`-delimited pattern for a literal phrase.
pub(crate) fn whole_word_pattern(phrase: &str) -> Result<Regex, StrategyError> {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(phrase))).map_err(|source| {
        StrategyError::Pattern {
            phrase: phrase.to_string(),
            source,
        }
    })
}

/// Levenshtein similarity in `[0, 1]`, computed over chars.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
