//! Text normalisation.
//!
//! The classification strategies never look at words directly: they see the
//! lemma sequence a [`Normalizer`] produces. The bundled [`LexiconNormalizer`]
//! is a lookup-table lemmatiser; a full morphological analyser can be plugged
//! in behind the same trait.

use std::collections::{HashMap, HashSet};

/// Turns raw text into normal forms.
pub trait Normalizer: Send + Sync {
    /// Lowercase, segment and lemmatise `text`, dropping stop-words.
    fn lemmas(&self, text: &str) -> Vec<String>;

    /// Normal form of a single word.
    fn normal_form(&self, word: &str) -> String;
}

/// Lemmatiser backed by a word → normal form table.
///
/// Words missing from the table are their own normal form.
#[derive(Debug, Clone, Default)]
pub struct LexiconNormalizer {
    lexicon: HashMap<String, String>,
    stop_words: HashSet<String>,
}

impl LexiconNormalizer {
    pub fn new(
        lexicon: impl IntoIterator<Item = (String, String)>,
        stop_words: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            lexicon: lexicon
                .into_iter()
                .map(|(word, lemma)| (word.to_lowercase(), lemma.to_lowercase()))
                .collect(),
            stop_words: stop_words.into_iter().map(|w| w.to_lowercase()).collect(),
        }
    }
}

impl Normalizer for LexiconNormalizer {
    fn lemmas(&self, text: &str) -> Vec<String> {
        words(&text.to_lowercase())
            .map(|word| self.normal_form(word))
            .filter(|lemma| !self.stop_words.contains(lemma))
            .collect()
    }

    fn normal_form(&self, word: &str) -> String {
        let word = word.to_lowercase();
        match self.lexicon.get(&word) {
            Some(lemma) => lemma.clone(),
            None => word,
        }
    }
}

/// Split text into word tokens. Hyphens stay inside words.
pub fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .map(|w| w.trim_matches('-'))
        .filter(|w| !w.is_empty())
}

/// One message's text as seen by the strategies.
///
/// Built fresh for every message and dropped with it.
#[derive(Debug, Clone)]
pub struct Document {
    /// Lowercased raw text (turn markers and line breaks intact).
    pub text: String,
    /// Lemma sequence, stop-words removed.
    pub lemmas: Vec<String>,
}

impl Document {
    pub fn new(text: &str, normalizer: &dyn Normalizer) -> Self {
        Self {
            text: text.to_lowercase(),
            lemmas: normalizer.lemmas(text),
        }
    }

    /// Lemmas joined by single spaces, the haystack for phrase searches.
    pub fn joined_lemmas(&self) -> String {
        self.lemmas.join(" ")
    }
}
