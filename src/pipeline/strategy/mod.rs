//! Scoring strategies.
//!
//! Every strategy takes one [`Document`] and one [`CategoryDictionary`] and
//! selects at most one category. Instances are shared by all messages, so a
//! strategy keeps no per-message state: everything it accumulates while
//! scoring lives on the stack of `analyze`.
//!
//! What a strategy derives from its dictionary alone (compiled patterns,
//! lemmatised phrases) is built once when the slot is bound and kept in a
//! read-only [`Compiled`] table.

mod advert;
mod mention;
mod phrase;
mod weighted;

pub use advert::AdvertSource;
pub use mention::{LastMentioned, MostFrequentCategory};
pub use phrase::{LastTargetPhrase, MostFrequentTargetPhrase};
pub use weighted::MostValuableWord;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::dictionary::{AnswerTagDictionary, CategoryDictionary};
use crate::error::StrategyError;
use crate::pipeline::comparator::WordComparator;
use crate::pipeline::types::Slot;
use crate::text::{Document, Normalizer};

/// Default reply-turn marker of the transcript format.
pub const DEFAULT_REPLY_MARKER: &str = "\nабонент:";
/// Default operator-turn marker of the transcript format.
pub const DEFAULT_TURN_MARKER: &str = "\nоператор:";
/// Category reported when the advert-source question got no answer.
pub const DEFAULT_NO_ANSWER: &str = "Нет ответа";
/// Joins the two categories of a tied weighted score.
pub const DEFAULT_TIE_SEPARATOR: &str = ", ";

/// A category-selection strategy.
pub trait Strategy: Send + Sync {
    /// Short label for logging.
    fn name(&self) -> &'static str;

    /// Select a category for `document`, or `None` when nothing matched.
    fn analyze(
        &self,
        document: &Document,
        dictionary: &CategoryDictionary,
        slot: Slot,
    ) -> Result<Option<String>, StrategyError>;
}

/// A table derived from one dictionary, kept with the dictionary it came from.
#[derive(Debug, Clone)]
pub(crate) struct Compiled<T> {
    source: CategoryDictionary,
    table: T,
}

impl<T: Clone> Compiled<T> {
    pub(crate) fn new(
        source: &CategoryDictionary,
        compile: impl FnOnce(&CategoryDictionary) -> Result<T, StrategyError>,
    ) -> Result<Self, StrategyError> {
        Ok(Self {
            table: compile(source)?,
            source: source.clone(),
        })
    }

    /// The table for `dictionary`: borrowed when it is the bound dictionary,
    /// compiled for this call otherwise.
    pub(crate) fn table_for<'a>(
        compiled: Option<&'a Self>,
        dictionary: &CategoryDictionary,
        compile: impl FnOnce(&CategoryDictionary) -> Result<T, StrategyError>,
    ) -> Result<Cow<'a, T>, StrategyError> {
        match compiled {
            Some(compiled) if compiled.source == *dictionary => {
                Ok(Cow::Borrowed(&compiled.table))
            }
            _ => compile(dictionary).map(Cow::Owned),
        }
    }
}

/// Strategy selection as written in the pipeline file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    MostFrequentCategory,
    LastMentioned,
    AdvertSource {
        #[serde(default = "default_reply_marker")]
        reply_marker: String,
        #[serde(default = "default_turn_marker")]
        turn_marker: String,
        #[serde(default = "default_no_answer")]
        no_answer: String,
    },
    MostFrequentTargetPhrase,
    LastTargetPhrase {
        /// Category returned as soon as one of its phrases closes the transcript.
        #[serde(default)]
        terminal_category: Option<String>,
    },
    MostValuableWord {
        /// Per-category multipliers; categories not listed weigh 1.0.
        #[serde(default)]
        weights: HashMap<String, f64>,
        #[serde(default = "default_tie_separator")]
        separator: String,
    },
}

fn default_reply_marker() -> String {
    DEFAULT_REPLY_MARKER.to_string()
}

fn default_turn_marker() -> String {
    DEFAULT_TURN_MARKER.to_string()
}

fn default_no_answer() -> String {
    DEFAULT_NO_ANSWER.to_string()
}

fn default_tie_separator() -> String {
    DEFAULT_TIE_SEPARATOR.to_string()
}

impl StrategyKind {
    /// Instantiate the configured strategy, compiled against the slot's `categories`.
    pub fn build(
        &self,
        comparator: WordComparator,
        normalizer: Arc<dyn Normalizer>,
        answer_tags: Arc<AnswerTagDictionary>,
        categories: &CategoryDictionary,
    ) -> Result<Arc<dyn Strategy>, StrategyError> {
        let strategy: Arc<dyn Strategy> = match self {
            Self::MostFrequentCategory => {
                Arc::new(MostFrequentCategory::new(comparator).with_dictionary(categories)?)
            }
            Self::LastMentioned => {
                Arc::new(LastMentioned::new(comparator).with_dictionary(categories)?)
            }
            Self::AdvertSource {
                reply_marker,
                turn_marker,
                no_answer,
            } => Arc::new(AdvertSource::new(
                reply_marker.clone(),
                turn_marker.clone(),
                no_answer.clone(),
                answer_tags,
            )),
            Self::MostFrequentTargetPhrase => Arc::new(
                MostFrequentTargetPhrase::new(normalizer).with_dictionary(categories)?,
            ),
            Self::LastTargetPhrase { terminal_category } => Arc::new(
                LastTargetPhrase::new(normalizer, terminal_category.clone())
                    .with_dictionary(categories)?,
            ),
            Self::MostValuableWord { weights, separator } => Arc::new(
                MostValuableWord::new(normalizer, weights.clone(), separator.clone())
                    .with_dictionary(categories)?,
            ),
        };
        Ok(strategy)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::text::{Document, LexiconNormalizer, Normalizer};

    /// Normaliser with a small Russian lexicon and no stop-words.
    pub fn normalizer() -> Arc<dyn Normalizer> {
        Arc::new(LexiconNormalizer::new(
            [
                ("катаракту", "катаракта"),
                ("катаракты", "катаракта"),
                ("записаться", "записать"),
                ("запишите", "записать"),
                ("операцию", "операция"),
                ("отвечает", "отвечать"),
                ("лазерную", "лазерный"),
                ("коррекцию", "коррекция"),
            ]
            .into_iter()
            .map(|(w, l)| (w.to_string(), l.to_string())),
            [],
        ))
    }

    pub fn document(text: &str) -> Document {
        Document::new(text, normalizer().as_ref())
    }

    /// Wraps [`normalizer`] and counts how often text is lemmatised.
    pub struct CountingNormalizer {
        inner: Arc<dyn Normalizer>,
        lemma_calls: AtomicUsize,
    }

    impl CountingNormalizer {
        pub fn new() -> Self {
            Self {
                inner: normalizer(),
                lemma_calls: AtomicUsize::new(0),
            }
        }

        pub fn lemma_calls(&self) -> usize {
            self.lemma_calls.load(Ordering::SeqCst)
        }
    }

    impl Normalizer for CountingNormalizer {
        fn lemmas(&self, text: &str) -> Vec<String> {
            self.lemma_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.lemmas(text)
        }

        fn normal_form(&self, word: &str) -> String {
            self.inner.normal_form(word)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_kind_deserializes_with_defaults() {
        let kind: StrategyKind = serde_json::from_str(r#"{"kind": "advert_source"}"#).unwrap();
        assert_eq!(
            kind,
            StrategyKind::AdvertSource {
                reply_marker: DEFAULT_REPLY_MARKER.into(),
                turn_marker: DEFAULT_TURN_MARKER.into(),
                no_answer: DEFAULT_NO_ANSWER.into(),
            }
        );

        let kind: StrategyKind =
            serde_json::from_str(r#"{"kind": "most_valuable_word", "weights": {"A": 2.5}}"#)
                .unwrap();
        match kind {
            StrategyKind::MostValuableWord { weights, separator } => {
                assert_eq!(weights["A"], 2.5);
                assert_eq!(separator, DEFAULT_TIE_SEPARATOR);
            }
            other => panic!("Expected MostValuableWord, got {:?}", other),
        }
    }

    #[test]
    fn builds_every_kind() {
        let normalizer = test_support::normalizer();
        let comparator = WordComparator::new(Default::default(), Arc::clone(&normalizer));
        let tags = Arc::new(AnswerTagDictionary::default());
        let categories = CategoryDictionary::from_pairs([("Катаракта", vec!["катаракту"])]);
        let kinds = [
            (StrategyKind::MostFrequentCategory, "most_frequent_category"),
            (StrategyKind::LastMentioned, "last_mentioned"),
            (
                serde_json::from_str(r#"{"kind": "advert_source"}"#).unwrap(),
                "advert_source",
            ),
            (StrategyKind::MostFrequentTargetPhrase, "most_frequent_target_phrase"),
            (
                StrategyKind::LastTargetPhrase {
                    terminal_category: None,
                },
                "last_target_phrase",
            ),
            (
                StrategyKind::MostValuableWord {
                    weights: HashMap::new(),
                    separator: ", ".into(),
                },
                "most_valuable_word",
            ),
        ];
        for (kind, name) in kinds {
            let strategy = kind
                .build(
                    comparator.clone(),
                    Arc::clone(&normalizer),
                    Arc::clone(&tags),
                    &categories,
                )
                .unwrap();
            assert_eq!(strategy.name(), name);
        }
    }
}
