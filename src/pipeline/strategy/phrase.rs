//! Phrase-level strategies.
//!
//! Dictionary phrases are lemmatised the same way as the transcript and then
//! searched as whole words in the space-joined lemma text, so multi-word
//! phrases match only as a contiguous run.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use super::{Compiled, Strategy};
use crate::dictionary::CategoryDictionary;
use crate::error::StrategyError;
use crate::pipeline::comparator::whole_word_pattern;
use crate::pipeline::types::Slot;
use crate::text::{Document, Normalizer};

/// A dictionary phrase reduced to lemmas, with its search pattern.
#[derive(Debug, Clone)]
pub(super) struct LemmaPhrase {
    pub lemmas: String,
    pub pattern: Regex,
}

/// Lemmatised phrases per category, in dictionary order.
pub(super) type LemmaPhrases = Vec<Vec<LemmaPhrase>>;

/// Lemmatise `phrase`. Phrases that reduce to nothing (only stop-words) yield `None`.
pub(super) fn lemma_phrase(
    phrase: &str,
    normalizer: &dyn Normalizer,
) -> Result<Option<LemmaPhrase>, StrategyError> {
    let lemmas = normalizer.lemmas(phrase).join(" ");
    if lemmas.is_empty() {
        return Ok(None);
    }
    let pattern = whole_word_pattern(&lemmas)?;
    Ok(Some(LemmaPhrase { lemmas, pattern }))
}

/// Lemmatise and compile every phrase of `dictionary`.
pub(super) fn lemma_phrases(
    dictionary: &CategoryDictionary,
    normalizer: &dyn Normalizer,
) -> Result<LemmaPhrases, StrategyError> {
    dictionary
        .iter()
        .map(|(_, phrases)| {
            phrases
                .iter()
                .filter_map(|phrase| lemma_phrase(phrase, normalizer).transpose())
                .collect()
        })
        .collect()
}

/// Picks the category whose phrases occur most often.
///
/// Ties go to the category listed last in the dictionary.
pub struct MostFrequentTargetPhrase {
    normalizer: Arc<dyn Normalizer>,
    compiled: Option<Compiled<LemmaPhrases>>,
}

impl MostFrequentTargetPhrase {
    pub fn new(normalizer: Arc<dyn Normalizer>) -> Self {
        Self {
            normalizer,
            compiled: None,
        }
    }

    /// Lemmatise and compile `dictionary` now rather than on every message.
    pub fn with_dictionary(
        mut self,
        dictionary: &CategoryDictionary,
    ) -> Result<Self, StrategyError> {
        let compiled = Compiled::new(dictionary, |d| lemma_phrases(d, self.normalizer.as_ref()))?;
        self.compiled = Some(compiled);
        Ok(self)
    }
}

impl Strategy for MostFrequentTargetPhrase {
    fn name(&self) -> &'static str {
        "most_frequent_target_phrase"
    }

    fn analyze(
        &self,
        document: &Document,
        dictionary: &CategoryDictionary,
        slot: Slot,
    ) -> Result<Option<String>, StrategyError> {
        let compiled = Compiled::table_for(self.compiled.as_ref(), dictionary, |d| {
            lemma_phrases(d, self.normalizer.as_ref())
        })?;
        let haystack = document.joined_lemmas();
        let mut best: Option<(&str, usize)> = None;

        for ((category, _), phrases) in dictionary.iter().zip(compiled.iter()) {
            let mut total = 0;
            for phrase in phrases {
                let count = phrase.pattern.find_iter(&haystack).count();
                if count > 0 {
                    debug!(
                        slot = slot.name(),
                        category,
                        phrase = %phrase.lemmas,
                        count,
                        "Phrase matches"
                    );
                }
                total += count;
            }
            if best.is_none_or(|(_, top)| total >= top) {
                best = Some((category, total));
            }
        }

        match best {
            Some((category, total)) if total > 0 => {
                info!(slot = slot.name(), category, total, "Selected category");
                Ok(Some(category.to_string()))
            }
            _ => {
                info!(slot = slot.name(), "No matches found");
                Ok(None)
            }
        }
    }
}

/// Picks the category whose phrase starts furthest into the transcript.
///
/// Each phrase contributes its left-most occurrence. The optional terminal
/// category wins outright when the last occurrence of one of its phrases ends
/// the transcript, either exactly or followed only by a fragment of the same
/// phrase.
pub struct LastTargetPhrase {
    normalizer: Arc<dyn Normalizer>,
    terminal_category: Option<String>,
    compiled: Option<Compiled<LemmaPhrases>>,
}

impl LastTargetPhrase {
    pub fn new(normalizer: Arc<dyn Normalizer>, terminal_category: Option<String>) -> Self {
        Self {
            normalizer,
            terminal_category,
            compiled: None,
        }
    }

    /// Lemmatise and compile `dictionary` now rather than on every message.
    pub fn with_dictionary(
        mut self,
        dictionary: &CategoryDictionary,
    ) -> Result<Self, StrategyError> {
        let compiled = Compiled::new(dictionary, |d| lemma_phrases(d, self.normalizer.as_ref()))?;
        self.compiled = Some(compiled);
        Ok(self)
    }

    fn is_terminal(&self, category: &str) -> bool {
        self.terminal_category.as_deref() == Some(category)
    }
}

impl Strategy for LastTargetPhrase {
    fn name(&self) -> &'static str {
        "last_target_phrase"
    }

    fn analyze(
        &self,
        document: &Document,
        dictionary: &CategoryDictionary,
        slot: Slot,
    ) -> Result<Option<String>, StrategyError> {
        let compiled = Compiled::table_for(self.compiled.as_ref(), dictionary, |d| {
            lemma_phrases(d, self.normalizer.as_ref())
        })?;
        let haystack = document.joined_lemmas();
        let mut latest: Option<(&str, usize)> = None;

        for ((category, _), phrases) in dictionary.iter().zip(compiled.iter()) {
            for phrase in phrases {
                let Some(first) = phrase.pattern.find(&haystack) else {
                    continue;
                };

                if self.is_terminal(category) {
                    let last = phrase.pattern.find_iter(&haystack).last().unwrap_or(first);
                    let trailing = haystack[last.end()..].trim();
                    if trailing.is_empty()
                        || phrase.lemmas.starts_with(trailing)
                        || phrase.lemmas.ends_with(trailing)
                    {
                        info!(
                            slot = slot.name(),
                            category,
                            phrase = %phrase.lemmas,
                            "Terminal phrase closes the transcript"
                        );
                        return Ok(Some(category.to_string()));
                    }
                }

                debug!(
                    slot = slot.name(),
                    category,
                    phrase = %phrase.lemmas,
                    position = first.start(),
                    "Phrase found"
                );
                if latest.is_none_or(|(_, pos)| first.start() > pos) {
                    latest = Some((category, first.start()));
                }
            }
        }

        match latest {
            Some((category, position)) => {
                info!(slot = slot.name(), category, position, "Last positioned category");
                Ok(Some(category.to_string()))
            }
            None => {
                info!(slot = slot.name(), "No matches found");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::strategy::test_support::{CountingNormalizer, document, normalizer};

    const TERMINAL: &str = "Не отвечает";

    fn last_target() -> LastTargetPhrase {
        LastTargetPhrase::new(normalizer(), Some(TERMINAL.to_string()))
    }

    fn reply_dictionary() -> CategoryDictionary {
        CategoryDictionary::from_pairs([
            (TERMINAL, vec!["не отвечает"]),
            ("Ответ", vec!["отвечает"]),
            ("Запись", vec!["запишите"]),
        ])
    }

    #[test]
    fn lemmatizes_phrases_before_matching() {
        let dict = CategoryDictionary::from_pairs([("Катаракта", vec!["катаракты"])]);
        let strategy = MostFrequentTargetPhrase::new(normalizer());
        let doc = document("Про катаракту и катаракту");
        assert_eq!(
            strategy.analyze(&doc, &dict, Slot::TargetWords1).unwrap().as_deref(),
            Some("Катаракта")
        );
    }

    #[test]
    fn counts_multi_word_phrases_as_contiguous_runs() {
        let dict = CategoryDictionary::from_pairs([
            ("Лазер", vec!["лазерную коррекцию"]),
            ("Коррекция", vec!["коррекцию"]),
        ]);
        let strategy = MostFrequentTargetPhrase::new(normalizer());
        // One full phrase, two bare "коррекция" lemmas.
        let doc = document("лазерную коррекцию, потом коррекцию");
        assert_eq!(
            strategy.analyze(&doc, &dict, Slot::TargetWords2).unwrap().as_deref(),
            Some("Коррекция")
        );
    }

    #[test]
    fn phrase_frequency_tie_goes_to_last_category() {
        let doc = document("катаракту операцию");
        let strategy = MostFrequentTargetPhrase::new(normalizer());

        let dict = CategoryDictionary::from_pairs([
            ("Катаракта", vec!["катаракта"]),
            ("Операция", vec!["операция"]),
        ]);
        assert_eq!(
            strategy.analyze(&doc, &dict, Slot::TargetWords1).unwrap().as_deref(),
            Some("Операция")
        );

        let reversed = CategoryDictionary::from_pairs([
            ("Операция", vec!["операция"]),
            ("Катаракта", vec!["катаракта"]),
        ]);
        assert_eq!(
            strategy.analyze(&doc, &reversed, Slot::TargetWords1).unwrap().as_deref(),
            Some("Катаракта")
        );
    }

    #[test]
    fn phrase_frequency_absent_without_matches() {
        let dict = CategoryDictionary::from_pairs([("Катаракта", vec!["катаракта"])]);
        let strategy = MostFrequentTargetPhrase::new(normalizer());
        let doc = document("глаукома");
        assert_eq!(strategy.analyze(&doc, &dict, Slot::TargetWords1).unwrap(), None);
    }

    #[test]
    fn whole_words_only() {
        let dict = CategoryDictionary::from_pairs([("Лазер", vec!["лазер"])]);
        let strategy = MostFrequentTargetPhrase::new(normalizer());
        let doc = document("лазерный");
        assert_eq!(strategy.analyze(&doc, &dict, Slot::TargetWords1).unwrap(), None);
    }

    #[test]
    fn last_target_prefers_right_most_phrase() {
        let dict = CategoryDictionary::from_pairs([
            ("Запись", vec!["запишите"]),
            ("Операция", vec!["операцию"]),
        ]);
        let doc = document("операцию обсудили, запишите меня");
        assert_eq!(
            last_target().analyze(&doc, &dict, Slot::TargetWords5).unwrap().as_deref(),
            Some("Запись")
        );
    }

    #[test]
    fn last_target_uses_left_most_occurrence_of_each_phrase() {
        let dict = CategoryDictionary::from_pairs([
            ("Запись", vec!["запишите"]),
            ("Операция", vec!["операцию"]),
        ]);
        // "записать" occurs last, but its first occurrence precedes "операция".
        let doc = document("запишите, операцию, запишите");
        assert_eq!(
            last_target().analyze(&doc, &dict, Slot::TargetWords5).unwrap().as_deref(),
            Some("Операция")
        );
    }

    #[test]
    fn terminal_category_wins_at_end_of_text() {
        // Without the special case "Ответ" would win: its match starts later.
        let doc = document("запишите, а он не отвечает");
        assert_eq!(
            last_target()
                .analyze(&doc, &reply_dictionary(), Slot::TargetWords5)
                .unwrap()
                .as_deref(),
            Some(TERMINAL)
        );

        let plain = LastTargetPhrase::new(normalizer(), None);
        assert_eq!(
            plain
                .analyze(&doc, &reply_dictionary(), Slot::TargetWords5)
                .unwrap()
                .as_deref(),
            Some("Ответ")
        );
    }

    #[test]
    fn terminal_category_wins_when_followed_by_own_fragment() {
        let doc = document("он не отвечает не");
        assert_eq!(
            last_target()
                .analyze(&doc, &reply_dictionary(), Slot::TargetWords5)
                .unwrap()
                .as_deref(),
            Some(TERMINAL)
        );
    }

    #[test]
    fn terminal_category_competes_normally_mid_text() {
        let doc = document("не отвечает, потом запишите");
        assert_eq!(
            last_target()
                .analyze(&doc, &reply_dictionary(), Slot::TargetWords5)
                .unwrap()
                .as_deref(),
            Some("Запись")
        );
    }

    #[test]
    fn last_target_absent_without_matches() {
        let doc = document("здравствуйте");
        assert_eq!(
            last_target()
                .analyze(&doc, &reply_dictionary(), Slot::TargetWords5)
                .unwrap(),
            None
        );
    }

    #[test]
    fn terminal_phrase_repeated_at_end_still_wins() {
        // The first "не отвечать" is mid-text; the last one closes the transcript.
        let doc = document("не отвечает, запишите, не отвечает");
        assert_eq!(
            last_target()
                .analyze(&doc, &reply_dictionary(), Slot::TargetWords5)
                .unwrap()
                .as_deref(),
            Some(TERMINAL)
        );
    }

    #[test]
    fn bound_dictionary_is_lemmatised_once() {
        let dict = reply_dictionary();
        let doc = document("запишите, а он не отвечает");

        let counting = Arc::new(CountingNormalizer::new());
        let last = LastTargetPhrase::new(counting.clone(), Some(TERMINAL.to_string()))
            .with_dictionary(&dict)
            .unwrap();
        let frequent = MostFrequentTargetPhrase::new(counting.clone())
            .with_dictionary(&dict)
            .unwrap();
        let after_build = counting.lemma_calls();
        assert_eq!(after_build, 2 * dict.phrases().count());

        for _ in 0..3 {
            assert_eq!(
                last.analyze(&doc, &dict, Slot::TargetWords5).unwrap().as_deref(),
                Some(TERMINAL)
            );
            assert!(frequent.analyze(&doc, &dict, Slot::TargetWords1).unwrap().is_some());
        }
        assert_eq!(counting.lemma_calls(), after_build);

        // Any other dictionary is still honoured, compiled for the call.
        let other = CategoryDictionary::from_pairs([("Запись", vec!["запишите"])]);
        assert_eq!(
            last.analyze(&doc, &other, Slot::TargetWords5).unwrap().as_deref(),
            Some("Запись")
        );
        assert_eq!(counting.lemma_calls(), after_build + 1);
    }
}
