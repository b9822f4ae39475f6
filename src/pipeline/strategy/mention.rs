//! Token-level strategies: frequency and last mention.

use tracing::{debug, info};

use super::{Compiled, Strategy};
use crate::dictionary::CategoryDictionary;
use crate::error::StrategyError;
use crate::pipeline::comparator::{PhraseMatcher, WordComparator};
use crate::pipeline::types::Slot;
use crate::text::Document;

/// Matchers per category, per phrase, in dictionary order.
type PhraseMatchers = Vec<Vec<PhraseMatcher>>;

/// Matchers per category for every whitespace-separated part of its phrases.
type PartMatchers = Vec<Vec<(String, PhraseMatcher)>>;

/// Picks the category whose phrases match the most tokens.
///
/// Ties go to the category listed first in the dictionary.
#[derive(Debug, Clone)]
pub struct MostFrequentCategory {
    comparator: WordComparator,
    compiled: Option<Compiled<PhraseMatchers>>,
}

impl MostFrequentCategory {
    pub fn new(comparator: WordComparator) -> Self {
        Self {
            comparator,
            compiled: None,
        }
    }

    /// Prepare the matchers for `dictionary` now rather than on every message.
    pub fn with_dictionary(
        mut self,
        dictionary: &CategoryDictionary,
    ) -> Result<Self, StrategyError> {
        let compiled = Compiled::new(dictionary, |d| self.matchers(d))?;
        self.compiled = Some(compiled);
        Ok(self)
    }

    fn matchers(&self, dictionary: &CategoryDictionary) -> Result<PhraseMatchers, StrategyError> {
        dictionary
            .iter()
            .map(|(_, phrases)| {
                phrases
                    .iter()
                    .map(|phrase| self.comparator.prepare(phrase))
                    .collect()
            })
            .collect()
    }
}

impl Strategy for MostFrequentCategory {
    fn name(&self) -> &'static str {
        "most_frequent_category"
    }

    fn analyze(
        &self,
        document: &Document,
        dictionary: &CategoryDictionary,
        slot: Slot,
    ) -> Result<Option<String>, StrategyError> {
        let matchers =
            Compiled::table_for(self.compiled.as_ref(), dictionary, |d| self.matchers(d))?;

        // Per category: total matches plus matches per phrase, in dictionary order.
        let mut counters: Vec<(usize, Vec<usize>)> = matchers
            .iter()
            .map(|phrases| (0, vec![0; phrases.len()]))
            .collect();

        for token in &document.lemmas {
            let token = self.comparator.token_form(token);
            for (phrases, (total, per_phrase)) in matchers.iter().zip(counters.iter_mut()) {
                for (matcher, count) in phrases.iter().zip(per_phrase.iter_mut()) {
                    if matcher.matches(&token) {
                        *total += 1;
                        *count += 1;
                    }
                }
            }
        }

        let mut best: Option<(&str, usize)> = None;
        for ((category, phrases), (total, per_phrase)) in dictionary.iter().zip(&counters) {
            if *total == 0 {
                continue;
            }
            let details: Vec<String> = phrases
                .iter()
                .zip(per_phrase)
                .filter(|(_, count)| **count > 0)
                .map(|(phrase, count)| format!("{phrase}: {count} times"))
                .collect();
            debug!(
                slot = slot.name(),
                category,
                total,
                details = %details.join(", "),
                "Category matches"
            );
            if best.is_none_or(|(_, top)| *total > top) {
                best = Some((category, *total));
            }
        }

        match best {
            Some((category, total)) => {
                info!(slot = slot.name(), category, total, "Selected category");
                Ok(Some(category.to_string()))
            }
            None => {
                info!(slot = slot.name(), "No matches found");
                Ok(None)
            }
        }
    }
}

/// Picks the category matched by the latest token in the transcript.
///
/// Every whitespace-separated part of a phrase is compared on its own.
#[derive(Debug, Clone)]
pub struct LastMentioned {
    comparator: WordComparator,
    compiled: Option<Compiled<PartMatchers>>,
}

impl LastMentioned {
    pub fn new(comparator: WordComparator) -> Self {
        Self {
            comparator,
            compiled: None,
        }
    }

    /// Prepare the matchers for `dictionary` now rather than on every message.
    pub fn with_dictionary(
        mut self,
        dictionary: &CategoryDictionary,
    ) -> Result<Self, StrategyError> {
        let compiled = Compiled::new(dictionary, |d| self.matchers(d))?;
        self.compiled = Some(compiled);
        Ok(self)
    }

    fn matchers(&self, dictionary: &CategoryDictionary) -> Result<PartMatchers, StrategyError> {
        dictionary
            .iter()
            .map(|(_, phrases)| {
                phrases
                    .iter()
                    .flat_map(|phrase| phrase.split_whitespace())
                    .map(|part| {
                        self.comparator
                            .prepare(part)
                            .map(|matcher| (part.to_string(), matcher))
                    })
                    .collect()
            })
            .collect()
    }
}

impl Strategy for LastMentioned {
    fn name(&self) -> &'static str {
        "last_mentioned"
    }

    fn analyze(
        &self,
        document: &Document,
        dictionary: &CategoryDictionary,
        slot: Slot,
    ) -> Result<Option<String>, StrategyError> {
        let matchers =
            Compiled::table_for(self.compiled.as_ref(), dictionary, |d| self.matchers(d))?;
        let mut last: Option<(&str, &str)> = None;

        for token in &document.lemmas {
            let token = self.comparator.token_form(token);
            for ((category, _), parts) in dictionary.iter().zip(matchers.iter()) {
                for (part, matcher) in parts {
                    if matcher.matches(&token) {
                        debug!(slot = slot.name(), part = part.as_str(), category, "Found word");
                        last = Some((category, part.as_str()));
                    }
                }
            }
        }

        match last {
            Some((category, part)) => {
                info!(
                    slot = slot.name(),
                    category,
                    last_match = part,
                    "Last mentioned category"
                );
                Ok(Some(category.to_string()))
            }
            None => {
                info!(slot = slot.name(), "No matches found");
                Ok(None)
            }
        }
    }
}
