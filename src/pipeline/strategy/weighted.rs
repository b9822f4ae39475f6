//! TF-IDF weighted phrase scoring.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::phrase::{LemmaPhrases, lemma_phrases};
use super::{Compiled, Strategy};
use crate::dictionary::CategoryDictionary;
use crate::error::StrategyError;
use crate::pipeline::types::Slot;
use crate::text::{Document, Normalizer};

/// Scores below this are treated as zero and differences below it as ties.
const SCORE_EPSILON: f64 = 1e-9;

/// Picks the category with the highest weighted TF-IDF score.
///
/// Each phrase is scored by its TF-IDF weight in the transcript and
/// multiplied by its category's configured weight. If the two best categories
/// tie, both names are returned joined by the separator.
pub struct MostValuableWord {
    normalizer: Arc<dyn Normalizer>,
    weights: HashMap<String, f64>,
    separator: String,
    compiled: Option<Compiled<LemmaPhrases>>,
}

impl MostValuableWord {
    pub fn new(
        normalizer: Arc<dyn Normalizer>,
        weights: HashMap<String, f64>,
        separator: String,
    ) -> Self {
        Self {
            normalizer,
            weights,
            separator,
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

    fn weight(&self, category: &str) -> f64 {
        self.weights.get(category).copied().unwrap_or(1.0)
    }
}

/// Term frequency normalised by document length.
fn term_frequency(occurrences: usize, total_terms: usize) -> f64 {
    occurrences as f64 / total_terms.max(1) as f64
}

/// Smoothed inverse document frequency: `ln((1 + n) / (1 + df)) + 1`.
fn inverse_document_frequency(total_documents: usize, document_frequency: usize) -> f64 {
    ((1 + total_documents) as f64 / (1 + document_frequency) as f64).ln() + 1.0
}

impl Strategy for MostValuableWord {
    fn name(&self) -> &'static str {
        "most_valuable_word"
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
        let total_terms = document.lemmas.len();

        let mut scores: Vec<(&str, f64)> = Vec::with_capacity(dictionary.len());
        for ((category, _), phrases) in dictionary.iter().zip(compiled.iter()) {
            let weight = self.weight(category);
            let mut score = 0.0;
            for phrase in phrases {
                let occurrences = phrase.pattern.find_iter(&haystack).count();
                if occurrences == 0 {
                    continue;
                }
                // The transcript is the whole corpus: one document, containing the phrase.
                let tf_idf =
                    term_frequency(occurrences, total_terms) * inverse_document_frequency(1, 1);
                debug!(
                    slot = slot.name(),
                    category,
                    phrase = %phrase.lemmas,
                    tf_idf,
                    weight,
                    "Phrase score"
                );
                score += tf_idf * weight;
            }
            if score > SCORE_EPSILON {
                scores.push((category, score));
            }
        }

        // Stable sort keeps dictionary order among equal scores.
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));

        let Some(&(top, top_score)) = scores.first() else {
            info!(slot = slot.name(), "No matches found");
            return Ok(None);
        };

        let tied: Vec<&str> = scores
            .iter()
            .take_while(|(_, score)| (top_score - score).abs() < SCORE_EPSILON)
            .map(|(category, _)| *category)
            .collect();

        if tied.len() > 2 {
            warn!(
                slot = slot.name(),
                tied = %tied.join(", "),
                "More than two categories tied, combining the first two"
            );
        }

        let selected = match tied.as_slice() {
            [first, second, ..] => format!("{first}{}{second}", self.separator),
            _ => top.to_string(),
        };
        info!(slot = slot.name(), category = %selected, score = top_score, "Selected category");
        Ok(Some(selected))
    }
}
