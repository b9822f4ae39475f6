//! Transcript processor: runs every slot's strategy over one message.
//!
//! Flow:
//! 1. Normalise the text once into a [`Document`]
//! 2. Slot 5, then slot 6 only when slot 5 selected nothing (fallback classifier)
//! 3. Slots 1–4, each on its own
//! 4. Assemble the [`ResultEnvelope`]
//!
//! **A failing slot never takes down its siblings.** Errors and panics are
//! logged and the slot is recorded as absent.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::dictionary::{CategoryDictionary, PipelineSpec};
use crate::error::{DictionaryError, StrategyError};
use crate::pipeline::comparator::{ComparatorSpec, WordComparator};
use crate::pipeline::strategy::{Strategy, StrategyKind};
use crate::pipeline::types::{AnalysisResult, InboundMessage, ResultEnvelope, Slot};
use crate::text::{Document, LexiconNormalizer, Normalizer};

/// Slot evaluated first; a hit suppresses [`FALLBACK_SLOT`].
const PRIMARY_SLOT: Slot = Slot::TargetWords5;

/// Evaluated only when [`PRIMARY_SLOT`] selected nothing.
const FALLBACK_SLOT: Slot = Slot::TargetWords6;

/// Slots evaluated independently after the primary/fallback pair.
const INDEPENDENT_SLOTS: [Slot; 4] = [
    Slot::TargetWords1,
    Slot::TargetWords2,
    Slot::TargetWords3,
    Slot::TargetWords4,
];

/// One slot's strategy and dictionary.
#[derive(Clone)]
pub struct SlotBinding {
    pub strategy: Arc<dyn Strategy>,
    pub dictionary: CategoryDictionary,
}

impl SlotBinding {
    pub fn new(strategy: Arc<dyn Strategy>, dictionary: CategoryDictionary) -> Self {
        Self {
            strategy,
            dictionary,
        }
    }
}

/// Classifies transcripts into the six slots.
///
/// Shared read-only across messages; all per-message state is local to [`Self::analyze`].
pub struct TranscriptProcessor {
    normalizer: Arc<dyn Normalizer>,
    bindings: BTreeMap<Slot, SlotBinding>,
}

impl TranscriptProcessor {
    /// Create a processor. Every slot must be bound.
    pub fn new(
        normalizer: Arc<dyn Normalizer>,
        bindings: impl IntoIterator<Item = (Slot, SlotBinding)>,
    ) -> Result<Self, DictionaryError> {
        let bindings: BTreeMap<_, _> = bindings.into_iter().collect();
        if let Some(slot) = Slot::ALL.into_iter().find(|s| !bindings.contains_key(s)) {
            return Err(DictionaryError::MissingSlot {
                slot: slot.name().to_string(),
            });
        }
        Ok(Self {
            normalizer,
            bindings,
        })
    }

    /// Build the normaliser and every slot binding from the pipeline file.
    pub fn from_spec(spec: PipelineSpec) -> Result<Self, DictionaryError> {
        let normalizer: Arc<dyn Normalizer> =
            Arc::new(LexiconNormalizer::new(spec.lemmas, spec.stop_words));
        let answer_tags = Arc::new(spec.answer_tags);

        let mut bindings = Vec::with_capacity(spec.slots.len());
        for (slot, slot_spec) in spec.slots {
            validate_binding(slot, &slot_spec.strategy, &slot_spec.comparator)?;
            let comparator = WordComparator::new(slot_spec.comparator, Arc::clone(&normalizer));
            let strategy = slot_spec
                .strategy
                .build(
                    comparator,
                    Arc::clone(&normalizer),
                    Arc::clone(&answer_tags),
                    &slot_spec.categories,
                )
                .map_err(|e| DictionaryError::InvalidBinding {
                    slot: slot.name().to_string(),
                    reason: e.to_string(),
                })?;
            info!(
                slot = slot.name(),
                strategy = strategy.name(),
                categories = slot_spec.categories.len(),
                "Slot bound"
            );
            bindings.push((slot, SlotBinding::new(strategy, slot_spec.categories)));
        }

        Self::new(normalizer, bindings)
    }

    /// Load the pipeline file at `path` and build the processor from it.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let spec = PipelineSpec::load(path)?;
        Ok(Self::from_spec(spec)?)
    }

    /// Classify one message and build its envelope.
    pub fn analyze(&self, message: &InboundMessage) -> ResultEnvelope {
        let result = self.analyze_text(&message.text);
        info!(master_id = %message.master_id, result = ?result, "Analysis complete");
        ResultEnvelope::new(message.master_id.clone(), &result)
    }

    /// Classify raw transcript text.
    pub fn analyze_text(&self, text: &str) -> AnalysisResult {
        let document = Document::new(text, self.normalizer.as_ref());
        let mut outcomes = Vec::with_capacity(Slot::ALL.len());

        let primary = self.evaluate(PRIMARY_SLOT, &document);
        let fallback = if primary.is_none() {
            self.evaluate(FALLBACK_SLOT, &document)
        } else {
            debug!(
                slot = FALLBACK_SLOT.name(),
                "Skipped: {} already selected a category",
                PRIMARY_SLOT.name()
            );
            None
        };
        outcomes.push((PRIMARY_SLOT, primary));
        outcomes.push((FALLBACK_SLOT, fallback));

        for slot in INDEPENDENT_SLOTS {
            outcomes.push((slot, self.evaluate(slot, &document)));
        }

        AnalysisResult::from_outcomes(outcomes)
    }

    /// Run one slot, mapping any failure to absence.
    fn evaluate(&self, slot: Slot, document: &Document) -> Option<String> {
        match self.run_slot(slot, document) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(slot = slot.name(), error = %e, "Slot evaluation failed");
                None
            }
        }
    }

    fn run_slot(&self, slot: Slot, document: &Document) -> Result<Option<String>, StrategyError> {
        let binding = self
            .bindings
            .get(&slot)
            .ok_or_else(|| StrategyError::Internal(format!("{} is not bound", slot.name())))?;

        panic::catch_unwind(AssertUnwindSafe(|| {
            binding
                .strategy
                .analyze(document, &binding.dictionary, slot)
        }))
        .unwrap_or_else(|payload| Err(StrategyError::Panicked(panic_message(payload.as_ref()))))
    }
}

fn validate_binding(
    slot: Slot,
    strategy: &StrategyKind,
    comparator: &ComparatorSpec,
) -> Result<(), DictionaryError> {
    let invalid = |reason: &str| DictionaryError::InvalidBinding {
        slot: slot.name().to_string(),
        reason: reason.to_string(),
    };

    if let ComparatorSpec::Fuzzy { threshold } = comparator {
        if !(0.0..=1.0).contains(threshold) {
            return Err(invalid("fuzzy threshold must be within [0, 1]"));
        }
    }
    if let StrategyKind::AdvertSource {
        reply_marker,
        turn_marker,
        ..
    } = strategy
    {
        if reply_marker.is_empty() || turn_marker.is_empty() {
            return Err(invalid("turn markers must not be empty"));
        }
    }
    if let StrategyKind::MostValuableWord { weights, .. } = strategy {
        if weights.values().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid("category weights must be finite and non-negative"));
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    /// Strategy double: fixed outcome, counts invocations.
    struct Fixed {
        outcome: Result<Option<&'static str>, &'static str>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn hit(category: &'static str) -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(Some(category)),
                calls: AtomicUsize::new(0),
            })
        }

        fn miss() -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(None),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                outcome: Err("dictionary mismatch"),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Strategy for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn analyze(
            &self,
            _document: &Document,
            _dictionary: &CategoryDictionary,
            _slot: Slot,
        ) -> Result<Option<String>, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome
                .map(|c| c.map(str::to_string))
                .map_err(|e| StrategyError::Internal(e.to_string()))
        }
    }

    struct Panicking;

    impl Strategy for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn analyze(
            &self,
            _document: &Document,
            _dictionary: &CategoryDictionary,
            _slot: Slot,
        ) -> Result<Option<String>, StrategyError> {
            panic!("index out of range");
        }
    }

    fn processor(strategies: [Arc<dyn Strategy>; 6]) -> TranscriptProcessor {
        let bindings = Slot::ALL
            .into_iter()
            .zip(strategies)
            .map(|(slot, s)| (slot, SlotBinding::new(s, CategoryDictionary::default())));
        TranscriptProcessor::new(Arc::new(LexiconNormalizer::default()), bindings).unwrap()
    }

    #[test]
    fn primary_hit_skips_fallback_strategy() {
        let fallback = Fixed::hit("fallback");
        let p = processor([
            Fixed::hit("1"),
            Fixed::hit("2"),
            Fixed::hit("3"),
            Fixed::hit("4"),
            Fixed::hit("primary"),
            fallback.clone(),
        ]);

        let result = p.analyze_text("anything");
        assert_eq!(result.get(Slot::TargetWords5), Some("primary"));
        assert_eq!(result.get(Slot::TargetWords6), None);
        assert_eq!(fallback.calls(), 0);
    }

    #[test]
    fn primary_miss_runs_fallback() {
        let fallback = Fixed::hit("fallback");
        let p = processor([
            Fixed::miss(),
            Fixed::miss(),
            Fixed::miss(),
            Fixed::miss(),
            Fixed::miss(),
            fallback.clone(),
        ]);

        let result = p.analyze_text("anything");
        assert_eq!(result.get(Slot::TargetWords5), None);
        assert_eq!(result.get(Slot::TargetWords6), Some("fallback"));
        assert_eq!(fallback.calls(), 1);
    }

    #[test]
    fn primary_failure_counts_as_absent_and_runs_fallback() {
        let fallback = Fixed::hit("fallback");
        let p = processor([
            Fixed::miss(),
            Fixed::miss(),
            Fixed::miss(),
            Fixed::miss(),
            Fixed::failing(),
            fallback.clone(),
        ]);

        let result = p.analyze_text("anything");
        assert_eq!(result.get(Slot::TargetWords6), Some("fallback"));
        assert_eq!(fallback.calls(), 1);
    }

    #[test]
    fn failing_slot_does_not_affect_siblings() {
        let p = processor([
            Fixed::hit("1"),
            Fixed::hit("2"),
            Fixed::failing(),
            Fixed::hit("4"),
            Fixed::miss(),
            Fixed::hit("6"),
        ]);

        let result = p.analyze_text("anything");
        assert_eq!(result.get(Slot::TargetWords1), Some("1"));
        assert_eq!(result.get(Slot::TargetWords2), Some("2"));
        assert_eq!(result.get(Slot::TargetWords3), None);
        assert_eq!(result.get(Slot::TargetWords4), Some("4"));
        assert_eq!(result.get(Slot::TargetWords6), Some("6"));
    }

    #[test]
    fn panicking_slot_is_isolated() {
        let p = processor([
            Fixed::hit("1"),
            Fixed::hit("2"),
            Arc::new(Panicking),
            Fixed::hit("4"),
            Fixed::hit("5"),
            Fixed::hit("6"),
        ]);

        let result = p.analyze_text("anything");
        assert_eq!(result.get(Slot::TargetWords3), None);
        assert_eq!(result.get(Slot::TargetWords4), Some("4"));
        assert_eq!(result.get(Slot::TargetWords5), Some("5"));
    }

    #[test]
    fn strategies_are_reused_across_messages() {
        let first = Fixed::hit("1");
        let p = processor([
            first.clone(),
            Fixed::miss(),
            Fixed::miss(),
            Fixed::miss(),
            Fixed::miss(),
            Fixed::miss(),
        ]);
        p.analyze_text("one");
        p.analyze_text("two");
        assert_eq!(first.calls(), 2);
    }

    #[test]
    fn new_requires_every_slot() {
        let bindings = [(
            Slot::TargetWords1,
            SlotBinding::new(Fixed::miss(), CategoryDictionary::default()),
        )];
        let err = TranscriptProcessor::new(Arc::new(LexiconNormalizer::default()), bindings)
            .err()
            .unwrap();
        assert!(matches!(err, DictionaryError::MissingSlot { .. }));
    }

    #[test]
    fn load_reports_missing_pipeline_file() {
        let err = TranscriptProcessor::load(Path::new("/nonexistent/pipeline.json"))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            crate::error::Error::Dictionary(DictionaryError::Read { .. })
        ));
    }

    fn spec_json(slot1: &str) -> String {
        let mut slots = vec![format!(r#""target_words_1": {slot1}"#)];
        for slot in &Slot::ALL[1..] {
            slots.push(format!(
                r#""{}": {{"strategy": {{"kind": "last_mentioned"}}, "categories": {{}}}}"#,
                slot.name()
            ));
        }
        format!(
            r#"{{"lemmas": {{"катаракту": "катаракта"}}, "stop_words": ["про"],
                "slots": {{{}}}}}"#,
            slots.join(",")
        )
    }

    #[test]
    fn end_to_end_most_frequent_category() {
        let spec = PipelineSpec::from_json(&spec_json(
            r#"{"strategy": {"kind": "most_frequent_category"},
                "comparator": {"kind": "lemma"},
                "categories": {"Катаракта": ["катаракта"]}}"#,
        ))
        .unwrap();
        let p = TranscriptProcessor::from_spec(spec).unwrap();

        let message = InboundMessage {
            master_id: json!("m1"),
            text: "Пациент спросил про катаракту катаракту".to_string(),
        };
        let envelope = p.analyze(&message);
        assert_eq!(envelope.target_words_1.as_deref(), Some("Катаракта"));
        assert_eq!(envelope.master_id, json!("m1"));
        assert_eq!(envelope.channel_name, "IncomingCall");
        assert_eq!(envelope.event, "verbaMetrics");
        assert_eq!(envelope.target_words_6, None);
    }

    #[test]
    fn from_spec_rejects_out_of_range_threshold() {
        let spec = PipelineSpec::from_json(&spec_json(
            r#"{"strategy": {"kind": "most_frequent_category"},
                "comparator": {"kind": "fuzzy", "threshold": 1.5}}"#,
        ))
        .unwrap();
        let err = TranscriptProcessor::from_spec(spec).err().unwrap();
        assert!(matches!(err, DictionaryError::InvalidBinding { .. }));
    }

    #[test]
    fn from_spec_rejects_empty_markers() {
        let spec = PipelineSpec::from_json(&spec_json(
            r#"{"strategy": {"kind": "advert_source", "reply_marker": ""}}"#,
        ))
        .unwrap();
        assert!(TranscriptProcessor::from_spec(spec).is_err());
    }
}
