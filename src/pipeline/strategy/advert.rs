//! Advert-source extraction: where did the caller hear about the clinic?
//!
//! Works on the raw lowercased transcript. The operator asks a trigger
//! question, the caller's next turn is captured as the answer, and the
//! answer is labelled through the [`AnswerTagDictionary`].

use std::sync::Arc;

use tracing::{debug, info};

use super::Strategy;
use crate::dictionary::{AnswerTagDictionary, CategoryDictionary};
use crate::error::StrategyError;
use crate::pipeline::types::Slot;
use crate::text::Document;

#[derive(Debug, Clone)]
pub struct AdvertSource {
    reply_marker: String,
    turn_marker: String,
    no_answer: String,
    answer_tags: Arc<AnswerTagDictionary>,
}

impl AdvertSource {
    pub fn new(
        reply_marker: String,
        turn_marker: String,
        no_answer: String,
        answer_tags: Arc<AnswerTagDictionary>,
    ) -> Self {
        Self {
            reply_marker: reply_marker.to_lowercase(),
            turn_marker: turn_marker.to_lowercase(),
            no_answer,
            answer_tags,
        }
    }

    /// Capture the caller's reply to the first trigger phrase that has one.
    ///
    /// Triggers are tried in dictionary order. The answer runs from the first
    /// reply marker after the trigger up to the next turn marker, trimmed.
    pub fn capture_answer(&self, text: &str, triggers: &CategoryDictionary) -> Option<String> {
        for trigger in triggers.phrases() {
            let trigger = trigger.to_lowercase();
            if trigger.is_empty() {
                continue;
            }
            let Some(trigger_at) = text.find(&trigger) else {
                continue;
            };
            let Some(reply_offset) = text[trigger_at..].find(&self.reply_marker) else {
                debug!(trigger = %trigger, "Trigger found without a reply");
                continue;
            };
            let answer_at = trigger_at + reply_offset + self.reply_marker.len();
            let answer = text[answer_at..]
                .split(self.turn_marker.as_str())
                .next()
                .unwrap_or_default()
                .trim();
            return Some(answer.to_string());
        }
        None
    }

    /// Label a captured answer.
    ///
    /// No or empty answer gives the no-answer category; an answer matching no
    /// tag is passed through as-is.
    pub fn label_answer(&self, answer: Option<&str>) -> String {
        match answer {
            None | Some("") => self.no_answer.clone(),
            Some(answer) => self
                .answer_tags
                .tag_for(answer)
                .unwrap_or(answer)
                .to_string(),
        }
    }
}

impl Strategy for AdvertSource {
    fn name(&self) -> &'static str {
        "advert_source"
    }

    fn analyze(
        &self,
        document: &Document,
        dictionary: &CategoryDictionary,
        slot: Slot,
    ) -> Result<Option<String>, StrategyError> {
        let answer = self.capture_answer(&document.text, dictionary);
        let label = self.label_answer(answer.as_deref());
        info!(
            slot = slot.name(),
            answer = answer.as_deref().unwrap_or("<none>"),
            label = %label,
            "Advert source"
        );
        Ok(Some(label))
    }
}
