//! Category dictionaries and the pipeline definition file.
//!
//! Dictionaries are loaded once at startup and shared read-only by every
//! message. Category order matters: several strategies break ties by
//! dictionary order, so the JSON object order is preserved on load.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::DictionaryError;
use crate::pipeline::comparator::ComparatorSpec;
use crate::pipeline::strategy::StrategyKind;
use crate::pipeline::types::Slot;

/// Ordered mapping of category name → phrases.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryDictionary {
    entries: Vec<(String, Vec<String>)>,
}

impl CategoryDictionary {
    /// Build from `(category, phrases)` pairs, keeping their order.
    ///
    /// A repeated category name replaces the phrases of the earlier entry in place.
    pub fn from_pairs<C, P, I>(pairs: I) -> Self
    where
        C: Into<String>,
        P: Into<String>,
        I: IntoIterator<Item = (C, Vec<P>)>,
    {
        let mut dictionary = Self::default();
        for (category, phrases) in pairs {
            dictionary.insert(
                category.into(),
                phrases.into_iter().map(Into::into).collect(),
            );
        }
        dictionary
    }

    fn insert(&mut self, category: String, phrases: Vec<String>) {
        match self.entries.iter_mut().find(|(name, _)| *name == category) {
            Some((_, existing)) => *existing = phrases,
            None => self.entries.push((category, phrases)),
        }
    }

    /// Categories with their phrases, in dictionary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, phrases)| (name.as_str(), phrases.as_slice()))
    }

    /// All phrases of all categories, flattened in dictionary order.
    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .flat_map(|(_, phrases)| phrases.iter().map(String::as_str))
    }

    pub fn get(&self, category: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(name, _)| name == category)
            .map(|(_, phrases)| phrases.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'de> Deserialize<'de> for CategoryDictionary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = CategoryDictionary;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of category name to a list of phrases")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut dictionary = CategoryDictionary::default();
                while let Some((category, phrases)) = map.next_entry::<String, Vec<String>>()? {
                    dictionary.insert(category, phrases);
                }
                Ok(dictionary)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Tag → trigger substrings, used to label captured advert-source answers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct AnswerTagDictionary(CategoryDictionary);

impl AnswerTagDictionary {
    pub fn new(tags: CategoryDictionary) -> Self {
        Self(tags)
    }

    /// First tag (in dictionary order) with a trigger contained in `answer`,
    /// compared case-insensitively.
    pub fn tag_for(&self, answer: &str) -> Option<&str> {
        let answer = answer.to_lowercase();
        self.0
            .iter()
            .find(|(_, triggers)| {
                triggers
                    .iter()
                    .any(|trigger| answer.contains(&trigger.to_lowercase()))
            })
            .map(|(tag, _)| tag)
    }
}

/// One slot's binding as written in the pipeline file.
#[derive(Debug, Clone, Deserialize)]
pub struct SlotSpec {
    pub strategy: StrategyKind,
    #[serde(default)]
    pub comparator: ComparatorSpec,
    #[serde(default)]
    pub categories: CategoryDictionary,
}

/// Contents of the pipeline definition file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineSpec {
    #[serde(default)]
    pub stop_words: Vec<String>,
    /// Word form → normal form lexicon for the bundled normaliser.
    #[serde(default)]
    pub lemmas: HashMap<String, String>,
    #[serde(default)]
    pub answer_tags: AnswerTagDictionary,
    #[serde(default)]
    pub slots: HashMap<Slot, SlotSpec>,
}

impl PipelineSpec {
    /// Read and parse the pipeline file.
    pub fn load(path: &Path) -> Result<Self, DictionaryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| DictionaryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, DictionaryError> {
        let spec: Self = serde_json::from_str(raw)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Every slot must be bound.
    fn validate(&self) -> Result<(), DictionaryError> {
        for slot in Slot::ALL {
            if !self.slots.contains_key(&slot) {
                return Err(DictionaryError::MissingSlot {
                    slot: slot.name().to_string(),
                });
            }
        }
        Ok(())
    }
}
