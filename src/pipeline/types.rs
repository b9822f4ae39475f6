//! Shared types for the categorisation pipeline.

use serde::{Deserialize, Serialize};

use crate::error::MessageError;

/// Fixed `ChannelName` of every published envelope.
pub const CHANNEL_NAME: &str = "IncomingCall";

/// Fixed `Event` of every published envelope.
pub const EVENT_NAME: &str = "verbaMetrics";

// ── Slots ───────────────────────────────────────────────────────────

/// One of the six named analysis targets evaluated per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slot {
    #[serde(rename = "target_words_1")]
    TargetWords1,
    #[serde(rename = "target_words_2")]
    TargetWords2,
    #[serde(rename = "target_words_3")]
    TargetWords3,
    #[serde(rename = "target_words_4")]
    TargetWords4,
    #[serde(rename = "target_words_5")]
    TargetWords5,
    #[serde(rename = "target_words_6")]
    TargetWords6,
}

impl Slot {
    pub const ALL: [Slot; 6] = [
        Slot::TargetWords1,
        Slot::TargetWords2,
        Slot::TargetWords3,
        Slot::TargetWords4,
        Slot::TargetWords5,
        Slot::TargetWords6,
    ];

    /// Envelope field name.
    pub fn name(self) -> &'static str {
        match self {
            Self::TargetWords1 => "target_words_1",
            Self::TargetWords2 => "target_words_2",
            Self::TargetWords3 => "target_words_3",
            Self::TargetWords4 => "target_words_4",
            Self::TargetWords5 => "target_words_5",
            Self::TargetWords6 => "target_words_6",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

// ── Inbound message ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "MasterID", default)]
    master_id: serde_json::Value,
    #[serde(default)]
    text: Option<String>,
}

/// A validated transcript message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Call identifier, echoed verbatim into the envelope (string or number).
    pub master_id: serde_json::Value,
    pub text: String,
}

impl InboundMessage {
    /// Parse and validate a queue body.
    ///
    /// Both fields are mandatory. Null, empty and zero values count as missing.
    pub fn parse(body: &[u8]) -> Result<Self, MessageError> {
        let raw: RawMessage = serde_json::from_slice(body)?;

        if is_blank(&raw.master_id) {
            return Err(MessageError::MissingField("MasterID"));
        }
        let text = match raw.text {
            Some(text) if !text.is_empty() => text,
            _ => return Err(MessageError::MissingField("text")),
        };

        Ok(Self {
            master_id: raw.master_id,
            text,
        })
    }
}

fn is_blank(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

// ── Analysis result ─────────────────────────────────────────────────

/// Per-slot outcome for one message. `None` means no category was selected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisResult {
    outcomes: [Option<String>; 6],
}

impl AnalysisResult {
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = (Slot, Option<String>)>) -> Self {
        let mut result = Self::default();
        for (slot, outcome) in outcomes {
            result.outcomes[slot.index()] = outcome;
        }
        result
    }

    pub fn get(&self, slot: Slot) -> Option<&str> {
        self.outcomes[slot.index()].as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, Option<&str>)> {
        Slot::ALL.into_iter().map(|slot| (slot, self.get(slot)))
    }
}

// ── Result envelope ─────────────────────────────────────────────────

/// Message published to the output queue. Absent slots serialise as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    #[serde(rename = "ChannelName")]
    pub channel_name: String,
    #[serde(rename = "Event")]
    pub event: String,
    #[serde(rename = "MasterID")]
    pub master_id: serde_json::Value,
    pub target_words_1: Option<String>,
    pub target_words_2: Option<String>,
    pub target_words_3: Option<String>,
    pub target_words_4: Option<String>,
    pub target_words_5: Option<String>,
    pub target_words_6: Option<String>,
}

impl ResultEnvelope {
    pub fn new(master_id: serde_json::Value, result: &AnalysisResult) -> Self {
        let slot = |s: Slot| result.get(s).map(str::to_string);
        Self {
            channel_name: CHANNEL_NAME.to_string(),
            event: EVENT_NAME.to_string(),
            master_id,
            target_words_1: slot(Slot::TargetWords1),
            target_words_2: slot(Slot::TargetWords2),
            target_words_3: slot(Slot::TargetWords3),
            target_words_4: slot(Slot::TargetWords4),
            target_words_5: slot(Slot::TargetWords5),
            target_words_6: slot(Slot::TargetWords6),
        }
    }

    pub fn slot(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::TargetWords1 => self.target_words_1.as_deref(),
            Slot::TargetWords2 => self.target_words_2.as_deref(),
            Slot::TargetWords3 => self.target_words_3.as_deref(),
            Slot::TargetWords4 => self.target_words_4.as_deref(),
            Slot::TargetWords5 => self.target_words_5.as_deref(),
            Slot::TargetWords6 => self.target_words_6.as_deref(),
        }
    }
}
