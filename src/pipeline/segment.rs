//! Speakable segments and the display metadata that travels with them

use serde::{Deserialize, Serialize};

/// Characters ignored when deciding whether text has anything to say
const SILENT_CHARS: &[char] = &[
    '.', ',', '!', '?', '，', '。', '！', '？', '\'', '"', '』', '」', '）', '】',
];

/// Caption shown while a segment plays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayText {
    pub text: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

impl DisplayText {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_speaker(mut self, name: impl Into<String>, avatar: Option<String>) -> Self {
        self.name = Some(name.into());
        self.avatar = avatar;
        self
    }
}

/// Expression cue: either a named expression or a model-specific index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    Name(String),
    Index(i64),
}

/// Animation cues forwarded verbatim to the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Vec<Expression>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pictures: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sounds: Option<Vec<String>>,
}

/// One unit of text to speak plus what to show while it plays
///
/// Immutable once admitted to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Text handed to the synthesis backend
    pub tts_text: String,
    /// Caption metadata
    pub display: DisplayText,
    /// Animation cues
    pub actions: Option<Actions>,
}

impl Segment {
    /// Segment whose caption is the spoken text
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            display: DisplayText::new(text.clone()),
            tts_text: text,
            actions: None,
        }
    }

    #[must_use]
    pub fn with_display(mut self, display: DisplayText) -> Self {
        self.display = display;
        self
    }

    #[must_use]
    pub fn with_actions(mut self, actions: Actions) -> Self {
        self.actions = Some(actions);
        self
    }

    /// True when nothing is left to synthesize after dropping whitespace and punctuation
    #[must_use]
    pub fn is_silent(&self) -> bool {
        is_silent_text(&self.tts_text)
    }
}

/// True when `text` holds only whitespace and sentence punctuation
#[must_use]
pub fn is_silent_text(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_whitespace() || SILENT_CHARS.contains(&c))
}
