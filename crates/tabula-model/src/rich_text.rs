use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::style::Font;

/// One formatted run of text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    /// Run-level font; `None` inherits the cell font.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<Font>,
}

/// Text made of one or more runs.
///
/// Plain text is a single run without a font. Equality is structural, which is what the shared
/// string table deduplicates on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RichText {
    pub runs: Vec<TextRun>,
}

impl RichText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            runs: vec![TextRun {
                text: text.into(),
                font: None,
            }],
        }
    }

    pub fn from_runs(runs: Vec<TextRun>) -> Self {
        Self { runs }
    }

    /// True when the text carries no run formatting.
    pub fn is_plain(&self) -> bool {
        self.runs.len() <= 1 && self.runs.iter().all(|r| r.font.is_none())
    }

    /// Concatenated text of every run.
    pub fn text(&self) -> Cow<'_, str> {
        match self.runs.as_slice() {
            [] => Cow::Borrowed(""),
            [only] => Cow::Borrowed(only.text.as_str()),
            runs => Cow::Owned(runs.iter().map(|r| r.text.as_str()).collect()),
        }
    }
}

impl From<&str> for RichText {
    fn from(value: &str) -> Self {
        RichText::plain(value)
    }
}

impl From<String> for RichText {
    fn from(value: String) -> Self {
        RichText::plain(value)
    }
}
