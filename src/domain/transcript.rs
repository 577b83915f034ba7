//! Transcript result parsing.
//!
//! The service writes a JSON document with a `results` section holding an
//! ordered list of segments, each carrying one or more candidate
//! transcriptions. Only the first alternative of each segment is used.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rendered in place of an empty transcript
pub const NO_SPEECH_SENTINEL: &str = "No speech detected";

/// Final text produced by a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "text")]
pub enum Transcript {
    /// Recognised speech, trimmed and non-empty
    Speech(String),

    /// The job ran but recognised nothing
    NoSpeech,
}

impl Transcript {
    /// Build from joined text, collapsing blank input to `NoSpeech`
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            Self::NoSpeech
        } else if trimmed.len() == text.len() {
            Self::Speech(text)
        } else {
            Self::Speech(trimmed.to_string())
        }
    }

    /// Text to hand to callers (the sentinel for `NoSpeech`)
    pub fn as_str(&self) -> &str {
        match self {
            Self::Speech(text) => text,
            Self::NoSpeech => NO_SPEECH_SENTINEL,
        }
    }

    pub fn has_speech(&self) -> bool {
        matches!(self, Self::Speech(_))
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while reading a result payload
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid transcript JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transcript payload has no '{0}' field")]
    MissingField(&'static str),
}

#[derive(Debug, Deserialize)]
struct ResultDocument {
    results: Option<ResultsSection>,
}

#[derive(Debug, Deserialize)]
struct ResultsSection {
    #[serde(default, alias = "speech_transcriptions")]
    segments: Option<Vec<Segment>>,

    /// Flat shape: one transcript per entry, no alternatives
    #[serde(default)]
    transcripts: Option<Vec<Alternative>>,
}

#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(alias = "text", alias = "content")]
    transcript: String,
}

/// Parse a raw result payload into the final transcript.
///
/// Each segment's first alternative is trimmed; blank pieces are dropped and
/// the rest joined by a single space. Zero segments yields `NoSpeech`.
pub fn parse_transcript(payload: &[u8]) -> Result<Transcript, ParseError> {
    let document: ResultDocument = serde_json::from_slice(payload)?;
    let results = document.results.ok_or(ParseError::MissingField("results"))?;

    let pieces: Vec<&str> = match (&results.segments, &results.transcripts) {
        (Some(segments), _) => segments
            .iter()
            .filter_map(|segment| segment.alternatives.first())
            .map(|alt| alt.transcript.trim())
            .collect(),
        (None, Some(transcripts)) => transcripts.iter().map(|t| t.transcript.trim()).collect(),
        (None, None) => return Err(ParseError::MissingField("results.segments")),
    };

    let joined = pieces
        .into_iter()
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Ok(Transcript::from_text(joined))
}
