//! Voice chat stream records
//!
//! Each record is one JSON object whose `type` field selects the variant:
//!
//! ```text
//! {"type":"recognition","text":"..."}
//! {"type":"text","text":"..."}
//! {"type":"audio","audio":"<base64 wav>","segment_id":3}
//! {"type":"error","message":"..."}
//! {"type":"done","request_id":"...","elapsed_seconds":1.8}
//! ```
//!
//! Older services send the payload of `text` and `audio` records in a
//! `content` field, which is accepted as well.

use serde::Deserialize;

use crate::{Error, Result};

/// One decoded stream record
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Transcript of the uploaded utterance
    Recognition {
        #[serde(alias = "content")]
        text: String,
    },

    /// Incremental reply text
    #[serde(rename = "text")]
    TextDelta {
        #[serde(alias = "content")]
        text: String,
    },

    /// Base64-encoded WAV segment of the spoken reply
    #[serde(rename = "audio")]
    AudioSegment {
        #[serde(default, alias = "content")]
        audio: String,
        #[serde(default)]
        segment_id: Option<u64>,
    },

    /// Service-side failure; the stream may continue
    Error {
        #[serde(alias = "content")]
        message: String,
    },

    /// Reply complete
    Done {
        #[serde(default, alias = "session_id")]
        request_id: Option<String>,
        #[serde(default)]
        elapsed_seconds: Option<f64>,
    },

    /// Any `type` this client does not know
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Decode one record
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the record is not a valid event object
    pub fn decode(record: &str) -> Result<Self> {
        serde_json::from_str(record).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Short name for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Recognition { .. } => "recognition",
            Self::TextDelta { .. } => "text",
            Self::AudioSegment { .. } => "audio",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_kind() {
        assert_eq!(
            StreamEvent::decode(r#"{"type":"recognition","text":"hi"}"#).unwrap(),
            StreamEvent::Recognition {
                text: "hi".to_string()
            }
        );
        assert_eq!(
            StreamEvent::decode(r#"{"type":"text","text":"Hel"}"#).unwrap(),
            StreamEvent::TextDelta {
                text: "Hel".to_string()
            }
        );
        assert_eq!(
            StreamEvent::decode(r#"{"type":"audio","audio":"UklG","segment_id":2}"#).unwrap(),
            StreamEvent::AudioSegment {
                audio: "UklG".to_string(),
                segment_id: Some(2)
            }
        );
        assert_eq!(
            StreamEvent::decode(r#"{"type":"error","message":"llm down"}"#).unwrap(),
            StreamEvent::Error {
                message: "llm down".to_string()
            }
        );
        assert_eq!(
            StreamEvent::decode(r#"{"type":"done","request_id":"r1","elapsed_seconds":1.5}"#)
                .unwrap(),
            StreamEvent::Done {
                request_id: Some("r1".to_string()),
                elapsed_seconds: Some(1.5)
            }
        );
    }

    #[test]
    fn accepts_content_field() {
        assert_eq!(
            StreamEvent::decode(r#"{"type":"text","content":"ok","is_final":false}"#).unwrap(),
            StreamEvent::TextDelta {
                text: "ok".to_string()
            }
        );
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        assert_eq!(
            StreamEvent::decode(r#"{"type":"heartbeat","seq":4}"#).unwrap(),
            StreamEvent::Unknown
        );
    }

    #[test]
    fn done_without_fields() {
        assert_eq!(
            StreamEvent::decode(r#"{"type":"done"}"#).unwrap(),
            StreamEvent::Done {
                request_id: None,
                elapsed_seconds: None
            }
        );
    }

    #[test]
    fn garbage_is_a_decode_failure() {
        assert!(matches!(
            StreamEvent::decode("{\"type\":\"text\""),
            Err(Error::Decode(_))
        ));
        assert!(matches!(StreamEvent::decode("not json"), Err(Error::Decode(_))));
    }
}
