//! Narrated presentations
//!
//! A presentation is an ordered list of [`ContentNode`]s. The
//! [`PrefetchScheduler`] keeps synthesis running a few nodes ahead of the
//! [`PresentationSequencer`], which shows each node and speaks its audio.

pub mod prefetch;
pub mod sequencer;

use std::path::Path;

use serde::Deserialize;

use crate::{Error, Result};

pub use prefetch::{NodeStatus, PrefetchScheduler, SynthesisCompletion};
pub use sequencer::{
    PresentationEvent, PresentationHandle, PresentationSequencer, PresentationState,
};

/// One unit of presented content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentNode {
    /// Position declared by the document; sole ordering key
    pub sequence_index: i64,
    /// Narration text, possibly empty
    pub text: String,
    /// Image shown alongside the text
    pub image_ref: Option<String>,
}

impl ContentNode {
    /// Whether the node has anything to narrate
    #[must_use]
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// A presentation document as served by the document service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub data_list: Vec<DataItem>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Raw document entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataItem {
    pub sequence: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl Document {
    /// Parse a document from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not describe a document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a document file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        let document = Self::from_json(&json)?;
        tracing::debug!(
            path = %path.display(),
            name = document.name.as_deref().unwrap_or_default(),
            items = document.data_list.len(),
            "loaded document"
        );
        Ok(document)
    }

    /// Content nodes in sequence order
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the document has no entries
    pub fn into_nodes(self) -> Result<Vec<ContentNode>> {
        if self.data_list.is_empty() {
            return Err(Error::Session("no valid document data".to_string()));
        }

        let mut items = self.data_list;
        items.sort_by_key(|item| item.sequence);

        Ok(items
            .into_iter()
            .map(|item| ContentNode {
                sequence_index: item.sequence,
                text: item.text.unwrap_or_default(),
                image_ref: item.image.filter(|image| !image.trim().is_empty()),
            })
            .collect())
    }
}
