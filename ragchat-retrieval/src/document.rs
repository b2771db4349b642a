//! Data types for documents, chunks, and search results.

use serde::{Deserialize, Serialize};

/// A decoded document: its display name and the text of each page.
///
/// The name is the deduplication key of the document store; it is compared
/// exactly, without case folding or normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    /// Display name of the document, unique within an engine.
    pub name: String,
    /// Page texts in document order.
    pub pages: Vec<String>,
}

impl Document {
    /// Create a document from its name and page texts.
    pub fn new(name: impl Into<String>, pages: Vec<String>) -> Self {
        Self { name: name.into(), pages }
    }

    /// The full document text: page texts joined by a single space.
    pub fn text(&self) -> String {
        self.pages.join(" ")
    }

    /// Returns `true` if no page contains anything but whitespace.
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|page| page.trim().is_empty())
    }
}

/// A bounded span of a document's text, the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// The text content of the chunk.
    pub text: String,
    /// Position of the chunk within its document, counting from 0.
    pub sequence_id: usize,
    /// Name of the source [`Document`].
    pub document_name: String,
}

/// A [`Chunk`] returned by nearest-neighbor search with its distance to the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Squared L2 distance to the query (lower is more relevant).
    pub distance: f32,
}

/// The result of adding a document to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AddOutcome {
    /// The document was new and has been chunked and indexed.
    Added {
        /// Name of the added document.
        name: String,
        /// Number of chunks the document produced.
        chunk_count: usize,
    },
    /// A document with the same name was already present; nothing changed.
    Duplicate {
        /// Name of the skipped document.
        name: String,
    },
}

impl AddOutcome {
    /// Returns `true` if the document was newly added.
    pub fn is_added(&self) -> bool {
        matches!(self, AddOutcome::Added { .. })
    }
}

/// A point-in-time view of the engine's sizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of stored documents.
    pub documents: usize,
    /// Number of stored chunks.
    pub chunks: usize,
    /// Number of rows in the vector index.
    pub index_rows: usize,
    /// Dimensionality of the vector index.
    pub dimension: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_joins_pages_with_single_space() {
        let doc = Document::new("a.pdf", vec!["first page".into(), "second page".into()]);
        assert_eq!(doc.text(), "first page second page");
    }

    #[test]
    fn whitespace_only_document_is_empty() {
        assert!(Document::new("blank", vec![]).is_empty());
        assert!(Document::new("blank", vec![" ".into(), "\n".into()]).is_empty());
        assert!(!Document::new("one", vec!["".into(), "x".into()]).is_empty());
    }

    #[test]
    fn add_outcome_is_tagged() {
        let json = serde_json::to_value(AddOutcome::Duplicate { name: "a".into() }).unwrap();
        assert_eq!(json["status"], "duplicate");
        assert_eq!(json["name"], "a");
    }
}
