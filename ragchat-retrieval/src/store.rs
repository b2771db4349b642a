//! In-memory document and chunk stores.

use std::collections::HashMap;

use crate::document::{Chunk, Document};

/// Decoded documents keyed by their exact display name.
///
/// Adding a document whose name is already present is a no-op: the first
/// upload's content wins.
#[derive(Debug, Default, Clone)]
pub struct DocumentStore {
    documents: Vec<Document>,
    by_name: HashMap<String, usize>,
}

impl DocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `document`. Returns `false` if its name was already present.
    pub fn add(&mut self, document: Document) -> bool {
        if self.by_name.contains_key(&document.name) {
            return false;
        }
        self.by_name.insert(document.name.clone(), self.documents.len());
        self.documents.push(document);
        true
    }

    /// The full text of the named document (pages joined by spaces).
    pub fn get(&self, name: &str) -> Option<String> {
        self.document(name).map(Document::text)
    }

    /// The named document.
    pub fn document(&self, name: &str) -> Option<&Document> {
        self.by_name.get(name).map(|&i| &self.documents[i])
    }

    /// Returns `true` if a document with exactly this name is stored.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Document names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.name.clone()).collect()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns `true` if no document is stored.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Remove every document.
    pub fn clear(&mut self) {
        self.documents.clear();
        self.by_name.clear();
    }
}

/// The ordered sequence of every chunk across all documents.
///
/// Position `i` corresponds to row `i` of the engine's vector index.
#[derive(Debug, Default, Clone)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
}

impl ChunkStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunks` at the end, preserving their order.
    pub fn append(&mut self, chunks: impl IntoIterator<Item = Chunk>) {
        self.chunks.extend(chunks);
    }

    /// The chunk at `position`.
    pub fn get(&self, position: usize) -> Option<&Chunk> {
        self.chunks.get(position)
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` if no chunk is stored.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk texts in store order.
    pub fn texts(&self) -> Vec<&str> {
        self.chunks.iter().map(|c| c.text.as_str()).collect()
    }

    /// Iterate over chunks in store order.
    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }

    /// Remove every chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, pages: &[&str]) -> Document {
        Document::new(name, pages.iter().map(|p| p.to_string()).collect())
    }

    fn chunk(document_name: &str, sequence_id: usize, text: &str) -> Chunk {
        Chunk { text: text.to_string(), sequence_id, document_name: document_name.to_string() }
    }

    #[test]
    fn first_upload_wins() {
        let mut store = DocumentStore::new();
        assert!(store.add(doc("report.pdf", &["original"])));
        assert!(!store.add(doc("report.pdf", &["replacement"])));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("report.pdf").as_deref(), Some("original"));
    }

    #[test]
    fn names_are_case_sensitive() {
        let mut store = DocumentStore::new();
        assert!(store.add(doc("Report.pdf", &["a"])));
        assert!(store.add(doc("report.pdf", &["b"])));
        assert!(store.contains("Report.pdf"));
        assert!(!store.contains("REPORT.PDF"));
        assert_eq!(store.names(), vec!["Report.pdf".to_string(), "report.pdf".to_string()]);
    }

    #[test]
    fn get_joins_pages() {
        let mut store = DocumentStore::new();
        store.add(doc("a", &["one", "two", "three"]));
        assert_eq!(store.get("a").as_deref(), Some("one two three"));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn document_store_clear() {
        let mut store = DocumentStore::new();
        store.add(doc("a", &["x"]));
        store.clear();
        assert!(store.is_empty());
        assert!(!store.contains("a"));
        assert!(store.add(doc("a", &["y"])));
    }

    #[test]
    fn chunk_store_preserves_order() {
        let mut store = ChunkStore::new();
        store.append(vec![chunk("a", 0, "first"), chunk("a", 1, "second")]);
        store.append(vec![chunk("b", 0, "third")]);
        assert_eq!(store.len(), 3);
        assert_eq!(store.texts(), vec!["first", "second", "third"]);
        assert_eq!(store.get(2).map(|c| c.document_name.as_str()), Some("b"));
        assert!(store.get(3).is_none());

        store.clear();
        assert!(store.is_empty());
    }
}
