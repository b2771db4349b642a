//! Request and response bodies of the HTTP API.

use ragchat_retrieval::AddOutcome;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddDocumentResponse {
    pub message: String,
    #[serde(flatten)]
    pub outcome: AddOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub prompt: String,
    /// Signed so that negative values reach the handler and are rejected as
    /// invalid arguments rather than as malformed JSON.
    pub top_k: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSimilarRequest {
    pub fragment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSimilarResponse {
    /// Matching document names in ascending order.
    pub search_results: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDocumentRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDocumentResponse {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsResponse {
    pub documents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub message: String,
    pub details: String,
}
