use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use synaptic_core::Document;
use uuid::Uuid;

/// One row of the vector store table.
///
/// The whole node is also serialized into the node column, and that copy is
/// what reads deserialize from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_doc_id: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding: None,
            metadata: HashMap::new(),
            ref_doc_id: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_ref_doc_id(mut self, ref_doc_id: impl Into<String>) -> Self {
        self.ref_doc_id = Some(ref_doc_id.into());
        self
    }

    /// Build a node from a framework document and its embedding.
    ///
    /// An empty document id is replaced with a fresh UUID.
    pub fn from_document(doc: Document, embedding: Vec<f32>) -> Self {
        let id = if doc.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            doc.id.clone()
        };
        let ref_doc_id = doc.ref_doc_id().map(str::to_string);
        Self {
            id,
            text: doc.content,
            embedding: Some(embedding),
            metadata: doc.metadata,
            ref_doc_id,
        }
    }

    /// Drop the embedding and parent id, keeping id, text and metadata.
    pub fn into_document(self) -> Document {
        Document::with_metadata(self.id, self.text, self.metadata)
    }
}
