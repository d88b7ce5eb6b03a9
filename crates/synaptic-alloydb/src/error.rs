use synaptic_core::SynapticError;
use thiserror::Error;

/// Errors raised by the AlloyDB integration.
///
/// Database failures are carried as the original [`sqlx::Error`] and are
/// never retried. Only the two catalog conflicts the index manager can
/// recognise (duplicate name, missing name) are mapped to dedicated variants.
#[derive(Debug, Error)]
pub enum AlloyDbError {
    /// The table layout or a configured identifier is unusable.
    #[error("configuration error: {0}")]
    Config(String),
    /// `apply_vector_index` targeted a name that already exists.
    #[error("index already exists: {0}")]
    IndexExists(String),
    /// `reindex` targeted a name that does not exist.
    #[error("index not found: {0}")]
    IndexNotFound(String),
    /// A node reached the insert path without an embedding.
    #[error("node '{0}' has no embedding")]
    MissingEmbedding(String),
    /// The call style does not match how the engine was built.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AlloyDbError {
    /// SQLSTATE of the underlying database error, if there is one.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.code().map(|c| c.into_owned()),
            _ => None,
        }
    }
}

impl From<AlloyDbError> for SynapticError {
    fn from(err: AlloyDbError) -> Self {
        match err {
            AlloyDbError::Config(msg) => SynapticError::Config(msg),
            AlloyDbError::MissingEmbedding(_) => SynapticError::Validation(err.to_string()),
            other => SynapticError::VectorStore(other.to_string()),
        }
    }
}
